//! HD44780 character display controller core.
//!
//! The controller talks to the processor through eleven pins, packed
//! into a `u16` pin word: eight data lines, register select (RS),
//! read/write (RW, high for a read) and enable (EN).  Reads happen
//! when EN rises, writes are latched when EN falls.
//!
//! After every accepted write the controller stays busy for a fixed
//! number of cycles.  While busy it ignores everything except a read
//! of the status register (RS low, RW high).
//!
//! The core keeps a log of what changed ([`LcdChange`]) which the
//! owning device drains after each cycle.
use base::prelude::*;

pub const PIN_DATA: u16 = 0x00FF;
pub const PIN_RS: u16 = 0x0100;
pub const PIN_RW: u16 = 0x0200;
pub const PIN_EN: u16 = 0x0400;

pub const DDRAM_SIZE: usize = 80;
pub const CGRAM_SIZE: usize = 64;
pub const DEFAULT_BUSY_DELAY: u32 = 20;

/// Number of DDRAM positions in one display line.
pub const LINE_LENGTH: u8 = 40;

const BUSY_FLAG: u8 = 0x80;
const BLANK: u8 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LcdChange {
    Character(u8),
    Busy,
    CursorPos,
    Cursor,
    Shift,
    Display,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ram {
    Display,
    CharacterGenerator,
}

#[derive(Debug, Clone)]
pub struct Hd44780 {
    ddram: [u8; DDRAM_SIZE],
    cgram: [u8; CGRAM_SIZE],
    mpu_pins: u16,
    /// An enable pulse began while busy; its falling edge is ignored.
    blocked_pulse: bool,
    busy: u32,
    busy_delay: u32,
    ram: Ram,
    ram_addr: u8,
    cursor_pos: u8,
    shift: u8,
    increment: bool,
    shift_enabled: bool,
    display_on: bool,
    cursor_enabled: bool,
    cursor_blink: bool,
    cursor_on: bool,
    read_data_valid: bool,
    was_read: bool,
    changes: Vec<LcdChange>,
}

impl Default for Hd44780 {
    fn default() -> Self {
        Self::new(DEFAULT_BUSY_DELAY)
    }
}

impl Hd44780 {
    #[must_use]
    pub fn new(busy_delay: u32) -> Hd44780 {
        Hd44780 {
            ddram: [BLANK; DDRAM_SIZE],
            cgram: [0; CGRAM_SIZE],
            mpu_pins: 0,
            blocked_pulse: false,
            busy: 0,
            busy_delay,
            ram: Ram::Display,
            ram_addr: 0,
            cursor_pos: 0,
            shift: 0,
            increment: true,
            shift_enabled: false,
            display_on: false,
            cursor_enabled: false,
            cursor_blink: false,
            cursor_on: false,
            read_data_valid: false,
            was_read: false,
            changes: Vec::new(),
        }
    }

    /// Runs one cycle with the given pin levels and returns the pins
    /// as the controller leaves them (the data lines carry the result
    /// of a read).
    pub fn cycle(&mut self, pins: u16) -> u16 {
        let previous = std::mem::replace(&mut self.mpu_pins, pins);
        self.was_read = false;

        if self.busy > 0 {
            self.busy -= 1;
            if self.busy == 0 {
                self.changes.push(LcdChange::Busy);
            }
            // Only status reads get through while busy.  An enable
            // pulse seen now must not end in a write once the busy
            // time is over.
            if pins & PIN_RS != 0 || pins & PIN_RW == 0 {
                if pins & PIN_EN != 0 {
                    self.blocked_pulse = true;
                }
                return pins;
            }
        }
        self.bus_cycle(previous, pins)
    }

    fn bus_cycle(&mut self, previous: u16, mut pins: u16) -> u16 {
        let rs = pins & PIN_RS != 0;
        let rw = pins & PIN_RW != 0;
        let en_before = previous & PIN_EN != 0;
        let en_now = pins & PIN_EN != 0;
        if !en_before && en_now {
            self.blocked_pulse = false;
            if rw {
                let value = if rs { self.read_data() } else { self.status() };
                pins = inject_bits(pins, PIN_DATA, u16::from(value));
                self.was_read = true;
            }
        } else if en_before && !en_now {
            if std::mem::take(&mut self.blocked_pulse) {
                return pins;
            }
            if pins & (PIN_RS | PIN_RW) != previous & (PIN_RS | PIN_RW) {
                // RS or RW moved during the enable pulse.
                return pins;
            }
            if !rw {
                let data = extract_bits(pins, PIN_DATA) as u8;
                if rs {
                    self.write_data(data);
                } else {
                    self.instruction(data);
                }
                self.busy = self.busy_delay;
                self.changes.push(LcdChange::Busy);
            }
        }
        pins
    }

    /// True if the last cycle put read data on the pins.
    #[must_use]
    pub fn was_read(&self) -> bool {
        self.was_read
    }

    pub fn take_changes(&mut self) -> Vec<LcdChange> {
        std::mem::take(&mut self.changes)
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy > 0
    }

    #[must_use]
    pub fn char_at(&self, address: u8) -> u8 {
        self.ddram[usize::from(address) % DDRAM_SIZE]
    }

    #[must_use]
    pub fn ddram(&self) -> &[u8] {
        &self.ddram
    }

    #[must_use]
    pub fn cgram(&self) -> &[u8] {
        &self.cgram
    }

    #[must_use]
    pub fn cursor_pos(&self) -> u8 {
        self.cursor_pos
    }

    #[must_use]
    pub fn display_shift(&self) -> u8 {
        self.shift
    }

    #[must_use]
    pub fn is_display_on(&self) -> bool {
        self.display_on
    }

    /// Whether the cursor is currently drawn; blinking toggles this.
    #[must_use]
    pub fn is_cursor_on(&self) -> bool {
        self.cursor_on
    }

    #[must_use]
    pub fn is_blinking(&self) -> bool {
        self.cursor_enabled && self.cursor_blink
    }

    /// One blink phase has passed.
    pub fn blink(&mut self) {
        if self.is_blinking() {
            self.cursor_on = !self.cursor_on;
            self.changes.push(LcdChange::Cursor);
        }
    }

    fn status(&self) -> u8 {
        let busy = if self.busy > 0 { BUSY_FLAG } else { 0 };
        busy | (self.ram_addr & 0x7F)
    }

    fn ram_size(&self) -> u8 {
        match self.ram {
            Ram::Display => DDRAM_SIZE as u8,
            Ram::CharacterGenerator => CGRAM_SIZE as u8,
        }
    }

    fn instruction(&mut self, cmd: u8) {
        self.read_data_valid = false;
        if cmd == 0b0000_0001 {
            self.clear();
        } else if cmd & 0b1111_1110 == 0b0000_0010 {
            self.return_home();
        } else if cmd & 0b1111_1100 == 0b0000_0100 {
            self.increment = cmd & 0b10 != 0;
            self.shift_enabled = cmd & 0b01 != 0;
        } else if cmd & 0b1111_1000 == 0b0000_1000 {
            self.display_on = cmd & 0b100 != 0;
            self.cursor_enabled = cmd & 0b010 != 0;
            self.cursor_blink = cmd & 0b001 != 0;
            self.cursor_control();
            self.changes.push(LcdChange::Display);
        } else if cmd & 0b1111_0000 == 0b0001_0000 {
            let right = cmd & 0b0100 != 0;
            self.ram = Ram::Display;
            if cmd & 0b1000 == 0 {
                self.move_cursor(right);
            } else {
                self.move_display(right);
            }
            self.read_data_valid = true;
        } else if cmd & 0b1110_0000 == 0b0010_0000 {
            // Function set: bus width, line count and font are fixed.
        } else if cmd & 0b1100_0000 == 0b0100_0000 {
            self.ram = Ram::CharacterGenerator;
            self.ram_addr = cmd & 0b0011_1111;
            self.read_data_valid = true;
        } else if cmd & 0b1000_0000 != 0 {
            self.set_ddram_address(cmd & 0b0111_1111);
            self.read_data_valid = true;
        }
    }

    fn clear(&mut self) {
        self.ddram = [BLANK; DDRAM_SIZE];
        self.changes
            .extend((0..DDRAM_SIZE as u8).map(LcdChange::Character));
        self.increment = true;
        self.return_home();
    }

    fn return_home(&mut self) {
        self.set_ddram_address(0);
        self.shift = 0;
        self.changes.push(LcdChange::Shift);
    }

    fn set_ddram_address(&mut self, address: u8) {
        self.ram = Ram::Display;
        self.ram_addr = address % DDRAM_SIZE as u8;
        self.cursor_pos = self.ram_addr;
        self.changes.push(LcdChange::CursorPos);
    }

    fn cursor_control(&mut self) {
        let was_on = self.cursor_on;
        self.cursor_on = self.cursor_enabled;
        if was_on != self.cursor_on {
            self.changes.push(LcdChange::Cursor);
        }
    }

    fn write_data(&mut self, data: u8) {
        let addr = usize::from(self.ram_addr);
        match self.ram {
            Ram::Display => {
                self.ddram[addr] = data;
                self.changes.push(LcdChange::Character(self.ram_addr));
            }
            Ram::CharacterGenerator => {
                self.cgram[addr] = data;
                // Every position showing this glyph changes with it.
                let glyph = self.ram_addr >> 3;
                let changes = &mut self.changes;
                changes.extend(
                    self.ddram
                        .iter()
                        .zip(0u8..)
                        .filter(|(c, _)| **c == glyph)
                        .map(|(_, i)| LcdChange::Character(i)),
                );
            }
        }
        self.read_data_valid = false;
        if self.ram == Ram::Display && self.shift_enabled {
            self.move_display(self.increment);
        }
        self.move_cursor(self.increment);
    }

    fn read_data(&mut self) -> u8 {
        if !self.read_data_valid {
            return 0xFF;
        }
        let addr = usize::from(self.ram_addr);
        let value = match self.ram {
            Ram::Display => self.ddram[addr],
            Ram::CharacterGenerator => self.cgram[addr],
        };
        self.move_cursor(self.increment);
        value
    }

    fn move_display(&mut self, right: bool) {
        self.shift = if right {
            (self.shift + 1) % LINE_LENGTH
        } else {
            self.shift.checked_sub(1).unwrap_or(LINE_LENGTH - 1)
        };
        self.changes.push(LcdChange::Shift);
    }

    fn move_cursor(&mut self, right: bool) {
        let size = self.ram_size();
        self.ram_addr = if right {
            (self.ram_addr + 1) % size
        } else {
            self.ram_addr.checked_sub(1).unwrap_or(size - 1)
        };
        if self.ram == Ram::Display {
            self.cursor_pos = self.ram_addr;
        }
        self.changes.push(LcdChange::CursorPos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUSY: u32 = 3;

    fn write(lcd: &mut Hd44780, rs: bool, data: u8) {
        let mut pins = u16::from(data);
        if rs {
            pins |= PIN_RS;
        }
        lcd.cycle(pins | PIN_EN);
        lcd.cycle(pins);
        wait(lcd);
    }

    fn wait(lcd: &mut Hd44780) {
        while lcd.is_busy() {
            lcd.cycle(0);
        }
    }

    fn read(lcd: &mut Hd44780, rs: bool) -> u8 {
        let mut pins = PIN_RW;
        if rs {
            pins |= PIN_RS;
        }
        lcd.cycle(pins);
        let out = lcd.cycle(pins | PIN_EN);
        assert!(lcd.was_read());
        lcd.cycle(pins);
        extract_bits(out, PIN_DATA) as u8
    }

    fn print(lcd: &mut Hd44780, text: &[u8]) {
        for c in text {
            write(lcd, true, *c);
        }
    }

    #[test]
    fn power_on_state() {
        let lcd = Hd44780::new(BUSY);
        assert!(lcd.ddram().iter().all(|c| *c == b' '));
        assert!(!lcd.is_display_on());
        assert!(!lcd.is_busy());
        assert_eq!(lcd.cursor_pos(), 0);
    }

    #[test]
    fn writing_characters_advances_the_cursor() {
        let mut lcd = Hd44780::new(BUSY);
        print(&mut lcd, b"Hi");
        assert_eq!(lcd.char_at(0), b'H');
        assert_eq!(lcd.char_at(1), b'i');
        assert_eq!(lcd.cursor_pos(), 2);
        let changes = lcd.take_changes();
        assert!(changes.contains(&LcdChange::Character(0)));
        assert!(changes.contains(&LcdChange::Character(1)));
        assert!(changes.contains(&LcdChange::Busy));
    }

    #[test]
    fn busy_blocks_everything_but_status_reads() {
        let mut lcd = Hd44780::new(BUSY);
        lcd.cycle(PIN_RS | u16::from(b'A') | PIN_EN);
        lcd.cycle(PIN_RS | u16::from(b'A'));
        assert!(lcd.is_busy());
        // A second write during the busy time is lost.
        lcd.cycle(PIN_RS | u16::from(b'B') | PIN_EN);
        lcd.cycle(PIN_RS | u16::from(b'B'));
        lcd.cycle(PIN_RW);
        let out = lcd.cycle(PIN_RW | PIN_EN);
        assert!(lcd.was_read());
        assert_eq!(out as u8 & BUSY_FLAG, 0);
        wait(&mut lcd);
        assert_eq!(lcd.char_at(0), b'A');
        assert_eq!(lcd.char_at(1), b' ');
    }

    #[test]
    fn enable_pulse_begun_while_busy_is_not_latched() {
        let mut lcd = Hd44780::new(BUSY);
        lcd.cycle(PIN_RS | u16::from(b'A') | PIN_EN);
        lcd.cycle(PIN_RS | u16::from(b'A'));
        let held = PIN_RS | u16::from(b'B') | PIN_EN;
        while lcd.is_busy() {
            lcd.cycle(held);
        }
        lcd.cycle(held);
        lcd.cycle(PIN_RS | u16::from(b'B'));
        assert!(!lcd.is_busy());
        assert_eq!(lcd.char_at(1), b' ');
        assert_eq!(lcd.cursor_pos(), 1);

        // The next complete pulse is accepted.
        write(&mut lcd, true, b'C');
        assert_eq!(lcd.char_at(1), b'C');
    }

    #[test]
    fn status_reports_busy_flag_and_address() {
        let mut lcd = Hd44780::new(10);
        lcd.cycle(0x85 | PIN_EN);
        lcd.cycle(0x85);
        lcd.cycle(PIN_RW);
        let out = lcd.cycle(PIN_RW | PIN_EN);
        assert_eq!(out as u8, BUSY_FLAG | 0x05);
        wait(&mut lcd);
        assert_eq!(read(&mut lcd, false), 0x05);
    }

    #[test]
    fn command_prefixes() {
        let mut lcd = Hd44780::new(BUSY);
        write(&mut lcd, false, 0b0000_1111); // display, cursor and blink on
        assert!(lcd.is_display_on());
        assert!(lcd.is_cursor_on());
        assert!(lcd.is_blinking());
        print(&mut lcd, b"abc");
        write(&mut lcd, false, 0b0000_0010); // home
        assert_eq!(lcd.cursor_pos(), 0);
        assert_eq!(lcd.char_at(2), b'c');
        write(&mut lcd, false, 0b0001_0100); // cursor right
        assert_eq!(lcd.cursor_pos(), 1);
        write(&mut lcd, false, 0b0001_1000); // display left
        assert_eq!(lcd.display_shift(), LINE_LENGTH - 1);
        write(&mut lcd, false, 0b0000_0001); // clear
        assert_eq!(lcd.char_at(2), b' ');
        assert_eq!(lcd.cursor_pos(), 0);
        assert_eq!(lcd.display_shift(), 0);
        write(&mut lcd, false, 0b1100_0000); // DDRAM 0x40
        assert_eq!(lcd.cursor_pos(), 0x40);
    }

    #[test]
    fn entry_mode_decrement_wraps() {
        let mut lcd = Hd44780::new(BUSY);
        write(&mut lcd, false, 0b0000_0100); // decrement, no shift
        print(&mut lcd, b"x");
        assert_eq!(lcd.char_at(0), b'x');
        assert_eq!(lcd.cursor_pos(), 79);
    }

    #[test]
    fn data_reads_need_an_address_first() {
        let mut lcd = Hd44780::new(BUSY);
        print(&mut lcd, b"Q");
        assert_eq!(read(&mut lcd, true), 0xFF);
        write(&mut lcd, false, 0x80);
        assert_eq!(read(&mut lcd, true), b'Q');
        assert_eq!(lcd.cursor_pos(), 1);
    }

    #[test]
    fn cgram_write_touches_positions_using_the_glyph() {
        let mut lcd = Hd44780::new(BUSY);
        print(&mut lcd, &[0x01, b'-', 0x01]);
        lcd.take_changes();
        write(&mut lcd, false, 0b0100_1000); // CGRAM address 8, glyph 1
        write(&mut lcd, true, 0b10101);
        assert_eq!(lcd.cgram()[8], 0b10101);
        let changes = lcd.take_changes();
        assert!(changes.contains(&LcdChange::Character(0)));
        assert!(changes.contains(&LcdChange::Character(2)));
        assert!(!changes.contains(&LcdChange::Character(1)));
        // The cursor stays put while CGRAM is addressed.
        assert_eq!(lcd.cursor_pos(), 3);
    }

    #[test]
    fn rs_change_during_enable_is_ignored() {
        let mut lcd = Hd44780::new(BUSY);
        lcd.cycle(u16::from(b'Z') | PIN_EN);
        lcd.cycle(u16::from(b'Z') | PIN_RS);
        assert!(!lcd.is_busy());
        assert_eq!(lcd.char_at(0), b' ');
    }

    #[test]
    fn blink_toggles_only_when_enabled() {
        let mut lcd = Hd44780::new(BUSY);
        lcd.blink();
        assert!(!lcd.is_cursor_on());
        write(&mut lcd, false, 0b0000_1011);
        assert!(lcd.is_cursor_on());
        lcd.blink();
        assert!(!lcd.is_cursor_on());
        lcd.blink();
        assert!(lcd.is_cursor_on());
    }
}
