//! MOS 6522 Versatile Interface Adapter core.
//!
//! This is the chip model the [`Via`](super::via::Via) device wraps.
//! It knows nothing about the board: it is driven entirely through
//! the pin word [`ViaPins`], one call to [`Via6522::tick`] per clock
//! cycle.
//!
//! # Registers ($0-$F)
//!
//! | Reg | Name | Description                              |
//! |-----|------|------------------------------------------|
//! | $0  | ORB  | Port B data (handshake)                  |
//! | $1  | ORA  | Port A data (handshake)                  |
//! | $2  | DDRB | Port B direction (1 = output)            |
//! | $3  | DDRA | Port A direction (1 = output)            |
//! | $4  | T1CL | T1 counter low (read clears T1 flag)     |
//! | $5  | T1CH | T1 counter high (write starts T1)        |
//! | $6  | T1LL | T1 latch low                             |
//! | $7  | T1LH | T1 latch high                            |
//! | $8  | T2CL | T2 counter low (read clears T2 flag)     |
//! | $9  | T2CH | T2 counter high (write starts T2)        |
//! | $A  | SR   | Shift register                           |
//! | $B  | ACR  | Auxiliary control                        |
//! | $C  | PCR  | Peripheral control                       |
//! | $D  | IFR  | Interrupt flags                          |
//! | $E  | IER  | Interrupt enable                         |
//! | $F  | ORA  | Port A data (no handshake)               |
//!
//! The shift register is storage only; shifting is not modelled.
use serde::Serialize;

pub const REG_ORB: u8 = 0x0;
pub const REG_ORA: u8 = 0x1;
pub const REG_DDRB: u8 = 0x2;
pub const REG_DDRA: u8 = 0x3;
pub const REG_T1CL: u8 = 0x4;
pub const REG_T1CH: u8 = 0x5;
pub const REG_T1LL: u8 = 0x6;
pub const REG_T1LH: u8 = 0x7;
pub const REG_T2CL: u8 = 0x8;
pub const REG_T2CH: u8 = 0x9;
pub const REG_SR: u8 = 0xA;
pub const REG_ACR: u8 = 0xB;
pub const REG_PCR: u8 = 0xC;
pub const REG_IFR: u8 = 0xD;
pub const REG_IER: u8 = 0xE;
pub const REG_ORA_NH: u8 = 0xF;

pub const IFR_CA2: u8 = 0x01;
pub const IFR_CA1: u8 = 0x02;
pub const IFR_SR: u8 = 0x04;
pub const IFR_CB2: u8 = 0x08;
pub const IFR_CB1: u8 = 0x10;
pub const IFR_T2: u8 = 0x20;
pub const IFR_T1: u8 = 0x40;
pub const IFR_ANY: u8 = 0x80;

const ACR_PA_LATCH: u8 = 0x01;
const ACR_PB_LATCH: u8 = 0x02;
const ACR_T2_COUNT_PB6: u8 = 0x20;
const ACR_T1_FREE_RUN: u8 = 0x40;
const ACR_T1_PB7: u8 = 0x80;

const PCR_CA1_POSITIVE: u8 = 0x01;
const PCR_CB1_POSITIVE: u8 = 0x10;

/// The pins of the chip.  `rw` is high for a read; `cs` combines
/// both chip selects; `rs` holds the four register select lines.
/// `pa` and `pb` carry the external input levels in and the combined
/// port levels out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ViaPins {
    pub rw: bool,
    pub cs: bool,
    pub rs: u8,
    pub data: u8,
    pub pa: u8,
    pub pb: u8,
    pub ca1: bool,
    pub cb1: bool,
    pub irq: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timer {
    counter: u16,
    latch: u16,
    running: bool,
}

impl Timer {
    const RESET: Timer = Timer {
        counter: 0xFFFF,
        latch: 0xFFFF,
        running: false,
    };

    /// Counts down once; returns true on underflow.
    fn count(&mut self) -> bool {
        let (next, underflow) = self.counter.overflowing_sub(1);
        self.counter = next;
        underflow
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via6522 {
    ora: u8,
    orb: u8,
    ddra: u8,
    ddrb: u8,
    ira: u8,
    irb: u8,
    t1: Timer,
    t2: Timer,
    pb7: bool,
    sr: u8,
    acr: u8,
    pcr: u8,
    ifr: u8,
    ier: u8,
    ca1: bool,
    cb1: bool,
    pb6: bool,
}

impl Default for Via6522 {
    fn default() -> Self {
        Self::new()
    }
}

impl Via6522 {
    #[must_use]
    pub fn new() -> Via6522 {
        Via6522 {
            ora: 0,
            orb: 0,
            ddra: 0,
            ddrb: 0,
            ira: 0,
            irb: 0,
            t1: Timer::RESET,
            t2: Timer::RESET,
            pb7: false,
            sr: 0,
            acr: 0,
            pcr: 0,
            ifr: 0,
            ier: 0,
            ca1: false,
            cb1: false,
            pb6: false,
        }
    }

    /// Puts the chip back into its power-on state.
    pub fn reset(&mut self) {
        *self = Via6522::new();
    }

    /// Runs one clock cycle.
    ///
    /// Timers count down before the selected register is accessed, so
    /// a counter read in this cycle already shows this cycle's
    /// decrement.
    pub fn tick(&mut self, mut pins: ViaPins) -> ViaPins {
        self.sample_inputs(&pins);
        self.tick_timers();
        if pins.cs {
            if pins.rw {
                pins.data = self.read(pins.rs);
            } else {
                self.write(pins.rs, pins.data);
            }
        }
        pins.pa = self.port_a_output() | (pins.pa & !self.ddra);
        pins.pb = self.port_b_output() | (pins.pb & !self.port_b_drive_mask());
        pins.irq = self.irq_active();
        pins
    }

    fn sample_inputs(&mut self, pins: &ViaPins) {
        let ca1_edge = if self.pcr & PCR_CA1_POSITIVE != 0 {
            !self.ca1 && pins.ca1
        } else {
            self.ca1 && !pins.ca1
        };
        let cb1_edge = if self.pcr & PCR_CB1_POSITIVE != 0 {
            !self.cb1 && pins.cb1
        } else {
            self.cb1 && !pins.cb1
        };
        self.ca1 = pins.ca1;
        self.cb1 = pins.cb1;
        if ca1_edge {
            self.ifr |= IFR_CA1;
        }
        if cb1_edge {
            self.ifr |= IFR_CB1;
        }
        // With latching enabled the input registers only follow the
        // pins on an active CA1/CB1 transition.
        if self.acr & ACR_PA_LATCH == 0 || ca1_edge {
            self.ira = pins.pa;
        }
        if self.acr & ACR_PB_LATCH == 0 || cb1_edge {
            self.irb = pins.pb;
        }

        let pb6 = pins.pb & 0x40 != 0;
        if self.acr & ACR_T2_COUNT_PB6 != 0 && self.t2.running && self.pb6 && !pb6 {
            self.count_t2();
        }
        self.pb6 = pb6;
    }

    fn tick_timers(&mut self) {
        let free_run = self.acr & ACR_T1_FREE_RUN != 0;
        if (self.t1.running || free_run) && self.t1.count() {
            if self.t1.running {
                self.ifr |= IFR_T1;
            }
            if free_run {
                self.t1.counter = self.t1.latch;
                if self.acr & ACR_T1_PB7 != 0 {
                    self.pb7 = !self.pb7;
                }
            } else {
                self.t1.running = false;
                if self.acr & ACR_T1_PB7 != 0 {
                    self.pb7 = true;
                }
            }
        }
        if self.acr & ACR_T2_COUNT_PB6 == 0 {
            self.count_t2();
        }
    }

    fn count_t2(&mut self) {
        // T2 keeps counting after it fires; it only interrupts once.
        if self.t2.count() && self.t2.running {
            self.t2.running = false;
            self.ifr |= IFR_T2;
        }
    }

    #[must_use]
    pub fn irq_active(&self) -> bool {
        self.ifr & self.ier & 0x7F != 0
    }

    /// Reads register `rs`, with the side effects a read has on the
    /// real chip.
    pub fn read(&mut self, rs: u8) -> u8 {
        match rs & 0x0F {
            REG_ORB => {
                self.ifr &= !(IFR_CB1 | IFR_CB2);
                self.read_port_b()
            }
            REG_ORA => {
                self.ifr &= !(IFR_CA1 | IFR_CA2);
                self.ira
            }
            REG_DDRB => self.ddrb,
            REG_DDRA => self.ddra,
            REG_T1CL => {
                self.ifr &= !IFR_T1;
                self.t1.counter as u8
            }
            REG_T1CH => (self.t1.counter >> 8) as u8,
            REG_T1LL => self.t1.latch as u8,
            REG_T1LH => (self.t1.latch >> 8) as u8,
            REG_T2CL => {
                self.ifr &= !IFR_T2;
                self.t2.counter as u8
            }
            REG_T2CH => (self.t2.counter >> 8) as u8,
            REG_SR => {
                self.ifr &= !IFR_SR;
                self.sr
            }
            REG_ACR => self.acr,
            REG_PCR => self.pcr,
            REG_IFR => self.ifr(),
            REG_IER => self.ier | 0x80,
            _ => self.ira,
        }
    }

    pub fn write(&mut self, rs: u8, value: u8) {
        match rs & 0x0F {
            REG_ORB => {
                self.ifr &= !(IFR_CB1 | IFR_CB2);
                self.orb = value;
            }
            REG_ORA => {
                self.ifr &= !(IFR_CA1 | IFR_CA2);
                self.ora = value;
            }
            REG_DDRB => self.ddrb = value,
            REG_DDRA => self.ddra = value,
            REG_T1CL | REG_T1LL => {
                self.t1.latch = (self.t1.latch & 0xFF00) | u16::from(value);
            }
            REG_T1CH => {
                self.t1.latch = (self.t1.latch & 0x00FF) | (u16::from(value) << 8);
                self.t1.counter = self.t1.latch;
                self.t1.running = true;
                self.ifr &= !IFR_T1;
                if self.acr & ACR_T1_PB7 != 0 {
                    self.pb7 = false;
                }
            }
            REG_T1LH => {
                self.t1.latch = (self.t1.latch & 0x00FF) | (u16::from(value) << 8);
                self.ifr &= !IFR_T1;
            }
            REG_T2CL => {
                self.t2.latch = (self.t2.latch & 0xFF00) | u16::from(value);
            }
            REG_T2CH => {
                self.t2.counter = (u16::from(value) << 8) | (self.t2.latch & 0x00FF);
                self.t2.running = true;
                self.ifr &= !IFR_T2;
            }
            REG_SR => {
                self.sr = value;
                self.ifr &= !IFR_SR;
            }
            REG_ACR => self.acr = value,
            REG_PCR => self.pcr = value,
            REG_IFR => self.ifr &= !(value & 0x7F),
            REG_IER => {
                if value & 0x80 != 0 {
                    self.ier |= value & 0x7F;
                } else {
                    self.ier &= !value;
                }
            }
            _ => self.ora = value,
        }
    }

    fn read_port_b(&self) -> u8 {
        self.port_b_output() | (self.irb & !self.port_b_drive_mask())
    }

    fn port_b_drive_mask(&self) -> u8 {
        if self.acr & ACR_T1_PB7 != 0 {
            self.ddrb | 0x80
        } else {
            self.ddrb
        }
    }

    /// Levels driven onto port A by the chip.
    #[must_use]
    pub fn port_a_output(&self) -> u8 {
        self.ora & self.ddra
    }

    /// Levels driven onto port B by the chip, including PB7 when
    /// timer 1 controls it.
    #[must_use]
    pub fn port_b_output(&self) -> u8 {
        let out = self.orb & self.ddrb;
        if self.acr & ACR_T1_PB7 != 0 {
            (out & 0x7F) | if self.pb7 { 0x80 } else { 0 }
        } else {
            out
        }
    }

    #[must_use]
    pub fn ddra(&self) -> u8 {
        self.ddra
    }

    #[must_use]
    pub fn ddrb(&self) -> u8 {
        self.ddrb
    }

    #[must_use]
    pub fn t1_counter(&self) -> u16 {
        self.t1.counter
    }

    #[must_use]
    pub fn t1_latch(&self) -> u16 {
        self.t1.latch
    }

    #[must_use]
    pub fn t2_counter(&self) -> u16 {
        self.t2.counter
    }

    #[must_use]
    pub fn t2_latch(&self) -> u8 {
        self.t2.latch as u8
    }

    #[must_use]
    pub fn acr(&self) -> u8 {
        self.acr
    }

    #[must_use]
    pub fn pcr(&self) -> u8 {
        self.pcr
    }

    #[must_use]
    pub fn sr(&self) -> u8 {
        self.sr
    }

    /// IFR with bit 7 reflecting any enabled, active interrupt.
    #[must_use]
    pub fn ifr(&self) -> u8 {
        if self.irq_active() {
            self.ifr | IFR_ANY
        } else {
            self.ifr & 0x7F
        }
    }

    #[must_use]
    pub fn ier(&self) -> u8 {
        self.ier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(via: &mut Via6522, rs: u8, data: u8) -> ViaPins {
        via.tick(ViaPins {
            cs: true,
            rs,
            data,
            ..ViaPins::default()
        })
    }

    fn read(via: &mut Via6522, rs: u8) -> u8 {
        via.tick(ViaPins {
            cs: true,
            rw: true,
            rs,
            ..ViaPins::default()
        })
        .data
    }

    fn idle(via: &mut Via6522) -> ViaPins {
        via.tick(ViaPins::default())
    }

    #[test]
    fn unselected_chip_ignores_the_data_bus() {
        let mut via = Via6522::new();
        via.tick(ViaPins {
            cs: false,
            rs: REG_DDRA,
            data: 0xFF,
            ..ViaPins::default()
        });
        assert_eq!(via.ddra(), 0);
    }

    #[test]
    fn timer1_one_shot() {
        let mut via = Via6522::new();
        write(&mut via, REG_IER, 0x80 | IFR_T1);
        write(&mut via, REG_T1CL, 2);
        write(&mut via, REG_T1CH, 0);
        assert_eq!(via.t1_counter(), 2);
        assert!(!idle(&mut via).irq); // 1
        assert!(!idle(&mut via).irq); // 0
        assert!(idle(&mut via).irq); // underflow
        assert_eq!(via.ifr(), IFR_ANY | IFR_T1);
        // Reading T1CL acknowledges.
        read(&mut via, REG_T1CL);
        assert!(!idle(&mut via).irq);
        // One-shot: no second interrupt.
        for _ in 0..0x10 {
            assert!(!idle(&mut via).irq);
        }
    }

    #[test]
    fn timer1_free_run_reloads_and_toggles_pb7() {
        let mut via = Via6522::new();
        write(&mut via, REG_ACR, ACR_T1_FREE_RUN | ACR_T1_PB7);
        write(&mut via, REG_DDRB, 0x80);
        write(&mut via, REG_T1CL, 1);
        write(&mut via, REG_T1CH, 0);
        idle(&mut via); // 0
        let pins = idle(&mut via); // underflow, reload
        assert_eq!(via.t1_counter(), 1);
        assert_eq!(pins.pb & 0x80, 0x80);
        assert_ne!(via.ifr() & IFR_T1, 0);
        idle(&mut via);
        let pins = idle(&mut via);
        assert_eq!(pins.pb & 0x80, 0);
    }

    #[test]
    fn timer2_timed_and_pulse_counting() {
        let mut via = Via6522::new();
        write(&mut via, REG_T2CL, 1);
        write(&mut via, REG_T2CH, 0);
        idle(&mut via);
        idle(&mut via);
        assert_ne!(via.ifr() & IFR_T2, 0);
        // 1, 0, 0xFFFF on the idle cycles; the read cycle decrements
        // once more before the register is read.
        assert_eq!(via.t2_counter(), 0xFFFF);
        assert_eq!(read(&mut via, REG_T2CL), 0xFE);
        assert_eq!(via.t2_counter(), 0xFFFE);
        assert_eq!(via.ifr() & IFR_T2, 0);

        let mut via = Via6522::new();
        write(&mut via, REG_ACR, ACR_T2_COUNT_PB6);
        write(&mut via, REG_T2CL, 1);
        write(&mut via, REG_T2CH, 0);
        for _ in 0..4 {
            idle(&mut via);
        }
        assert_eq!(via.t2_counter(), 1);
        for level in [0x40, 0x00, 0x40, 0x00] {
            via.tick(ViaPins {
                pb: level,
                ..ViaPins::default()
            });
        }
        assert_ne!(via.ifr() & IFR_T2, 0);
    }

    #[test]
    fn ifr_and_ier_semantics() {
        let mut via = Via6522::new();
        write(&mut via, REG_IER, 0x80 | IFR_T1 | IFR_CB1);
        assert_eq!(read(&mut via, REG_IER), 0x80 | IFR_T1 | IFR_CB1);
        write(&mut via, REG_IER, IFR_T1);
        assert_eq!(via.ier(), IFR_CB1);

        write(&mut via, REG_PCR, PCR_CB1_POSITIVE);
        via.tick(ViaPins {
            cb1: true,
            ..ViaPins::default()
        });
        assert_eq!(via.ifr(), IFR_ANY | IFR_CB1);
        write(&mut via, REG_IFR, IFR_CB1);
        assert_eq!(via.ifr(), 0);
    }

    #[test]
    fn ports_combine_outputs_and_inputs() {
        let mut via = Via6522::new();
        write(&mut via, REG_DDRA, 0x0F);
        write(&mut via, REG_ORA, 0xAB);
        let pins = via.tick(ViaPins {
            pa: 0xC0,
            ..ViaPins::default()
        });
        assert_eq!(pins.pa, 0xCB);
        let value = via
            .tick(ViaPins {
                cs: true,
                rw: true,
                rs: REG_ORA_NH,
                pa: 0x50,
                ..ViaPins::default()
            })
            .data;
        assert_eq!(value, 0x50);
    }

    #[test]
    fn ca1_latches_port_a() {
        let mut via = Via6522::new();
        write(&mut via, REG_ACR, ACR_PA_LATCH);
        write(&mut via, REG_PCR, PCR_CA1_POSITIVE);
        via.tick(ViaPins {
            pa: 0x11,
            ca1: true,
            ..ViaPins::default()
        });
        via.tick(ViaPins {
            pa: 0x22,
            ca1: true,
            ..ViaPins::default()
        });
        assert_ne!(via.ifr() & IFR_CA1, 0);
        assert_eq!(read(&mut via, REG_ORA), 0x11);
        assert_eq!(via.ifr() & IFR_CA1, 0);
    }

    #[test]
    fn reset_restores_power_on_state() {
        let mut via = Via6522::new();
        write(&mut via, REG_DDRB, 0xFF);
        write(&mut via, REG_ACR, 0x40);
        via.reset();
        assert_eq!(via, Via6522::new());
    }
}
