//! Character display.
//!
//! The display has no address of its own.  Its DATA, RS, RW and EN
//! pins are wired to buses (usually the port lines of a VIA) and it
//! looks at them on every clock edge, not just the raising one, so
//! that its state stays right while the board is single stepped.
use std::any::Any;
use std::time::Duration;

use base::prelude::*;

use crate::config::DeviceType;
use crate::device::{Backplane, DeviceBehavior, Placement, PortTag};
use crate::event::BoardEvent;

use super::hd44780::{Hd44780, LcdChange, PIN_DATA, PIN_EN, PIN_RS, PIN_RW};

pub const PORT_DATA: PortTag = PortTag(0);
pub const PORT_RS: PortTag = PortTag(1);
pub const PORT_RW: PortTag = PortTag(2);
pub const PORT_EN: PortTag = PortTag(3);

pub const BLINK_INTERVAL: Duration = Duration::from_millis(600);

#[derive(Debug)]
pub struct Lcd {
    chip: Hd44780,
    pins: u16,
    blink: bool,
    blink_deadline: Option<Duration>,
}

impl Default for Lcd {
    fn default() -> Self {
        Self::new(Hd44780::default())
    }
}

/// The bits of the chip's pin word a port occupies.
fn pin_field(port: PortTag) -> Option<u16> {
    match port {
        PORT_DATA => Some(PIN_DATA),
        PORT_RS => Some(PIN_RS),
        PORT_RW => Some(PIN_RW),
        PORT_EN => Some(PIN_EN),
        _ => None,
    }
}

impl Lcd {
    #[must_use]
    pub fn new(chip: Hd44780) -> Lcd {
        Lcd {
            chip,
            pins: 0,
            blink: false,
            blink_deadline: None,
        }
    }

    /// Enables the cursor blink timer.  Without it the cursor is
    /// simply shown when enabled.
    #[must_use]
    pub fn with_blink(mut self, blink: bool) -> Lcd {
        self.blink = blink;
        self
    }

    #[must_use]
    pub fn chip(&self) -> &Hd44780 {
        &self.chip
    }

    #[must_use]
    pub fn pins(&self) -> u16 {
        self.pins
    }

    #[must_use]
    pub fn char_at(&self, address: u8) -> u8 {
        self.chip.char_at(address)
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.chip.is_busy()
    }

    #[must_use]
    pub fn cursor_pos(&self) -> u8 {
        self.chip.cursor_pos()
    }

    #[must_use]
    pub fn display_shift(&self) -> u8 {
        self.chip.display_shift()
    }

    #[must_use]
    pub fn is_display_on(&self) -> bool {
        self.chip.is_display_on()
    }

    #[must_use]
    pub fn is_cursor_on(&self) -> bool {
        self.chip.is_cursor_on()
    }

    fn inject(&mut self, placement: &Placement, bp: &Backplane<'_>) {
        for bc in placement.connections() {
            let Some(field) = pin_field(bc.port) else {
                continue;
            };
            let field_mask = inject_bits(0u16, field, bc.port_mask as u16);
            let value = bc.read(&*bp.buses) as u16;
            self.pins = inject_bits(self.pins, field_mask, value);
        }
    }

    fn populate(&self, placement: &Placement, bp: &mut Backplane<'_>) {
        if !self.chip.was_read() {
            return;
        }
        let data = extract_bits(self.pins, PIN_DATA);
        for bc in placement.connections_to(PORT_DATA) {
            bc.write(bp.buses, u64::from(extract_bits(data, bc.port_mask as u16)));
        }
    }

    fn publish_changes(&mut self, placement: &Placement, bp: &mut Backplane<'_>) {
        for change in self.chip.take_changes() {
            let device = placement.name().to_string();
            bp.publish(match change {
                LcdChange::Character(address) => {
                    BoardEvent::LcdCharacterChanged { device, address }
                }
                LcdChange::Busy => BoardEvent::LcdBusyChanged {
                    device,
                    busy: self.chip.is_busy(),
                },
                LcdChange::CursorPos => BoardEvent::LcdCursorPosChanged {
                    device,
                    position: self.chip.cursor_pos(),
                },
                LcdChange::Cursor => BoardEvent::LcdCursorChanged {
                    device,
                    visible: self.chip.is_cursor_on(),
                },
                LcdChange::Shift => BoardEvent::LcdShiftChanged {
                    device,
                    shift: self.chip.display_shift(),
                },
                LcdChange::Display => BoardEvent::LcdDisplayChanged {
                    device,
                    on: self.chip.is_display_on(),
                },
            });
        }
    }

    fn sync_blink(&mut self, now: Duration) {
        if self.blink && self.chip.is_blinking() {
            if self.blink_deadline.is_none() {
                self.blink_deadline = Some(now + BLINK_INTERVAL);
            }
        } else {
            self.blink_deadline = None;
        }
    }
}

impl DeviceBehavior for Lcd {
    fn kind(&self) -> DeviceType {
        DeviceType::Lcd
    }

    fn map_port_tag(&self, name: &str) -> Option<PortTag> {
        match name {
            "DATA" => Some(PORT_DATA),
            "RS" => Some(PORT_RS),
            "RW" => Some(PORT_RW),
            "EN" => Some(PORT_EN),
            _ => None,
        }
    }

    fn port_tag_name(&self, tag: PortTag) -> Option<&'static str> {
        match tag {
            PORT_DATA => Some("DATA"),
            PORT_RS => Some("RS"),
            PORT_RW => Some("RW"),
            PORT_EN => Some("EN"),
            _ => None,
        }
    }

    fn port_width(&self, tag: PortTag) -> u32 {
        pin_field(tag).map_or(0, bit_count)
    }

    fn on_clock_edge(&mut self, _edge: StateEdge, placement: &Placement, bp: &mut Backplane<'_>) {
        self.inject(placement, bp);
        self.pins = self.chip.cycle(self.pins);
        self.populate(placement, bp);
        self.publish_changes(placement, bp);
        self.sync_blink(bp.now());
    }

    fn poll(&mut self, placement: &Placement, bp: &mut Backplane<'_>) {
        let now = bp.now();
        if self.blink_deadline.is_some_and(|t| t <= now) {
            self.chip.blink();
            self.blink_deadline = Some(now + BLINK_INTERVAL);
            self.publish_changes(placement, bp);
        }
        self.sync_blink(now);
    }

    fn next_deadline(&self) -> Option<Duration> {
        self.blink_deadline
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
