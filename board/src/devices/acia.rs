//! A 6551-style asynchronous serial interface.
//!
//! Four registers are decoded from the low two address bits.  There
//! is no real serial line: a byte written to the data register is
//! reported through [`BoardEvent::AciaSendByte`] after the time it
//! would take to shift it out, and bytes handed to
//! [`Acia::receive_byte`] are queued and arrive in the receive data
//! register one character time apart.
//!
//! The W65C51 has a well known defect: the transmitter-empty status
//! bit is stuck and no interrupt is raised when a transmission
//! completes.  Programs for the real chip work around it with delay
//! loops, so it is reproduced here.
use std::any::Any;
use std::collections::VecDeque;
use std::time::Duration;

use tracing::{event, Level};

use base::prelude::*;

use crate::bus::BusId;
use crate::config::DeviceType;
use crate::device::{Backplane, DeviceBehavior, Placement};
use crate::event::BoardEvent;

pub const REG_DATA: u8 = 0x00;
pub const REG_STATUS: u8 = 0x01;
pub const REG_COMMAND: u8 = 0x02;
pub const REG_CONTROL: u8 = 0x03;

pub const STATUS_PARITY_ERROR: u8 = 0x01;
pub const STATUS_FRAMING_ERROR: u8 = 0x02;
pub const STATUS_OVERRUN: u8 = 0x04;
pub const STATUS_RECEIVER_FULL: u8 = 0x08;
pub const STATUS_TRANSMITTER_EMPTY: u8 = 0x10;
pub const STATUS_DCD: u8 = 0x20;
pub const STATUS_DSR: u8 = 0x40;
pub const STATUS_IRQ: u8 = 0x80;

pub const COMMAND_DTR: u8 = 0x01;
pub const COMMAND_RECEIVER_IRQ_DISABLED: u8 = 0x02;

/// Character time for each baud rate selection of the control
/// register, in delay units.  Selection 0 is the external clock.
pub const BAUD_TIME_MAP: [u32; 16] = [
    9, 20000, 13333, 9174, 7463, 6667, 3333, 1667, 833, 556, 417, 278, 208, 139, 104, 52,
];

pub const DEFAULT_BAUD_DELAY_FACTOR: u32 = 10;

const ADDRESS_SPAN: u32 = 4;

#[derive(Debug)]
pub struct Acia {
    control: u8,
    command: u8,
    status: u8,
    transmit_data: u8,
    receive_data: u8,
    receive_fifo: VecDeque<u8>,
    transmit_deadline: Option<Duration>,
    receive_deadline: Option<Duration>,
    baud_delay_factor: u32,
}

impl Default for Acia {
    fn default() -> Self {
        Self::new()
    }
}

impl Acia {
    #[must_use]
    pub fn new() -> Acia {
        Acia {
            control: 0,
            command: 0,
            status: STATUS_TRANSMITTER_EMPTY,
            transmit_data: 0,
            receive_data: 0,
            receive_fifo: VecDeque::new(),
            transmit_deadline: None,
            receive_deadline: None,
            baud_delay_factor: DEFAULT_BAUD_DELAY_FACTOR,
        }
    }

    #[must_use]
    pub fn status(&self) -> u8 {
        self.status
    }

    #[must_use]
    pub fn command(&self) -> u8 {
        self.command
    }

    #[must_use]
    pub fn control(&self) -> u8 {
        self.control
    }

    /// The baud rate selection field of the control register.
    #[must_use]
    pub fn baud_rate(&self) -> u8 {
        self.control & 0x0F
    }

    #[must_use]
    pub fn is_transmitting(&self) -> bool {
        self.transmit_deadline.is_some()
    }

    #[must_use]
    pub fn is_receiving(&self) -> bool {
        self.receive_deadline.is_some()
    }

    #[must_use]
    pub fn pending_input(&self) -> usize {
        self.receive_fifo.len()
    }

    pub fn set_baud_delay_factor(&mut self, factor: u32) {
        self.baud_delay_factor = factor;
    }

    /// Time to shift one character at the current baud rate; one
    /// delay unit is a microsecond.
    #[must_use]
    pub fn baud_delay(&self) -> Duration {
        let ticks = BAUD_TIME_MAP[usize::from(self.baud_rate())];
        Duration::from_micros(u64::from(ticks) * u64::from(self.baud_delay_factor))
    }

    /// Queues a byte arriving on the serial line.  Returns true when
    /// this started the receiver.
    pub fn receive_byte(&mut self, byte: u8, now: Duration) -> bool {
        self.receive_fifo.push_back(byte);
        if self.receive_deadline.is_none() {
            self.receive_deadline = Some(now + self.baud_delay());
            true
        } else {
            false
        }
    }

    fn reset_chip(&mut self, hard: bool) {
        if hard {
            self.status = STATUS_TRANSMITTER_EMPTY;
            self.control = 0;
            self.command = 0;
        } else {
            self.status &= !STATUS_OVERRUN;
            self.command &= 0b1110_0000;
        }
    }

    fn write_register(
        &mut self,
        register: u8,
        data: u8,
        placement: &Placement,
        bp: &mut Backplane<'_>,
    ) {
        match register {
            REG_DATA => {
                self.transmit_data = data;
                // Stuck bit, see the module documentation.
                self.status |= STATUS_TRANSMITTER_EMPTY;
                if self.transmit_deadline.is_none() {
                    self.transmit_deadline = Some(bp.now() + self.baud_delay());
                    bp.publish(BoardEvent::AciaTransmittingChanged {
                        device: placement.name().to_string(),
                        transmitting: true,
                    });
                }
            }
            REG_STATUS => self.reset_chip(false),
            REG_COMMAND => self.command = data,
            _ => self.control = data,
        }
    }

    fn read_register(&mut self, register: u8) -> u8 {
        match register {
            REG_DATA => {
                self.status &= !(STATUS_PARITY_ERROR
                    | STATUS_FRAMING_ERROR
                    | STATUS_OVERRUN
                    | STATUS_RECEIVER_FULL);
                self.receive_data
            }
            REG_STATUS => {
                let value = self.status;
                self.status &= !STATUS_IRQ;
                value
            }
            REG_COMMAND => self.command,
            _ => self.control,
        }
    }

    fn registers(&self) -> (u8, u8, u8) {
        (self.status, self.command, self.control)
    }

    fn transmit_complete(&mut self, placement: &Placement, bp: &mut Backplane<'_>) {
        self.transmit_deadline = None;
        event!(
            Level::DEBUG,
            "{}: sent byte {:#04x}",
            placement.name(),
            self.transmit_data
        );
        bp.publish(BoardEvent::AciaSendByte {
            device: placement.name().to_string(),
            byte: self.transmit_data,
        });
        bp.publish(BoardEvent::AciaTransmittingChanged {
            device: placement.name().to_string(),
            transmitting: false,
        });
        // Deliberately neither transmitter-empty nor IRQ.
    }

    fn receive_complete(&mut self, placement: &Placement, bp: &mut Backplane<'_>) {
        self.receive_deadline = None;
        if let Some(byte) = self.receive_fifo.pop_front() {
            if self.status & STATUS_RECEIVER_FULL != 0 {
                event!(Level::DEBUG, "{}: receive overrun", placement.name());
                self.status |= STATUS_OVERRUN;
            } else {
                self.receive_data = byte;
                self.status |= STATUS_RECEIVER_FULL;
                if self.command & COMMAND_RECEIVER_IRQ_DISABLED == 0 {
                    self.status |= STATUS_IRQ;
                }
            }
            bp.publish(BoardEvent::AciaRegistersChanged {
                device: placement.name().to_string(),
            });
        }
        if !self.receive_fifo.is_empty() {
            self.receive_deadline = Some(bp.now() + self.baud_delay());
        } else {
            bp.publish(BoardEvent::AciaReceivingChanged {
                device: placement.name().to_string(),
                receiving: false,
            });
        }
    }
}

impl DeviceBehavior for Acia {
    fn kind(&self) -> DeviceType {
        DeviceType::Acia
    }

    fn address_span(&self) -> u32 {
        ADDRESS_SPAN
    }

    fn on_clock_edge(&mut self, edge: StateEdge, placement: &Placement, bp: &mut Backplane<'_>) {
        let before = self.registers();
        if bp.lines.in_reset() {
            self.reset_chip(true);
        } else {
            if edge.is_raising() && placement.is_selected() {
                let register = bp.buses.address() as u8 & 0x03;
                if bp.lines.is_write() {
                    self.write_register(register, bp.buses.data_byte(), placement, bp);
                } else if bp.lines.is_read() {
                    let value = self.read_register(register);
                    bp.buses.set_data(BusId::DATA, u64::from(value));
                }
            }
            if self.status & STATUS_IRQ != 0 {
                bp.lines.irq = WireState::Low;
            }
        }
        if self.registers() != before {
            bp.publish(BoardEvent::AciaRegistersChanged {
                device: placement.name().to_string(),
            });
        }
    }

    fn poll(&mut self, placement: &Placement, bp: &mut Backplane<'_>) {
        let now = bp.now();
        if self.transmit_deadline.is_some_and(|t| t <= now) {
            self.transmit_complete(placement, bp);
        }
        if self.receive_deadline.is_some_and(|t| t <= now) {
            self.receive_complete(placement, bp);
        }
    }

    fn next_deadline(&self) -> Option<Duration> {
        match (self.transmit_deadline, self.receive_deadline) {
            (Some(t), Some(r)) => Some(t.min(r)),
            (t, r) => t.or(r),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
