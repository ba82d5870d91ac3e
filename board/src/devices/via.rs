//! A 6522 parallel I/O adapter on the board.
//!
//! The chip itself is modelled by [`Via6522`]; this device feeds it
//! the board's buses and control lines once per raising edge and
//! carries the results back.
//!
//! Ports A and B can be wired bit by bit to any bus.  Only wired bits
//! whose direction matches the transfer take part: input bits are
//! read from the bus before the chip ticks, output bits are driven
//! onto the bus afterwards.
use std::any::Any;

use base::prelude::*;

use crate::bus::BusId;
use crate::config::DeviceType;
use crate::device::{Backplane, BusConnection, DeviceBehavior, Placement, PortTag};
use crate::event::{BoardEvent, ViaPort, ViaTimer};

use super::m6522::{Via6522, ViaPins, REG_ORA, REG_ORB};

pub const PORT_A: PortTag = PortTag(0);
pub const PORT_B: PortTag = PortTag(1);

const ADDRESS_SPAN: u32 = 16;

#[derive(Debug)]
pub struct Via {
    chip: Via6522,
    pins: ViaPins,
    use_nmi: bool,
}

impl Default for Via {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Reads the input bits of one port connection from its bus and
/// merges them into `pins`.
fn inject_port(bc: &BusConnection, bus_value: u64, pins: u8, directions: u8) -> u8 {
    let port_mask = bc.port_mask as u8;
    let in_mask = port_mask & !directions;
    if in_mask == 0 {
        return pins;
    }
    let norm_in_mask = extract_bits(in_mask, port_mask);
    let bus_in_mask = inject_bits(0u64, bc.bus_mask, u64::from(norm_in_mask));
    let value = extract_bits(bus_value, bus_in_mask);
    inject_bits(pins, in_mask, value as u8)
}

/// Computes the new bus value with the output bits of one port
/// connection driven from `pins`, or `None` if none of the wired
/// bits is an output.
fn populate_port(bc: &BusConnection, bus_value: u64, pins: u8, directions: u8) -> Option<u64> {
    let port_mask = bc.port_mask as u8;
    let out_mask = port_mask & directions;
    if out_mask == 0 {
        return None;
    }
    let norm_out_mask = extract_bits(out_mask, port_mask);
    let bus_out_mask = inject_bits(0u64, bc.bus_mask, u64::from(norm_out_mask));
    let value = extract_bits(pins, out_mask);
    Some(inject_bits(bus_value, bus_out_mask, u64::from(value)))
}

impl Via {
    #[must_use]
    pub fn new(use_nmi: bool) -> Via {
        Via {
            chip: Via6522::new(),
            pins: ViaPins::default(),
            use_nmi,
        }
    }

    #[must_use]
    pub fn chip(&self) -> &Via6522 {
        &self.chip
    }

    #[must_use]
    pub fn uses_nmi(&self) -> bool {
        self.use_nmi
    }

    #[must_use]
    pub fn pa(&self) -> u8 {
        self.pins.pa
    }

    #[must_use]
    pub fn pb(&self) -> u8 {
        self.pins.pb
    }

    /// Sets the external level of the port A pins.  Returns true if
    /// anything changed.
    pub fn set_pa(&mut self, value: u8) -> bool {
        let changed = self.pins.pa != value;
        self.pins.pa = value;
        changed
    }

    pub fn set_pb(&mut self, value: u8) -> bool {
        let changed = self.pins.pb != value;
        self.pins.pb = value;
        changed
    }

    pub fn set_port(&mut self, port: ViaPort, value: u8) -> bool {
        match port {
            ViaPort::A => self.set_pa(value),
            ViaPort::B => self.set_pb(value),
        }
    }

    #[must_use]
    pub fn pa_dir(&self) -> u8 {
        self.chip.ddra()
    }

    #[must_use]
    pub fn pb_dir(&self) -> u8 {
        self.chip.ddrb()
    }

    #[must_use]
    pub fn t1(&self) -> u16 {
        self.chip.t1_counter()
    }

    #[must_use]
    pub fn t1_latch(&self) -> u16 {
        self.chip.t1_latch()
    }

    #[must_use]
    pub fn t2(&self) -> u16 {
        self.chip.t2_counter()
    }

    #[must_use]
    pub fn t2_latch(&self) -> u8 {
        self.chip.t2_latch()
    }

    #[must_use]
    pub fn ifr(&self) -> u8 {
        self.chip.ifr()
    }

    #[must_use]
    pub fn ier(&self) -> u8 {
        self.chip.ier()
    }

    fn inject_ports(&mut self, placement: &Placement, bp: &mut Backplane<'_>) {
        for bc in placement.connections() {
            let bus_value = bp.buses.data(bc.bus);
            let (port, before) = match bc.port {
                PORT_A => (ViaPort::A, self.pins.pa),
                PORT_B => (ViaPort::B, self.pins.pb),
                _ => continue,
            };
            let value = match port {
                ViaPort::A => inject_port(bc, bus_value, before, self.chip.ddra()),
                ViaPort::B => inject_port(bc, bus_value, before, self.chip.ddrb()),
            };
            if self.set_port(port, value) {
                bp.publish(BoardEvent::ViaPortChanged {
                    device: placement.name().to_string(),
                    port,
                    value,
                });
            }
        }
    }

    fn populate_ports(&self, placement: &Placement, bp: &mut Backplane<'_>) {
        for bc in placement.connections() {
            let (pins, directions) = match bc.port {
                PORT_A => (self.pins.pa, self.chip.ddra()),
                PORT_B => (self.pins.pb, self.chip.ddrb()),
                _ => continue,
            };
            if let Some(value) = populate_port(bc, bp.buses.data(bc.bus), pins, directions) {
                bp.buses.set_data(bc.bus, value);
            }
        }
    }
}

impl DeviceBehavior for Via {
    fn kind(&self) -> DeviceType {
        DeviceType::Via
    }

    fn address_span(&self) -> u32 {
        ADDRESS_SPAN
    }

    fn map_port_tag(&self, name: &str) -> Option<PortTag> {
        match name {
            "PA" => Some(PORT_A),
            "PB" => Some(PORT_B),
            _ => None,
        }
    }

    fn port_tag_name(&self, tag: PortTag) -> Option<&'static str> {
        match tag {
            PORT_A => Some("PA"),
            PORT_B => Some("PB"),
            _ => None,
        }
    }

    fn on_clock_edge(&mut self, edge: StateEdge, placement: &Placement, bp: &mut Backplane<'_>) {
        if bp.lines.in_reset() {
            self.chip.reset();
            self.pins = ViaPins::default();
            return;
        }
        if !edge.is_raising() {
            return;
        }

        let t1_before = self.chip.t1_counter();
        let t2_before = self.chip.t2_counter();
        let ifr_before = self.chip.ifr();
        let register = (bp.buses.address() & 0x0F) as u8;

        self.pins.rw = bp.lines.rw.is_high();
        self.pins.cs = placement.is_selected();
        self.pins.rs = register;
        self.pins.data = bp.buses.data_byte();
        self.inject_ports(placement, bp);

        self.pins = self.chip.tick(self.pins);

        if self.pins.irq {
            if self.use_nmi {
                bp.lines.nmi = WireState::Low;
            } else {
                bp.lines.irq = WireState::Low;
            }
        }

        let device = placement.name();
        if placement.is_selected() {
            if bp.lines.is_read() {
                bp.buses.set_data(BusId::DATA, u64::from(self.pins.data));
            } else {
                bp.publish(match register {
                    REG_ORA => BoardEvent::ViaPortChanged {
                        device: device.to_string(),
                        port: ViaPort::A,
                        value: self.pins.pa,
                    },
                    REG_ORB => BoardEvent::ViaPortChanged {
                        device: device.to_string(),
                        port: ViaPort::B,
                        value: self.pins.pb,
                    },
                    _ => BoardEvent::ViaRegisterChanged {
                        device: device.to_string(),
                        register,
                    },
                });
            }
        }

        self.populate_ports(placement, bp);

        if t1_before != self.chip.t1_counter() {
            bp.publish(BoardEvent::ViaTimerChanged {
                device: device.to_string(),
                timer: ViaTimer::T1,
                value: self.chip.t1_counter(),
            });
        }
        if t2_before != self.chip.t2_counter() {
            bp.publish(BoardEvent::ViaTimerChanged {
                device: device.to_string(),
                timer: ViaTimer::T2,
                value: self.chip.t2_counter(),
            });
        }
        if ifr_before != self.chip.ifr() {
            bp.publish(BoardEvent::ViaIfrChanged {
                device: device.to_string(),
                value: self.chip.ifr(),
            });
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
