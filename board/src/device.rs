//! The contract every peripheral implements.
//!
//! A [`Device`] pairs the bookkeeping the board needs for any
//! peripheral (name, mapped address range, selection state and bus
//! wiring, collected in a [`Placement`]) with the chip-specific
//! behaviour behind the [`DeviceBehavior`] trait.  The board owns all
//! devices; nothing else keeps one alive.
//!
//! ## Selection
//!
//! On every clock edge the device first recomputes whether the
//! current address bus value lies inside its mapped range, announces
//! a change of selection, and only then calls the behaviour hook.  A
//! device whose behaviour reports an address span of zero is never
//! selected (the LCD, for example, is only reachable through wired
//! ports).
//!
//! ## Port wiring
//!
//! A [`BusConnection`] ties some bits of a named device port to the
//! same number of bits of a bus.  The masks need not be contiguous or
//! aligned; devices convert between the two with
//! [`extract_bits`](base::bits::extract_bits) and
//! [`inject_bits`](base::bits::inject_bits).
use std::any::Any;
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};
use std::ops::RangeInclusive;
use std::time::Duration;

use serde::Serialize;

use base::prelude::*;

use crate::bus::{BusId, BusSet};
use crate::config::DeviceType;
use crate::context::Context;
use crate::event::{BoardEvent, Observer};
use crate::lines::ControlLines;

/// Device-specific identifier of one of its named pin groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PortTag(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusConnection {
    pub port: PortTag,
    pub port_mask: u64,
    pub bus: BusId,
    pub bus_mask: u64,
}

impl BusConnection {
    /// Reads the connected bus bits, packed down to bit 0.
    #[must_use]
    pub fn read(&self, buses: &BusSet) -> u64 {
        extract_bits(buses.data(self.bus), self.bus_mask)
    }

    /// Drives the connected bus bits from `value` (bit 0 of `value`
    /// goes to the lowest bit of the bus mask).
    pub fn write(&self, buses: &mut BusSet, value: u64) -> bool {
        let current = buses.data(self.bus);
        buses.set_data(self.bus, inject_bits(current, self.bus_mask, value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WiringError {
    EmptyName,
    ZeroMask,
    UnknownBus(String),
    UnknownPort(String),
    PortMaskTooWide { port: String, width: u32 },
    MaskWidthMismatch { port_bits: u32, bus_bits: u32 },
}

impl Display for WiringError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WiringError::EmptyName => f.write_str("bus or port name is empty"),
            WiringError::ZeroMask => f.write_str("bus or port mask is zero"),
            WiringError::UnknownBus(name) => write!(f, "no such bus {name}"),
            WiringError::UnknownPort(name) => write!(f, "no such port {name}"),
            WiringError::PortMaskTooWide { port, width } => {
                write!(f, "mask for port {port} exceeds its {width} bits")
            }
            WiringError::MaskWidthMismatch {
                port_bits,
                bus_bits,
            } => write!(
                f,
                "port mask selects {port_bits} bits but bus mask selects {bus_bits}"
            ),
        }
    }
}

impl Error for WiringError {}

/// Returned when a device's address range would run past the end of
/// the 16-bit address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRangeError {
    pub start: u16,
    pub span: u32,
}

impl Display for AddressRangeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes starting at {:#06x} do not fit the address space",
            self.span, self.start
        )
    }
}

impl Error for AddressRangeError {}

/// Everything a device hook may touch during one edge.
pub struct Backplane<'a> {
    pub buses: &'a mut BusSet,
    pub lines: &'a mut ControlLines,
    pub context: &'a Context,
    observer: &'a mut dyn Observer,
}

impl<'a> Backplane<'a> {
    pub fn new(
        buses: &'a mut BusSet,
        lines: &'a mut ControlLines,
        context: &'a Context,
        observer: &'a mut dyn Observer,
    ) -> Backplane<'a> {
        Backplane {
            buses,
            lines,
            context,
            observer,
        }
    }

    pub fn publish(&mut self, event: BoardEvent) {
        self.observer.notify(event);
    }

    /// The time base for peripheral delays.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.context.real_elapsed_time
    }
}

/// Where a device sits on the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    name: String,
    address_start: u16,
    address_end: Option<u16>,
    selected: bool,
    connections: Vec<BusConnection>,
}

impl Placement {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    #[must_use]
    pub fn address_start(&self) -> u16 {
        self.address_start
    }

    /// `None` for devices which do not decode any address.
    #[must_use]
    pub fn address_end(&self) -> Option<u16> {
        self.address_end
    }

    #[must_use]
    pub fn address_range(&self) -> Option<RangeInclusive<u16>> {
        self.address_end.map(|end| self.address_start..=end)
    }

    #[must_use]
    pub fn contains(&self, address: u16) -> bool {
        self.address_range()
            .is_some_and(|range| range.contains(&address))
    }

    #[must_use]
    pub fn connections(&self) -> &[BusConnection] {
        &self.connections
    }

    pub fn connections_to(&self, port: PortTag) -> impl Iterator<Item = &BusConnection> {
        self.connections.iter().filter(move |bc| bc.port == port)
    }
}

pub trait DeviceBehavior: Debug + Send + Any {
    fn kind(&self) -> DeviceType;

    /// How many consecutive addresses the device decodes, starting at
    /// its mapped start address.  Zero means the device is unmapped.
    fn address_span(&self) -> u32 {
        0
    }

    fn map_port_tag(&self, _name: &str) -> Option<PortTag> {
        None
    }

    /// Inverse of [`DeviceBehavior::map_port_tag`].
    fn port_tag_name(&self, _tag: PortTag) -> Option<&'static str> {
        None
    }

    /// Number of pins in the port.
    fn port_width(&self, _tag: PortTag) -> u32 {
        8
    }

    fn on_clock_edge(&mut self, edge: StateEdge, placement: &Placement, bp: &mut Backplane<'_>);

    /// Called once the time returned by
    /// [`DeviceBehavior::next_deadline`] has passed.
    fn poll(&mut self, _placement: &Placement, _bp: &mut Backplane<'_>) {}

    /// When the device next wants [`DeviceBehavior::poll`] called.
    fn next_deadline(&self) -> Option<Duration> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[derive(Debug)]
pub struct Device {
    placement: Placement,
    behavior: Box<dyn DeviceBehavior>,
}

impl Device {
    /// # Errors
    ///
    /// Fails when the behaviour's address span starting at
    /// `address_start` does not fit in the address space.
    pub fn new(
        name: impl Into<String>,
        address_start: u16,
        behavior: Box<dyn DeviceBehavior>,
    ) -> Result<Device, AddressRangeError> {
        let span = behavior.address_span();
        let address_end = match span {
            0 => None,
            n => {
                let end = u32::from(address_start) + n - 1;
                match u16::try_from(end) {
                    Ok(end) => Some(end),
                    Err(_) => {
                        return Err(AddressRangeError {
                            start: address_start,
                            span,
                        });
                    }
                }
            }
        };
        Ok(Device {
            placement: Placement {
                name: name.into(),
                address_start,
                address_end,
                selected: false,
                connections: Vec::new(),
            },
            behavior,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.placement.name()
    }

    #[must_use]
    pub fn is_selected(&self) -> bool {
        self.placement.is_selected()
    }

    #[must_use]
    pub fn map_address_start(&self) -> u16 {
        self.placement.address_start()
    }

    #[must_use]
    pub fn map_address_end(&self) -> Option<u16> {
        self.placement.address_end()
    }

    #[must_use]
    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    #[must_use]
    pub fn kind(&self) -> DeviceType {
        self.behavior.kind()
    }

    #[must_use]
    pub fn behavior(&self) -> &dyn DeviceBehavior {
        self.behavior.as_ref()
    }

    #[must_use]
    pub fn downcast_ref<T: DeviceBehavior>(&self) -> Option<&T> {
        self.behavior.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: DeviceBehavior>(&mut self) -> Option<&mut T> {
        self.behavior.as_any_mut().downcast_mut::<T>()
    }

    /// Wires `port_mask` bits of the named port to `bus_mask` bits of
    /// `bus`.
    ///
    /// # Errors
    ///
    /// The connection is rejected when the port name is empty or
    /// unknown to the device, either mask is zero, the port mask
    /// reaches beyond the port's pins, or the two masks select a
    /// different number of bits.
    pub fn add_bus_connection(
        &mut self,
        port_name: &str,
        port_mask: u64,
        bus: BusId,
        bus_mask: u64,
    ) -> Result<(), WiringError> {
        if port_name.is_empty() {
            return Err(WiringError::EmptyName);
        }
        if port_mask == 0 || bus_mask == 0 {
            return Err(WiringError::ZeroMask);
        }
        let port = self
            .behavior
            .map_port_tag(port_name)
            .ok_or_else(|| WiringError::UnknownPort(port_name.to_string()))?;
        let width = self.behavior.port_width(port);
        if port_mask & !width_mask(width) != 0 {
            return Err(WiringError::PortMaskTooWide {
                port: port_name.to_string(),
                width,
            });
        }
        let port_bits = bit_count(port_mask);
        let bus_bits = bit_count(bus_mask);
        if port_bits != bus_bits {
            return Err(WiringError::MaskWidthMismatch {
                port_bits,
                bus_bits,
            });
        }
        self.placement.connections.push(BusConnection {
            port,
            port_mask,
            bus,
            bus_mask,
        });
        Ok(())
    }

    /// Recomputes selection from the address bus and then hands the
    /// edge to the device behaviour.
    pub fn clock_edge(&mut self, edge: StateEdge, bp: &mut Backplane<'_>) {
        let selected = self.placement.contains(bp.buses.address());
        if selected != self.placement.selected {
            self.placement.selected = selected;
            bp.publish(BoardEvent::SelectionChanged {
                device: self.placement.name.clone(),
                selected,
            });
        }
        self.behavior.on_clock_edge(edge, &self.placement, bp);
    }

    pub fn poll(&mut self, bp: &mut Backplane<'_>) {
        self.behavior.poll(&self.placement, bp);
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.behavior.next_deadline()
    }

    /// True when the mapped ranges of the two devices share an
    /// address.  Unmapped devices overlap nothing.
    #[must_use]
    pub fn overlaps(&self, other: &Device) -> bool {
        let mine = self.placement.address_range();
        let theirs = other.placement.address_range();
        match (mine, theirs) {
            (Some(a), Some(b)) => a.start() <= b.end() && b.start() <= a.end(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel as cbc;

    /// A device which decodes `span` addresses and has one port.
    #[derive(Debug)]
    struct Probe {
        span: u32,
        edges: Vec<(StateEdge, bool)>,
    }

    impl Probe {
        fn boxed(span: u32) -> Box<dyn DeviceBehavior> {
            Box::new(Probe {
                span,
                edges: Vec::new(),
            })
        }
    }

    impl DeviceBehavior for Probe {
        fn kind(&self) -> DeviceType {
            DeviceType::Memory
        }

        fn address_span(&self) -> u32 {
            self.span
        }

        fn map_port_tag(&self, name: &str) -> Option<PortTag> {
            (name == "P").then_some(PortTag(0))
        }

        fn on_clock_edge(
            &mut self,
            edge: StateEdge,
            placement: &Placement,
            _bp: &mut Backplane<'_>,
        ) {
            self.edges.push((edge, placement.is_selected()));
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn device(start: u16, span: u32) -> Device {
        Device::new("probe", start, Probe::boxed(span)).expect("range should fit")
    }

    #[test]
    fn address_end_follows_span() {
        assert_eq!(device(0x10, 4).map_address_end(), Some(0x13));
        assert_eq!(device(0x10, 0).map_address_end(), None);
        assert_eq!(device(0xFFFF, 1).map_address_end(), Some(0xFFFF));
        assert!(Device::new("x", 0xFFFF, Probe::boxed(2)).is_err());
    }

    #[test]
    fn overlap_detection() {
        let a = device(0x0000, 0x100);
        let b = device(0x0080, 0x180);
        let c = device(0x0000, 0x80);
        let unmapped = device(0x0000, 0);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!c.overlaps(&b));
        assert!(!unmapped.overlaps(&a));
    }

    #[test]
    fn wiring_rules() {
        let mut d = device(0, 1);
        assert_eq!(
            d.add_bus_connection("", 1, BusId::DATA, 1),
            Err(WiringError::EmptyName)
        );
        assert_eq!(
            d.add_bus_connection("P", 0, BusId::DATA, 1),
            Err(WiringError::ZeroMask)
        );
        assert_eq!(
            d.add_bus_connection("Q", 1, BusId::DATA, 1),
            Err(WiringError::UnknownPort("Q".to_string()))
        );
        assert_eq!(
            d.add_bus_connection("P", 0x100, BusId::DATA, 1),
            Err(WiringError::PortMaskTooWide {
                port: "P".to_string(),
                width: 8
            })
        );
        assert_eq!(
            d.add_bus_connection("P", 0b11, BusId::DATA, 0b1),
            Err(WiringError::MaskWidthMismatch {
                port_bits: 2,
                bus_bits: 1
            })
        );
        assert_eq!(d.add_bus_connection("P", 0xF0, BusId::DATA, 0x0F), Ok(()));
        assert_eq!(d.placement().connections().len(), 1);
    }

    #[test]
    fn connection_moves_bits() {
        let mut buses = BusSet::new();
        let bc = BusConnection {
            port: PortTag(0),
            port_mask: 0x0F,
            bus: BusId::DATA,
            bus_mask: 0xF0,
        };
        buses.set_data(BusId::DATA, 0xA5);
        assert_eq!(bc.read(&buses), 0xA);
        assert!(bc.write(&mut buses, 0x3));
        assert_eq!(buses.data_byte(), 0x35);
    }

    #[test]
    fn selection_is_recomputed_before_the_hook() {
        let mut d = device(0x10, 4);
        let mut buses = BusSet::new();
        let mut lines = ControlLines::default();
        let context = Context::default();
        let (mut tx, rx) = cbc::unbounded();

        buses.set_data(BusId::ADDRESS, 0x12);
        let mut bp = Backplane::new(&mut buses, &mut lines, &context, &mut tx);
        d.clock_edge(StateEdge::Raising, &mut bp);
        d.clock_edge(StateEdge::Falling, &mut bp);
        bp.buses.set_data(BusId::ADDRESS, 0x14);
        d.clock_edge(StateEdge::Raising, &mut bp);

        let probe = d.downcast_ref::<Probe>().expect("probe behaviour");
        assert_eq!(
            probe.edges,
            vec![
                (StateEdge::Raising, true),
                (StateEdge::Falling, true),
                (StateEdge::Raising, false)
            ]
        );
        let events: Vec<BoardEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                BoardEvent::SelectionChanged {
                    device: "probe".to_string(),
                    selected: true
                },
                BoardEvent::SelectionChanged {
                    device: "probe".to_string(),
                    selected: false
                },
            ]
        );
    }
}
