//! Board configuration.
//!
//! A [`BoardConfig`] describes the auxiliary buses and the devices
//! of a board, with the key names of the board file format.  Reading
//! or writing such a file is up to the application; the schema
//! derives `Serialize` and `Deserialize` so any serde format will do.
//!
//! Building a board from its configuration is forgiving.  Buses,
//! devices and connections which make no sense are skipped with a
//! warning, and the load carries on.  Only two things fail a load as
//! a whole: a device which cannot be constructed at all (for example
//! a memory without a size) and devices whose address ranges overlap.
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{event, Level};

use crate::bus::{Bus, BusSet, BusWidth};
use crate::device::{AddressRangeError, Device, DeviceBehavior};
use crate::devices::acia::{Acia, DEFAULT_BAUD_DELAY_FACTOR};
use crate::devices::hd44780::{Hd44780, DEFAULT_BUSY_DELAY};
use crate::devices::{Lcd, Memory, MemoryKind, Via};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Memory,
    #[serde(rename = "VIA")]
    Via,
    #[serde(rename = "ACIA")]
    Acia,
    #[serde(rename = "LCD")]
    Lcd,
    /// Any type this version does not know.
    #[serde(other)]
    Unknown,
}

impl Display for DeviceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceType::Memory => "Memory",
            DeviceType::Via => "VIA",
            DeviceType::Acia => "ACIA",
            DeviceType::Lcd => "LCD",
            DeviceType::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardConfig {
    #[serde(default)]
    pub busses: Vec<BusConfig>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub name: String,
    pub width: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub bus_name: String,
    #[serde(default)]
    pub bus_mask: u64,
    #[serde(default)]
    pub port_name: String,
    #[serde(default)]
    pub port_mask: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(rename = "type")]
    pub kind: DeviceType,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<u16>,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<MemoryKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_size: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub use_nmi: bool,
}

impl DeviceConfig {
    /// A device definition with no connections and nothing optional
    /// filled in.
    #[must_use]
    pub fn new(kind: DeviceType, name: impl Into<String>, address: Option<u16>) -> DeviceConfig {
        DeviceConfig {
            kind,
            name: name.into(),
            address,
            connections: Vec::new(),
            memory_type: None,
            memory_size: None,
            use_nmi: false,
        }
    }
}

/// Tuning of the simulation itself, as opposed to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Length of one full clock cycle.
    pub clock_period: Duration,
    /// Below this the executor holds the clock period by spinning
    /// rather than sleeping.
    pub active_wait_threshold: Duration,
    /// How often cycles-per-second statistics are published.
    pub stats_interval: Duration,
    pub baud_delay_factor: u32,
    /// Cycles the display stays busy after each write.
    pub lcd_busy_delay: u32,
    pub lcd_cursor_blink: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            clock_period: Duration::from_millis(1),
            active_wait_threshold: Duration::from_millis(1),
            stats_interval: Duration::from_secs(1),
            baud_delay_factor: DEFAULT_BAUD_DELAY_FACTOR,
            lcd_busy_delay: DEFAULT_BUSY_DELAY,
            lcd_cursor_blink: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceConfigError {
    MissingAddress,
    MissingMemoryType,
    MissingMemorySize,
    ZeroMemorySize,
    AddressRange(AddressRangeError),
}

impl Display for DeviceConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DeviceConfigError::MissingAddress => f.write_str("address is missing"),
            DeviceConfigError::MissingMemoryType => f.write_str("memory_type is missing"),
            DeviceConfigError::MissingMemorySize => f.write_str("memory_size is missing"),
            DeviceConfigError::ZeroMemorySize => f.write_str("memory_size is zero"),
            DeviceConfigError::AddressRange(e) => write!(f, "{e}"),
        }
    }
}

impl Error for DeviceConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DeviceConfigError::AddressRange(e) => Some(e),
            _ => None,
        }
    }
}

impl From<AddressRangeError> for DeviceConfigError {
    fn from(e: AddressRangeError) -> DeviceConfigError {
        DeviceConfigError::AddressRange(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    Overlap {
        first: String,
        second: String,
    },
    InvalidDevice {
        name: String,
        error: DeviceConfigError,
    },
}

impl Display for LoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Overlap { first, second } => {
                write!(f, "address ranges of {first} and {second} overlap")
            }
            LoadError::InvalidDevice { name, error } => {
                write!(f, "device {name} cannot be built: {error}")
            }
        }
    }
}

impl Error for LoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LoadError::InvalidDevice { error, .. } => Some(error),
            LoadError::Overlap { .. } => None,
        }
    }
}

const ADDRESS_SPACE_SIZE: u64 = 0x1_0000;

/// Adds the configured auxiliary buses to `buses`.
pub(crate) fn build_buses(config: &BoardConfig, buses: &mut BusSet) {
    let mut unnamed = 0;
    for bus in &config.busses {
        let name = if bus.name.is_empty() {
            let name = format!("Bus-{unnamed}");
            unnamed += 1;
            name
        } else {
            bus.name.clone()
        };
        match BusWidth::try_from(bus.width) {
            Ok(width) => {
                if buses.find(&name).is_some() {
                    event!(Level::WARN, "duplicate bus name {}; skipping it", name);
                    continue;
                }
                buses.add(Bus::new(name, width));
            }
            Err(e) => {
                event!(Level::WARN, "bus {}: {}; skipping it", name, e);
            }
        }
    }
}

fn build_behavior(
    config: &DeviceConfig,
    settings: &SimulationConfig,
) -> Result<Option<Box<dyn DeviceBehavior>>, DeviceConfigError> {
    let behavior: Box<dyn DeviceBehavior> = match config.kind {
        DeviceType::Memory => {
            let kind = config
                .memory_type
                .ok_or(DeviceConfigError::MissingMemoryType)?;
            let size = config
                .memory_size
                .ok_or(DeviceConfigError::MissingMemorySize)?;
            if size == 0 {
                return Err(DeviceConfigError::ZeroMemorySize);
            }
            // Check the range before allocating anything.
            let start = config.address.ok_or(DeviceConfigError::MissingAddress)?;
            if u64::from(start) + u64::from(size) > ADDRESS_SPACE_SIZE {
                return Err(DeviceConfigError::AddressRange(AddressRangeError {
                    start,
                    span: size,
                }));
            }
            Box::new(Memory::new(kind, size as usize))
        }
        DeviceType::Via => Box::new(Via::new(config.use_nmi)),
        DeviceType::Acia => {
            let mut acia = Acia::new();
            acia.set_baud_delay_factor(settings.baud_delay_factor);
            Box::new(acia)
        }
        DeviceType::Lcd => Box::new(
            Lcd::new(Hd44780::new(settings.lcd_busy_delay)).with_blink(settings.lcd_cursor_blink),
        ),
        DeviceType::Unknown => return Ok(None),
    };
    Ok(Some(behavior))
}

/// Builds one device and wires it up.  `Ok(None)` means the
/// definition was skipped.
fn build_device(
    config: &DeviceConfig,
    name: String,
    settings: &SimulationConfig,
    buses: &BusSet,
) -> Result<Option<Device>, DeviceConfigError> {
    let Some(behavior) = build_behavior(config, settings)? else {
        event!(Level::WARN, "skipping device {} of unknown type", name);
        return Ok(None);
    };
    let address = match (config.address, behavior.address_span()) {
        (Some(address), _) => address,
        // Unmapped devices have no use for an address.
        (None, 0) => 0,
        (None, _) => return Err(DeviceConfigError::MissingAddress),
    };
    let mut device = Device::new(name, address, behavior)?;
    for connection in &config.connections {
        wire(&mut device, connection, buses);
    }
    Ok(Some(device))
}

fn wire(device: &mut Device, connection: &ConnectionConfig, buses: &BusSet) {
    if connection.bus_name.is_empty() || connection.bus_mask == 0 {
        event!(
            Level::WARN,
            "device {}: invalid bus connection definition {:?}",
            device.name(),
            connection
        );
        return;
    }
    let Some(bus) = buses.find(&connection.bus_name) else {
        event!(
            Level::WARN,
            "device {}: no such bus {}",
            device.name(),
            connection.bus_name
        );
        return;
    };
    if let Err(e) = device.add_bus_connection(
        &connection.port_name,
        connection.port_mask,
        bus,
        connection.bus_mask,
    ) {
        event!(
            Level::WARN,
            "device {}: skipping connection to {}: {}",
            device.name(),
            connection.bus_name,
            e
        );
    }
}

/// Builds every device in `config`, wired to `buses`.
///
/// # Errors
///
/// Fails on the first device which cannot be constructed.
pub(crate) fn build_devices(
    config: &BoardConfig,
    settings: &SimulationConfig,
    buses: &BusSet,
) -> Result<Vec<Device>, LoadError> {
    let mut unnamed = 0;
    let mut devices = Vec::with_capacity(config.devices.len());
    for device_config in &config.devices {
        let name = if device_config.name.is_empty() {
            let name = format!("Device-{unnamed}");
            unnamed += 1;
            name
        } else {
            device_config.name.clone()
        };
        match build_device(device_config, name.clone(), settings, buses) {
            Ok(Some(device)) => devices.push(device),
            Ok(None) => (),
            Err(error) => return Err(LoadError::InvalidDevice { name, error }),
        }
    }
    Ok(devices)
}

/// Checks that no two mapped devices share an address.  Every
/// overlapping pair is logged; the first one is returned.
///
/// # Errors
///
/// `LoadError::Overlap` naming the first overlapping pair.
pub fn validate_overlaps(devices: &[Device]) -> Result<(), LoadError> {
    let mut first_error = None;
    for (i, a) in devices.iter().enumerate() {
        for b in &devices[i + 1..] {
            if a.overlaps(b) {
                event!(
                    Level::WARN,
                    "address map from {} and {} overlap",
                    a.name(),
                    b.name()
                );
                first_error.get_or_insert_with(|| LoadError::Overlap {
                    first: a.name().to_string(),
                    second: b.name().to_string(),
                });
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Describes `device` the way it would appear in a board file.
#[must_use]
pub fn describe_device(device: &Device, buses: &BusSet) -> DeviceConfig {
    let behavior = device.behavior();
    let mut config = DeviceConfig::new(
        device.kind(),
        device.name(),
        device.map_address_end().map(|_| device.map_address_start()),
    );
    config.connections = device
        .placement()
        .connections()
        .iter()
        .filter_map(|bc| {
            Some(ConnectionConfig {
                bus_name: buses.get(bc.bus)?.name().to_string(),
                bus_mask: bc.bus_mask,
                port_name: behavior.port_tag_name(bc.port)?.to_string(),
                port_mask: bc.port_mask,
            })
        })
        .collect();
    if let Some(memory) = device.downcast_ref::<Memory>() {
        config.memory_type = Some(memory.kind());
        config.memory_size = u32::try_from(memory.size()).ok();
    }
    if let Some(via) = device.downcast_ref::<Via>() {
        config.use_nmi = via.uses_nmi();
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusId;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> BoardConfig {
        serde_json::from_value(value).expect("valid board config")
    }

    fn build(config: &BoardConfig) -> (BusSet, Result<Vec<Device>, LoadError>) {
        let mut buses = BusSet::new();
        build_buses(config, &mut buses);
        let devices = build_devices(config, &SimulationConfig::default(), &buses);
        (buses, devices)
    }

    fn sample() -> BoardConfig {
        parse(json!({
            "busses": [
                { "name": "PORTB", "width": 8 },
                { "name": "", "width": 16 },
                { "name": "WIDE", "width": 12 }
            ],
            "devices": [
                { "type": "Memory", "name": "RAM", "address": 0,
                  "memory_type": "RAM", "memory_size": 16384 },
                { "type": "Memory", "name": "ROM", "address": 32768,
                  "memory_type": "ROM", "memory_size": 32768 },
                { "type": "VIA", "name": "VIA", "address": 24576, "use_nmi": true,
                  "connections": [
                      { "bus_name": "PORTB", "bus_mask": 255, "port_name": "PB", "port_mask": 255 },
                      { "bus_name": "NOPE", "bus_mask": 1, "port_name": "PA", "port_mask": 1 },
                      { "bus_name": "PORTB", "bus_mask": 0, "port_name": "PA", "port_mask": 1 },
                      { "bus_name": "PORTB", "bus_mask": 3, "port_name": "PA", "port_mask": 1 },
                      { "bus_name": "PORTB", "bus_mask": 1, "port_name": "PC", "port_mask": 1 }
                  ] },
                { "type": "ACIA", "address": 20480 },
                { "type": "LCD", "name": "LCD",
                  "connections": [
                      { "bus_name": "PORTB", "bus_mask": 240,
                        "port_name": "DATA", "port_mask": 240 }
                  ] },
                { "type": "Teletype", "name": "TTY", "address": 16384 }
            ]
        }))
    }

    #[test]
    fn parses_the_board_file_schema() {
        let config = sample();
        assert_eq!(config.busses.len(), 3);
        assert_eq!(config.devices[0].memory_type, Some(MemoryKind::Ram));
        assert_eq!(config.devices[2].kind, DeviceType::Via);
        assert!(config.devices[2].use_nmi);
        assert_eq!(config.devices[4].address, None);
        assert_eq!(config.devices[5].kind, DeviceType::Unknown);
    }

    #[test]
    fn builds_valid_parts_and_skips_the_rest() {
        let (buses, devices) = build(&sample());
        let devices = devices.expect("load should succeed");

        let names: Vec<&str> = buses.auxiliary().map(|(_, b)| b.name()).collect();
        assert_eq!(names, vec!["PORTB", "Bus-0"]);

        let names: Vec<&str> = devices.iter().map(Device::name).collect();
        assert_eq!(names, vec!["RAM", "ROM", "VIA", "Device-0", "LCD"]);
        assert_eq!(devices[1].map_address_end(), Some(0xFFFF));
        // Only the first VIA connection survives.
        assert_eq!(devices[2].placement().connections().len(), 1);
        assert_eq!(devices[4].map_address_end(), None);
        assert_eq!(devices[4].placement().connections().len(), 1);
        assert!(validate_overlaps(&devices).is_ok());
    }

    #[test]
    fn missing_required_field_fails_the_load() {
        let config = parse(json!({
            "devices": [
                { "type": "Memory", "name": "RAM", "address": 0, "memory_type": "RAM" }
            ]
        }));
        let (_, devices) = build(&config);
        assert_eq!(
            devices.expect_err("no size"),
            LoadError::InvalidDevice {
                name: "RAM".to_string(),
                error: DeviceConfigError::MissingMemorySize
            }
        );

        let config = parse(json!({ "devices": [ { "type": "ACIA", "name": "A" } ] }));
        let (_, devices) = build(&config);
        assert!(matches!(
            devices,
            Err(LoadError::InvalidDevice {
                error: DeviceConfigError::MissingAddress,
                ..
            })
        ));

        let config = parse(json!({
            "devices": [
                { "type": "Memory", "name": "BIG", "address": 65535,
                  "memory_type": "ROM", "memory_size": 2 }
            ]
        }));
        let (_, devices) = build(&config);
        assert!(matches!(
            devices,
            Err(LoadError::InvalidDevice {
                error: DeviceConfigError::AddressRange(_),
                ..
            })
        ));
    }

    #[test]
    fn oversized_memory_is_rejected_before_allocation() {
        let config = parse(json!({
            "devices": [
                { "type": "Memory", "name": "HUGE", "address": 32768,
                  "memory_type": "RAM", "memory_size": 4294967295_u64 }
            ]
        }));
        let (_, devices) = build(&config);
        assert_eq!(
            devices.expect_err("cannot fit"),
            LoadError::InvalidDevice {
                name: "HUGE".to_string(),
                error: DeviceConfigError::AddressRange(AddressRangeError {
                    start: 0x8000,
                    span: u32::MAX
                })
            }
        );

        // Exactly filling the address space is fine.
        let config = parse(json!({
            "devices": [
                { "type": "Memory", "name": "ALL", "address": 0,
                  "memory_type": "RAM", "memory_size": 65536 }
            ]
        }));
        let (_, devices) = build(&config);
        let devices = devices.expect("fits");
        assert_eq!(devices[0].map_address_end(), Some(0xFFFF));
    }

    #[test]
    fn overlap_validation() {
        let memory = |name: &str, address: u16, size: u32| {
            let mut d = DeviceConfig::new(DeviceType::Memory, name, Some(address));
            d.memory_type = Some(MemoryKind::Ram);
            d.memory_size = Some(size);
            d
        };
        let config = BoardConfig {
            busses: Vec::new(),
            devices: vec![memory("A", 0x0000, 0x100), memory("B", 0x0080, 0x180)],
        };
        let (_, devices) = build(&config);
        assert_eq!(
            validate_overlaps(&devices.expect("builds")),
            Err(LoadError::Overlap {
                first: "A".to_string(),
                second: "B".to_string()
            })
        );

        let config = BoardConfig {
            busses: Vec::new(),
            devices: vec![memory("A", 0x0000, 0x80), memory("B", 0x0080, 0x180)],
        };
        let (_, devices) = build(&config);
        assert!(validate_overlaps(&devices.expect("builds")).is_ok());
    }

    #[test]
    fn connections_may_use_the_primary_buses() {
        let config = parse(json!({
            "devices": [
                { "type": "LCD", "name": "LCD",
                  "connections": [
                      { "bus_name": "DATA", "bus_mask": 255, "port_name": "DATA", "port_mask": 255 }
                  ] }
            ]
        }));
        let (_, devices) = build(&config);
        let devices = devices.expect("builds");
        assert_eq!(devices[0].placement().connections()[0].bus, BusId::DATA);
    }

    #[test]
    fn description_round_trips_through_the_builder() {
        let config = sample();
        let (buses, devices) = build(&config);
        let devices = devices.expect("builds");
        let described: Vec<DeviceConfig> =
            devices.iter().map(|d| describe_device(d, &buses)).collect();
        assert_eq!(described[0], config.devices[0]);
        let wiring = vec![config.devices[2].connections[0].clone()];
        assert_eq!(described[2].connections, wiring);
        assert!(described[2].use_nmi);
        assert_eq!(described[3].name, "Device-0");
        assert_eq!(described[4].address, None);

        let json = serde_json::to_value(&described[0]).expect("serializes");
        assert_eq!(
            json,
            json!({ "type": "Memory", "name": "RAM", "address": 0, "connections": [],
                    "memory_type": "RAM", "memory_size": 16384 })
        );
    }

    #[test]
    fn simulation_defaults() {
        let settings: SimulationConfig = serde_json::from_value(json!({})).expect("all defaults");
        assert_eq!(settings, SimulationConfig::default());
        assert_eq!(settings.baud_delay_factor, 10);
        assert_eq!(settings.lcd_busy_delay, 20);
        assert_eq!(settings.stats_interval, Duration::from_secs(1));
    }
}
