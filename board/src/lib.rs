//! Cycle-stepped simulation of a small 6502 computer board.
//!
//! A [`Board`] wires a processor, a set of memory-mapped peripherals
//! and any number of auxiliary buses together, and advances them one
//! clock edge at a time.  The board layout comes from a
//! [`BoardConfig`], normally read from a board file.  A
//! [`BoardExecutor`] runs the board on its own thread and paces the
//! clock; front ends talk to it with [`Command`]s and listen for
//! [`BoardEvent`]s.
#![crate_name = "board"]

mod board;
mod bus;
mod changelog;
mod clock;
mod config;
mod context;
mod cpu;
mod debugger;
mod device;
pub mod devices;
mod event;
mod executor;
mod lines;
mod pollq;
mod store;

pub use board::{Board, DeviceCommandError};
pub use bus::{Bus, BusId, BusSet, BusWidth, BusWidthError, ADDRESS_BUS_NAME, DATA_BUS_NAME};
pub use clock::Clock;
pub use config::{
    describe_device, validate_overlaps, BoardConfig, BusConfig, ConnectionConfig, DeviceConfig,
    DeviceConfigError, DeviceType, LoadError, SimulationConfig,
};
pub use context::Context;
pub use cpu::{CpuPins, InstructionCore, Processor, ADDRESS_BUS_WIDTH, DATA_BUS_WIDTH};
pub use debugger::{Debugger, InstructionStart, SteppingMode, OPCODE_BRK, OPCODE_JSR, OPCODE_RTS};
pub use device::{
    AddressRangeError, Backplane, BusConnection, Device, DeviceBehavior, Placement, PortTag,
    WiringError,
};
pub use event::{BoardEvent, Observer, ViaPort, ViaTimer};
pub use executor::{BoardExecutor, Command, CommandError};
pub use lines::ControlLines;
pub use store::{ContentStore, InMemoryStore, CONTENT_KEY};
