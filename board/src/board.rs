//! The board orchestrator.
//!
//! A [`Board`] owns everything on it: the address and data buses and
//! any auxiliary buses, the control lines, the processor, the clock,
//! the debugger and the devices.  Nothing outside the board holds on
//! to any of these; observers learn about changes only through the
//! [`BoardEvent`]s the board publishes.
//!
//! ## One clock edge
//!
//! Every edge is handled in the same fixed order:
//!
//! 1. The processor adapter (it only does anything on falling edges).
//! 2. The IRQ and NMI lines are precharged high.  Devices which still
//!    want attention pull them low again in the next step, so the
//!    processor sees a request on the falling edge after it was
//!    raised.
//! 3. Every device, in the order it was configured.
//! 4. The debugger.
//!
//! Changes to buses and control lines are published once the edge is
//! complete.
//!
//! ## Time
//!
//! The clock advances [`Context::simulated_time`] by half a period on
//! each edge.  Peripheral timers run on [`Context::real_elapsed_time`]
//! which the owner of the board (normally the
//! [`BoardExecutor`](crate::executor::BoardExecutor)) keeps current
//! with [`Board::set_time`].  Devices with pending timers are tracked
//! in a priority queue, so [`Board::poll_devices`] only visits the
//! ones which are due.
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use tracing::{event, span, Level};

use base::prelude::*;

use crate::bus::{Bus, BusSet};
use crate::clock::Clock;
use crate::config::{
    build_buses, build_devices, describe_device, validate_overlaps, BoardConfig, BusConfig,
    DeviceType, LoadError, SimulationConfig,
};
use crate::context::Context;
use crate::cpu::{InstructionCore, Processor};
use crate::debugger::Debugger;
use crate::device::{Backplane, Device};
use crate::devices::{Acia, Memory, Via};
use crate::event::{BoardEvent, Observer, ViaPort};
use crate::lines::ControlLines;
use crate::pollq::PollQueue;
use crate::store::{ContentStore, CONTENT_KEY};

/// Failure of a command addressed to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommandError {
    NoSuchDevice(String),
    WrongDeviceType {
        device: String,
        expected: DeviceType,
    },
}

impl Display for DeviceCommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCommandError::NoSuchDevice(name) => write!(f, "there is no device {name}"),
            DeviceCommandError::WrongDeviceType { device, expected } => {
                write!(f, "device {device} is not of type {expected}")
            }
        }
    }
}

impl Error for DeviceCommandError {}

pub struct Board {
    buses: BusSet,
    lines: ControlLines,
    processor: Processor,
    clock: Clock,
    debugger: Debugger,
    devices: Vec<Device>,
    timers: PollQueue,
    context: Context,
    settings: SimulationConfig,
    last_config: Option<BoardConfig>,
    observer: Box<dyn Observer>,
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Board")
            .field("buses", &self.buses)
            .field("lines", &self.lines)
            .field("processor", &self.processor)
            .field("clock", &self.clock)
            .field("debugger", &self.debugger)
            .field("devices", &self.devices)
            .field("timers", &self.timers)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl Board {
    pub fn new(
        core: Box<dyn InstructionCore>,
        settings: SimulationConfig,
        observer: Box<dyn Observer>,
    ) -> Board {
        let mut buses = BusSet::new();
        let mut lines = ControlLines::default();
        let processor = Processor::new(core);
        processor.populate(&mut buses, &mut lines);
        buses.drain_changes();
        Board {
            buses,
            lines,
            processor,
            clock: Clock::new(settings.clock_period),
            debugger: Debugger::new(),
            devices: Vec::new(),
            timers: PollQueue::new(),
            context: Context::default(),
            settings,
            last_config: None,
            observer,
        }
    }

    #[must_use]
    pub fn buses(&self) -> &BusSet {
        &self.buses
    }

    #[must_use]
    pub fn bus(&self, name: &str) -> Option<&Bus> {
        self.buses.find(name).and_then(|id| self.buses.get(id))
    }

    #[must_use]
    pub fn lines(&self) -> &ControlLines {
        &self.lines
    }

    #[must_use]
    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    #[must_use]
    pub fn debugger(&self) -> &Debugger {
        &self.debugger
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    #[must_use]
    pub fn settings(&self) -> &SimulationConfig {
        &self.settings
    }

    /// All devices, in the order they see clock edges.
    #[must_use]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    #[must_use]
    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name() == name)
    }

    /// The device whose mapped range contains `address`.
    #[must_use]
    pub fn find_device(&self, address: u16) -> Option<&Device> {
        self.devices
            .iter()
            .find(|d| d.placement().contains(address))
    }

    fn publish(&mut self, event: BoardEvent) {
        self.observer.notify(event);
    }

    fn publish_changes(&mut self, lines_before: ControlLines) {
        for id in self.buses.drain_changes() {
            if let Some(bus) = self.buses.get(id) {
                let event = BoardEvent::BusChanged {
                    bus: bus.name().to_string(),
                    value: bus.data(),
                };
                self.observer.notify(event);
            }
        }
        if self.lines != lines_before {
            self.publish(BoardEvent::SignalsChanged(self.lines));
        }
    }

    fn handle_edge(&mut self, edge: StateEdge) {
        let lines_before = self.lines;

        if self
            .processor
            .clock_edge(edge, &mut self.buses, &mut self.lines)
        {
            self.publish(BoardEvent::ProcessorStepped);
        }

        self.lines.precharge_interrupts();

        for (index, device) in self.devices.iter_mut().enumerate() {
            let mut bp = Backplane::new(
                &mut self.buses,
                &mut self.lines,
                &self.context,
                self.observer.as_mut(),
            );
            device.clock_edge(edge, &mut bp);
            self.timers.schedule(index, device.next_deadline());
        }

        self.debugger.on_clock_edge(
            edge,
            &self.lines,
            &self.buses,
            &mut self.clock,
            self.observer.as_mut(),
        );

        self.publish_changes(lines_before);
    }

    /// Advances the clock by one edge and runs the board through it.
    pub fn tick(&mut self) -> StateEdge {
        let edge = self.clock.tick();
        self.context.simulated_time += self.clock.half_period();
        event!(Level::TRACE, "clock edge {:?}", edge);
        self.publish(BoardEvent::ClockEdge(edge));
        self.handle_edge(edge);
        if self.clock.settle() {
            event!(Level::INFO, "clock stopped");
            self.publish(BoardEvent::ClockRunningChanged(false));
        }
        edge
    }

    /// Produces exactly one `edge` while the clock is stopped.  If the
    /// clock is not in the right state for that edge, an extra edge in
    /// the other direction is run first.  Returns false (and does
    /// nothing) while the clock is running.
    pub fn trigger_edge(&mut self, edge: StateEdge) -> bool {
        match self.clock.ticks_for_edge(edge) {
            Some(ticks) => {
                for _ in 0..ticks {
                    self.tick();
                }
                true
            }
            None => {
                event!(
                    Level::DEBUG,
                    "ignoring manual {:?} edge while the clock is running",
                    edge
                );
                false
            }
        }
    }

    pub fn start_clock(&mut self) {
        if self.clock.start() {
            event!(Level::INFO, "clock started");
            self.publish(BoardEvent::ClockRunningChanged(true));
        }
    }

    /// Asks the clock to stop.  It halts once the next high phase has
    /// been processed.
    pub fn stop_clock(&mut self) {
        self.clock.stop();
    }

    pub fn set_period(&mut self, period: Duration) {
        self.clock.set_period(period);
    }

    pub fn add_breakpoint(&mut self, address: u16) -> bool {
        self.debugger.add_breakpoint(address)
    }

    pub fn remove_breakpoint(&mut self, address: u16) -> bool {
        self.debugger.remove_breakpoint(address)
    }

    /// Runs until the next instruction boundary.
    pub fn step_instruction(&mut self) -> bool {
        let accepted = self.debugger.step_instruction();
        if accepted {
            self.start_clock();
        }
        accepted
    }

    /// Runs until the subroutine called by the current instruction
    /// has returned, or like [`Board::step_instruction`] when the
    /// current instruction is not a call.
    pub fn step_subroutine(&mut self) -> bool {
        let accepted = self.debugger.step_subroutine();
        if accepted {
            self.start_clock();
        }
        accepted
    }

    /// Drives the board's reset line.  Devices and the debugger react
    /// to it on the following edges.
    pub fn set_reset_line(&mut self, state: WireState) {
        let before = self.lines;
        self.lines.reset = state;
        self.publish_changes(before);
    }

    /// Removes all devices and auxiliary buses.
    fn clear(&mut self) {
        self.devices.clear();
        self.buses.clear_auxiliary();
        self.timers.clear();
        if self.debugger.reset() {
            self.publish(BoardEvent::FailStateChanged(false));
        }
    }

    /// Replaces the board's devices and auxiliary buses with the ones
    /// described by `config`.  ROM and Flash contents are restored
    /// from `store`.
    ///
    /// # Errors
    ///
    /// A device which cannot be built, or overlapping address ranges,
    /// fail the load; the board is then left without devices.
    pub fn load(
        &mut self,
        config: &BoardConfig,
        store: &dyn ContentStore,
    ) -> Result<(), LoadError> {
        let span = span!(Level::INFO, "load");
        let _enter = span.enter();

        self.clear();
        build_buses(config, &mut self.buses);
        let built = build_devices(config, &self.settings, &self.buses)
            .and_then(|devices| validate_overlaps(&devices).map(|()| devices));
        match built {
            Ok(mut devices) => {
                restore_contents(&mut devices, store);
                for (index, device) in devices.iter().enumerate() {
                    self.timers.schedule(index, device.next_deadline());
                }
                self.devices = devices;
                self.last_config = Some(config.clone());
                event!(
                    Level::INFO,
                    "loaded {} devices and {} auxiliary buses",
                    self.devices.len(),
                    self.buses.auxiliary().count()
                );
                self.publish(BoardEvent::LoadFinished(true));
                Ok(())
            }
            Err(e) => {
                self.buses.clear_auxiliary();
                event!(Level::ERROR, "board load failed: {}", e);
                self.publish(BoardEvent::LoadFinished(false));
                Err(e)
            }
        }
    }

    /// Rebuilds the board from the configuration last loaded, giving
    /// every device its power-on state.  Does nothing if nothing was
    /// loaded yet.
    ///
    /// # Errors
    ///
    /// As for [`Board::load`].
    pub fn reset_devices(&mut self, store: &dyn ContentStore) -> Result<(), LoadError> {
        match self.last_config.clone() {
            Some(config) => self.load(&config, store),
            None => Ok(()),
        }
    }

    /// Writes the contents of every ROM and Flash memory to `store`.
    pub fn save_contents(&self, store: &mut dyn ContentStore) {
        for device in &self.devices {
            if let Some(memory) = device.downcast_ref::<Memory>() {
                if memory.kind().is_persistent() {
                    store.set(device.name(), CONTENT_KEY, memory.contents().to_vec());
                }
            }
        }
    }

    /// Describes the current board the way it would be written back
    /// to a board file.
    #[must_use]
    pub fn to_config(&self) -> BoardConfig {
        BoardConfig {
            busses: self
                .buses
                .auxiliary()
                .map(|(_, bus)| BusConfig {
                    name: bus.name().to_string(),
                    width: bus.width().bits(),
                })
                .collect(),
            devices: self
                .devices
                .iter()
                .map(|d| describe_device(d, &self.buses))
                .collect(),
        }
    }

    fn device_index(&self, name: &str) -> Result<usize, DeviceCommandError> {
        self.devices
            .iter()
            .position(|d| d.name() == name)
            .ok_or_else(|| DeviceCommandError::NoSuchDevice(name.to_string()))
    }

    fn wrong_type(name: &str, expected: DeviceType) -> DeviceCommandError {
        DeviceCommandError::WrongDeviceType {
            device: name.to_string(),
            expected,
        }
    }

    /// Copies a program image into a memory device, whatever its
    /// kind.  Returns the number of bytes which fitted.
    ///
    /// # Errors
    ///
    /// The named device does not exist or is not a memory.
    pub fn load_program(
        &mut self,
        device: &str,
        offset: usize,
        image: &[u8],
    ) -> Result<usize, DeviceCommandError> {
        let index = self.device_index(device)?;
        let memory = self.devices[index]
            .downcast_mut::<Memory>()
            .ok_or_else(|| Self::wrong_type(device, DeviceType::Memory))?;
        let copied = memory.load(offset, image);
        if copied < image.len() {
            event!(
                Level::WARN,
                "{}: program truncated to {} of {} bytes",
                device,
                copied,
                image.len()
            );
        }
        Ok(copied)
    }

    /// Hands a byte arriving on the serial line to an ACIA.
    ///
    /// # Errors
    ///
    /// The named device does not exist or is not an ACIA.
    pub fn receive_serial_byte(
        &mut self,
        device: &str,
        byte: u8,
    ) -> Result<(), DeviceCommandError> {
        let index = self.device_index(device)?;
        let now = self.context.real_elapsed_time;
        let acia = self.devices[index]
            .downcast_mut::<Acia>()
            .ok_or_else(|| Self::wrong_type(device, DeviceType::Acia))?;
        let started = acia.receive_byte(byte, now);
        let deadline = self.devices[index].next_deadline();
        self.timers.schedule(index, deadline);
        if started {
            self.publish(BoardEvent::AciaReceivingChanged {
                device: device.to_string(),
                receiving: true,
            });
        }
        Ok(())
    }

    /// Sets the externally driven level of a VIA port.
    ///
    /// # Errors
    ///
    /// The named device does not exist or is not a VIA.
    pub fn set_via_port(
        &mut self,
        device: &str,
        port: ViaPort,
        value: u8,
    ) -> Result<(), DeviceCommandError> {
        let index = self.device_index(device)?;
        let via = self.devices[index]
            .downcast_mut::<Via>()
            .ok_or_else(|| Self::wrong_type(device, DeviceType::Via))?;
        if via.set_port(port, value) {
            self.publish(BoardEvent::ViaPortChanged {
                device: device.to_string(),
                port,
                value,
            });
        }
        Ok(())
    }

    /// Sets the real time elapsed since the board was created.
    pub fn set_time(&mut self, now: Duration) {
        self.context.real_elapsed_time = now;
    }

    pub fn advance_time(&mut self, by: Duration) {
        self.context.real_elapsed_time += by;
        self.poll_devices();
    }

    /// When the next device timer expires.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.peek().map(|(_, deadline)| deadline)
    }

    /// Fires the timers of every device which is due.
    pub fn poll_devices(&mut self) {
        let now = self.context.real_elapsed_time;
        let due: Vec<usize> = std::iter::from_fn(|| self.timers.pop_due(now)).collect();
        if due.is_empty() {
            return;
        }
        let lines_before = self.lines;
        for index in due {
            let Some(device) = self.devices.get_mut(index) else {
                continue;
            };
            let mut bp = Backplane::new(
                &mut self.buses,
                &mut self.lines,
                &self.context,
                self.observer.as_mut(),
            );
            device.poll(&mut bp);
            self.timers.schedule(index, device.next_deadline());
        }
        self.publish_changes(lines_before);
    }

    /// Publishes the clock rate over the `elapsed` time since the
    /// previous call.
    pub fn collect_stats(&mut self, elapsed: Duration) -> u64 {
        let cycles = self.clock.take_stats();
        let rate = match elapsed.as_nanos() {
            0 => cycles,
            nanos => u64::try_from(u128::from(cycles) * 1_000_000_000 / nanos).unwrap_or(u64::MAX),
        };
        self.publish(BoardEvent::ClockStats {
            cycles_per_second: rate,
        });
        rate
    }
}

fn restore_contents(devices: &mut [Device], store: &dyn ContentStore) {
    for device in devices {
        let name = device.name().to_string();
        let Some(memory) = device.downcast_mut::<Memory>() else {
            continue;
        };
        if !memory.kind().is_persistent() {
            continue;
        }
        if let Some(bytes) = store.get(&name, CONTENT_KEY) {
            if bytes.len() != memory.size() {
                event!(
                    Level::WARN,
                    "{}: stored content has {} bytes but the memory has {}",
                    name,
                    bytes.len(),
                    memory.size()
                );
            }
            memory.load(0, &bytes);
        }
    }
}
