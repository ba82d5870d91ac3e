//! The processor adapter.
//!
//! The instruction set itself lives in an external, deterministic
//! chip model which implements [`InstructionCore`].  This module is
//! the only code which talks to it, and it does so purely through the
//! pin word [`CpuPins`], once per falling clock edge:
//!
//! 1. Inject the (active-low) reset, IRQ and NMI lines, and the data
//!    bus if the core is reading.
//! 2. Step the core once.
//! 3. Extract reset, R/W, sync and the address bus, and the data bus
//!    if the core is writing.
use serde::Serialize;

use base::prelude::*;

use crate::bus::{BusId, BusSet};
use crate::lines::ControlLines;

pub const ADDRESS_BUS_WIDTH: u32 = 16;
pub const DATA_BUS_WIDTH: u32 = 8;

/// Pin state exchanged with the instruction core.  Input pins
/// (`res`, `irq`, `nmi`) are true when asserted.  `rw` is true for a
/// read cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CpuPins {
    pub address: u16,
    pub data: u8,
    pub rw: bool,
    pub sync: bool,
    pub res: bool,
    pub irq: bool,
    pub nmi: bool,
}

pub trait InstructionCore: Send {
    /// Pin state at power-on.
    fn init(&mut self) -> CpuPins;

    /// Executes one cycle.
    fn tick(&mut self, pins: CpuPins) -> CpuPins;
}

fn set_pin(pin: &mut bool, state: WireState) {
    match state {
        WireState::High => *pin = true,
        WireState::Low => *pin = false,
        WireState::None => (),
    }
}

pub struct Processor {
    core: Box<dyn InstructionCore>,
    pins: CpuPins,
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("pins", &self.pins)
            .finish_non_exhaustive()
    }
}

impl Processor {
    pub fn new(mut core: Box<dyn InstructionCore>) -> Processor {
        let pins = core.init();
        Processor { core, pins }
    }

    #[must_use]
    pub fn pins(&self) -> CpuPins {
        self.pins
    }

    /// Returns true when the core was stepped.
    pub fn clock_edge(
        &mut self,
        edge: StateEdge,
        buses: &mut BusSet,
        lines: &mut ControlLines,
    ) -> bool {
        if !edge.is_falling() {
            return false;
        }
        self.inject(buses, lines);
        self.pins = self.core.tick(self.pins);
        self.populate(buses, lines);
        true
    }

    fn inject(&mut self, buses: &BusSet, lines: &ControlLines) {
        set_pin(&mut self.pins.res, lines.reset.negate());
        set_pin(&mut self.pins.irq, lines.irq.negate());
        set_pin(&mut self.pins.nmi, lines.nmi.negate());
        if self.pins.rw {
            self.pins.data = buses.data_byte();
        }
    }

    /// Drives the board from the current pin state.
    pub fn populate(&self, buses: &mut BusSet, lines: &mut ControlLines) {
        lines.reset = WireState::from(!self.pins.res);
        lines.rw = WireState::from(self.pins.rw);
        lines.sync = WireState::from(self.pins.sync);
        buses.set_data(BusId::ADDRESS, u64::from(self.pins.address));
        if !self.pins.rw {
            buses.set_data(BusId::DATA, u64::from(self.pins.data));
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted stand-in for the instruction core.
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::{CpuPins, InstructionCore};

    /// Plays back a list of bus cycles, one per tick.  Once the
    /// script runs out it keeps reading from the last address.
    /// Every pin state the adapter handed in is recorded.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedCore {
        script: VecDeque<CpuPins>,
        last: CpuPins,
        pub(crate) seen: Arc<Mutex<Vec<CpuPins>>>,
    }

    impl ScriptedCore {
        pub(crate) fn new(script: Vec<CpuPins>) -> ScriptedCore {
            ScriptedCore {
                script: script.into(),
                last: CpuPins {
                    rw: true,
                    ..CpuPins::default()
                },
                seen: Arc::default(),
            }
        }
    }

    impl InstructionCore for ScriptedCore {
        fn init(&mut self) -> CpuPins {
            self.last
        }

        fn tick(&mut self, pins: CpuPins) -> CpuPins {
            self.seen.lock().expect("poisoned").push(pins);
            match self.script.pop_front() {
                Some(next) => {
                    self.last = CpuPins {
                        data: if next.rw { pins.data } else { next.data },
                        ..next
                    };
                }
                None => {
                    self.last = CpuPins {
                        sync: false,
                        data: pins.data,
                        ..self.last
                    };
                }
            }
            // Input pins read back as they were driven.
            self.last.res = pins.res;
            self.last.irq = pins.irq;
            self.last.nmi = pins.nmi;
            self.last
        }
    }

    /// A read cycle.
    pub(crate) fn read(address: u16) -> CpuPins {
        CpuPins {
            address,
            rw: true,
            ..CpuPins::default()
        }
    }

    /// An opcode fetch.
    pub(crate) fn fetch(address: u16) -> CpuPins {
        CpuPins {
            sync: true,
            ..read(address)
        }
    }

    /// A write cycle.
    pub(crate) fn write(address: u16, data: u8) -> CpuPins {
        CpuPins {
            address,
            data,
            ..CpuPins::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{read, write, ScriptedCore};
    use super::*;

    #[test]
    fn only_falling_edges_step_the_core() {
        let core = ScriptedCore::new(vec![read(0x1234)]);
        let seen = core.seen.clone();
        let mut cpu = Processor::new(Box::new(core));
        let mut buses = BusSet::new();
        let mut lines = ControlLines::default();
        assert!(!cpu.clock_edge(StateEdge::Raising, &mut buses, &mut lines));
        assert!(seen.lock().expect("poisoned").is_empty());
        assert!(cpu.clock_edge(StateEdge::Falling, &mut buses, &mut lines));
        assert_eq!(buses.address(), 0x1234);
        assert!(lines.is_read());
    }

    #[test]
    fn inputs_are_inverted_and_data_follows_rw() {
        let core = ScriptedCore::new(vec![write(0x0200, 0x42), read(0x0201)]);
        let seen = core.seen.clone();
        let mut cpu = Processor::new(Box::new(core));
        let mut buses = BusSet::new();
        let mut lines = ControlLines::default();

        lines.irq = WireState::Low;
        buses.set_data(BusId::DATA, 0x99);
        cpu.clock_edge(StateEdge::Falling, &mut buses, &mut lines);
        // Write cycle: the core drives the data bus.
        assert_eq!(buses.data_byte(), 0x42);
        assert!(lines.is_write());

        lines.irq = WireState::High;
        lines.reset = WireState::Low;
        buses.set_data(BusId::DATA, 0x17);
        cpu.clock_edge(StateEdge::Falling, &mut buses, &mut lines);

        let seen = seen.lock().expect("poisoned");
        assert!(seen[0].irq);
        assert!(!seen[0].res);
        assert!(!seen[0].nmi);
        // The initial pin state was a read, so the bus value went in.
        assert_eq!(seen[0].data, 0x99);
        assert!(!seen[1].irq);
        assert!(seen[1].res);
        // The previous cycle was a write: the bus is not sampled.
        assert_eq!(seen[1].data, 0x42);
        // The core echoes its reset input, so reset stays asserted.
        assert!(lines.in_reset());
    }
}
