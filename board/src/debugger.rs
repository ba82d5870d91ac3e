//! Instruction-boundary tracking, breakpoints and stepping.
//!
//! The debugger only watches the bus.  A raising edge with the sync
//! line high is an opcode fetch: the address bus holds the address of
//! the new instruction and the data bus its opcode.  From the
//! sequence of fetched opcodes the debugger reconstructs a call stack
//! (a `JSR` pushes, an `RTS` pops), which is what makes
//! step-over-subroutine possible.
//!
//! A return with an empty call stack means the guest program is
//! malformed (or did something the debugger cannot follow, like
//! manipulating the stack pointer).  The debugger then enters its
//! fail state: the clock is stopped and instruction boundaries are
//! ignored until the board is reset.
use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

use crate::bus::BusSet;
use crate::clock::Clock;
use crate::event::{BoardEvent, Observer};
use crate::lines::ControlLines;

/// Jump to subroutine (absolute).
pub const OPCODE_JSR: u8 = 0x20;
/// Return from subroutine.
pub const OPCODE_RTS: u8 = 0x60;
/// Software interrupt.
pub const OPCODE_BRK: u8 = 0x00;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SteppingMode {
    #[default]
    None,
    Instruction,
    Subroutine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstructionStart {
    pub address: u16,
    pub opcode: u8,
}

#[derive(Debug, Default)]
pub struct Debugger {
    breakpoints: BTreeSet<u16>,
    call_stack: Vec<u16>,
    stepping_mode: SteppingMode,
    subroutine_depth: usize,
    current: Option<InstructionStart>,
    last: Option<InstructionStart>,
    fail_state: bool,
}

impl Debugger {
    #[must_use]
    pub fn new() -> Debugger {
        Debugger::default()
    }

    pub fn add_breakpoint(&mut self, address: u16) -> bool {
        self.breakpoints.insert(address)
    }

    pub fn remove_breakpoint(&mut self, address: u16) -> bool {
        self.breakpoints.remove(&address)
    }

    #[must_use]
    pub fn breakpoints(&self) -> &BTreeSet<u16> {
        &self.breakpoints
    }

    #[must_use]
    pub fn call_stack(&self) -> &[u16] {
        &self.call_stack
    }

    #[must_use]
    pub fn stepping_mode(&self) -> SteppingMode {
        self.stepping_mode
    }

    #[must_use]
    pub fn is_fail_state(&self) -> bool {
        self.fail_state
    }

    #[must_use]
    pub fn current_instruction(&self) -> Option<InstructionStart> {
        self.current
    }

    #[must_use]
    pub fn last_instruction(&self) -> Option<InstructionStart> {
        self.last
    }

    /// Arms a single-instruction step.  The caller starts the clock.
    /// Refused (returns false) in the fail state, since no further
    /// instruction boundary would be recognised to stop at.
    pub fn step_instruction(&mut self) -> bool {
        if self.fail_state {
            event!(Level::WARN, "cannot step: debugger is in its fail state");
            return false;
        }
        self.stepping_mode = SteppingMode::Instruction;
        true
    }

    /// Arms a step over the current subroutine call, or a single
    /// instruction step when the current instruction is not a call.
    pub fn step_subroutine(&mut self) -> bool {
        match self.current {
            Some(InstructionStart { opcode: OPCODE_JSR, .. }) if !self.fail_state => {
                self.stepping_mode = SteppingMode::Subroutine;
                self.subroutine_depth = self.call_stack.len();
                true
            }
            _ => self.step_instruction(),
        }
    }

    /// Forgets everything except the breakpoints.  Returns true when
    /// this cleared the fail state.
    pub fn reset(&mut self) -> bool {
        let was_failed = self.fail_state;
        self.fail_state = false;
        self.current = None;
        self.last = None;
        self.call_stack.clear();
        self.stepping_mode = SteppingMode::None;
        self.subroutine_depth = 0;
        was_failed
    }

    pub fn on_clock_edge(
        &mut self,
        edge: StateEdge,
        lines: &ControlLines,
        buses: &BusSet,
        clock: &mut Clock,
        observer: &mut dyn Observer,
    ) {
        if lines.in_reset() {
            if self.reset() {
                observer.notify(BoardEvent::FailStateChanged(false));
            }
            return;
        }
        if !edge.is_raising() || !lines.sync.is_high() || self.fail_state {
            return;
        }
        let start = InstructionStart {
            address: buses.address(),
            opcode: buses.data_byte(),
        };
        self.last = self.current.replace(start);
        event!(
            Level::TRACE,
            "instruction {:#04x} at {:#06x}",
            start.opcode,
            start.address
        );

        if !self.update_call_stack() {
            self.fail_state = true;
            self.stepping_mode = SteppingMode::None;
            clock.stop();
            event!(
                Level::INFO,
                "return with empty call stack at {:#06x}; debugger entered fail state",
                start.address
            );
            observer.notify(BoardEvent::FailStateChanged(true));
            observer.notify(BoardEvent::NewInstruction {
                address: start.address,
                opcode: start.opcode,
            });
            return;
        }

        if self.breakpoints.contains(&start.address) {
            event!(Level::DEBUG, "breakpoint at {:#06x}", start.address);
            clock.stop();
        }
        self.stop_after_instruction(clock);
        self.stop_after_subroutine(clock);
        observer.notify(BoardEvent::NewInstruction {
            address: start.address,
            opcode: start.opcode,
        });
    }

    /// Returns false on a return with nothing to return to.
    fn update_call_stack(&mut self) -> bool {
        match self.last {
            Some(InstructionStart {
                opcode: OPCODE_JSR,
                address,
            }) => {
                self.call_stack.push(address);
                true
            }
            Some(InstructionStart { opcode: OPCODE_RTS, .. }) => self.call_stack.pop().is_some(),
            _ => true,
        }
    }

    fn stop_after_instruction(&mut self, clock: &mut Clock) {
        if self.stepping_mode == SteppingMode::Instruction {
            clock.stop();
            self.stepping_mode = SteppingMode::None;
        }
    }

    fn stop_after_subroutine(&mut self, clock: &mut Clock) {
        if self.stepping_mode != SteppingMode::Subroutine {
            return;
        }
        let returned = match self.last {
            Some(InstructionStart { opcode: OPCODE_BRK, .. }) => true,
            Some(InstructionStart { opcode: OPCODE_RTS, .. }) => {
                self.call_stack.len() == self.subroutine_depth
            }
            _ => false,
        };
        if returned {
            clock.stop();
            self.stepping_mode = SteppingMode::None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusId;
    use crossbeam_channel as cbc;
    use std::time::Duration;

    struct Rig {
        debugger: Debugger,
        clock: Clock,
        buses: BusSet,
        lines: ControlLines,
        tx: cbc::Sender<BoardEvent>,
        rx: cbc::Receiver<BoardEvent>,
    }

    impl Rig {
        fn new() -> Rig {
            let (tx, rx) = cbc::unbounded();
            let mut clock = Clock::new(Duration::from_micros(1));
            clock.start();
            Rig {
                debugger: Debugger::new(),
                clock,
                buses: BusSet::new(),
                lines: ControlLines {
                    sync: WireState::High,
                    ..ControlLines::default()
                },
                tx,
                rx,
            }
        }

        /// Presents an opcode fetch to the debugger.
        fn fetch(&mut self, address: u16, opcode: u8) {
            self.buses.set_data(BusId::ADDRESS, u64::from(address));
            self.buses.set_data(BusId::DATA, u64::from(opcode));
            self.debugger.on_clock_edge(
                StateEdge::Raising,
                &self.lines,
                &self.buses,
                &mut self.clock,
                &mut self.tx,
            );
        }

        fn stop_requested(&self) -> bool {
            self.clock.is_stopping()
        }

        fn events(&self) -> Vec<BoardEvent> {
            self.rx.try_iter().collect()
        }
    }

    #[test]
    fn falling_edges_and_non_sync_cycles_are_ignored() {
        let mut rig = Rig::new();
        rig.debugger.on_clock_edge(
            StateEdge::Falling,
            &rig.lines,
            &rig.buses,
            &mut rig.clock,
            &mut rig.tx,
        );
        rig.lines.sync = WireState::Low;
        rig.fetch(0x8000, 0xEA);
        assert_eq!(rig.debugger.current_instruction(), None);
        assert!(rig.events().is_empty());
    }

    #[test]
    fn balanced_calls_leave_depth_unchanged() {
        let mut rig = Rig::new();
        rig.fetch(0x8000, OPCODE_JSR);
        rig.fetch(0x9000, OPCODE_JSR);
        assert_eq!(rig.debugger.call_stack(), &[0x8000]);
        rig.fetch(0xA000, OPCODE_RTS);
        assert_eq!(rig.debugger.call_stack(), &[0x8000, 0x9000]);
        rig.fetch(0x9003, OPCODE_RTS);
        assert_eq!(rig.debugger.call_stack(), &[0x8000]);
        rig.fetch(0x8003, 0xEA);
        assert!(rig.debugger.call_stack().is_empty());
        assert!(!rig.debugger.is_fail_state());
        assert!(!rig.stop_requested());
        assert_eq!(
            rig.debugger.last_instruction(),
            Some(InstructionStart {
                address: 0x9003,
                opcode: OPCODE_RTS
            })
        );
    }

    #[test]
    fn lone_return_enters_fail_state_once() {
        let mut rig = Rig::new();
        rig.fetch(0x8000, OPCODE_RTS);
        rig.fetch(0x1234, 0xEA);
        assert!(rig.debugger.is_fail_state());
        assert!(rig.stop_requested());
        rig.fetch(0x1235, OPCODE_RTS);
        rig.fetch(0x1236, 0xEA);
        let failures = rig
            .events()
            .into_iter()
            .filter(|e| *e == BoardEvent::FailStateChanged(true))
            .count();
        assert_eq!(failures, 1);
        assert!(!rig.debugger.step_instruction());
    }

    #[test]
    fn reset_line_clears_fail_state_but_keeps_breakpoints() {
        let mut rig = Rig::new();
        rig.debugger.add_breakpoint(0x8000);
        rig.fetch(0x7000, OPCODE_RTS);
        rig.fetch(0x7001, 0xEA);
        assert!(rig.debugger.is_fail_state());
        rig.events();

        rig.lines.reset = WireState::Low;
        rig.fetch(0x7002, 0xEA);
        assert!(!rig.debugger.is_fail_state());
        assert_eq!(rig.debugger.current_instruction(), None);
        assert_eq!(rig.events(), vec![BoardEvent::FailStateChanged(false)]);
        assert!(rig.debugger.breakpoints().contains(&0x8000));
    }

    #[test]
    fn breakpoint_stops_clock() {
        let mut rig = Rig::new();
        assert!(rig.debugger.add_breakpoint(0x8004));
        assert!(!rig.debugger.add_breakpoint(0x8004));
        rig.fetch(0x8000, 0xEA);
        assert!(!rig.stop_requested());
        rig.fetch(0x8004, 0xEA);
        assert!(rig.stop_requested());
        assert!(rig.debugger.remove_breakpoint(0x8004));
        assert!(!rig.debugger.remove_breakpoint(0x8004));
    }

    #[test]
    fn instruction_step_stops_at_next_boundary() {
        let mut rig = Rig::new();
        assert!(rig.debugger.step_instruction());
        assert_eq!(rig.debugger.stepping_mode(), SteppingMode::Instruction);
        rig.fetch(0x8000, 0xEA);
        assert!(rig.stop_requested());
        assert_eq!(rig.debugger.stepping_mode(), SteppingMode::None);
    }

    #[test]
    fn subroutine_step_waits_for_matching_return() {
        let mut rig = Rig::new();
        rig.fetch(0x7FFD, OPCODE_JSR);
        rig.fetch(0x8000, OPCODE_JSR);
        assert!(rig.debugger.step_subroutine());
        assert_eq!(rig.debugger.stepping_mode(), SteppingMode::Subroutine);

        rig.fetch(0x9000, OPCODE_JSR); // nested call
        rig.fetch(0xA000, OPCODE_RTS);
        rig.fetch(0x9003, OPCODE_RTS); // inner pair complete
        assert!(!rig.stop_requested());
        rig.fetch(0x8003, 0xEA); // outer return complete
        assert!(rig.stop_requested());
        assert_eq!(rig.debugger.call_stack(), &[0x7FFD]);
        assert_eq!(rig.debugger.stepping_mode(), SteppingMode::None);
    }

    #[test]
    fn subroutine_step_stops_after_software_interrupt() {
        let mut rig = Rig::new();
        rig.fetch(0x8000, OPCODE_JSR);
        rig.debugger.step_subroutine();
        rig.fetch(0x9000, OPCODE_BRK);
        assert!(!rig.stop_requested());
        rig.fetch(0xF000, 0xEA);
        assert!(rig.stop_requested());
    }

    #[test]
    fn subroutine_step_on_plain_instruction_steps_once() {
        let mut rig = Rig::new();
        rig.fetch(0x8000, 0xEA);
        assert!(rig.debugger.step_subroutine());
        assert_eq!(rig.debugger.stepping_mode(), SteppingMode::Instruction);
    }
}
