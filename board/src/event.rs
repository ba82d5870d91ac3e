//! Notifications published by the board.
//!
//! The simulation never assumes how its observers want to hear about
//! changes.  Everything is published through [`Observer`], and the
//! embedding application decides whether to handle the events
//! synchronously or forward them elsewhere (a crossbeam channel
//! implements `Observer` out of the box).
use crossbeam_channel as cbc;
use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

use crate::lines::ControlLines;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ViaPort {
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ViaTimer {
    T1,
    T2,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BoardEvent {
    // Board
    BusChanged {
        bus: String,
        value: u64,
    },
    SignalsChanged(ControlLines),
    ProcessorStepped,
    LoadFinished(bool),

    // Devices
    SelectionChanged {
        device: String,
        selected: bool,
    },
    MemoryAccessed {
        device: String,
        offset: u16,
        write: bool,
    },
    AciaRegistersChanged {
        device: String,
    },
    AciaSendByte {
        device: String,
        byte: u8,
    },
    AciaTransmittingChanged {
        device: String,
        transmitting: bool,
    },
    AciaReceivingChanged {
        device: String,
        receiving: bool,
    },
    ViaRegisterChanged {
        device: String,
        register: u8,
    },
    ViaPortChanged {
        device: String,
        port: ViaPort,
        value: u8,
    },
    ViaTimerChanged {
        device: String,
        timer: ViaTimer,
        value: u16,
    },
    ViaIfrChanged {
        device: String,
        value: u8,
    },
    LcdCharacterChanged {
        device: String,
        address: u8,
    },
    LcdBusyChanged {
        device: String,
        busy: bool,
    },
    LcdCursorPosChanged {
        device: String,
        position: u8,
    },
    LcdCursorChanged {
        device: String,
        visible: bool,
    },
    LcdShiftChanged {
        device: String,
        shift: u8,
    },
    LcdDisplayChanged {
        device: String,
        on: bool,
    },

    // Clock
    ClockEdge(StateEdge),
    ClockRunningChanged(bool),
    ClockStats {
        cycles_per_second: u64,
    },

    // Debugger
    NewInstruction {
        address: u16,
        opcode: u8,
    },
    FailStateChanged(bool),
}

pub trait Observer: Send {
    fn notify(&mut self, event: BoardEvent);
}

impl Observer for cbc::Sender<BoardEvent> {
    fn notify(&mut self, ev: BoardEvent) {
        if let Err(e) = self.send(ev) {
            // Nobody is listening any more; the simulation carries on.
            event!(Level::TRACE, "dropped board event {:?}", e.into_inner());
        }
    }
}

#[test]
fn test_channel_observer() {
    let (mut tx, rx) = cbc::unbounded();
    tx.notify(BoardEvent::ClockRunningChanged(true));
    assert_eq!(rx.try_recv(), Ok(BoardEvent::ClockRunningChanged(true)));
    drop(rx);
    // Must not panic.
    tx.notify(BoardEvent::ClockRunningChanged(false));
}
