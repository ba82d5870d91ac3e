//! The board's five single-wire control lines.
use serde::Serialize;

use base::prelude::*;

/// Reset, IRQ and NMI are active low.  R/W is high for a read.
/// Sync is high while the processor fetches an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlLines {
    pub reset: WireState,
    pub rw: WireState,
    pub irq: WireState,
    pub nmi: WireState,
    pub sync: WireState,
}

impl Default for ControlLines {
    fn default() -> Self {
        ControlLines {
            reset: WireState::High,
            rw: WireState::Low,
            irq: WireState::High,
            nmi: WireState::High,
            sync: WireState::Low,
        }
    }
}

impl ControlLines {
    /// Releases both interrupt lines.  Open-drain devices which still
    /// want attention pull them low again during the same edge.
    pub fn precharge_interrupts(&mut self) {
        self.irq = WireState::High;
        self.nmi = WireState::High;
    }

    #[must_use]
    pub fn is_read(&self) -> bool {
        self.rw.is_high()
    }

    #[must_use]
    pub fn is_write(&self) -> bool {
        self.rw.is_low()
    }

    #[must_use]
    pub fn in_reset(&self) -> bool {
        self.reset.is_low()
    }
}

#[test]
fn test_power_on_levels() {
    let lines = ControlLines::default();
    assert!(!lines.in_reset());
    assert!(lines.is_write());
    assert_eq!(lines.irq, WireState::High);
    assert_eq!(lines.nmi, WireState::High);
    assert_eq!(lines.sync, WireState::Low);
}

#[test]
fn test_precharge() {
    let mut lines = ControlLines {
        irq: WireState::Low,
        nmi: WireState::Low,
        ..ControlLines::default()
    };
    lines.precharge_interrupts();
    assert_eq!(lines, ControlLines::default());
}
