//! Logic levels on a single wire and the transitions between them.
//!
//! A wire is either driven low, driven high, or not driven at all
//! (`None`).  The last case shows up when a value is read from a
//! line nobody has set yet; it is deliberately distinct from `Low`.
use serde::Serialize;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WireState {
    #[default]
    None,
    Low,
    High,
}

impl WireState {
    #[must_use]
    pub const fn is_high(self) -> bool {
        matches!(self, WireState::High)
    }

    #[must_use]
    pub const fn is_low(self) -> bool {
        matches!(self, WireState::Low)
    }

    /// Inverts a driven level.  An undriven wire stays undriven.
    #[must_use]
    pub const fn negate(self) -> WireState {
        match self {
            WireState::None => WireState::None,
            WireState::Low => WireState::High,
            WireState::High => WireState::Low,
        }
    }

    /// Interprets any non-zero value as `High`.
    #[must_use]
    pub const fn from_value(value: u64) -> WireState {
        if value == 0 {
            WireState::Low
        } else {
            WireState::High
        }
    }

    /// Returns 1 for `High`, 0 for `Low` and `None` for an undriven wire.
    #[must_use]
    pub const fn as_bit(self) -> Option<u64> {
        match self {
            WireState::None => None,
            WireState::Low => Some(0),
            WireState::High => Some(1),
        }
    }
}

impl From<bool> for WireState {
    fn from(b: bool) -> WireState {
        if b {
            WireState::High
        } else {
            WireState::Low
        }
    }
}

/// The direction of a clock transition.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StateEdge {
    #[default]
    Invalid,
    /// Low to High.
    Raising,
    /// High to Low.
    Falling,
}

impl StateEdge {
    #[must_use]
    pub const fn is_raising(self) -> bool {
        matches!(self, StateEdge::Raising)
    }

    #[must_use]
    pub const fn is_falling(self) -> bool {
        matches!(self, StateEdge::Falling)
    }

    /// The edge which produced a wire now sitting at `state`.
    #[must_use]
    pub const fn arriving_at(state: WireState) -> StateEdge {
        match state {
            WireState::High => StateEdge::Raising,
            WireState::Low => StateEdge::Falling,
            WireState::None => StateEdge::Invalid,
        }
    }
}

#[test]
fn test_negate() {
    assert_eq!(WireState::High.negate(), WireState::Low);
    assert_eq!(WireState::Low.negate(), WireState::High);
    assert_eq!(WireState::None.negate(), WireState::None);
}

#[test]
fn test_from_value() {
    assert_eq!(WireState::from_value(0), WireState::Low);
    assert_eq!(WireState::from_value(1), WireState::High);
    assert_eq!(WireState::from_value(0x80), WireState::High);
    assert_eq!(WireState::from(true), WireState::High);
    assert_eq!(WireState::from(false), WireState::Low);
}

#[test]
fn test_as_bit() {
    assert_eq!(WireState::None.as_bit(), None);
    assert_eq!(WireState::Low.as_bit(), Some(0));
    assert_eq!(WireState::High.as_bit(), Some(1));
}

#[test]
fn test_edge_arriving_at() {
    assert_eq!(StateEdge::arriving_at(WireState::High), StateEdge::Raising);
    assert_eq!(StateEdge::arriving_at(WireState::Low), StateEdge::Falling);
    assert_eq!(StateEdge::arriving_at(WireState::None), StateEdge::Invalid);
}
