//! The board oscillator.
//!
//! The clock alternates between `Low` and `High`.  Each flip is one
//! edge; a full cycle is counted on every transition to `High`.  The
//! clock either runs automatically (the executor keeps calling
//! [`Clock::tick`] at the configured pace) or is stepped one edge at a
//! time while stopped.
//!
//! Stopping is deferred: [`Clock::stop`] only records the request,
//! and the halt happens once an edge arriving at `High` has been fully
//! processed (see [`Clock::settle`]).  That way a half-cycle is never
//! cut short.
use std::time::Duration;

use tracing::{event, Level};

use base::prelude::*;

#[derive(Debug)]
pub struct Clock {
    period: Duration,
    running: bool,
    should_stop: bool,
    state: WireState,
    stats_cycles: u64,
}

impl Clock {
    #[must_use]
    pub fn new(period: Duration) -> Clock {
        Clock {
            period,
            running: false,
            should_stop: false,
            state: WireState::High,
            stats_cycles: 0,
        }
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn set_period(&mut self, period: Duration) {
        event!(Level::DEBUG, "clock period set to {:?}", period);
        self.period = period;
    }

    /// Time between two edges.  Odd nanoseconds round up.
    #[must_use]
    pub fn half_period(&self) -> Duration {
        let nanos = self.period.as_nanos();
        let half = nanos / 2 + nanos % 2;
        Duration::from_nanos(u64::try_from(half).unwrap_or(u64::MAX))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub fn state(&self) -> WireState {
        self.state
    }

    /// Starts automatic toggling.  Cancels a pending stop.  Returns
    /// true when the clock was not already running.
    pub fn start(&mut self) -> bool {
        self.should_stop = false;
        if self.running {
            false
        } else {
            self.running = true;
            true
        }
    }

    pub fn stop(&mut self) {
        self.should_stop = true;
    }

    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.running && self.should_stop
    }

    /// Flips the state and returns the edge that produced.
    pub fn tick(&mut self) -> StateEdge {
        self.state = if self.state.is_low() {
            WireState::High
        } else {
            WireState::Low
        };
        if self.state.is_high() {
            self.stats_cycles += 1;
        }
        StateEdge::arriving_at(self.state)
    }

    /// Applies a pending stop once the clock sits at `High`.  Returns
    /// true when the clock halted.
    pub fn settle(&mut self) -> bool {
        if self.running && self.should_stop && self.state.is_high() {
            self.running = false;
            self.should_stop = false;
            true
        } else {
            false
        }
    }

    /// How many ticks are needed so that the last of them yields
    /// `edge`.  `None` while the clock runs by itself, or for an
    /// invalid edge.
    #[must_use]
    pub fn ticks_for_edge(&self, edge: StateEdge) -> Option<u32> {
        if self.running {
            return None;
        }
        let extra = match edge {
            StateEdge::Raising => self.state.is_high(),
            StateEdge::Falling => self.state.is_low(),
            StateEdge::Invalid => return None,
        };
        Some(if extra { 2 } else { 1 })
    }

    /// Returns the number of cycles since the previous call.
    pub fn take_stats(&mut self) -> u64 {
        std::mem::take(&mut self.stats_cycles)
    }
}
