//! This module manages the two notions of time the board cares about.
//!
//! The clock advances simulated time by half a period on every edge,
//! whether it is running automatically or being single-stepped.
//! Peripheral delays (a serial character taking a millisecond to
//! shift out, a cursor blinking) are instead measured against the
//! real time which has elapsed since the board was created, because
//! they keep going while the clock is stopped, just as the chips on a
//! real board would.
//!
//! In order to avoid confusion between these related quantities of
//! the same type, we keep them together in a struct so that we can
//! give them very clear names.
use core::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Context {
    pub simulated_time: Duration,
    pub real_elapsed_time: Duration,
}

impl Context {
    #[must_use]
    pub fn new(simulated_time: Duration, real_elapsed_time: Duration) -> Context {
        Context {
            simulated_time,
            real_elapsed_time,
        }
    }
}
