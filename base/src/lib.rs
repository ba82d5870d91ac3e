//! The `base` crate defines the signal-level value types which are
//! useful to anything that talks about the simulated board.  The
//! idea is that a tool which only wants to describe wiring (say, a
//! board-file checker) can depend on the base crate without pulling
//! in the simulation engine itself.

pub mod bits;
pub mod prelude;
pub mod wire;
