//! The prelude exports the wire model and the bit-mapping helpers.
//! Nearly every module of the simulator wants both.
pub use super::bits::{bit_count, extract_bits, inject_bits, width_mask, BitWord};
pub use super::wire::{StateEdge, WireState};
