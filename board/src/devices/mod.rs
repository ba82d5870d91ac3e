//! The peripherals which can be placed on a board.
//!
//! [`Memory`], [`Acia`], [`Via`] and [`Lcd`] implement
//! [`DeviceBehavior`](crate::device::DeviceBehavior).  The VIA and
//! the LCD wrap chip cores ([`m6522`] and [`hd44780`]) which know
//! nothing about buses and are driven through their pins.
pub mod acia;
pub mod hd44780;
pub mod lcd;
pub mod m6522;
pub mod memory;
pub mod via;

pub use acia::Acia;
pub use lcd::Lcd;
pub use memory::{Memory, MemoryKind};
pub use via::Via;
