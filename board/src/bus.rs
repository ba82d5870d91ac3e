//! Width-typed shared buses.
//!
//! Every bus has a fixed width chosen when it is created and its
//! value is always masked to that width.  Writes report whether they
//! actually changed the value so that observers are only told about
//! real changes.
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use base::prelude::*;

use crate::changelog::ChangeIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BusWidth {
    W8,
    W16,
    W32,
    W64,
}

impl BusWidth {
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            BusWidth::W8 => 8,
            BusWidth::W16 => 16,
            BusWidth::W32 => 32,
            BusWidth::W64 => 64,
        }
    }

    #[must_use]
    pub const fn mask(self) -> u64 {
        width_mask(self.bits())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusWidthError(pub u32);

impl Display for BusWidthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bus width {} is not supported (expected 8, 16, 32 or 64)",
            self.0
        )
    }
}

impl Error for BusWidthError {}

impl TryFrom<u32> for BusWidth {
    type Error = BusWidthError;

    fn try_from(bits: u32) -> Result<BusWidth, BusWidthError> {
        match bits {
            8 => Ok(BusWidth::W8),
            16 => Ok(BusWidth::W16),
            32 => Ok(BusWidth::W32),
            64 => Ok(BusWidth::W64),
            other => Err(BusWidthError(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bus {
    name: String,
    width: BusWidth,
    data: u64,
}

impl Bus {
    #[must_use]
    pub fn new(name: impl Into<String>, width: BusWidth) -> Bus {
        Bus {
            name: name.into(),
            width,
            data: 0,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn width(&self) -> BusWidth {
        self.width
    }

    /// Reads line `i`.  Lines beyond the width of the bus are not
    /// driven.
    #[must_use]
    pub fn bit(&self, i: u32) -> WireState {
        debug_assert!(i < self.width.bits(), "bit {i} beyond bus {}", self.name);
        if i >= self.width.bits() {
            return WireState::None;
        }
        WireState::from_value(self.data & (1 << i))
    }

    /// Drives line `i`.  Returns true when the value of the bus
    /// changed.  Setting a line to `WireState::None` leaves it alone.
    pub fn set_bit(&mut self, i: u32, state: WireState) -> bool {
        debug_assert!(i < self.width.bits(), "bit {i} beyond bus {}", self.name);
        if i >= self.width.bits() {
            return false;
        }
        match state.as_bit() {
            Some(b) => self.set_masked_data(b << i, 1 << i),
            None => false,
        }
    }

    #[must_use]
    pub fn data(&self) -> u64 {
        self.data
    }

    pub fn set_data(&mut self, value: u64) -> bool {
        let value = value & self.width.mask();
        if value == self.data {
            return false;
        }
        self.data = value;
        true
    }

    #[must_use]
    pub fn masked_data(&self, mask: u64) -> u64 {
        self.data & mask
    }

    /// Replaces only the bits selected by `mask`.
    pub fn set_masked_data(&mut self, value: u64, mask: u64) -> bool {
        self.set_data((self.data & !mask) | (value & mask))
    }
}

/// Identifies a bus within a [`BusSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BusId(usize);

impl BusId {
    pub const ADDRESS: BusId = BusId(0);
    pub const DATA: BusId = BusId(1);
}

pub const ADDRESS_BUS_NAME: &str = "ADDRESS";
pub const DATA_BUS_NAME: &str = "DATA";

/// The board's buses.  The address and data buses always exist; the
/// auxiliary buses come from the current configuration and go away
/// when it is replaced.
#[derive(Debug)]
pub struct BusSet {
    buses: Vec<Bus>,
    changes: ChangeIndex<BusId>,
}

impl Default for BusSet {
    fn default() -> Self {
        Self::new()
    }
}

impl BusSet {
    #[must_use]
    pub fn new() -> BusSet {
        BusSet {
            buses: vec![
                Bus::new(ADDRESS_BUS_NAME, BusWidth::W16),
                Bus::new(DATA_BUS_NAME, BusWidth::W8),
            ],
            changes: ChangeIndex::default(),
        }
    }

    pub fn add(&mut self, bus: Bus) -> BusId {
        self.buses.push(bus);
        BusId(self.buses.len() - 1)
    }

    /// Drops all of the auxiliary buses.
    pub(crate) fn clear_auxiliary(&mut self) {
        self.buses.truncate(2);
        self.changes.clear();
    }

    #[must_use]
    pub fn get(&self, id: BusId) -> Option<&Bus> {
        self.buses.get(id.0)
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<BusId> {
        self.buses
            .iter()
            .position(|bus| bus.name() == name)
            .map(BusId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (BusId, &Bus)> {
        self.buses
            .iter()
            .enumerate()
            .map(|(index, bus)| (BusId(index), bus))
    }

    pub fn auxiliary(&self) -> impl Iterator<Item = (BusId, &Bus)> {
        self.iter().skip(2)
    }

    #[must_use]
    pub fn data(&self, id: BusId) -> u64 {
        self.get(id).map_or(0, Bus::data)
    }

    #[must_use]
    pub fn address(&self) -> u16 {
        self.data(BusId::ADDRESS) as u16
    }

    #[must_use]
    pub fn data_byte(&self) -> u8 {
        self.data(BusId::DATA) as u8
    }

    pub fn set_data(&mut self, id: BusId, value: u64) -> bool {
        self.update(id, |bus| bus.set_data(value))
    }

    pub fn set_masked_data(&mut self, id: BusId, value: u64, mask: u64) -> bool {
        self.update(id, |bus| bus.set_masked_data(value, mask))
    }

    pub fn set_bit(&mut self, id: BusId, i: u32, state: WireState) -> bool {
        self.update(id, |bus| bus.set_bit(i, state))
    }

    fn update<F: FnOnce(&mut Bus) -> bool>(&mut self, id: BusId, f: F) -> bool {
        match self.buses.get_mut(id.0) {
            Some(bus) => {
                let changed = f(bus);
                if changed {
                    self.changes.add(id);
                }
                changed
            }
            None => false,
        }
    }

    pub(crate) fn drain_changes(&mut self) -> BTreeSet<BusId> {
        self.changes.drain()
    }
}
