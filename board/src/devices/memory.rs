//! ROM, RAM and Flash.
//!
//! A memory decodes as many addresses as it has bytes.  On a raising
//! edge while selected it either drives the data bus from its
//! contents (read cycle) or, when writable, latches the data bus
//! (write cycle).  Writes to ROM are ignored.
use std::any::Any;

use serde::{Deserialize, Serialize};

use base::prelude::*;

use crate::bus::BusId;
use crate::config::DeviceType;
use crate::device::{Backplane, DeviceBehavior, Placement};
use crate::event::BoardEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryKind {
    #[serde(rename = "ROM")]
    Rom,
    #[serde(rename = "RAM")]
    Ram,
    Flash,
}

impl MemoryKind {
    #[must_use]
    pub fn is_writable(self) -> bool {
        matches!(self, MemoryKind::Ram | MemoryKind::Flash)
    }

    /// Persistent memories keep their contents in the content store.
    #[must_use]
    pub fn is_persistent(self) -> bool {
        matches!(self, MemoryKind::Rom | MemoryKind::Flash)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryAccess {
    pub offset: u16,
    pub write: bool,
}

#[derive(Debug)]
pub struct Memory {
    kind: MemoryKind,
    data: Vec<u8>,
    last_access: Option<MemoryAccess>,
}

impl Memory {
    #[must_use]
    pub fn new(kind: MemoryKind, size: usize) -> Memory {
        Memory {
            kind,
            data: vec![0; size],
            last_access: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn last_access(&self) -> Option<MemoryAccess> {
        self.last_access
    }

    /// Copies `bytes` in starting at `offset`, regardless of memory
    /// kind (this is how programs get into ROM).  Bytes which do not
    /// fit are dropped; the number actually copied is returned.
    pub fn load(&mut self, offset: usize, bytes: &[u8]) -> usize {
        let Some(dest) = self.data.get_mut(offset..) else {
            return 0;
        };
        let n = dest.len().min(bytes.len());
        dest[..n].copy_from_slice(&bytes[..n]);
        n
    }
}

impl DeviceBehavior for Memory {
    fn kind(&self) -> DeviceType {
        DeviceType::Memory
    }

    fn address_span(&self) -> u32 {
        u32::try_from(self.data.len()).unwrap_or(u32::MAX)
    }

    fn on_clock_edge(&mut self, edge: StateEdge, placement: &Placement, bp: &mut Backplane<'_>) {
        if !placement.is_selected() || !edge.is_raising() {
            return;
        }
        let offset = bp.buses.address().wrapping_sub(placement.address_start());
        let Some(cell) = self.data.get_mut(usize::from(offset)) else {
            return;
        };
        let write = if bp.lines.is_read() {
            bp.buses.set_data(BusId::DATA, u64::from(*cell));
            false
        } else if bp.lines.is_write() && self.kind.is_writable() {
            *cell = bp.buses.data_byte();
            true
        } else {
            return;
        };
        self.last_access = Some(MemoryAccess { offset, write });
        bp.publish(BoardEvent::MemoryAccessed {
            device: placement.name().to_string(),
            offset,
            write,
        });
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
