//! In-memory block-circular store.
//!
//! Mimics the device's circular storage service: elements live in fixed
//! slots inside erase blocks, a block is reclaimed only once every element
//! in it has been consumed, and one block is always kept spare for erasing.
//! Every request is answered by posting an [`Event`] straight away.

use std::collections::VecDeque;

use log::{debug, error, info, warn};

use rawstream_core::event::{Event, EventQueue};
use rawstream_core::services::{ClearTag, StoreService};
use rawstream_core::storage::{
    ClearCount, RAW_STORAGE_ELT_SIZE, StorageElement, StorageKey, StoreHandle,
};

use crate::EVENT_CAPACITY;

/// Bytes at the start of each erase block reserved for its header
pub const BLOCK_HEADER_SIZE: usize = 12;

/// Status word written ahead of every element
pub const SLOT_STATUS_SIZE: usize = 4;

/// One element slot: status word plus the element
pub const SLOT_SIZE: usize = SLOT_STATUS_SIZE + RAW_STORAGE_ELT_SIZE;

const SLOT_WRITTEN: u32 = 0x0000_5AA5;

const ENOENT: i32 = -2;
const EIO: i32 = -5;
const EBADF: i32 = -9;
const ENOSPC: i32 = -28;

type Slot = [u8; SLOT_SIZE];

/// Partition geometry of the circular store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub block_size: usize,
    pub block_count: usize,
}

impl Geometry {
    /// 8 blocks of 4 KiB
    pub const DEFAULT: Self = Self {
        block_size: 4096,
        block_count: 8,
    };

    pub const fn slots_per_block(&self) -> usize {
        (self.block_size - BLOCK_HEADER_SIZE) / SLOT_SIZE
    }

    /// Elements the store can hold with one block kept spare
    pub const fn capacity(&self) -> usize {
        (self.block_count - 1) * self.slots_per_block()
    }
}

pub struct SimStore {
    events: &'static EventQueue<EVENT_CAPACITY>,
    key: StorageKey,
    geometry: Geometry,
    handle: StoreHandle,
    slots: VecDeque<Slot>,
    /// Absolute index of the oldest unconsumed slot
    read_index: usize,
    /// Absolute index of the next slot to write
    write_index: usize,
    pushed: usize,
    refused: usize,
}

impl SimStore {
    pub fn new(
        events: &'static EventQueue<EVENT_CAPACITY>,
        key: StorageKey,
        geometry: Geometry,
    ) -> Self {
        info!(
            "Circular store {}: {} blocks of {} bytes, {} elements per block",
            key,
            geometry.block_count,
            geometry.block_size,
            geometry.slots_per_block()
        );
        Self {
            events,
            key,
            geometry,
            handle: StoreHandle::new(1),
            slots: VecDeque::new(),
            read_index: 0,
            write_index: 0,
            pushed: 0,
            refused: 0,
        }
    }

    /// Elements waiting to be consumed
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Elements accepted since creation
    pub fn pushed(&self) -> usize {
        self.pushed
    }

    /// Pushes refused for lack of space
    pub fn refused(&self) -> usize {
        self.refused
    }

    fn post(&self, event: Event) {
        if let Err(err) = self.events.post(event) {
            error!("Store answer lost: {}", err);
        }
    }

    /// A new element needs its block to be free or already open
    fn has_room(&self) -> bool {
        let per_block = self.geometry.slots_per_block();
        let live_blocks = self.write_index / per_block - self.read_index / per_block + 1;
        live_blocks < self.geometry.block_count
    }

    fn write(&mut self, element: &StorageElement) -> Result<(), i32> {
        if !self.has_room() {
            return Err(ENOSPC);
        }

        let mut slot = [0u8; SLOT_SIZE];
        slot[..SLOT_STATUS_SIZE].copy_from_slice(&SLOT_WRITTEN.to_le_bytes());
        slot[SLOT_STATUS_SIZE..].copy_from_slice(&element.to_bytes());

        self.slots.push_back(slot);
        self.write_index += 1;
        self.pushed += 1;
        Ok(())
    }

    fn read(&self) -> Result<Option<StorageElement>, i32> {
        let Some(slot) = self.slots.front() else {
            return Ok(None);
        };

        let mut status = [0u8; SLOT_STATUS_SIZE];
        status.copy_from_slice(&slot[..SLOT_STATUS_SIZE]);
        if u32::from_le_bytes(status) != SLOT_WRITTEN {
            return Err(EIO);
        }

        let mut bytes = [0u8; RAW_STORAGE_ELT_SIZE];
        bytes.copy_from_slice(&slot[SLOT_STATUS_SIZE..]);
        StorageElement::from_bytes(&bytes).map(Some).map_err(|err| {
            error!("{}", err);
            EIO
        })
    }

    fn release(&mut self, count: ClearCount) {
        match count {
            ClearCount::All => {
                debug!("Erasing all {} elements", self.slots.len());
                self.slots.clear();
                self.read_index = 0;
                self.write_index = 0;
            }
            ClearCount::Elements(count) => {
                let count = (count as usize).min(self.slots.len());
                for _ in 0..count {
                    self.slots.pop_front();
                }
                self.read_index += count;
            }
        }
    }
}

impl StoreService for SimStore {
    fn open(&mut self, key: StorageKey) {
        if key == self.key {
            self.post(Event::StoreOpened(Ok(self.handle)));
        } else {
            warn!("No circular store configured for {}", key);
            self.post(Event::StoreOpened(Err(ENOENT)));
        }
    }

    fn push(&mut self, handle: StoreHandle, element: StorageElement) {
        let status = if handle != self.handle {
            Err(EBADF)
        } else {
            self.write(&element)
        };

        if status.is_err() {
            self.refused += 1;
            debug!(
                "Push refused, {}/{} elements in use",
                self.slots.len(),
                self.geometry.capacity()
            );
        }
        self.post(Event::Pushed(status));
    }

    fn peek(&mut self, handle: StoreHandle) {
        let result = if handle != self.handle {
            Err(EBADF)
        } else {
            self.read()
        };
        self.post(Event::Peeked(result));
    }

    fn clear(&mut self, handle: StoreHandle, count: ClearCount, tag: ClearTag) {
        if handle == self.handle {
            self.release(count);
        } else {
            warn!("Clear with unknown handle {:?}", handle);
        }
        self.post(Event::Cleared(tag));
    }
}
