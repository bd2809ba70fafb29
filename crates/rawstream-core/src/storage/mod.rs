pub mod element;
pub mod queue;

pub use element::*;
pub use queue::*;

use core::fmt::Display;

use serde::{Deserialize, Serialize};

/// Size of one element in the block-circular store
pub const RAW_STORAGE_ELT_SIZE: usize = 128;

/// Bytes taken by the window timestamp at the front of an element
pub const TIMESTAMP_SIZE: usize = core::mem::size_of::<u32>();

/// Bytes taken by the `datasize` trailer at the end of an element
pub const DATASIZE_SIZE: usize = core::mem::size_of::<u8>();

/// Packed bytes one record can hold
pub const RECORD_CAPACITY: usize = RAW_STORAGE_ELT_SIZE - TIMESTAMP_SIZE - DATASIZE_SIZE;

/// Each packed entry starts with a type byte and a length byte
pub const ENTRY_HEADER_SIZE: usize = 2;

/// Key identifying one circular store among those configured on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageKey(u32);

impl StorageKey {
    /// Raw sensor data store (`SRAW`)
    pub const RAW_DATA: Self = Self::from_tag(*b"SRAW");

    /// Build a key from a four character tag, first character most significant
    pub const fn from_tag(tag: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(tag))
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl Display for StorageKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for byte in self.0.to_be_bytes() {
            if byte.is_ascii_graphic() {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{:02x}", byte)?;
            }
        }
        Ok(())
    }
}

/// Opaque handle to an opened circular store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreHandle(u32);

impl StoreHandle {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// How many elements a clear request releases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearCount {
    /// Drop everything in the store
    All,
    /// Release the given number of oldest elements
    Elements(u32),
}
