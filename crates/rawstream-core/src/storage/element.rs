//! On-store representation of a flushed aggregation record.
//!
//! Binary format (little-endian), 128 bytes:
//! - timestamp: 4 bytes (u32), start of the aggregation window
//! - data: 123 bytes, packed `(type, length, payload)` entries then zero fill
//! - datasize: 1 byte, `4 + fill`, so partial records read back correctly
//!
//! Only the first `datasize` bytes (timestamp plus the valid data) go out on
//! the wire.

use core::fmt::Display;

use heapless::Vec;

use super::{ENTRY_HEADER_SIZE, RAW_STORAGE_ELT_SIZE, RECORD_CAPACITY, TIMESTAMP_SIZE};
use crate::error::{PipelineError, PipelineResult};
use crate::sensors::SensorType;

/// One sealed record as it sits in the circular store.
#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageElement {
    /// Window start timestamp (monotonic ms)
    pub timestamp: u32,
    /// Packed entries; bytes past `fill` are zero
    data: [u8; RECORD_CAPACITY],
    /// Timestamp size plus valid data length
    datasize: u8,
}

impl StorageElement {
    /// Seal packed record bytes into an element.
    pub fn new(timestamp: u32, packed: &Vec<u8, RECORD_CAPACITY>) -> Self {
        let mut data = [0u8; RECORD_CAPACITY];
        data[..packed.len()].copy_from_slice(packed);

        Self {
            timestamp,
            data,
            datasize: (TIMESTAMP_SIZE + packed.len()) as u8,
        }
    }

    /// Returns the size of this structure on the store (128).
    pub const fn size() -> usize {
        RAW_STORAGE_ELT_SIZE
    }

    pub fn datasize(&self) -> u8 {
        self.datasize
    }

    /// Number of packed bytes in use
    pub fn fill(&self) -> usize {
        self.datasize as usize - TIMESTAMP_SIZE
    }

    /// The valid packed entries
    pub fn packed(&self) -> &[u8] {
        &self.data[..self.fill()]
    }

    /// Bytes sent over the link: the leading `datasize` bytes of [`Self::to_bytes`]
    pub fn wire_len(&self) -> usize {
        self.datasize as usize
    }

    /// Iterate the packed entries in arrival order
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            data: self.packed(),
        }
    }

    /// Converts the element to its store representation.
    pub fn to_bytes(&self) -> [u8; RAW_STORAGE_ELT_SIZE] {
        let mut bytes = [0u8; RAW_STORAGE_ELT_SIZE];

        bytes[..TIMESTAMP_SIZE].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes[TIMESTAMP_SIZE..TIMESTAMP_SIZE + RECORD_CAPACITY].copy_from_slice(&self.data);
        bytes[RAW_STORAGE_ELT_SIZE - 1] = self.datasize;

        bytes
    }

    /// Reads an element back from its store representation.
    ///
    /// Fails if the `datasize` trailer is outside `4..=127`.
    pub fn from_bytes(bytes: &[u8; RAW_STORAGE_ELT_SIZE]) -> PipelineResult<Self> {
        let datasize = bytes[RAW_STORAGE_ELT_SIZE - 1];
        if (datasize as usize) < TIMESTAMP_SIZE
            || datasize as usize > TIMESTAMP_SIZE + RECORD_CAPACITY
        {
            return Err(PipelineError::CorruptElement { datasize });
        }

        let mut timestamp_bytes = [0u8; TIMESTAMP_SIZE];
        timestamp_bytes.copy_from_slice(&bytes[..TIMESTAMP_SIZE]);

        // Keep the unused tail zeroed whatever the store left there
        let fill = datasize as usize - TIMESTAMP_SIZE;
        let mut data = [0u8; RECORD_CAPACITY];
        data[..fill].copy_from_slice(&bytes[TIMESTAMP_SIZE..TIMESTAMP_SIZE + fill]);

        Ok(Self {
            timestamp: u32::from_le_bytes(timestamp_bytes),
            data,
            datasize,
        })
    }
}

impl Display for StorageElement {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "[StorageElement] timestamp: {}, datasize: {}, entries: {}",
            self.timestamp,
            self.datasize,
            self.entries().count()
        )
    }
}

/// One `(type, length, payload)` entry of a packed record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedEntry<'a> {
    pub sensor_type: SensorType,
    pub payload: &'a [u8],
}

impl PackedEntry<'_> {
    /// Bytes this entry occupies in the record
    pub fn packed_len(&self) -> usize {
        ENTRY_HEADER_SIZE + self.payload.len()
    }
}

/// Iterator over the entries of a record.
///
/// Stops at a zero type byte or at a truncated entry.
pub struct Entries<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for Entries<'a> {
    type Item = PackedEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let data = core::mem::take(&mut self.data);

        let (&sensor_type, rest) = data.split_first()?;
        if sensor_type == 0 {
            return None;
        }

        let (&len, rest) = rest.split_first()?;
        let len = len as usize;
        if rest.len() < len {
            return None;
        }

        let (payload, rest) = rest.split_at(len);
        self.data = rest;

        Some(PackedEntry {
            sensor_type: SensorType::new(sensor_type),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(bytes: &[u8]) -> Vec<u8, RECORD_CAPACITY> {
        Vec::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_element_size() {
        assert_eq!(StorageElement::size(), 128, "StorageElement must be exactly 128 bytes");
        assert_eq!(RECORD_CAPACITY, 123);
    }

    #[test]
    fn test_partial_element_layout() {
        let element = StorageElement::new(0x0403_0201, &packed(&[1, 2, 0xAA, 0xBB]));
        let bytes = element.to_bytes();

        assert_eq!(&bytes[..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[4..8], &[1, 2, 0xAA, 0xBB]);
        assert!(bytes[8..127].iter().all(|b| *b == 0));
        assert_eq!(bytes[127], 8);
        assert_eq!(element.wire_len(), 8);
        assert_eq!(element.fill(), 4);
    }

    #[test]
    fn test_element_read_back_keeps_datasize() {
        let element = StorageElement::new(1234, &packed(&[2, 3, 9, 8, 7]));
        let restored = StorageElement::from_bytes(&element.to_bytes()).unwrap();

        assert_eq!(restored, element);
        assert_eq!(restored.packed(), &[2, 3, 9, 8, 7]);
    }

    #[test]
    fn test_from_bytes_zeroes_stale_tail() {
        let mut bytes = [0xFFu8; RAW_STORAGE_ELT_SIZE];
        bytes[..4].copy_from_slice(&10u32.to_le_bytes());
        bytes[4..7].copy_from_slice(&[1, 1, 5]);
        bytes[127] = 7;

        let element = StorageElement::from_bytes(&bytes).unwrap();
        assert_eq!(element.packed(), &[1, 1, 5]);
        assert!(element.to_bytes()[7..127].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_from_bytes_rejects_bad_datasize() {
        let mut bytes = [0u8; RAW_STORAGE_ELT_SIZE];
        bytes[127] = 3;
        assert_eq!(
            StorageElement::from_bytes(&bytes),
            Err(PipelineError::CorruptElement { datasize: 3 })
        );

        bytes[127] = 128;
        assert_eq!(
            StorageElement::from_bytes(&bytes),
            Err(PipelineError::CorruptElement { datasize: 128 })
        );
    }

    #[test]
    fn test_entries_in_arrival_order() {
        let element = StorageElement::new(0, &packed(&[1, 2, 10, 11, 2, 1, 20, 1, 0]));
        let entries: std::vec::Vec<_> = element.entries().collect();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].sensor_type, SensorType::ACCELEROMETER);
        assert_eq!(entries[0].payload, &[10, 11]);
        assert_eq!(entries[1].sensor_type, SensorType::GYROSCOPE);
        assert_eq!(entries[1].payload, &[20]);
        assert_eq!(entries[2].payload, &[] as &[u8]);
    }

    #[test]
    fn test_entries_stop_at_truncation() {
        let element = StorageElement::new(0, &packed(&[1, 1, 5, 2, 9, 1]));
        let entries: std::vec::Vec<_> = element.entries().collect();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].packed_len(), 3);
    }
}
