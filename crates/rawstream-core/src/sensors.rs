//! Sensor identifiers, subscription masks and the channel registry

use core::fmt::Display;

use heapless::Vec;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::storage::RECORD_CAPACITY;

/// Number of sensor types a mask can address (one bit each)
pub const MAX_SENSOR_TYPES: usize = 32;

/// On-board sensor type, as reported by the sensor service.
///
/// The id doubles as the bit index in a [`SensorMask`] and as the `type`
/// byte of a packed record entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SensorType(u8);

impl SensorType {
    pub const ACCELEROMETER: Self = Self(1);
    pub const GYROSCOPE: Self = Self(2);

    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u8 {
        self.0
    }

    /// Bit for this type in a [`SensorMask`], `None` if the id is out of range
    pub const fn mask_bit(self) -> Option<u32> {
        if (self.0 as usize) < MAX_SENSOR_TYPES {
            Some(1 << self.0)
        } else {
            None
        }
    }
}

impl Display for SensorType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            Self::ACCELEROMETER => write!(f, "accelerometer"),
            Self::GYROSCOPE => write!(f, "gyroscope"),
            Self(id) => write!(f, "sensor type {}", id),
        }
    }
}

/// Bitset of requested sensor types; bit `i` selects [`SensorType`] `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SensorMask(u32);

impl SensorMask {
    pub const EMPTY: Self = Self(0);

    /// Accelerometer and gyroscope
    pub const DEFAULT: Self = Self((1 << SensorType::ACCELEROMETER.0) | (1 << SensorType::GYROSCOPE.0));

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns this mask with `sensor` added; ids beyond the mask width are ignored
    pub const fn with(self, sensor: SensorType) -> Self {
        match sensor.mask_bit() {
            Some(bit) => Self(self.0 | bit),
            None => self,
        }
    }

    pub const fn contains(self, sensor: SensorType) -> bool {
        match sensor.mask_bit() {
            Some(bit) => self.0 & bit != 0,
            None => false,
        }
    }

    /// Iterate the selected sensor types in ascending id order
    pub fn iter(self) -> impl Iterator<Item = SensorType> {
        (0..MAX_SENSOR_TYPES as u8)
            .map(SensorType::new)
            .filter(move |sensor| self.contains(*sensor))
    }
}

/// Data-type selector passed with (un)subscribe requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataTypes(u8);

impl DataTypes {
    /// Raw samples straight from the sensor
    pub const RAW: Self = Self(1);

    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// Handle the sensor service hands out for one on-board channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorHandle {
    pub sensor_type: SensorType,
    pub channel_id: u8,
}

impl SensorHandle {
    pub const fn new(sensor_type: SensorType, channel_id: u8) -> Self {
        Self {
            sensor_type,
            channel_id,
        }
    }
}

/// One sample event from the sensor service.
///
/// Payload bytes are opaque to the pipeline; they are packed into records
/// exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorSample {
    pub sensor_type: SensorType,
    /// Monotonic milliseconds
    pub timestamp: u32,
    pub payload: Vec<u8, RECORD_CAPACITY>,
}

impl SensorSample {
    /// Create a sample, failing if the payload exceeds the record capacity
    pub fn new(sensor_type: SensorType, timestamp: u32, payload: &[u8]) -> PipelineResult<Self> {
        let payload = Vec::from_slice(payload)
            .map_err(|_| PipelineError::SampleTooLarge { len: payload.len() })?;

        Ok(Self {
            sensor_type,
            timestamp,
            payload,
        })
    }
}

/// Channels that reported themselves available while scanning.
///
/// Indexed by sensor type id; a later scan of the same type replaces the
/// earlier handle.
#[derive(Debug, Clone, Default)]
pub struct SensorRegistry {
    handles: [Option<SensorHandle>; MAX_SENSOR_TYPES],
}

impl SensorRegistry {
    pub const fn new() -> Self {
        Self {
            handles: [None; MAX_SENSOR_TYPES],
        }
    }

    /// Record a scanned channel
    pub fn register(&mut self, handle: SensorHandle) {
        let index = handle.sensor_type.id() as usize;
        match self.handles.get_mut(index) {
            Some(slot) => {
                debug!(
                    "Registered {} on channel {}",
                    handle.sensor_type, handle.channel_id
                );
                *slot = Some(handle);
            }
            None => warn!("Ignoring scan of {}: id out of range", handle.sensor_type),
        }
    }

    pub fn get(&self, sensor: SensorType) -> Option<SensorHandle> {
        self.handles.get(sensor.id() as usize).copied().flatten()
    }

    pub fn is_registered(&self, sensor: SensorType) -> bool {
        self.get(sensor).is_some()
    }

    /// First sensor selected by `mask` that has no registered channel
    pub fn first_missing(&self, mask: SensorMask) -> Option<SensorType> {
        mask.iter().find(|sensor| !self.is_registered(*sensor))
    }

    /// Registered handles for every sensor selected by `mask`
    pub fn handles_for(&self, mask: SensorMask) -> impl Iterator<Item = SensorHandle> + '_ {
        mask.iter().filter_map(|sensor| self.get(sensor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mask_selects_accel_and_gyro() {
        let selected: std::vec::Vec<_> = SensorMask::DEFAULT.iter().collect();
        assert_eq!(selected, [SensorType::ACCELEROMETER, SensorType::GYROSCOPE]);
        assert_eq!(SensorMask::DEFAULT.bits(), 0b110);
    }

    #[test]
    fn test_mask_ignores_out_of_range_type() {
        let mask = SensorMask::EMPTY.with(SensorType::new(40));
        assert!(mask.is_empty());
        assert!(!mask.contains(SensorType::new(40)));
    }

    #[test]
    fn test_registry_reports_first_missing_sensor() {
        let mut registry = SensorRegistry::new();
        registry.register(SensorHandle::new(SensorType::ACCELEROMETER, 0));

        assert_eq!(registry.first_missing(SensorMask::DEFAULT), Some(SensorType::GYROSCOPE));

        registry.register(SensorHandle::new(SensorType::GYROSCOPE, 3));
        assert_eq!(registry.first_missing(SensorMask::DEFAULT), None);
        assert_eq!(registry.handles_for(SensorMask::DEFAULT).count(), 2);
    }

    #[test]
    fn test_registry_rescan_replaces_handle() {
        let mut registry = SensorRegistry::new();
        registry.register(SensorHandle::new(SensorType::GYROSCOPE, 1));
        registry.register(SensorHandle::new(SensorType::GYROSCOPE, 4));

        assert_eq!(registry.get(SensorType::GYROSCOPE).map(|h| h.channel_id), Some(4));
    }

    #[test]
    fn test_sample_rejects_oversized_payload() {
        let payload = [0u8; RECORD_CAPACITY + 1];
        assert_eq!(
            SensorSample::new(SensorType::ACCELEROMETER, 0, &payload),
            Err(PipelineError::SampleTooLarge {
                len: RECORD_CAPACITY + 1
            })
        );
    }
}
