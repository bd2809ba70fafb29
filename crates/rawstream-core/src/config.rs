use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::sensors::SensorMask;
use crate::storage::StorageKey;

/// Maximum unacknowledged transmissions on the link
pub const MAX_IN_FLIGHT: u8 = 3;

/// Upper bound on the sensor report interval, in ms
pub const MAXIMUM_LATENCY_MS: u32 = 100;

/// Transport channel carrying raw data records
pub const RAWDATA_CHANNEL: u8 = 0x1C;

/// Default sampling frequency in Hz
pub const DEFAULT_FREQUENCY: u32 = 100;

/// Link connection parameters.
///
/// Intervals are in 1.25 ms units, the supervision timeout in 10 ms units.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionParams {
    pub min_interval: u16,
    pub max_interval: u16,
    pub latency: u16,
    pub timeout: u16,
}

impl ConnectionParams {
    /// Short connection interval requested while streaming
    pub const STREAMING: Self = Self {
        min_interval: 8,
        max_interval: 16,
        latency: 0,
        timeout: 100,
    };
}

/// Tunables of the collection pipeline.
///
/// Serialized with postcard so a board can keep it in flash next to its
/// partition table.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub storage_key: StorageKey,
    pub max_in_flight: u8,
    pub max_report_latency_ms: u32,
    pub transport_channel: u8,
    pub streaming_connection: ConnectionParams,
    pub default_mask: SensorMask,
    pub default_frequency: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_key: StorageKey::RAW_DATA,
            max_in_flight: MAX_IN_FLIGHT,
            max_report_latency_ms: MAXIMUM_LATENCY_MS,
            transport_channel: RAWDATA_CHANNEL,
            streaming_connection: ConnectionParams::STREAMING,
            default_mask: SensorMask::DEFAULT,
            default_frequency: DEFAULT_FREQUENCY,
        }
    }
}

impl PipelineConfig {
    /// Decode a postcard blob and check it
    pub fn from_postcard(bytes: &[u8]) -> PipelineResult<Self> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| PipelineError::InvalidConfig)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_postcard(&self) -> PipelineResult<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|_| PipelineError::InvalidConfig)
    }

    /// A zero window would never let anything out, a zero frequency has no interval
    pub fn validate(&self) -> PipelineResult<()> {
        if self.max_in_flight == 0 {
            return Err(PipelineError::InvalidConfig);
        }
        if self.default_frequency == 0 {
            return Err(PipelineError::InvalidFrequency {
                frequency: self.default_frequency,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_device_constants() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_in_flight, 3);
        assert_eq!(config.max_report_latency_ms, 100);
        assert_eq!(config.transport_channel, 0x1C);
        assert_eq!(config.storage_key.raw(), u32::from_be_bytes(*b"SRAW"));
        assert_eq!(config.default_frequency, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_postcard_blob_round_trip() {
        let mut config = PipelineConfig::default();
        config.max_in_flight = 5;
        config.streaming_connection.max_interval = 24;

        let blob = config.to_postcard().unwrap();
        assert_eq!(PipelineConfig::from_postcard(&blob), Ok(config));
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let mut config = PipelineConfig::default();
        config.max_in_flight = 0;
        let blob = config.to_postcard().unwrap();

        assert_eq!(
            PipelineConfig::from_postcard(&blob),
            Err(PipelineError::InvalidConfig)
        );
    }

    #[test]
    fn test_truncated_blob_is_rejected() {
        let blob = PipelineConfig::default().to_postcard().unwrap();
        assert_eq!(
            PipelineConfig::from_postcard(&blob[..2]),
            Err(PipelineError::InvalidConfig)
        );
    }
}
