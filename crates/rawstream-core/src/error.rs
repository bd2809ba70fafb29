//! Error types for the collection pipeline

use thiserror_no_std::Error;

use crate::sensors::SensorType;

/// Everything that can go wrong inside the pipeline.
///
/// None of these abort anything: each one is logged where it stops
/// propagating, and only start/stop refusals and session failures reach the
/// requester (through [`crate::services::Notification`]).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PipelineError {
    /// A requested sensor channel never reported itself during scanning
    #[error("Sensor {sensor} is not available")]
    InvalidSensor {
        /// First unavailable sensor found in the mask
        sensor: SensorType,
    },

    /// Streaming was requested but the link is not open
    #[error("Streaming requested while the link is closed")]
    LinkClosed,

    /// A session is already in progress (or still draining)
    #[error("A collection session is already active")]
    SessionActive,

    /// Stop requested with no running session
    #[error("No collection session is running")]
    NotRunning,

    /// The store handle has not been acquired
    #[error("Persistent store is not available")]
    StoreUnavailable,

    /// Sampling frequency of zero
    #[error("Invalid sampling frequency: {frequency} Hz")]
    InvalidFrequency {
        /// Requested frequency
        frequency: u32,
    },

    /// Push acknowledgment reported a failure
    #[error("Raw data write failure [{status}]")]
    StoreWrite {
        /// Store driver status code
        status: i32,
    },

    /// Peek acknowledgment reported a failure
    #[error("Raw data read failure [{status}]")]
    StoreRead {
        /// Store driver status code
        status: i32,
    },

    /// Store handle could not be acquired
    #[error("Circular storage get failure [{status}]")]
    StoreOpen {
        /// Store driver status code
        status: i32,
    },

    /// A sensor subscription acknowledgment reported a failure
    #[error("Sensor subscription failure [{status}]")]
    Subscription {
        /// Sensor service status code
        status: i32,
    },

    /// The transport refused an outbound payload
    #[error("Transport write failure [{code}]")]
    TransportWrite {
        /// Transport return code
        code: i32,
    },

    /// A sample whose header and payload cannot fit in any record
    #[error("Sample of {len} bytes can never fit in a record")]
    SampleTooLarge {
        /// Payload length in bytes
        len: usize,
    },

    /// A stored element carries an impossible `datasize` trailer
    #[error("Stored element has invalid datasize {datasize}")]
    CorruptElement {
        /// The trailer value read back
        datasize: u8,
    },

    /// The event queue has no room left
    #[error("Event queue is full")]
    QueueFull,

    /// A configuration blob could not be decoded or encoded
    #[error("Invalid configuration")]
    InvalidConfig,
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
