//! Packs variable-length sensor samples into fixed-size records.
//!
//! Samples arriving within half a sampling interval of the window start share
//! one record. A record is sealed (flushed) when the next sample falls outside
//! the window or would not fit; the sample that triggered the flush opens the
//! next record, it is never split.

use heapless::Vec;
use log::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::sensors::SensorSample;
use crate::storage::{ENTRY_HEADER_SIZE, RECORD_CAPACITY, StorageElement};

/// Sampling interval in ms for a frequency in Hz (`1000 / frequency`)
pub const fn sampling_interval_ms(frequency: u32) -> u32 {
    if frequency == 0 { 0 } else { 1000 / frequency }
}

/// Sensor report interval: five samples' worth, capped at `max_latency_ms`
pub const fn reporting_interval_ms(sampling_interval_ms: u32, max_latency_ms: u32) -> u32 {
    let five_samples = sampling_interval_ms.saturating_mul(5);
    if five_samples < max_latency_ms {
        five_samples
    } else {
        max_latency_ms
    }
}

/// The open write buffer: window start plus packed entries.
#[derive(Debug, Clone, Default)]
pub struct AggregationRecord {
    timestamp: u32,
    packed: Vec<u8, RECORD_CAPACITY>,
}

impl AggregationRecord {
    pub const fn new() -> Self {
        Self {
            timestamp: 0,
            packed: Vec::new(),
        }
    }

    /// Window start of the record
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Bytes used so far
    pub fn fill(&self) -> usize {
        self.packed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packed.is_empty()
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }

    fn has_room(&self, entry_len: usize) -> bool {
        self.fill() + entry_len <= RECORD_CAPACITY
    }

    fn append(&mut self, sample: &SensorSample) -> PipelineResult<()> {
        let too_large = PipelineError::SampleTooLarge {
            len: sample.payload.len(),
        };

        self.packed
            .push(sample.sensor_type.id())
            .map_err(|_| too_large)?;
        self.packed
            .push(sample.payload.len() as u8)
            .map_err(|_| too_large)?;
        self.packed
            .extend_from_slice(&sample.payload)
            .map_err(|_| too_large)
    }

    /// Hand the record off as a store element and start over empty
    fn seal(&mut self) -> StorageElement {
        let element = StorageElement::new(self.timestamp, &self.packed);
        self.packed.clear();
        element
    }

    fn clear(&mut self) {
        self.timestamp = 0;
        self.packed.clear();
    }
}

/// Sample aggregator for one collection session.
pub struct Aggregator {
    record: AggregationRecord,
    sampling_interval_ms: u32,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub const fn new() -> Self {
        Self {
            record: AggregationRecord::new(),
            sampling_interval_ms: 0,
        }
    }

    /// Prepare for a new session at `frequency` Hz, discarding any open record
    pub fn reset(&mut self, frequency: u32) {
        self.sampling_interval_ms = sampling_interval_ms(frequency);
        self.record.clear();
    }

    pub fn sampling_interval_ms(&self) -> u32 {
        self.sampling_interval_ms
    }

    pub fn record(&self) -> &AggregationRecord {
        &self.record
    }

    /// Append a sample, returning the sealed previous record when the sample
    /// closes the window or does not fit.
    ///
    /// A sample whose header and payload exceed a whole record is rejected and
    /// leaves the open record untouched.
    pub fn ingest(&mut self, sample: &SensorSample) -> PipelineResult<Option<StorageElement>> {
        let entry_len = ENTRY_HEADER_SIZE + sample.payload.len();
        if entry_len > RECORD_CAPACITY {
            return Err(PipelineError::SampleTooLarge {
                len: sample.payload.len(),
            });
        }

        let mut sealed = None;
        if self.record.is_empty() {
            self.record.timestamp = sample.timestamp;
        } else if self.window_elapsed(sample.timestamp) || !self.record.has_room(entry_len) {
            debug!(
                "Flushing record at {} ({} bytes)",
                self.record.timestamp,
                self.record.fill()
            );
            sealed = Some(self.record.seal());
            self.record.timestamp = sample.timestamp;
        }

        self.record.append(sample)?;
        Ok(sealed)
    }

    /// Seal the open record regardless of the window, if it holds anything
    pub fn flush(&mut self) -> Option<StorageElement> {
        if self.record.is_empty() {
            None
        } else {
            Some(self.record.seal())
        }
    }

    fn window_elapsed(&self, timestamp: u32) -> bool {
        timestamp
            > self
                .record
                .timestamp
                .saturating_add(self.sampling_interval_ms / 2)
    }
}
