//! Seams to the external collaborators the pipeline drives.
//!
//! Every request is fire-and-forget: implementations queue the work and
//! answer later by posting an [`crate::event::Event`] on the dispatch queue.
//! No method here may call back into the pipeline.

use crate::config::ConnectionParams;
use crate::error::PipelineError;
use crate::sensors::{DataTypes, SensorHandle};
use crate::session::SessionParameters;
use crate::storage::{ClearCount, StorageElement, StorageKey, StoreHandle};

/// Continuation carried through a clear request and handed back with its
/// acknowledgment ([`crate::event::Event::Cleared`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearTag {
    /// Whole-store clear issued by an accepted start; subscribing resumes
    /// with these parameters
    SessionStart(SessionParameters),
    /// Release of elements already handed to the transport
    Consumed,
}

/// Block-circular persistent store.
pub trait StoreService {
    /// Look up (or create) the store for `key`; answered by `StoreOpened`
    fn open(&mut self, key: StorageKey);

    /// Append one element; answered by `Pushed`
    fn push(&mut self, handle: StoreHandle, element: StorageElement);

    /// Read the oldest unread element without consuming it; answered by `Peeked`
    fn peek(&mut self, handle: StoreHandle);

    /// Release elements; answered by `Cleared` carrying `tag`
    fn clear(&mut self, handle: StoreHandle, count: ClearCount, tag: ClearTag);
}

/// Sensor acquisition service.
pub trait SensorService {
    /// Start sample delivery for one channel; answered by `Subscribed`
    fn subscribe(
        &mut self,
        sensor: SensorHandle,
        data_types: DataTypes,
        rate_hz: u32,
        report_interval_ms: u32,
    );

    /// Stop sample delivery for one channel; not acknowledged
    fn unsubscribe(&mut self, sensor: SensorHandle, data_types: DataTypes);
}

/// Credit-limited wireless transport.
pub trait Transport {
    /// Submit a payload on `channel`. Accept or reject is immediate; delivery
    /// is confirmed later by `WriteAcked`.
    fn write(&mut self, channel: u8, payload: &[u8]) -> Result<(), i32>;

    /// Ask the link for different connection parameters
    fn update_connection(&mut self, params: ConnectionParams);

    /// Go back to the link's default connection parameters
    fn restore_default_connection(&mut self);
}

/// Final result of one collection session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Ok,
    Fail,
}

/// Messages for the external requester of start/stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Every sensor subscription was acknowledged
    Started,
    /// A start or stop request was refused synchronously
    Rejected(PipelineError),
    /// Terminal notification, at most once per session
    Finished(SessionOutcome),
}

impl Notification {
    /// Whether the requester should read this as a success
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Started | Self::Finished(SessionOutcome::Ok))
    }
}

/// Receiver of [`Notification`]s.
pub trait Notifier {
    fn notify(&mut self, notification: Notification);
}
