//! Single ordered event queue feeding the pipeline
//!
//! Every acknowledgment from the store, the sensor service and the link is
//! posted here and handled one at a time, in order, by
//! [`crate::session::Pipeline::handle`]. Services never call back into the
//! pipeline directly.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use crate::error::{PipelineError, PipelineResult};
use crate::sensors::{SensorHandle, SensorSample};
use crate::services::ClearTag;
use crate::storage::{StorageElement, StoreHandle};

/// Default capacity of an [`EventQueue`]
pub const EVENT_QUEUE_CAPACITY: usize = 32;

/// Asynchronous completions and link notifications.
///
/// Failures carry the raw status code reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Answer to [`crate::services::StoreService::open`]
    StoreOpened(Result<StoreHandle, i32>),
    /// Answer to [`crate::services::StoreService::push`]
    Pushed(Result<(), i32>),
    /// Answer to [`crate::services::StoreService::peek`]; `None` when the
    /// store holds nothing unread
    Peeked(Result<Option<StorageElement>, i32>),
    /// Answer to [`crate::services::StoreService::clear`], carrying the
    /// continuation given with the request
    Cleared(ClearTag),
    /// A sensor channel reported itself during scanning
    SensorScanned(SensorHandle),
    /// One batch of samples from a subscribed channel
    SensorData(SensorSample),
    /// Answer to [`crate::services::SensorService::subscribe`]
    Subscribed(Result<(), i32>),
    /// The wireless link came up
    LinkOpened,
    /// The wireless link went down
    LinkClosed,
    /// The link acknowledged one earlier transport write
    WriteAcked,
}

/// Bounded FIFO of [`Event`]s shared between the services and the pipeline.
///
/// Posting never blocks, so services may post from any context, including
/// from inside a request the pipeline is making.
pub struct EventQueue<const N: usize = EVENT_QUEUE_CAPACITY> {
    channel: Channel<CriticalSectionRawMutex, Event, N>,
}

impl<const N: usize> Default for EventQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> EventQueue<N> {
    /// Create an empty queue; usable in a `static`
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Append an event, failing when the queue is full
    pub fn post(&self, event: Event) -> PipelineResult<()> {
        self.channel.try_send(event).map_err(|_| {
            warn!("Event queue full, dropping event");
            PipelineError::QueueFull
        })
    }

    /// Take the oldest event without waiting
    pub fn try_next(&self) -> Option<Event> {
        self.channel.try_receive().ok()
    }

    /// Wait for the next event
    pub async fn next(&self) -> Event {
        self.channel.receive().await
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_come_out_in_order() {
        let queue: EventQueue<4> = EventQueue::new();
        queue.post(Event::LinkOpened).unwrap();
        queue.post(Event::Pushed(Err(-2))).unwrap();
        queue.post(Event::WriteAcked).unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_next(), Some(Event::LinkOpened));
        assert_eq!(queue.try_next(), Some(Event::Pushed(Err(-2))));
        assert_eq!(queue.try_next(), Some(Event::WriteAcked));
        assert_eq!(queue.try_next(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_rejects_post() {
        let queue: EventQueue<2> = EventQueue::new();
        queue.post(Event::LinkOpened).unwrap();
        queue.post(Event::LinkClosed).unwrap();

        assert_eq!(queue.post(Event::WriteAcked), Err(PipelineError::QueueFull));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_next_yields_posted_event() {
        static QUEUE: EventQueue<4> = EventQueue::new();
        QUEUE.post(Event::Cleared(ClearTag::Consumed)).unwrap();

        let event = embassy_futures::block_on(QUEUE.next());
        assert_eq!(event, Event::Cleared(ClearTag::Consumed));
    }
}
