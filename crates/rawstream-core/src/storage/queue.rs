use log::{debug, info, warn};

use super::{ClearCount, StorageElement, StorageKey, StoreHandle};
use crate::error::{PipelineError, PipelineResult};
use crate::services::{ClearTag, StoreService};
use crate::session::SessionParameters;

/// What a peek acknowledgment turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeekOutcome {
    /// The oldest unread element
    Element(StorageElement),
    /// The store holds nothing unread
    Empty,
    /// No peek was outstanding; the acknowledgment is ignored
    Unsolicited,
}

/// Bookkeeping wrapper around the external block-circular store.
///
/// Owns the single store handle (acquired once at init), tracks the
/// outstanding peek and in-flight pushes, and remembers whether the store
/// was last observed empty.
///
/// ## Drained flag
///
/// `drained` is set by an empty peek and cleared as soon as a push is
/// submitted or an element is peeked, so "drained" always means "observed
/// empty and nothing written since". An empty peek does not count when a
/// push is still in flight, or when a push was submitted after the peek went
/// out: acknowledgments come back in any order, so the record may have
/// landed behind the store's answer.
pub struct PersistentQueue<S: StoreService> {
    store: S,
    key: StorageKey,
    handle: Option<StoreHandle>,
    peek_outstanding: bool,
    pushes_in_flight: u16,
    /// A push was submitted after the last peek was issued
    push_since_peek: bool,
    drained: bool,
}

impl<S: StoreService> PersistentQueue<S> {
    pub fn new(store: S, key: StorageKey) -> Self {
        Self {
            store,
            key,
            handle: None,
            peek_outstanding: false,
            pushes_in_flight: 0,
            push_since_peek: false,
            drained: true,
        }
    }

    /// Request the store handle
    pub fn open(&mut self) {
        debug!("Requesting circular storage {}", self.key);
        self.store.open(self.key);
    }

    /// Store the handle from the open acknowledgment.
    ///
    /// On failure the pipeline stays disabled until the next init.
    pub fn on_opened(&mut self, result: Result<StoreHandle, i32>) -> PipelineResult<()> {
        match result {
            Ok(handle) if self.handle.is_some() => {
                warn!("Circular storage already open, ignoring handle {:?}", handle);
                Ok(())
            }
            Ok(handle) => {
                info!("Circular storage {} opened", self.key);
                self.handle = Some(handle);
                Ok(())
            }
            Err(status) => Err(PipelineError::StoreOpen { status }),
        }
    }

    pub fn handle(&self) -> Option<StoreHandle> {
        self.handle
    }

    pub fn is_available(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    /// Record that the store is known to be empty (e.g. right after a full clear)
    pub fn mark_drained(&mut self) {
        self.drained = true;
    }

    pub fn peek_outstanding(&self) -> bool {
        self.peek_outstanding
    }

    pub fn pushes_in_flight(&self) -> u16 {
        self.pushes_in_flight
    }

    /// Submit a sealed record. The element is moved to the store.
    pub fn push(&mut self, element: StorageElement) -> PipelineResult<()> {
        let handle = self.handle.ok_or(PipelineError::StoreUnavailable)?;

        debug!("Pushing {}", element);
        self.store.push(handle, element);
        self.pushes_in_flight = self.pushes_in_flight.saturating_add(1);
        self.push_since_peek = true;
        self.drained = false;
        Ok(())
    }

    /// Account for a push acknowledgment. A failed push loses that record.
    pub fn on_pushed(&mut self, status: Result<(), i32>) -> PipelineResult<()> {
        if self.pushes_in_flight == 0 {
            warn!("Push acknowledgment with no push in flight");
        }
        self.pushes_in_flight = self.pushes_in_flight.saturating_sub(1);

        status.map_err(|status| PipelineError::StoreWrite { status })
    }

    /// Request the oldest unread element.
    ///
    /// Returns `false` (and does nothing) while another peek is outstanding
    /// or before the store is open.
    pub fn peek(&mut self) -> bool {
        let Some(handle) = self.handle else {
            return false;
        };
        if self.peek_outstanding {
            return false;
        }

        self.store.peek(handle);
        self.peek_outstanding = true;
        self.push_since_peek = false;
        true
    }

    /// Resolve the outstanding peek.
    ///
    /// A read failure leaves `drained` untouched: the store is unavailable,
    /// not empty.
    pub fn on_peeked(
        &mut self,
        result: Result<Option<StorageElement>, i32>,
    ) -> PipelineResult<PeekOutcome> {
        if !self.peek_outstanding {
            warn!("Peek acknowledgment with no peek outstanding");
            return Ok(PeekOutcome::Unsolicited);
        }
        self.peek_outstanding = false;

        match result {
            Ok(Some(element)) => {
                self.drained = false;
                Ok(PeekOutcome::Element(element))
            }
            Ok(None) => {
                self.drained = self.pushes_in_flight == 0 && !self.push_since_peek;
                Ok(PeekOutcome::Empty)
            }
            Err(status) => Err(PipelineError::StoreRead { status }),
        }
    }

    /// Release `count` elements that were handed to the transport.
    ///
    /// Nothing waits on the acknowledgment.
    pub fn clear(&mut self, count: u32) {
        if let Some(handle) = self.handle {
            self.store
                .clear(handle, ClearCount::Elements(count), ClearTag::Consumed);
        }
    }

    /// Drop everything in the store before a session. Collection resumes
    /// when the acknowledgment comes back carrying `params`.
    pub fn clear_for_session(&mut self, params: SessionParameters) -> PipelineResult<()> {
        let handle = self.handle.ok_or(PipelineError::StoreUnavailable)?;

        self.store
            .clear(handle, ClearCount::All, ClearTag::SessionStart(params));
        Ok(())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockStore, element};

    fn opened() -> PersistentQueue<MockStore> {
        let mut queue = PersistentQueue::new(MockStore::default(), StorageKey::RAW_DATA);
        queue.open();
        queue.on_opened(Ok(StoreHandle::new(7))).unwrap();
        queue
    }

    #[test]
    fn test_open_requests_raw_data_key() {
        let queue = opened();
        assert_eq!(queue.store().opened, [StorageKey::RAW_DATA]);
        assert_eq!(queue.handle(), Some(StoreHandle::new(7)));
    }

    #[test]
    fn test_open_failure_leaves_queue_disabled() {
        let mut queue = PersistentQueue::new(MockStore::default(), StorageKey::RAW_DATA);
        assert_eq!(
            queue.on_opened(Err(-5)),
            Err(PipelineError::StoreOpen { status: -5 })
        );
        assert!(!queue.is_available());
        assert_eq!(queue.push(element(0, &[1, 1, 1])), Err(PipelineError::StoreUnavailable));
        assert!(!queue.peek());
    }

    #[test]
    fn test_push_clears_drained_flag() {
        let mut queue = opened();
        assert!(queue.is_drained());

        queue.push(element(5, &[1, 1, 9])).unwrap();

        assert!(!queue.is_drained());
        assert_eq!(queue.pushes_in_flight(), 1);
        assert_eq!(queue.store().pushed.len(), 1);
    }

    #[test]
    fn test_failed_push_is_reported_once() {
        let mut queue = opened();
        queue.push(element(5, &[1, 1, 9])).unwrap();

        assert_eq!(queue.on_pushed(Err(-3)), Err(PipelineError::StoreWrite { status: -3 }));
        assert_eq!(queue.pushes_in_flight(), 0);
        // stray ack after the fact is tolerated
        assert_eq!(queue.on_pushed(Ok(())), Ok(()));
        assert_eq!(queue.pushes_in_flight(), 0);
    }

    #[test]
    fn test_single_outstanding_peek() {
        let mut queue = opened();
        assert!(queue.peek());
        assert!(!queue.peek());
        assert_eq!(queue.store().peeks, 1);

        assert_eq!(queue.on_peeked(Ok(None)), Ok(PeekOutcome::Empty));
        assert!(queue.peek());
        assert_eq!(queue.store().peeks, 2);
    }

    #[test]
    fn test_peek_outcomes_track_drained() {
        let mut queue = opened();
        queue.push(element(1, &[2, 1, 3])).unwrap();
        queue.on_pushed(Ok(())).unwrap();

        queue.peek();
        let outcome = queue.on_peeked(Ok(Some(element(1, &[2, 1, 3])))).unwrap();
        assert_eq!(outcome, PeekOutcome::Element(element(1, &[2, 1, 3])));
        assert!(!queue.is_drained());

        queue.peek();
        assert_eq!(queue.on_peeked(Ok(None)), Ok(PeekOutcome::Empty));
        assert!(queue.is_drained());
    }

    #[test]
    fn test_empty_peek_ahead_of_push_is_not_drained() {
        let mut queue = opened();
        queue.peek();
        queue.push(element(1, &[2, 1, 3])).unwrap();

        assert_eq!(queue.on_peeked(Ok(None)), Ok(PeekOutcome::Empty));
        assert!(!queue.is_drained());

        queue.on_pushed(Ok(())).unwrap();
        queue.peek();
        queue.on_peeked(Ok(None)).unwrap();
        assert!(queue.is_drained());
    }

    #[test]
    fn test_empty_peek_older_than_acked_push_is_not_drained() {
        let mut queue = opened();
        queue.peek();
        queue.push(element(1, &[2, 1, 3])).unwrap();
        // the push is acknowledged before the peek's answer
        queue.on_pushed(Ok(())).unwrap();
        assert_eq!(queue.pushes_in_flight(), 0);

        assert_eq!(queue.on_peeked(Ok(None)), Ok(PeekOutcome::Empty));
        assert!(!queue.is_drained());

        queue.peek();
        queue.on_peeked(Ok(None)).unwrap();
        assert!(queue.is_drained());
    }

    #[test]
    fn test_read_failure_is_not_empty() {
        let mut queue = opened();
        queue.push(element(1, &[2, 1, 3])).unwrap();

        queue.peek();
        assert_eq!(queue.on_peeked(Err(-1)), Err(PipelineError::StoreRead { status: -1 }));
        assert!(!queue.is_drained());
        assert!(!queue.peek_outstanding());
    }

    #[test]
    fn test_unsolicited_peek_ack_is_ignored() {
        let mut queue = opened();
        assert_eq!(queue.on_peeked(Ok(None)), Ok(PeekOutcome::Unsolicited));
    }

    #[test]
    fn test_clear_requests_carry_tags() {
        let mut queue = opened();
        let params = SessionParameters::new(crate::sensors::SensorMask::DEFAULT, 100, false);

        queue.clear_for_session(params).unwrap();
        queue.clear(1);

        assert_eq!(
            queue.store().clears,
            [
                (ClearCount::All, ClearTag::SessionStart(params)),
                (ClearCount::Elements(1), ClearTag::Consumed),
            ]
        );
    }
}
