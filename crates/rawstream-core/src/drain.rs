//! Flow-controlled drain loop.
//!
//! Streams stored records to the transport while keeping at most
//! `max_in_flight` transmissions unacknowledged. A peek is issued only when
//! the link is open, the window has credit, no other peek is outstanding and
//! the store was not last seen empty; peeks then pipeline until one of those
//! stops holding.
//!
//! A record is released from the store as soon as the transport accepts it,
//! before the link acknowledges it. A transmission that is never acknowledged
//! loses that record.
//!
//! A rejected write is retried only by the next pull, which a push or write
//! acknowledgment triggers. When neither is outstanding the stage stalls
//! until the link drops.

use log::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::services::{StoreService, Transport};
use crate::storage::{PersistentQueue, StorageElement};

/// Credit window over unacknowledged transmissions.
///
/// `pending` never exceeds `max_in_flight`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowWindow {
    max_in_flight: u8,
    pending: u8,
}

impl FlowWindow {
    pub const fn new(max_in_flight: u8) -> Self {
        Self {
            max_in_flight,
            pending: 0,
        }
    }

    pub fn pending(&self) -> u8 {
        self.pending
    }

    pub fn max_in_flight(&self) -> u8 {
        self.max_in_flight
    }

    pub fn has_credit(&self) -> bool {
        self.pending < self.max_in_flight
    }

    pub fn is_full(&self) -> bool {
        !self.has_credit()
    }

    /// Nothing awaiting acknowledgment
    pub fn is_idle(&self) -> bool {
        self.pending == 0
    }

    /// Take one credit; `false` if the window is full
    pub fn acquire(&mut self) -> bool {
        if self.has_credit() {
            self.pending += 1;
            true
        } else {
            false
        }
    }

    /// Return one credit; `false` if nothing was pending
    pub fn release(&mut self) -> bool {
        if self.pending > 0 {
            self.pending -= 1;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.pending = 0;
    }
}

/// Peek, transmit, release loop between the persistent queue and the link.
pub struct DrainLoop {
    window: FlowWindow,
    link_open: bool,
    channel: u8,
}

impl DrainLoop {
    pub const fn new(max_in_flight: u8, channel: u8) -> Self {
        Self {
            window: FlowWindow::new(max_in_flight),
            link_open: false,
            channel,
        }
    }

    pub fn window(&self) -> &FlowWindow {
        &self.window
    }

    pub fn link_open(&self) -> bool {
        self.link_open
    }

    pub fn set_link_open(&mut self, open: bool) {
        self.link_open = open;
    }

    /// Forget unacknowledged transmissions from an earlier session
    pub fn reset(&mut self) {
        self.window.reset();
    }

    /// Issue a peek if the link, the window and the store allow it
    pub fn pull<S: StoreService>(&self, queue: &mut PersistentQueue<S>) -> bool {
        if !self.link_open || !self.window.has_credit() || queue.is_drained() {
            return false;
        }

        let issued = queue.peek();
        if issued {
            debug!("Peek issued, {} in flight", self.window.pending());
        }
        issued
    }

    /// Send a peeked element.
    ///
    /// On acceptance the element is released from the store, one credit is
    /// taken and, room permitting, the next peek goes out straight away. On
    /// rejection nothing is released or re-peeked; the element stays in the
    /// store for a later pull.
    pub fn transmit<S: StoreService, T: Transport>(
        &mut self,
        element: StorageElement,
        queue: &mut PersistentQueue<S>,
        transport: &mut T,
    ) -> PipelineResult<()> {
        if !self.window.has_credit() {
            warn!("Window full, leaving {} in the store", element);
            return Ok(());
        }

        let bytes = element.to_bytes();
        transport
            .write(self.channel, &bytes[..element.wire_len()])
            .map_err(|code| PipelineError::TransportWrite { code })?;

        self.window.acquire();
        queue.clear(1);
        self.pull(queue);
        Ok(())
    }

    /// Account for a link-level acknowledgment and refill the window
    pub fn on_write_acked<S: StoreService>(&mut self, queue: &mut PersistentQueue<S>) {
        if !self.window.release() {
            warn!("Write acknowledgment with nothing pending");
            return;
        }
        self.pull(queue);
    }
}
