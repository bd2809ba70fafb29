//! Session controller
//!
//! Top-level state machine of the collection pipeline. It validates start
//! and stop requests, drives sensor (un)subscription, feeds samples to the
//! [`Aggregator`], pushes sealed records into the [`PersistentQueue`] and
//! runs the [`DrainLoop`] while a streaming session is active.
//!
//! ## Transitions
//!
//! ```text
//! Idle --start--> Clearing --store cleared--> Subscribing --all acked--> Running
//!                                                 |                        |
//!                                          subscribe failed               stop
//!                                                 v                        |
//!                                            FailedStart            (streaming?)
//!                                                 |                 no /    \ yes
//!                                                 +--stop--> Idle <-+      Draining
//!                                                              ^              |
//!                                                              +---drained----+
//! ```
//!
//! Stop is refused while the store clear is still pending.
//!
//! Link loss during a streaming session ends it on the spot with a failure,
//! whatever phase it is in. The terminal notification fires at most once per
//! session.

use core::fmt::Display;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::aggregator::{Aggregator, reporting_interval_ms};
use crate::config::PipelineConfig;
use crate::drain::DrainLoop;
use crate::error::{PipelineError, PipelineResult};
use crate::event::{Event, EventQueue};
use crate::sensors::{DataTypes, SensorMask, SensorRegistry, SensorSample};
use crate::services::{
    ClearTag, Notification, Notifier, SensorService, SessionOutcome, StoreService, Transport,
};
use crate::storage::{PeekOutcome, PersistentQueue, StorageElement, StoreHandle};

/// Parameters captured when a start request is accepted
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParameters {
    pub sensor_mask: SensorMask,
    /// Sampling frequency in Hz
    pub frequency: u32,
    pub use_streaming: bool,
}

impl SessionParameters {
    pub const fn new(sensor_mask: SensorMask, frequency: u32, use_streaming: bool) -> Self {
        Self {
            sensor_mask,
            frequency,
            use_streaming,
        }
    }
}

impl Display for SessionParameters {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "[Session] mask={:#b}, {} Hz, streaming={}",
            self.sensor_mask.bits(),
            self.frequency,
            self.use_streaming
        )
    }
}

/// Where the current session stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session
    Idle,
    /// Start accepted, waiting for the whole-store clear
    Clearing,
    /// Subscriptions issued, counting acknowledgments
    Subscribing { expected: u8, received: u8 },
    /// Every subscription acknowledged, samples flowing
    Running,
    /// A subscription failed; samples are dropped until stop
    FailedStart,
    /// Collection stopped, streaming what is left in the store
    Draining,
}

impl Display for SessionPhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Clearing => write!(f, "clearing"),
            Self::Subscribing { expected, received } => {
                write!(f, "subscribing ({}/{})", received, expected)
            }
            Self::Running => write!(f, "running"),
            Self::FailedStart => write!(f, "failed start"),
            Self::Draining => write!(f, "draining"),
        }
    }
}

/// Read-only snapshot of the pipeline's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    /// Samples are being collected
    pub running: bool,
    /// Stored records are being streamed over the link
    pub streaming_active: bool,
    pub link_open: bool,
    pub store_handle: Option<StoreHandle>,
    pub store_drained: bool,
    /// Unacknowledged transport writes
    pub pending: u8,
}

/// The whole collection pipeline, driven by [`Event`]s.
///
/// Owns every piece of mutable session state. All methods are meant to be
/// called from the single dispatch context that drains the [`EventQueue`].
pub struct Pipeline<S, R, T, N>
where
    S: StoreService,
    R: SensorService,
    T: Transport,
    N: Notifier,
{
    config: PipelineConfig,
    phase: SessionPhase,
    params: Option<SessionParameters>,
    registry: SensorRegistry,
    aggregator: Aggregator,
    queue: PersistentQueue<S>,
    drain: DrainLoop,
    sensors: R,
    transport: T,
    notifier: N,
    /// Terminal notification already delivered for the current session
    terminal_fired: bool,
}

impl<S, R, T, N> Pipeline<S, R, T, N>
where
    S: StoreService,
    R: SensorService,
    T: Transport,
    N: Notifier,
{
    pub fn new(config: PipelineConfig, store: S, sensors: R, transport: T, notifier: N) -> Self {
        Self {
            queue: PersistentQueue::new(store, config.storage_key),
            drain: DrainLoop::new(config.max_in_flight, config.transport_channel),
            config,
            phase: SessionPhase::Idle,
            params: None,
            registry: SensorRegistry::new(),
            aggregator: Aggregator::new(),
            sensors,
            transport,
            notifier,
            terminal_fired: true,
        }
    }

    /// Request the store handle. Nothing can start until it arrives.
    pub fn init(&mut self) {
        self.queue.open();
    }

    /// Process one event
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::StoreOpened(result) => {
                if let Err(err) = self.queue.on_opened(result) {
                    error!("{}", err);
                }
            }
            Event::Pushed(status) => self.on_pushed(status),
            Event::Peeked(result) => self.on_peeked(result),
            Event::Cleared(tag) => self.on_cleared(tag),
            Event::SensorScanned(handle) => self.registry.register(handle),
            Event::SensorData(sample) => self.on_sample(&sample),
            Event::Subscribed(status) => self.on_subscribed(status),
            Event::LinkOpened => {
                info!("Link opened");
                self.drain.set_link_open(true);
            }
            Event::LinkClosed => self.on_link_closed(),
            Event::WriteAcked => self.on_write_acked(),
        }
    }

    /// Handle everything currently queued, returning how many events ran
    pub fn pump<const Q: usize>(&mut self, events: &EventQueue<Q>) -> usize {
        let mut handled = 0;
        while let Some(event) = events.try_next() {
            self.handle(event);
            handled += 1;
        }
        handled
    }

    /// Dispatch loop for boards that run the pipeline as an executor task.
    /// Never returns.
    pub async fn run<const Q: usize>(&mut self, events: &EventQueue<Q>) {
        loop {
            let event = events.next().await;
            self.handle(event);
        }
    }

    // ------------------------------------------------------------------------
    // Requests from the application
    // ------------------------------------------------------------------------

    /// Start a collection session.
    ///
    /// Returns `false` and notifies [`Notification::Rejected`] if the request
    /// is refused; the session state is left untouched in that case. The
    /// outcome of an accepted start arrives later through the notifier.
    pub fn start_session(&mut self, sensor_mask: SensorMask, frequency: u32, use_streaming: bool) -> bool {
        let params = SessionParameters::new(sensor_mask, frequency, use_streaming);
        match self.try_start(params) {
            Ok(()) => true,
            Err(err) => {
                warn!("Start refused: {}", err);
                self.notifier.notify(Notification::Rejected(err));
                false
            }
        }
    }

    /// Start a session with the configured default mask and frequency
    pub fn start_default_session(&mut self, use_streaming: bool) -> bool {
        self.start_session(
            self.config.default_mask,
            self.config.default_frequency,
            use_streaming,
        )
    }

    /// Stop the current session.
    ///
    /// Returns `false` and notifies [`Notification::Rejected`] when collection
    /// is not running (idle, still clearing the store, or already draining).
    pub fn stop_session(&mut self) -> bool {
        match self.phase {
            SessionPhase::Idle | SessionPhase::Clearing | SessionPhase::Draining => {
                let err = PipelineError::NotRunning;
                warn!("Stop refused while {}: {}", self.phase, err);
                self.notifier.notify(Notification::Rejected(err));
                return false;
            }
            SessionPhase::FailedStart => {
                self.unsubscribe_all();
                self.finish(SessionOutcome::Fail);
            }
            SessionPhase::Subscribing { .. } | SessionPhase::Running => {
                self.halt();
                if self.is_streaming() {
                    debug!("Draining stored records before completing");
                    self.phase = SessionPhase::Draining;
                    self.drain.pull(&mut self.queue);
                    self.end_of_session_check();
                } else {
                    self.finish(SessionOutcome::Ok);
                }
            }
        }
        true
    }

    fn try_start(&mut self, params: SessionParameters) -> PipelineResult<()> {
        if self.phase != SessionPhase::Idle {
            return Err(PipelineError::SessionActive);
        }
        if !self.queue.is_available() {
            return Err(PipelineError::StoreUnavailable);
        }
        if params.frequency == 0 {
            return Err(PipelineError::InvalidFrequency {
                frequency: params.frequency,
            });
        }
        if let Some(sensor) = self.registry.first_missing(params.sensor_mask) {
            return Err(PipelineError::InvalidSensor { sensor });
        }
        if params.use_streaming && !self.drain.link_open() {
            return Err(PipelineError::LinkClosed);
        }

        self.queue.clear_for_session(params)?;
        if params.use_streaming {
            self.transport
                .update_connection(self.config.streaming_connection);
        }

        info!("Starting {}", params);
        self.params = Some(params);
        self.terminal_fired = false;
        self.phase = SessionPhase::Clearing;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------------

    fn on_cleared(&mut self, tag: ClearTag) {
        match tag {
            ClearTag::Consumed => {}
            ClearTag::SessionStart(params) => {
                if self.phase != SessionPhase::Clearing || self.params != Some(params) {
                    debug!("Ignoring stale store clear for {}", params);
                    return;
                }
                self.subscribe_all(params);
            }
        }
    }

    fn subscribe_all(&mut self, params: SessionParameters) {
        self.aggregator.reset(params.frequency);
        self.drain.reset();
        self.queue.mark_drained();

        let report_interval = reporting_interval_ms(
            self.aggregator.sampling_interval_ms(),
            self.config.max_report_latency_ms,
        );

        let mut expected = 0u8;
        for handle in self.registry.handles_for(params.sensor_mask) {
            debug!(
                "Subscribing {} on channel {} ({} Hz, report every {} ms)",
                handle.sensor_type, handle.channel_id, params.frequency, report_interval
            );
            self.sensors
                .subscribe(handle, DataTypes::RAW, params.frequency, report_interval);
            expected += 1;
        }

        if expected == 0 {
            self.enter_running();
        } else {
            self.phase = SessionPhase::Subscribing {
                expected,
                received: 0,
            };
        }
    }

    fn on_subscribed(&mut self, status: Result<(), i32>) {
        let SessionPhase::Subscribing { expected, received } = self.phase else {
            debug!("Subscription acknowledgment while {}, ignored", self.phase);
            return;
        };

        match status {
            Ok(()) if received + 1 >= expected => self.enter_running(),
            Ok(()) => {
                self.phase = SessionPhase::Subscribing {
                    expected,
                    received: received + 1,
                };
            }
            Err(status) => {
                error!("{}", PipelineError::Subscription { status });
                let frequency = self.params.map_or(0, |params| params.frequency);
                self.aggregator.reset(frequency);
                self.phase = SessionPhase::FailedStart;
                self.fire_terminal(SessionOutcome::Fail);
            }
        }
    }

    fn enter_running(&mut self) {
        info!("Collection running");
        self.phase = SessionPhase::Running;
        self.notifier.notify(Notification::Started);
    }

    /// Stop collecting: seal the open record and release every channel
    fn halt(&mut self) {
        if let Some(element) = self.aggregator.flush() {
            self.push(element);
        }
        self.unsubscribe_all();
        info!("Collection stopped");
    }

    fn unsubscribe_all(&mut self) {
        let Some(params) = self.params else {
            return;
        };
        for handle in self.registry.handles_for(params.sensor_mask) {
            self.sensors.unsubscribe(handle, DataTypes::RAW);
        }
    }

    /// Complete a draining session once nothing is left in flight or in store
    fn end_of_session_check(&mut self) {
        if self.phase == SessionPhase::Draining
            && self.drain.window().is_idle()
            && self.queue.is_drained()
            && !self.queue.peek_outstanding()
        {
            info!("Stored records drained");
            self.finish(SessionOutcome::Ok);
        }
    }

    /// Back to idle, delivering the terminal notification if still owed
    fn finish(&mut self, outcome: SessionOutcome) {
        if self.is_streaming() {
            self.transport.restore_default_connection();
        }
        self.phase = SessionPhase::Idle;
        self.fire_terminal(outcome);
    }

    fn fire_terminal(&mut self, outcome: SessionOutcome) {
        if self.terminal_fired {
            debug!("Session already reported, dropping {:?}", outcome);
            return;
        }
        self.terminal_fired = true;
        info!("Session finished: {:?}", outcome);
        self.notifier.notify(Notification::Finished(outcome));
    }

    fn on_link_closed(&mut self) {
        info!("Link closed");
        self.drain.set_link_open(false);

        if !self.is_streaming() {
            return;
        }
        match self.phase {
            SessionPhase::Idle => {}
            SessionPhase::Subscribing { .. } | SessionPhase::Running => {
                warn!("Link lost while streaming, forcing stop");
                self.halt();
                self.finish(SessionOutcome::Fail);
            }
            SessionPhase::FailedStart => {
                self.unsubscribe_all();
                self.finish(SessionOutcome::Fail);
            }
            SessionPhase::Clearing | SessionPhase::Draining => {
                warn!("Link lost while {}, abandoning session", self.phase);
                self.finish(SessionOutcome::Fail);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Data path
    // ------------------------------------------------------------------------

    fn on_sample(&mut self, sample: &SensorSample) {
        if !matches!(
            self.phase,
            SessionPhase::Subscribing { .. } | SessionPhase::Running
        ) || !self.queue.is_available()
        {
            return;
        }

        match self.aggregator.ingest(sample) {
            Ok(Some(element)) => self.push(element),
            Ok(None) => {}
            Err(err) => error!("{}", err),
        }
    }

    fn push(&mut self, element: StorageElement) {
        if let Err(err) = self.queue.push(element) {
            error!("{}", err);
        }
    }

    fn on_pushed(&mut self, status: Result<(), i32>) {
        if let Err(err) = self.queue.on_pushed(status) {
            error!("{}", err);
        }
        if self.is_streaming_active() {
            self.drain.pull(&mut self.queue);
        }
        self.end_of_session_check();
    }

    fn on_peeked(&mut self, result: Result<Option<StorageElement>, i32>) {
        match self.queue.on_peeked(result) {
            Ok(PeekOutcome::Element(element)) => {
                if !self.is_streaming_active() {
                    debug!("Not streaming, leaving {} in the store", element);
                    return;
                }
                if let Err(err) = self
                    .drain
                    .transmit(element, &mut self.queue, &mut self.transport)
                {
                    error!("{}", err);
                }
            }
            Ok(PeekOutcome::Empty) => {
                debug!("Store empty");
                // answer predates a push that has since been acknowledged
                if !self.queue.is_drained()
                    && self.queue.pushes_in_flight() == 0
                    && self.is_streaming_active()
                {
                    self.drain.pull(&mut self.queue);
                }
                self.end_of_session_check();
            }
            Ok(PeekOutcome::Unsolicited) => {}
            Err(err) => error!("{}", err),
        }
    }

    fn on_write_acked(&mut self) {
        if !self.is_streaming_active() {
            debug!("Write acknowledgment outside a streaming session, ignored");
            return;
        }
        self.drain.on_write_acked(&mut self.queue);
        self.end_of_session_check();
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// The current session was started with streaming
    fn is_streaming(&self) -> bool {
        self.params.is_some_and(|params| params.use_streaming)
    }

    fn is_streaming_active(&self) -> bool {
        self.is_streaming()
            && self.drain.link_open()
            && matches!(
                self.phase,
                SessionPhase::Subscribing { .. } | SessionPhase::Running | SessionPhase::Draining
            )
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Parameters of the current (or last) session
    pub fn params(&self) -> Option<SessionParameters> {
        self.params
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            running: matches!(
                self.phase,
                SessionPhase::Subscribing { .. } | SessionPhase::Running
            ),
            streaming_active: self.is_streaming_active(),
            link_open: self.drain.link_open(),
            store_handle: self.queue.handle(),
            store_drained: self.queue.is_drained(),
            pending: self.drain.window().pending(),
        }
    }

    pub fn store(&self) -> &S {
        self.queue.store()
    }

    pub fn store_mut(&mut self) -> &mut S {
        self.queue.store_mut()
    }

    pub fn sensors(&self) -> &R {
        &self.sensors
    }

    pub fn sensors_mut(&mut self) -> &mut R {
        &mut self.sensors
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn notifier_mut(&mut self) -> &mut N {
        &mut self.notifier
    }
}
