//! Simulated sensor service, wireless link and requester.

use std::collections::VecDeque;

use log::{debug, error, info, warn};

use rawstream_core::config::ConnectionParams;
use rawstream_core::event::{Event, EventQueue};
use rawstream_core::sensors::{DataTypes, SensorHandle, SensorSample, SensorType};
use rawstream_core::services::{Notification, Notifier, SensorService, SessionOutcome, Transport};

use crate::EVENT_CAPACITY;

const EIO: i32 = -5;
const ENOMEM: i32 = -12;
const ENOTCONN: i32 = -107;

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

/// Channel ids the simulated board reports while scanning
pub const ACCEL_CHANNEL: SensorHandle = SensorHandle::new(SensorType::ACCELEROMETER, 0);
pub const GYRO_CHANNEL: SensorHandle = SensorHandle::new(SensorType::GYROSCOPE, 1);

struct Subscription {
    handle: SensorHandle,
    period_ms: u32,
    report_interval_ms: u32,
    next_sample_ms: u32,
    next_report_ms: u32,
}

/// Sensor service delivering batched raw samples once per report interval.
///
/// Accelerometer samples are three `i16` axes (6 bytes), gyroscope samples
/// three `i32` axes (12 bytes), both following slow sinusoids.
pub struct SimSensors {
    events: &'static EventQueue<EVENT_CAPACITY>,
    subscriptions: Vec<Subscription>,
    /// Subscriptions to this sensor fail
    failing: Option<SensorType>,
    now_ms: u32,
    emitted: usize,
}

impl SimSensors {
    pub fn new(events: &'static EventQueue<EVENT_CAPACITY>, failing: Option<SensorType>) -> Self {
        Self {
            events,
            subscriptions: Vec::new(),
            failing,
            now_ms: 0,
            emitted: 0,
        }
    }

    /// Report every on-board channel
    pub fn scan(&self) {
        for handle in [ACCEL_CHANNEL, GYRO_CHANNEL] {
            self.post(Event::SensorScanned(handle));
        }
    }

    /// Samples delivered so far
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Deliver every report due by `now_ms`, interleaved by timestamp
    pub fn tick(&mut self, now_ms: u32) {
        self.now_ms = now_ms;

        let mut due = Vec::new();
        for sub in &mut self.subscriptions {
            while sub.next_report_ms <= now_ms {
                while sub.next_sample_ms <= sub.next_report_ms {
                    due.push((sub.next_sample_ms, sub.handle.sensor_type));
                    sub.next_sample_ms += sub.period_ms;
                }
                sub.next_report_ms += sub.report_interval_ms;
            }
        }
        due.sort_by_key(|(timestamp, _)| *timestamp);

        for (timestamp, sensor) in due {
            match SensorSample::new(sensor, timestamp, &payload(sensor, timestamp)) {
                Ok(sample) => {
                    self.post(Event::SensorData(sample));
                    self.emitted += 1;
                }
                Err(err) => error!("{}", err),
            }
        }
    }

    fn post(&self, event: Event) {
        if let Err(err) = self.events.post(event) {
            error!("Sensor event lost: {}", err);
        }
    }
}

impl SensorService for SimSensors {
    fn subscribe(
        &mut self,
        sensor: SensorHandle,
        _data_types: DataTypes,
        rate_hz: u32,
        report_interval_ms: u32,
    ) {
        if self.failing == Some(sensor.sensor_type) || rate_hz == 0 {
            warn!("Refusing subscription to {}", sensor.sensor_type);
            self.post(Event::Subscribed(Err(EIO)));
            return;
        }

        let period_ms = (1000 / rate_hz).max(1);
        debug!(
            "{} subscribed: sample every {} ms, report every {} ms",
            sensor.sensor_type, period_ms, report_interval_ms
        );
        self.subscriptions.push(Subscription {
            handle: sensor,
            period_ms,
            report_interval_ms: report_interval_ms.max(period_ms),
            next_sample_ms: self.now_ms + period_ms,
            next_report_ms: self.now_ms + report_interval_ms.max(period_ms),
        });
        self.post(Event::Subscribed(Ok(())));
    }

    fn unsubscribe(&mut self, sensor: SensorHandle, _data_types: DataTypes) {
        self.subscriptions.retain(|sub| sub.handle != sensor);
        debug!("{} unsubscribed", sensor.sensor_type);
    }
}

/// Raw axes for one sample at `timestamp`
fn payload(sensor: SensorType, timestamp: u32) -> Vec<u8> {
    let t = timestamp as f64 / 1000.0;
    let axes = [t.sin(), (t * 0.7).cos(), (t * 1.3).sin()];

    match sensor {
        SensorType::GYROSCOPE => axes
            .iter()
            .flat_map(|axis| ((axis * 250_000.0) as i32).to_le_bytes())
            .collect(),
        _ => axes
            .iter()
            .flat_map(|axis| ((axis * 4096.0) as i16).to_le_bytes())
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Wireless link
// ---------------------------------------------------------------------------

/// Default latency between a write and its acknowledgment, in ms
const DEFAULT_ACK_LATENCY_MS: u32 = 60;

/// Writes the link buffers before refusing more
const LINK_BUFFER_SLOTS: usize = 4;

/// Link that acknowledges each write one connection interval later.
///
/// Everything written is kept as the host would receive it.
pub struct SimLink {
    events: &'static EventQueue<EVENT_CAPACITY>,
    open: bool,
    connection: Option<ConnectionParams>,
    /// Acknowledgment due times of buffered writes
    in_flight: VecDeque<u32>,
    now_ms: u32,
    received: Vec<Vec<u8>>,
    rejected: usize,
}

impl SimLink {
    pub fn new(events: &'static EventQueue<EVENT_CAPACITY>) -> Self {
        Self {
            events,
            open: false,
            connection: None,
            in_flight: VecDeque::new(),
            now_ms: 0,
            received: Vec::new(),
            rejected: 0,
        }
    }

    pub fn connect(&mut self) {
        info!("Host connected");
        self.open = true;
        self.post(Event::LinkOpened);
    }

    /// Drop the link; buffered writes are never acknowledged
    pub fn disconnect(&mut self) {
        info!("Host disconnected, {} writes lost", self.in_flight.len());
        self.open = false;
        self.connection = None;
        self.in_flight.clear();
        self.post(Event::LinkClosed);
    }

    /// Acknowledge every write due by `now_ms`
    pub fn tick(&mut self, now_ms: u32) {
        self.now_ms = now_ms;
        while self.in_flight.front().is_some_and(|due| *due <= now_ms) {
            self.in_flight.pop_front();
            self.post(Event::WriteAcked);
        }
    }

    /// Payloads as received by the host
    pub fn received(&self) -> &[Vec<u8>] {
        &self.received
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }

    fn ack_latency_ms(&self) -> u32 {
        // 1.25 ms units
        self.connection
            .map_or(DEFAULT_ACK_LATENCY_MS, |params| {
                (params.max_interval as u32 * 5).div_ceil(4)
            })
    }

    fn post(&self, event: Event) {
        if let Err(err) = self.events.post(event) {
            error!("Link event lost: {}", err);
        }
    }
}

impl Transport for SimLink {
    fn write(&mut self, channel: u8, payload: &[u8]) -> Result<(), i32> {
        if !self.open {
            return Err(ENOTCONN);
        }
        if self.in_flight.len() >= LINK_BUFFER_SLOTS {
            self.rejected += 1;
            return Err(ENOMEM);
        }

        debug!("Channel {:#04x}: {} bytes", channel, payload.len());
        self.in_flight.push_back(self.now_ms + self.ack_latency_ms());
        self.received.push(payload.to_vec());
        Ok(())
    }

    fn update_connection(&mut self, params: ConnectionParams) {
        info!(
            "Connection interval {}..{} requested",
            params.min_interval, params.max_interval
        );
        self.connection = Some(params);
    }

    fn restore_default_connection(&mut self) {
        info!("Default connection parameters restored");
        self.connection = None;
    }
}

// ---------------------------------------------------------------------------
// Requester
// ---------------------------------------------------------------------------

/// Collects what the pipeline reports back to whoever asked for the session
#[derive(Debug, Default)]
pub struct SimNotifier {
    notifications: Vec<Notification>,
}

impl SimNotifier {
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Terminal outcome of the last session, if it has one yet
    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.notifications
            .iter()
            .rev()
            .find_map(|notification| match notification {
                Notification::Finished(outcome) => Some(*outcome),
                _ => None,
            })
    }
}

impl Notifier for SimNotifier {
    fn notify(&mut self, notification: Notification) {
        if notification.is_ok() {
            info!("Requester got {:?}", notification);
        } else {
            warn!("Requester got {:?}", notification);
        }
        self.notifications.push(notification);
    }
}
