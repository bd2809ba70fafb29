//! Recording stand-ins for the external services, shared by the unit tests

use std::vec::Vec;

use crate::config::{ConnectionParams, PipelineConfig};
use crate::event::Event;
use crate::sensors::{DataTypes, SensorHandle, SensorSample, SensorType};
use crate::services::{ClearTag, Notification, Notifier, SensorService, StoreService, Transport};
use crate::session::Pipeline;
use crate::storage::{ClearCount, StorageElement, StorageKey, StoreHandle};

pub const ACCEL: SensorHandle = SensorHandle::new(SensorType::ACCELEROMETER, 3);
pub const GYRO: SensorHandle = SensorHandle::new(SensorType::GYROSCOPE, 4);

pub type TestPipeline = Pipeline<MockStore, MockSensors, MockTransport, MockNotifier>;

#[derive(Debug, Default)]
pub struct MockStore {
    pub opened: Vec<StorageKey>,
    pub pushed: Vec<StorageElement>,
    pub peeks: usize,
    pub clears: Vec<(ClearCount, ClearTag)>,
}

impl StoreService for MockStore {
    fn open(&mut self, key: StorageKey) {
        self.opened.push(key);
    }

    fn push(&mut self, _handle: StoreHandle, element: StorageElement) {
        self.pushed.push(element);
    }

    fn peek(&mut self, _handle: StoreHandle) {
        self.peeks += 1;
    }

    fn clear(&mut self, _handle: StoreHandle, count: ClearCount, tag: ClearTag) {
        self.clears.push((count, tag));
    }
}

#[derive(Debug, Default)]
pub struct MockSensors {
    pub subscribed: Vec<(SensorHandle, DataTypes, u32, u32)>,
    pub unsubscribed: Vec<SensorHandle>,
}

impl SensorService for MockSensors {
    fn subscribe(
        &mut self,
        sensor: SensorHandle,
        data_types: DataTypes,
        rate_hz: u32,
        report_interval_ms: u32,
    ) {
        self.subscribed
            .push((sensor, data_types, rate_hz, report_interval_ms));
    }

    fn unsubscribe(&mut self, sensor: SensorHandle, _data_types: DataTypes) {
        self.unsubscribed.push(sensor);
    }
}

#[derive(Debug, Default)]
pub struct MockTransport {
    /// Accepted payloads only
    pub written: Vec<Vec<u8>>,
    pub channels: Vec<u8>,
    /// Reject the next write with this code
    pub reject_with: Option<i32>,
    pub connection_updates: Vec<ConnectionParams>,
    pub restored: usize,
}

impl Transport for MockTransport {
    fn write(&mut self, channel: u8, payload: &[u8]) -> Result<(), i32> {
        if let Some(code) = self.reject_with.take() {
            return Err(code);
        }
        self.written.push(payload.to_vec());
        self.channels.push(channel);
        Ok(())
    }

    fn update_connection(&mut self, params: ConnectionParams) {
        self.connection_updates.push(params);
    }

    fn restore_default_connection(&mut self) {
        self.restored += 1;
    }
}

#[derive(Debug, Default)]
pub struct MockNotifier {
    pub notifications: Vec<Notification>,
}

impl Notifier for MockNotifier {
    fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }
}

/// Element holding `packed` as its data bytes
pub fn element(timestamp: u32, packed: &[u8]) -> StorageElement {
    StorageElement::new(timestamp, &heapless::Vec::from_slice(packed).unwrap())
}

pub fn sample(sensor: SensorType, timestamp: u32, payload: &[u8]) -> SensorSample {
    SensorSample::new(sensor, timestamp, payload).unwrap()
}

/// Freshly initialized pipeline, nothing acknowledged yet
pub fn pipeline() -> TestPipeline {
    let mut pipeline = Pipeline::new(
        PipelineConfig::default(),
        MockStore::default(),
        MockSensors::default(),
        MockTransport::default(),
        MockNotifier::default(),
    );
    pipeline.init();
    pipeline
}

/// Store open, accelerometer and gyroscope scanned, link up
pub fn ready_pipeline() -> TestPipeline {
    let mut pipeline = pipeline();
    pipeline.handle(Event::StoreOpened(Ok(StoreHandle::new(1))));
    pipeline.handle(Event::SensorScanned(ACCEL));
    pipeline.handle(Event::SensorScanned(GYRO));
    pipeline.handle(Event::LinkOpened);
    pipeline
}
