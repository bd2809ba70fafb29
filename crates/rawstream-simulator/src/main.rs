//! Desktop simulator for the rawstream collection pipeline.
//!
//! Wires `rawstream-core` to an in-memory block-circular store, a sensor
//! service generating accelerometer and gyroscope samples, and a wireless
//! link that acknowledges writes one connection interval later. Runs a set
//! of scripted sessions on a simulated millisecond clock and prints what the
//! host side received.
//!
//! `RUST_LOG` controls verbosity (`info` by default). `RAWSTREAM_CONFIG` may
//! point at a postcard-encoded `PipelineConfig` blob.

mod services;
mod store;

use log::{debug, error, info, warn};

use rawstream_core::sensors::SensorType;
use rawstream_core::services::SessionOutcome;
use rawstream_core::storage::{RAW_STORAGE_ELT_SIZE, StorageElement};
use rawstream_core::{EventQueue, Pipeline, PipelineConfig, SessionPhase};

use services::{SimLink, SimNotifier, SimSensors};
use store::{Geometry, SimStore};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// Capacity of the dispatch queue
pub const EVENT_CAPACITY: usize = 64;

/// Simulated clock step
const STEP_MS: u32 = 5;

/// Give up on a drain that takes longer than this after stop
const DRAIN_TIMEOUT_MS: u32 = 10_000;

/// Single ordered queue every simulated service answers on
static EVENTS: EventQueue<EVENT_CAPACITY> = EventQueue::new();

type SimPipeline = Pipeline<SimStore, SimSensors, SimLink, SimNotifier>;

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

struct Scenario {
    name: &'static str,
    streaming: bool,
    /// Collection time before stop is requested
    collect_ms: u32,
    /// Drop the link at this time
    link_drop_ms: Option<u32>,
    /// Sensor whose subscription fails
    failing_sensor: Option<SensorType>,
}

const SCENARIOS: [Scenario; 4] = [
    Scenario {
        name: "streaming",
        streaming: true,
        collect_ms: 2_000,
        link_drop_ms: None,
        failing_sensor: None,
    },
    Scenario {
        name: "offline",
        streaming: false,
        collect_ms: 1_000,
        link_drop_ms: None,
        failing_sensor: None,
    },
    Scenario {
        name: "link drop",
        streaming: true,
        collect_ms: 2_000,
        link_drop_ms: Some(800),
        failing_sensor: None,
    },
    Scenario {
        name: "subscription failure",
        streaming: false,
        collect_ms: 500,
        link_drop_ms: None,
        failing_sensor: Some(SensorType::GYROSCOPE),
    },
];

/// What one scenario left behind
struct Report {
    outcome: Option<SessionOutcome>,
    samples_emitted: usize,
    records_stored: usize,
    records_refused: usize,
    records_left: usize,
    records_received: usize,
    samples_received: usize,
    writes_rejected: usize,
    elapsed_ms: u32,
}

fn build(config: PipelineConfig, failing_sensor: Option<SensorType>) -> SimPipeline {
    let mut pipeline = Pipeline::new(
        config,
        SimStore::new(&EVENTS, config.storage_key, Geometry::DEFAULT),
        SimSensors::new(&EVENTS, failing_sensor),
        SimLink::new(&EVENTS),
        SimNotifier::default(),
    );

    pipeline.init();
    pipeline.sensors().scan();
    pipeline.transport_mut().connect();
    pipeline.pump(&EVENTS);
    pipeline
}

/// Advance every simulated service to `now_ms` and dispatch what they posted
fn step(pipeline: &mut SimPipeline, now_ms: u32) {
    pipeline.sensors_mut().tick(now_ms);
    pipeline.transport_mut().tick(now_ms);
    pipeline.pump(&EVENTS);
}

fn run(scenario: &Scenario, config: PipelineConfig) -> Report {
    info!("=== Scenario: {} ===", scenario.name);
    let mut pipeline = build(config, scenario.failing_sensor);

    if !pipeline.start_default_session(scenario.streaming) {
        error!("Session refused");
    }
    pipeline.pump(&EVENTS);

    let mut now_ms = 0;
    while now_ms < scenario.collect_ms {
        now_ms += STEP_MS;
        if scenario.link_drop_ms == Some(now_ms) {
            pipeline.transport_mut().disconnect();
        }
        step(&mut pipeline, now_ms);
    }

    if pipeline.phase() != SessionPhase::Idle {
        info!("Stop requested at {} ms ({})", now_ms, pipeline.phase());
        pipeline.stop_session();
        pipeline.pump(&EVENTS);
    }

    let deadline = now_ms + DRAIN_TIMEOUT_MS;
    while pipeline.phase() != SessionPhase::Idle && now_ms < deadline {
        now_ms += STEP_MS;
        step(&mut pipeline, now_ms);
    }
    if pipeline.phase() != SessionPhase::Idle {
        warn!("Still {} after {} ms", pipeline.phase(), DRAIN_TIMEOUT_MS);
    }

    for notification in pipeline.notifier().notifications() {
        debug!("{}: requester saw {:?}", scenario.name, notification);
    }

    let received = pipeline.transport().received();
    Report {
        outcome: pipeline.notifier().outcome(),
        samples_emitted: pipeline.sensors().emitted(),
        records_stored: pipeline.store().pushed(),
        records_refused: pipeline.store().refused(),
        records_left: pipeline.store().len(),
        records_received: received.len(),
        samples_received: received
            .iter()
            .filter_map(|payload| decode(payload))
            .map(|element| element.entries().count())
            .sum(),
        writes_rejected: pipeline.transport().rejected(),
        elapsed_ms: now_ms,
    }
}

// ---------------------------------------------------------------------------
// Host side
// ---------------------------------------------------------------------------

/// Rebuild an element from the leading `datasize` bytes sent over the link
fn decode(payload: &[u8]) -> Option<StorageElement> {
    if payload.len() >= RAW_STORAGE_ELT_SIZE {
        warn!("Oversized record of {} bytes", payload.len());
        return None;
    }

    let mut bytes = [0u8; RAW_STORAGE_ELT_SIZE];
    bytes[..payload.len()].copy_from_slice(payload);
    bytes[RAW_STORAGE_ELT_SIZE - 1] = payload.len() as u8;

    match StorageElement::from_bytes(&bytes) {
        Ok(element) => Some(element),
        Err(err) => {
            warn!("Host dropped record: {}", err);
            None
        }
    }
}

fn load_config() -> PipelineConfig {
    let Ok(path) = std::env::var("RAWSTREAM_CONFIG") else {
        return PipelineConfig::default();
    };

    match std::fs::read(&path) {
        Ok(blob) => match PipelineConfig::from_postcard(&blob) {
            Ok(config) => {
                info!("Loaded configuration from {}", path);
                config
            }
            Err(err) => {
                error!("{} in {}, using defaults", err, path);
                PipelineConfig::default()
            }
        },
        Err(err) => {
            error!("Cannot read {}: {}, using defaults", path, err);
            PipelineConfig::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Starting rawstream simulator");

    let config = load_config();
    info!(
        "Window {} writes, channel {:#04x}, {} Hz default",
        config.max_in_flight, config.transport_channel, config.default_frequency
    );

    for scenario in &SCENARIOS {
        let report = run(scenario, config);
        println!(
            "{:<22} outcome={:<10} samples {}/{} records stored={} refused={} left={} sent={} rejected={} ({} ms)",
            scenario.name,
            format!("{:?}", report.outcome),
            report.samples_received,
            report.samples_emitted,
            report.records_stored,
            report.records_refused,
            report.records_left,
            report.records_received,
            report.writes_rejected,
            report.elapsed_ms,
        );
    }

    info!("Simulator exiting");
}
