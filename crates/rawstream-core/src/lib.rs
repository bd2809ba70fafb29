//! Hardware-independent core library for rawstream
//!
//! This crate contains the whole raw sensor data collection pipeline: the
//! sample aggregator, the persistent queue facade over the external
//! block-circular store, the credit-limited drain loop that streams stored
//! records over the wireless link, and the session controller that ties them
//! together.
//!
//! Everything runs off a single ordered event queue. External services
//! (store, sensors, link) are reached through the traits in [`services`] and
//! answer later with an [`event::Event`].
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets and desktop hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod aggregator;
pub mod config;
pub mod drain;
pub mod error;
pub mod event;
pub mod sensors;
pub mod services;
pub mod session;
pub mod storage;

#[cfg(test)]
mod testing;

pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use event::{Event, EventQueue};
pub use session::{Pipeline, SessionParameters, SessionPhase, SessionState};
