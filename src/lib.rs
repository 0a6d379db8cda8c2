//! Agent-side coordinator for device-to-device tunnel latency telemetry.
//!
//! This crate is library-shaped: it does not expose a CLI or wire protocol
//! of its own. A thin driver (see `src/main.rs`) instantiates the external
//! collaborators, builds a [`config::CollectorConfig`], and runs
//! [`collector::Collector`].

pub mod buffer;
pub mod clock;
pub mod collector;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod peer_discovery;
pub mod pinger;
pub mod ports;
pub mod sender_pool;
pub mod submitter;
pub mod types;
