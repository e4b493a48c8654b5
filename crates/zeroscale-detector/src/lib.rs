//! zeroscale-detector — idleness detection.
//!
//! The [`IdlenessDetector`] is the single owner of the per-app
//! last-request map: envelope ingest, breach evaluation and registry
//! refresh are multiplexed onto one task, so the maps need no lock.
//! Detected breaches become [`zeroscale_core::Trigger`]s consumed by a
//! small worker pool that invokes the scaling engine.

pub mod aggregator;
pub mod worker;

pub use aggregator::IdlenessDetector;
pub use worker::{spawn_trigger_workers, StopAppFn};
