//! zeroscale-core — shared domain types and configuration.
//!
//! Every other crate in the workspace builds on these definitions: the
//! scaling history and trigger models, the route entity emitted to the
//! routing API, telemetry envelopes from the platform's egress stream,
//! and the YAML configuration the `scale2zero` binary loads at startup.

pub mod config;
pub mod envelope;
pub mod models;

pub use config::{Config, ConfigError};
pub use envelope::{Envelope, EnvelopeMessage, Selector};
pub use models::{
    AppScalingHistory, AppState, AppSummary, ErrorResponse, RouteEntity, ScalingStatus,
    ScalingType, Trigger,
};
