//! zeroscale-engine — serialized start/stop decisions per application.
//!
//! The engine is the only component that talks the platform into
//! changing an app's instance count. Per-app mutual exclusion comes from
//! a striped lock whose stripes also own the cooldown clock, so the
//! cooldown read in `stop_app` and the cooldown write at the end of a
//! successful action happen under the same mutex as the action itself.

pub mod engine;
pub mod locks;

pub use engine::{RouteToggleFn, ScalingEngine};
pub use locks::AppLocks;
