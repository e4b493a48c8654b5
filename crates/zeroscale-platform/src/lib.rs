//! zeroscale-platform — client for the platform control plane.
//!
//! The autoscaler consumes the platform through the [`PlatformClient`]
//! trait: start/stop an app, observe its state and instance count, read
//! its routes, and bulk-(un)register catch routes with the routing API.
//!
//! [`HttpPlatform`] is the production JSON-over-HTTP binding.
//! [`FakePlatform`] is an in-memory double for tests; it records calls
//! and lets tests script failures and frozen states.

pub mod client;
pub mod fake;
pub mod http;

pub use client::{PlatformClient, PlatformError, PlatformResult};
pub use fake::FakePlatform;
pub use http::HttpPlatform;
