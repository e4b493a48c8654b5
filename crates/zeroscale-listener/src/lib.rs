//! zeroscale-listener — the route-hijacking HTTP server.
//!
//! Catch routes point stopped apps' hostnames here. For each incoming
//! request the listener resolves the Host header to an app, asks the
//! scaling engine to cold-start it, and then reverse-proxies the
//! triggering request to the hostname itself — by then the platform's
//! router resolves it to the real instance, so the caller experiences
//! nothing worse than cold-start latency.

pub mod proxy;
pub mod server;

pub use server::{ResolveAppFn, RouteListener, StartAppFn};
