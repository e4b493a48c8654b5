//! zeroscale-routes — keeping catch routes in lockstep with app state.
//!
//! The [`RouteManager`] mirrors each enrolled app's hostnames, answers
//! the listener's host→app lookups, and periodically re-emits catch
//! routes for stopped apps so their traffic keeps landing on the hijack
//! listener. The [`RouteEmitter`] batches those registrations toward the
//! routing API on a flush interval.

pub mod emitter;
pub mod manager;

pub use emitter::RouteEmitter;
pub use manager::RouteManager;
