//! zeroscale-intake — consumers of the platform's egress stream.
//!
//! N identical [`Nozzle`] workers subscribe under a shared shard id, so
//! the stream load-balances envelopes across them. Each nozzle filters
//! the firehose down to HTTP request timers of enrolled apps and pushes
//! the survivors onto the bounded envelope channel feeding the idleness
//! aggregator.

pub mod nozzle;
pub mod stream;

pub use nozzle::Nozzle;
pub use stream::{EnvelopeStream, NdjsonStreamConnector, StreamConnector};
