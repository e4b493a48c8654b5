//! Telemetry envelopes from the platform's egress stream.
//!
//! The stream is at-least-once with possible gaps; idle detection is
//! timer-based, so dropped envelopes only delay a scale-down by one
//! evaluation tick.

use serde::{Deserialize, Serialize};

/// Message kinds a consumer can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    Gauge,
    Timer,
}

/// Typed payload of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnvelopeMessage {
    Gauge {
        name: String,
        value: f64,
    },
    /// Duration measurement; the router emits one named "http" per
    /// ingress request, which is the only signal idle detection uses.
    Timer {
        name: String,
        start_ns: i64,
        stop_ns: i64,
    },
}

/// A single telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// App the measurement belongs to.
    pub source_id: String,
    pub message: EnvelopeMessage,
}

impl Envelope {
    /// True when this envelope is an HTTP request timer, the only kind
    /// the idleness aggregator consumes.
    pub fn is_http_timer(&self) -> bool {
        matches!(&self.message, EnvelopeMessage::Timer { name, .. } if name == "http")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(name: &str) -> Envelope {
        Envelope {
            source_id: "app-1".to_string(),
            message: EnvelopeMessage::Timer {
                name: name.to_string(),
                start_ns: 0,
                stop_ns: 1,
            },
        }
    }

    #[test]
    fn http_timer_detection() {
        assert!(timer("http").is_http_timer());
        assert!(!timer("gc").is_http_timer());
        let gauge = Envelope {
            source_id: "app-1".to_string(),
            message: EnvelopeMessage::Gauge {
                name: "memory".to_string(),
                value: 1.0,
            },
        };
        assert!(!gauge.is_http_timer());
    }

    #[test]
    fn envelope_round_trips_as_json_line() {
        let e = timer("http");
        let line = serde_json::to_string(&e).unwrap();
        assert_eq!(serde_json::from_str::<Envelope>(&line).unwrap(), e);
    }
}
