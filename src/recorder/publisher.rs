//! Sample event publishing.
//!
//! The control loop only needs "deliver this sample, in order". The default
//! transport is an in-process Tokio broadcast channel; any subscriber (a
//! bridge to a message bus, a monitor, a test) attaches with
//! [`BroadcastPublisher::subscribe`].

use super::SampleRow;
use crate::error::CncResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One published sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleEvent {
    /// Topic the event was published on
    pub topic: String,
    /// Waypoint index, strictly increasing within a run
    pub sequence: usize,
    /// UTC time of publication
    pub timestamp: DateTime<Utc>,
    /// `[X, Y, Z, CNC1_Response, CNC2_Response]`
    pub data: [f64; 5],
}

/// Destination for per-sample events.
#[async_trait]
pub trait SamplePublisher: Send {
    /// Topic events are published on.
    fn topic(&self) -> &str;

    /// Deliver the event for waypoint `sequence`.
    async fn publish(&mut self, sequence: usize, row: &SampleRow) -> CncResult<()>;
}

/// Publishes events on a Tokio broadcast channel.
pub struct BroadcastPublisher {
    topic: String,
    sender: broadcast::Sender<SampleEvent>,
}

impl BroadcastPublisher {
    /// Create a publisher buffering up to `capacity` events per subscriber.
    pub fn new(topic: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            topic: topic.into(),
            sender,
        }
    }

    /// Attach a new subscriber. It receives events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SampleEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl SamplePublisher for BroadcastPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&mut self, sequence: usize, row: &SampleRow) -> CncResult<()> {
        let event = SampleEvent {
            topic: self.topic.clone(),
            sequence,
            timestamp: Utc::now(),
            data: row.values(),
        };

        // No subscribers is a normal state for a publish/subscribe topic.
        if self.sender.send(event).is_err() {
            tracing::trace!(topic = %self.topic, sequence, "No subscribers for sample event");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(x: f64) -> SampleRow {
        SampleRow {
            x,
            y: 1.0,
            z: 2.0,
            cnc1_response: 3.0,
            cnc2_response: f64::NAN,
        }
    }

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let mut publisher = BroadcastPublisher::new("cnc_positions", 8);
        let mut rx = publisher.subscribe();

        for i in 0..5 {
            publisher.publish(i, &row(i as f64)).await.unwrap();
        }

        for i in 0..5 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.sequence, i);
            assert_eq!(event.topic, "cnc_positions");
            assert_eq!(event.data[0], i as f64);
            assert!(event.data[4].is_nan());
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let mut publisher = BroadcastPublisher::new("cnc_positions", 1);
        publisher.publish(0, &row(0.0)).await.unwrap();
        assert_eq!(publisher.topic(), "cnc_positions");
    }

    #[test]
    fn test_event_serializes_invalid_reading_as_null() {
        let event = SampleEvent {
            topic: "cnc_positions".to_string(),
            sequence: 3,
            timestamp: Utc::now(),
            data: row(1.5).values(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["sequence"], 3);
        assert_eq!(json["data"][0], 1.5);
        assert!(json["data"][4].is_null());
    }
}
