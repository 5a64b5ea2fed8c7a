//! Streaming run events.
//!
//! The streaming form of the caller contract emits one [`RunEvent`] at each
//! observable point of the loop: super-step start, each node's output as it
//! is collected, the merged state after the barrier, and a terminal event
//! for completion, interrupt, or failure. Events are delivered through a
//! bounded mpsc channel; a slow consumer backpressures the loop rather
//! than dropping events.

use crate::interrupt::InterruptState;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Buffered events per run before the loop blocks on the consumer.
pub const EVENT_BUFFER: usize = 64;

/// One observable moment of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// A super-step is about to invoke its active set
    StepStart { step: i64, active: Vec<String> },

    /// One node returned its partial update, keyed by node name
    NodeOutput {
        step: i64,
        node: String,
        output: serde_json::Value,
    },

    /// All updates of the step were merged; the new state view
    StateUpdate {
        step: i64,
        values: serde_json::Value,
        updated_channels: Vec<String>,
    },

    /// The run paused at an interrupt boundary
    Interrupted { interrupt: InterruptState },

    /// The run reached the terminal marker
    Done {
        steps: i64,
        values: serde_json::Value,
    },

    /// The run failed; the error rendered as text
    Failed { error: String },
}

/// Sending half handed to the loop.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<RunEvent>,
}

impl EventSender {
    pub fn channel() -> (Self, mpsc::Receiver<RunEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        (Self { tx }, rx)
    }

    /// Deliver an event, waiting if the consumer is behind. A dropped
    /// receiver is not an error; the run keeps going without an audience.
    pub async fn emit(&self, event: RunEvent) {
        let _ = self.tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (sender, mut rx) = EventSender::channel();

        sender
            .emit(RunEvent::StepStart {
                step: 0,
                active: vec!["a".to_string()],
            })
            .await;
        sender
            .emit(RunEvent::Done {
                steps: 1,
                values: serde_json::json!({}),
            })
            .await;
        drop(sender);

        assert!(matches!(rx.recv().await, Some(RunEvent::StepStart { step: 0, .. })));
        assert!(matches!(rx.recv().await, Some(RunEvent::Done { steps: 1, .. })));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_does_not_error() {
        let (sender, rx) = EventSender::channel();
        drop(rx);
        sender
            .emit(RunEvent::Failed {
                error: "x".to_string(),
            })
            .await;
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = RunEvent::NodeOutput {
            step: 2,
            node: "worker".to_string(),
            output: serde_json::json!({"log": "A"}),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "node_output");
        assert_eq!(json["node"], "worker");
    }
}
