//! Broker abstraction.
//!
//! The orchestrator assumes a durable topic-based broker with at-least-once
//! delivery and no ordering guarantee across queues. The transport itself is
//! out of scope; these traits define the seam, and [`loopback`] provides the
//! channel-backed implementation used by local runs and tests.

mod loopback;

pub use loopback::{LoopbackBroker, LoopbackPublisher, LoopbackSource};

use async_trait::async_trait;

use crate::error::Result;

/// Topic names shared with the collaborating services.
pub mod topics {
    // Inbound subscriptions.
    pub const TRIAGE_ACTIONABLE: &str = "triage.actionable";
    pub const DISPATCH_STATUS: &str = "dispatch.status";
    pub const BILLING_STATUS: &str = "billing.status";

    // Outbound command topics.
    pub const NOTIFICATION_COMMANDS: &str = "notification.commands";
    pub const DISPATCH_COMMANDS: &str = "dispatch.commands";
    pub const BILLING_COMMANDS: &str = "billing.commands";

    /// Malformed inbound messages, parked for operator inspection.
    pub const DEAD_LETTER: &str = "events.deadletter";
    /// Manual-intervention queue for compensation failures.
    pub const OPS_MANUAL: &str = "ops.manual";

    /// All topics the dispatcher subscribes to.
    pub const SUBSCRIPTIONS: &[&str] = &[TRIAGE_ACTIONABLE, DISPATCH_STATUS, BILLING_STATUS];
}

/// One raw delivery from a subscribed topic.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Fan-in side of the broker: yields deliveries from the subscribed topics.
/// Returns `None` when the subscription is closed.
#[async_trait]
pub trait EventSource: Send {
    async fn next(&mut self) -> Option<InboundMessage>;
}

/// Fan-out side of the broker: publishes encoded messages to a topic.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}
