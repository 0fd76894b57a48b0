//! Channel-backed broker for local runs and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{CommandPublisher, EventSource, InboundMessage};
use crate::error::{Error, Result};

/// In-process broker: one delivery channel feeding the dispatcher, plus a
/// per-topic record of everything published outbound.
///
/// Published messages are retained and can be drained by tests (or a bridge
/// process) per topic.
pub struct LoopbackBroker {
    tx: mpsc::Sender<InboundMessage>,
    rx: Option<mpsc::Receiver<InboundMessage>>,
    published: std::sync::Arc<Mutex<HashMap<String, Vec<Vec<u8>>>>>,
}

impl LoopbackBroker {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Some(rx),
            published: std::sync::Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Handle for injecting inbound deliveries.
    pub fn sender(&self) -> mpsc::Sender<InboundMessage> {
        self.tx.clone()
    }

    /// Take the consuming side. Panics if taken twice.
    pub fn source(&mut self) -> LoopbackSource {
        LoopbackSource {
            rx: self.rx.take().expect("loopback source already taken"),
        }
    }

    pub fn publisher(&self) -> LoopbackPublisher {
        LoopbackPublisher {
            published: std::sync::Arc::clone(&self.published),
        }
    }
}

pub struct LoopbackSource {
    rx: mpsc::Receiver<InboundMessage>,
}

#[async_trait]
impl EventSource for LoopbackSource {
    async fn next(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }
}

#[derive(Clone)]
pub struct LoopbackPublisher {
    published: std::sync::Arc<Mutex<HashMap<String, Vec<Vec<u8>>>>>,
}

impl LoopbackPublisher {
    /// Drain everything published to `topic` so far.
    pub fn drain(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published
            .lock()
            .get_mut(topic)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Number of messages currently parked on `topic`.
    pub fn len(&self, topic: &str) -> usize {
        self.published.lock().get(topic).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }
}

#[async_trait]
impl CommandPublisher for LoopbackPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if topic.is_empty() {
            return Err(Error::Broker("empty topic".into()));
        }
        self.published
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::topics;

    #[tokio::test]
    async fn source_yields_injected_messages_in_order() {
        let mut broker = LoopbackBroker::new(8);
        let tx = broker.sender();
        let mut source = broker.source();

        tx.send(InboundMessage::new(topics::TRIAGE_ACTIONABLE, b"one".to_vec()))
            .await
            .unwrap();
        tx.send(InboundMessage::new(topics::DISPATCH_STATUS, b"two".to_vec()))
            .await
            .unwrap();

        let first = source.next().await.unwrap();
        assert_eq!(first.topic, topics::TRIAGE_ACTIONABLE);
        assert_eq!(first.payload, b"one");
        let second = source.next().await.unwrap();
        assert_eq!(second.topic, topics::DISPATCH_STATUS);
    }

    #[tokio::test]
    async fn publisher_parks_messages_per_topic() {
        let broker = LoopbackBroker::new(8);
        let publisher = broker.publisher();

        publisher
            .publish(topics::BILLING_COMMANDS, b"cmd".to_vec())
            .await
            .unwrap();
        assert_eq!(publisher.len(topics::BILLING_COMMANDS), 1);
        assert!(publisher.is_empty(topics::DISPATCH_COMMANDS));

        let drained = publisher.drain(topics::BILLING_COMMANDS);
        assert_eq!(drained, vec![b"cmd".to_vec()]);
        assert!(publisher.is_empty(topics::BILLING_COMMANDS));
    }

    #[tokio::test]
    async fn publish_to_empty_topic_is_rejected() {
        let broker = LoopbackBroker::new(1);
        let publisher = broker.publisher();
        assert!(publisher.publish("", b"x".to_vec()).await.is_err());
    }
}
