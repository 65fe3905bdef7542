//! Seams between the worker and the broker client.
//!
//! A broker client forms consumer-group sessions. Within a session it calls
//! [`ConsumerGroupHandler::setup`] once, then [`ConsumerGroupHandler::consume_claim`] for every
//! owned partition (each in its own task), then [`ConsumerGroupHandler::cleanup`] once every claim
//! has returned, before committing offsets for the last time.
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::BrokerError;

/// A message as delivered by the broker. Never mutated after delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    /// Broker timestamp in milliseconds since the unix epoch, when the broker provides one.
    pub timestamp: Option<i64>,
}

/// Ordered stream of messages for one partition owned by the current session.
///
/// The stream ends when the partition is revoked or the session shuts down.
pub struct Claim {
    topic: String,
    partition: i32,
    messages: mpsc::Receiver<RawMessage>,
}

impl Claim {
    pub fn new(topic: String, partition: i32, messages: mpsc::Receiver<RawMessage>) -> Self {
        Self {
            topic,
            partition,
            messages,
        }
    }

    /// A claim together with the sender feeding it.
    pub fn channel(topic: &str, partition: i32, capacity: usize) -> (mpsc::Sender<RawMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(topic.to_owned(), partition, rx))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub async fn next(&mut self) -> Option<RawMessage> {
        self.messages.recv().await
    }
}

pub trait GroupSession: Send + Sync {
    /// Record the message as processed. The broker client commits marked offsets.
    fn mark_message(&self, message: &RawMessage);
}

#[async_trait]
pub trait ConsumerGroupHandler: Send + Sync {
    async fn setup(&self, session: &dyn GroupSession) -> Result<(), BrokerError>;

    async fn consume_claim(
        &self,
        session: &dyn GroupSession,
        claim: &mut Claim,
    ) -> Result<(), BrokerError>;

    async fn cleanup(&self, session: &dyn GroupSession) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait ConsumerGroup: Send + Sync + 'static {
    /// Join the group and run one session, returning once it ends: on rebalance, on
    /// cancellation, or on a broker error.
    async fn consume(
        &self,
        cancel: CancellationToken,
        topics: &[String],
        handler: Arc<dyn ConsumerGroupHandler>,
    ) -> Result<(), BrokerError>;

    /// Wait for the next broker-reported error. `None` once the group stops reporting errors.
    ///
    /// Must be cancel safe: the worker races it against [`ConsumerGroup::consume`].
    async fn next_error(&self) -> Option<BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

pub trait BrokerClient: Send + Sync {
    type Group: ConsumerGroup;

    fn consumer_group(&self, group_id: &str) -> Result<Self::Group, BrokerError>;
}
