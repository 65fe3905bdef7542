use async_trait::async_trait;
use bytes::BytesMut;
use rdkafka::error::KafkaError;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::ProducerError;

/// A message on its way to the broker.
#[derive(Debug)]
pub struct OutboundRecord {
    pub topic: String,
    /// `None` lets the broker client spread records across partitions.
    pub key: Option<Vec<u8>>,
    pub value: BytesMut,
}

impl OutboundRecord {
    /// An empty key means no partition affinity.
    pub fn new(topic: &str, key: &str, value: BytesMut) -> Self {
        Self {
            topic: topic.to_owned(),
            key: (!key.is_empty()).then(|| key.as_bytes().to_vec()),
            value,
        }
    }
}

#[derive(Error, Debug)]
#[error("failed to deliver message to {}: {error}", .record.topic)]
pub struct DeliveryError {
    pub record: OutboundRecord,
    #[source]
    pub error: KafkaError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    Successes,
    Errors,
}

/// Items on the result queue. Each source ends with exactly one `Closed` sentinel.
#[derive(Debug)]
pub enum ProducerEvent {
    Success(OutboundRecord),
    Error(DeliveryError),
    Closed(ResultSource),
}

/// Broker client side of the producer.
#[async_trait]
pub trait AsyncProducer: Send + Sync {
    /// Records pushed here are sent asynchronously.
    fn input(&self) -> mpsc::Sender<OutboundRecord>;

    /// Queue of delivery results. Handed out once.
    fn take_results(&mut self) -> Option<mpsc::Receiver<ProducerEvent>>;

    /// Flush pending records and stop. Both result sources are closed once this returns.
    async fn close(&mut self) -> Result<(), ProducerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_has_no_affinity() {
        let record = OutboundRecord::new("events", "", BytesMut::new());
        assert_eq!(record.key, None);

        let record = OutboundRecord::new("events", "user-1", BytesMut::new());
        assert_eq!(record.key.as_deref(), Some(&b"user-1"[..]));
    }
}
