use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::encoder::EncodeError;

#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("can't encode message")]
    Encode(#[source] EncodeError),
    #[error("producer input is closed")]
    InputClosed,
    #[error("producer topic must not be empty")]
    EmptyTopic,
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("producer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
