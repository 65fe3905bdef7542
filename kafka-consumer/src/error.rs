use std::time;

use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::event::DecodeError;

/// Errors surfaced by a broker client while forming or running a consumer-group session.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("can't create consumer group client: {0}")]
    GroupCreation(String),
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("claim processing failed: {0}")]
    Claim(String),
    #[error("consumer group is closed")]
    Closed,
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Per-message failures. The `Display` output is used as a metric label, so it never embeds
/// message content.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("failed to decode message")]
    Decode(#[source] DecodeError),
    #[error("message older than read since")]
    Stale,
    #[error("output queue is closed")]
    QueueClosed,
    #[error("cancelled while waiting on the output queue")]
    Cancelled,
}

/// Errors returned by `Worker::run`.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("can't create consumer group session")]
    SessionCreation(#[source] BrokerError),
    #[error("failed to register shutdown signal handlers")]
    Signal(#[source] std::io::Error),
    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(time::Duration),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("consumer group id must not be empty")]
    EmptyGroupId,
    #[error("at least one topic is required")]
    NoTopics,
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,
    #[error("shutdown timeout must be greater than zero")]
    ZeroShutdownTimeout,
    #[error("invalid read since value {0:?}, expected an RFC 3339 timestamp, a lookback like 60h, or none")]
    InvalidReadSince(String),
}
