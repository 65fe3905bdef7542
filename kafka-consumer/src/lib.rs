//! Consumer-group worker: claims partitions through a broker client, decodes and time-filters
//! messages, and forwards them into an application queue.
pub mod broker;
pub mod config;
pub mod consumer_handler;
pub mod error;
pub mod event;
pub mod kafka;
pub mod message_handler;
pub mod signals;
pub mod worker;

pub use broker::{
    BrokerClient, Claim, ConsumerGroup, ConsumerGroupHandler, GroupSession, RawMessage,
};
pub use config::{ConsumerConfig, ReadSince, WorkerConfig};
pub use error::{BrokerError, ConfigError, HandlerError, WorkerError};
pub use event::{DecodeError, Event, MessageBuilder};
pub use message_handler::{HandlerConfig, MessageHandler};
pub use worker::{Worker, WorkerState};
