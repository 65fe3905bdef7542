//! Async producer: encodes values into pooled buffers, hands them to the broker client, and
//! routes delivery results to callbacks.
pub mod config;
pub mod encoder;
pub mod error;
pub mod handlers;
pub mod kafka;
pub mod producer;
pub mod record;

pub use config::{ProducerConfig, ProducerSettings, Reporting};
pub use encoder::{EncodeError, Encoder, JsonEncoder};
pub use error::ProducerError;
pub use handlers::{ErrorCallback, SuccessCallback};
pub use kafka::KafkaAsyncProducer;
pub use producer::Producer;
pub use record::{AsyncProducer, DeliveryError, OutboundRecord, ProducerEvent, ResultSource};
