pub mod buffer_pool;
pub mod cache;
pub mod client;
pub mod config;
pub mod metrics;

pub use buffer_pool::BufferPool;
pub use cache::Cache;
pub use client::{ClientError, KafkaClient, KafkaVersion};
pub use config::{EnvMsDuration, KafkaConfig};
pub use metrics::Metrics;
