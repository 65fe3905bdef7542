use std::str::FromStr;
use std::time;

use chrono::{DateTime, Duration, Utc};
use envconfig::Envconfig;
use kafka_common::EnvMsDuration;
use tokio::signal::unix::SignalKind;

use crate::error::ConfigError;
use crate::signals::default_shutdown_signals;

const DEFAULT_BATCH_SIZE: usize = 10000;
const DEFAULT_SHUTDOWN_TIMEOUT: time::Duration = time::Duration::from_secs(50);
const DEFAULT_LOOKBACK_HOURS: i64 = 60;

#[derive(Envconfig, Clone, Debug)]
pub struct ConsumerConfig {
    pub kafka_consumer_group: String,

    // Comma separated
    pub kafka_consumer_topics: String,

    #[envconfig(default = "60h")]
    pub kafka_consumer_read_since: ReadSince,

    #[envconfig(default = "10000")]
    pub kafka_consumer_batch_size: usize,

    #[envconfig(default = "true")]
    pub kafka_consumer_keep_offset: bool,

    #[envconfig(default = "50000")]
    pub kafka_consumer_shutdown_timeout_ms: EnvMsDuration,
}

impl ConsumerConfig {
    pub fn topics(&self) -> Vec<String> {
        self.kafka_consumer_topics
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn worker_config(&self) -> Result<WorkerConfig, ConfigError> {
        WorkerConfig::builder(&self.kafka_consumer_group, self.topics())
            .read_since(self.kafka_consumer_read_since.resolve(Utc::now()))
            .batch_size(self.kafka_consumer_batch_size)
            .keep_offset(self.kafka_consumer_keep_offset)
            .shutdown_timeout(self.kafka_consumer_shutdown_timeout_ms.0)
            .build()
    }
}

/// Lower bound on event time for consumed messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSince {
    /// Forward every message.
    Unbounded,
    At(DateTime<Utc>),
    /// Relative to the moment the worker is configured.
    Lookback(Duration),
}

impl ReadSince {
    pub fn resolve(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ReadSince::Unbounded => None,
            ReadSince::At(at) => Some(*at),
            ReadSince::Lookback(lookback) => Some(now - *lookback),
        }
    }
}

impl Default for ReadSince {
    fn default() -> Self {
        ReadSince::Lookback(Duration::hours(DEFAULT_LOOKBACK_HOURS))
    }
}

impl FromStr for ReadSince {
    type Err = ConfigError;

    /// Accepts `none`, a lookback in hours (`24h`) or an RFC 3339 timestamp.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("none") {
            return Ok(ReadSince::Unbounded);
        }

        if let Some(hours) = s.strip_suffix('h') {
            return hours
                .parse::<u32>()
                .map(|h| ReadSince::Lookback(Duration::hours(i64::from(h))))
                .map_err(|_| ConfigError::InvalidReadSince(s.to_owned()));
        }

        DateTime::parse_from_rfc3339(s)
            .map(|at| ReadSince::At(at.with_timezone(&Utc)))
            .map_err(|_| ConfigError::InvalidReadSince(s.to_owned()))
    }
}

/// Immutable worker settings, validated by [`WorkerConfigBuilder::build`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub group_id: String,
    pub topics: Vec<String>,
    pub read_since: Option<DateTime<Utc>>,
    pub batch_size: usize,
    /// Mark handled messages so the broker commits their offsets.
    pub keep_offset: bool,
    pub shutdown_signals: Vec<SignalKind>,
    pub shutdown_timeout: time::Duration,
}

impl WorkerConfig {
    pub fn builder(group_id: &str, topics: Vec<String>) -> WorkerConfigBuilder {
        WorkerConfigBuilder {
            config: WorkerConfig {
                group_id: group_id.to_owned(),
                topics,
                read_since: ReadSince::default().resolve(Utc::now()),
                batch_size: DEFAULT_BATCH_SIZE,
                keep_offset: false,
                shutdown_signals: default_shutdown_signals(),
                shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            },
        }
    }
}

pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    pub fn read_since(mut self, read_since: Option<DateTime<Utc>>) -> Self {
        self.config.read_since = read_since;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn keep_offset(mut self, keep_offset: bool) -> Self {
        self.config.keep_offset = keep_offset;
        self
    }

    pub fn shutdown_signals(mut self, signals: Vec<SignalKind>) -> Self {
        self.config.shutdown_signals = signals;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: time::Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<WorkerConfig, ConfigError> {
        let config = self.config;
        if config.group_id.trim().is_empty() {
            return Err(ConfigError::EmptyGroupId);
        }
        if config.topics.is_empty() {
            return Err(ConfigError::NoTopics);
        }
        if config.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if config.shutdown_timeout.is_zero() {
            return Err(ConfigError::ZeroShutdownTimeout);
        }
        Ok(config)
    }
}
