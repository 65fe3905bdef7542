use std::env;
use std::fmt;
use std::str::FromStr;

use rdkafka::error::KafkaError;
use rdkafka::producer::{BaseProducer, Producer};
use rdkafka::ClientConfig;
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::KafkaConfig;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("could not parse kafka version {0:?}")]
    InvalidVersion(String),
    #[error("could not create a kafka client: {0}")]
    Connection(#[source] KafkaError),
    #[error("kafka connectivity check was aborted")]
    ProbeAborted,
}

/// Broker protocol version, as accepted by librdkafka's `broker.version.fallback`.
///
/// Releases from 1.0 onwards use three components (`3.2.0`), older ones use four
/// (`0.10.2.1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KafkaVersion {
    parts: [u16; 4],
    len: usize,
}

impl FromStr for KafkaVersion {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ClientError::InvalidVersion(s.to_owned());

        let components = s
            .split('.')
            .map(|c| c.parse::<u16>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        let expected_len = match components.first() {
            Some(0) => 4,
            Some(_) => 3,
            None => return Err(invalid()),
        };
        if components.len() != expected_len {
            return Err(invalid());
        }

        let mut parts = [0; 4];
        parts[..expected_len].copy_from_slice(&components);
        Ok(KafkaVersion {
            parts,
            len: expected_len,
        })
    }
}

impl fmt::Display for KafkaVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rendered: Vec<String> = self.parts[..self.len]
            .iter()
            .map(|p| p.to_string())
            .collect();
        write!(f, "{}", rendered.join("."))
    }
}

/// Shared connection settings for every consumer group and producer created by this process.
#[derive(Clone)]
pub struct KafkaClient {
    config: ClientConfig,
    client_id: String,
    return_errors: bool,
    metadata_timeout: std::time::Duration,
    session_timeout_ms: String,
    heartbeat_interval_ms: String,
}

impl KafkaClient {
    /// Build the client settings without contacting the brokers.
    pub fn new(config: &KafkaConfig) -> Result<Self, ClientError> {
        let version: KafkaVersion = config.kafka_version.parse()?;

        let session_id = config
            .kafka_session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let client_id = make_client_id(&config.kafka_service, &session_id);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("client.id", &client_id)
            .set("broker.version.fallback", version.to_string())
            .set("statistics.interval.ms", "10000");

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        Ok(KafkaClient {
            config: client_config,
            client_id,
            return_errors: config.kafka_consume_return_errors,
            metadata_timeout: config.kafka_metadata_timeout_ms.0,
            session_timeout_ms: config.kafka_session_timeout_ms.as_millis_string(),
            heartbeat_interval_ms: config.kafka_heartbeat_interval_ms.as_millis_string(),
        })
    }

    /// Build the client settings and check that the brokers answer a metadata request.
    pub async fn connect(config: &KafkaConfig) -> Result<Self, ClientError> {
        let client = Self::new(config)?;
        info!("connecting to Kafka brokers at {}...", config.kafka_hosts);

        debug!("rdkafka configuration: {:?}", client.config);
        let probe: BaseProducer = client.config.create().map_err(ClientError::Connection)?;
        let timeout = client.metadata_timeout;

        let topics = tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(None, timeout)
                .map(|metadata| metadata.topics().len())
        })
        .await
        .map_err(|_| ClientError::ProbeAborted)?;

        match topics {
            Ok(count) => {
                info!(
                    "Successfully connected to Kafka brokers. Found {} topics.",
                    count
                );
                Ok(client)
            }
            Err(e) => {
                error!("Failed to fetch metadata from Kafka brokers: {:?}", e);
                Err(ClientError::Connection(e))
            }
        }
    }

    /// Settings shared by producers and consumers.
    pub fn client_config(&self) -> ClientConfig {
        self.config.clone()
    }

    /// Settings for a consumer joining `group_id`. Offsets are only stored for messages we
    /// explicitly mark, and stored offsets are committed in the background.
    pub fn consumer_config(&self, group_id: &str) -> ClientConfig {
        let mut config = self.config.clone();
        config
            .set("group.id", group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("session.timeout.ms", &self.session_timeout_ms)
            .set("heartbeat.interval.ms", &self.heartbeat_interval_ms);
        config
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Whether broker-reported consumer errors should be surfaced to the worker.
    pub fn return_errors(&self) -> bool {
        self.return_errors
    }
}

fn make_client_id(service: &str, session_id: &str) -> String {
    let hostname = env::var("HOSTNAME").unwrap_or("unknown".to_string());
    format!("{}_{}_{}", service, hostname, session_id)
}
