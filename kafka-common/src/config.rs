use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    // Used as the first segment of the client id: <service>_<hostname>_<session id>
    #[envconfig(default = "kafka_service")]
    pub kafka_service: String,

    // A random UUID is generated when unset
    pub kafka_session_id: Option<String>,

    // Parsed strictly when building the client, see `KafkaVersion`
    #[envconfig(default = "3.2.0")]
    pub kafka_version: String,

    #[envconfig(default = "3000")]
    pub kafka_heartbeat_interval_ms: EnvMsDuration,

    #[envconfig(default = "10000")]
    pub kafka_session_timeout_ms: EnvMsDuration,

    // Forward broker-reported consumer errors to the worker instead of only logging them
    #[envconfig(default = "true")]
    pub kafka_consume_return_errors: bool,

    // How long we wait for cluster metadata when checking connectivity
    #[envconfig(default = "15000")]
    pub kafka_metadata_timeout_ms: EnvMsDuration,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

impl EnvMsDuration {
    pub fn as_millis_string(&self) -> String {
        self.0.as_millis().to_string()
    }
}
