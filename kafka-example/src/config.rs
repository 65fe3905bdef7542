use envconfig::Envconfig;
use kafka_common::{EnvMsDuration, KafkaConfig};
use kafka_consumer::ReadSince;
use kafka_producer::ProducerConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub producer: ProducerConfig,

    #[envconfig(default = "example")]
    pub consumer_group: String,

    #[envconfig(default = "24h")]
    pub read_since: ReadSince,

    #[envconfig(default = "100")]
    pub batch_size: usize,

    #[envconfig(default = "false")]
    pub keep_offset: bool,

    #[envconfig(default = "50000")]
    pub shutdown_timeout_ms: EnvMsDuration,

    // Age of the demo payload. Older than `read_since` means the worker drops it as stale.
    #[envconfig(default = "120")]
    pub payload_age_hours: i64,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
