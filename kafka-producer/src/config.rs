use std::fmt;

use envconfig::Envconfig;
use rdkafka::ClientConfig;

use crate::error::ProducerError;
use crate::handlers::{ErrorCallback, SuccessCallback};
use crate::record::{DeliveryError, OutboundRecord};

#[derive(Envconfig, Clone, Debug)]
pub struct ProducerConfig {
    #[envconfig(default = "events")]
    pub kafka_producer_topic: String,

    // Flush frequency
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32,

    // Flush max messages
    #[envconfig(default = "10000")]
    pub kafka_producer_batch_num_messages: u32,

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String,

    // -1 is the codec default
    #[envconfig(default = "-1")]
    pub kafka_compression_level: i32,

    #[envconfig(default = "3")]
    pub kafka_producer_retries: u32,

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32,

    #[envconfig(default = "1024")]
    pub kafka_producer_input_capacity: usize,
}

impl ProducerConfig {
    /// Producer tuning on top of the shared client settings.
    pub fn apply(&self, config: &mut ClientConfig) {
        config
            .set("linger.ms", self.kafka_producer_linger_ms.to_string())
            .set(
                "batch.num.messages",
                self.kafka_producer_batch_num_messages.to_string(),
            )
            .set("compression.codec", &self.kafka_compression_codec)
            .set(
                "compression.level",
                self.kafka_compression_level.to_string(),
            )
            .set(
                "message.send.max.retries",
                self.kafka_producer_retries.to_string(),
            )
            .set(
                "message.timeout.ms",
                self.kafka_message_timeout_ms.to_string(),
            );
    }
}

/// Which delivery results the broker client reports back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reporting {
    pub successes: bool,
    pub errors: bool,
}

impl Reporting {
    pub fn any(&self) -> bool {
        self.successes || self.errors
    }
}

/// Producer behaviour, built through [`ProducerSettings::builder`].
#[derive(Clone)]
pub struct ProducerSettings {
    pub topic: String,
    reporting: Reporting,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl ProducerSettings {
    pub fn builder(topic: &str) -> ProducerSettingsBuilder {
        ProducerSettingsBuilder {
            topic: topic.to_owned(),
            reporting: Reporting::default(),
            on_success: None,
            on_error: None,
        }
    }

    /// Results are only reported when something consumes them.
    pub fn reporting(&self) -> Reporting {
        self.reporting
    }

    pub(crate) fn runs_result_loop(&self) -> bool {
        self.reporting.any()
    }

    pub(crate) fn on_success(&self) -> Option<SuccessCallback> {
        self.on_success.clone()
    }

    pub(crate) fn on_error(&self) -> Option<ErrorCallback> {
        self.on_error.clone()
    }
}

impl fmt::Debug for ProducerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerSettings")
            .field("topic", &self.topic)
            .field("reporting", &self.reporting)
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

pub struct ProducerSettingsBuilder {
    topic: String,
    reporting: Reporting,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl ProducerSettingsBuilder {
    /// Report successes. Without a success callback they are logged.
    pub fn return_successes(mut self, enabled: bool) -> Self {
        self.reporting.successes = enabled;
        self
    }

    /// Report errors. Without an error callback they are logged.
    pub fn return_errors(mut self, enabled: bool) -> Self {
        self.reporting.errors = enabled;
        self
    }

    /// Also enables success reporting.
    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&OutboundRecord) + Send + Sync + 'static,
    {
        self.on_success = Some(std::sync::Arc::new(callback));
        self.reporting.successes = true;
        self
    }

    /// Also enables error reporting.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DeliveryError) + Send + Sync + 'static,
    {
        self.on_error = Some(std::sync::Arc::new(callback));
        self.reporting.errors = true;
        self
    }

    pub fn build(self) -> Result<ProducerSettings, ProducerError> {
        if self.topic.trim().is_empty() {
            return Err(ProducerError::EmptyTopic);
        }

        // Nothing would drain the result queue without a callback
        let reporting = if self.on_success.is_some() || self.on_error.is_some() {
            self.reporting
        } else {
            Reporting::default()
        };

        Ok(ProducerSettings {
            topic: self.topic,
            reporting,
            on_success: self.on_success,
            on_error: self.on_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn callbacks_enable_reporting() {
        let settings = ProducerSettings::builder("events")
            .on_success(|_| {})
            .build()
            .unwrap();

        assert_eq!(
            settings.reporting(),
            Reporting {
                successes: true,
                errors: false
            }
        );
        assert!(settings.runs_result_loop());
    }

    #[test]
    fn reporting_without_callbacks_is_disabled() {
        let settings = ProducerSettings::builder("events")
            .return_successes(true)
            .return_errors(true)
            .build()
            .unwrap();

        assert!(!settings.reporting().any());
        assert!(!settings.runs_result_loop());
    }

    #[test]
    fn one_callback_reports_both_sources_when_asked() {
        let settings = ProducerSettings::builder("events")
            .on_error(|_| {})
            .return_successes(true)
            .build()
            .unwrap();

        assert!(settings.reporting().successes);
        assert!(settings.reporting().errors);
        assert!(settings.on_success().is_none());
    }

    #[test]
    fn empty_topic_is_rejected() {
        assert!(matches!(
            ProducerSettings::builder("").build(),
            Err(ProducerError::EmptyTopic)
        ));
    }

    #[test]
    fn tuning_is_applied_to_client_config() {
        let env: HashMap<String, String> = [
            ("KAFKA_PRODUCER_LINGER_MS", "5"),
            ("KAFKA_COMPRESSION_CODEC", "zstd"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
        let config = ProducerConfig::init_from_hashmap(&env).unwrap();

        let mut client_config = ClientConfig::new();
        config.apply(&mut client_config);

        assert_eq!(client_config.get("linger.ms"), Some("5"));
        assert_eq!(client_config.get("compression.codec"), Some("zstd"));
        assert_eq!(client_config.get("message.send.max.retries"), Some("3"));
        assert_eq!(config.kafka_producer_topic, "events");
    }
}
