use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use metrics::{Key, Label, Level, Metadata, NoopRecorder, Recorder, Unit};
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};
use tracing::info;

pub const EVENTS_TOTAL: &str = "kafka_total_events";
pub const ERRORS_TOTAL: &str = "kafka_total_errors";
pub const EVENT_DURATION: &str = "kafka_event_duration";

const DURATION_BUCKETS: &[f64] = &[0.020, 0.040, 0.060, 0.080, 0.100];

// Label value used for errors that are not tied to a single partition
const NO_PARTITION: &str = "none";

static METADATA: Metadata<'static> = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

/// Registry for the consumer and producer series.
///
/// Constructed once by the application and handed to every component that records into it.
/// The backing recorder is chosen by the caller: a Prometheus recorder in production, a
/// debugging recorder in tests.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<Inner>,
}

struct Inner {
    recorder: Box<dyn Recorder + Send + Sync>,
    closed: AtomicBool,
}

impl Metrics {
    pub fn new<R>(recorder: R) -> Self
    where
        R: Recorder + Send + Sync + 'static,
    {
        recorder.describe_counter(
            EVENTS_TOTAL.into(),
            Some(Unit::Count),
            "number of consumed events".into(),
        );
        recorder.describe_counter(
            ERRORS_TOTAL.into(),
            Some(Unit::Count),
            "number of errors while consuming".into(),
        );
        recorder.describe_histogram(
            EVENT_DURATION.into(),
            Some(Unit::Seconds),
            "time spent handling a single event".into(),
        );

        Metrics {
            inner: Arc::new(Inner {
                recorder: Box::new(recorder),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// A registry that discards everything.
    pub fn noop() -> Self {
        Self::new(NoopRecorder)
    }

    pub fn record_event(&self, topic: &str, partition: i32) {
        if self.is_closed() {
            return;
        }
        let key = Key::from_parts(EVENTS_TOTAL, partition_labels(topic, partition));
        self.inner
            .recorder
            .register_counter(&key, &METADATA)
            .increment(1);
    }

    pub fn record_error(&self, topic: &str, partition: i32, error: &str) {
        let mut labels = partition_labels(topic, partition);
        labels.push(Label::new("error", error.to_owned()));
        self.increment_error(labels);
    }

    /// Errors reported by the broker for the whole session rather than for a message.
    pub fn record_session_error(&self, error: &str) {
        self.increment_error(vec![
            Label::new("partition", NO_PARTITION),
            Label::new("topic", NO_PARTITION),
            Label::new("error", error.to_owned()),
        ]);
    }

    pub fn record_duration(&self, topic: &str, partition: i32, elapsed: Duration) {
        if self.is_closed() {
            return;
        }
        let key = Key::from_parts(EVENT_DURATION, partition_labels(topic, partition));
        self.inner
            .recorder
            .register_histogram(&key, &METADATA)
            .record(elapsed.as_secs_f64());
    }

    fn increment_error(&self, labels: Vec<Label>) {
        if self.is_closed() {
            return;
        }
        let key = Key::from_parts(ERRORS_TOTAL, labels);
        self.inner
            .recorder
            .register_counter(&key, &METADATA)
            .increment(1);
    }

    /// End of the registry lifecycle: later recordings are dropped.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            info!("metrics registry closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

fn partition_labels(topic: &str, partition: i32) -> Vec<Label> {
    vec![
        Label::new("partition", partition.to_string()),
        Label::new("topic", topic.to_owned()),
    ]
}

/// Prometheus recorder with the event duration buckets preconfigured.
/// Keep the handle before moving the recorder into [`Metrics::new`].
pub fn setup_prometheus_recorder() -> Result<PrometheusRecorder, BuildError> {
    Ok(PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(EVENT_DURATION.to_string()), DURATION_BUCKETS)?
        .build_recorder())
}

/// Build a Router for a metrics endpoint.
pub fn setup_metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        get(move || std::future::ready(handle.render())),
    )
}

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}
