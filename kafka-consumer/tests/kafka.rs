use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use envconfig::Envconfig;
use kafka_common::{KafkaClient, KafkaConfig, Metrics};
use kafka_consumer::{DecodeError, Event, RawMessage, Worker, WorkerConfig};
use rdkafka::mocking::MockCluster;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tokio::sync::mpsc;

const TOPIC: &str = "pings";

#[derive(Debug, PartialEq)]
struct Ping {
    time: i64,
}

impl Event for Ping {
    fn time(&self) -> i64 {
        self.time
    }
}

fn build_ping(message: &RawMessage) -> Result<Ping, DecodeError> {
    let raw = message.value.as_deref().ok_or("empty payload")?;
    Ok(Ping {
        time: std::str::from_utf8(raw)?.parse()?,
    })
}

#[tokio::test]
async fn consumes_from_mock_cluster() {
    let cluster = MockCluster::new(1).expect("failed to create mock brokers");
    cluster
        .create_topic(TOPIC, 1, 1)
        .expect("failed to create topic");

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", cluster.bootstrap_servers())
        .create()
        .expect("failed to create producer");

    let now = Utc::now().timestamp();
    for time in [now - 48 * 3600, now] {
        producer
            .send(
                FutureRecord::<(), _>::to(TOPIC).payload(&time.to_string()),
                Duration::from_secs(5),
            )
            .await
            .expect("failed to produce");
    }

    let env: HashMap<String, String> = [
        ("KAFKA_HOSTS".to_owned(), cluster.bootstrap_servers()),
        ("KAFKA_CONSUME_RETURN_ERRORS".to_owned(), "false".to_owned()),
    ]
    .into_iter()
    .collect();
    let client = KafkaClient::new(&KafkaConfig::init_from_hashmap(&env).unwrap()).unwrap();

    let config = WorkerConfig::builder("mock-group", vec![TOPIC.to_owned()])
        .read_since(Some(Utc::now() - chrono::Duration::hours(24)))
        .keep_offset(true)
        .shutdown_signals(vec![])
        .shutdown_timeout(Duration::from_secs(20))
        .build()
        .unwrap();

    let (tx, mut rx) = mpsc::channel(10);
    let worker = Worker::new(client, config, tx, build_ping, Metrics::noop());
    let shutdown = worker.shutdown_token();
    let running = tokio::spawn(worker.run());

    let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("stream ended early");
    assert_eq!(event, Ping { time: now });

    shutdown.cancel();
    running.await.unwrap().unwrap();
}
