//! Consumer-group sessions on top of librdkafka.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use kafka_common::KafkaClient;
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::message::BorrowedMessage;
use rdkafka::{ClientConfig, ClientContext, Message, TopicPartitionList};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{
    BrokerClient, Claim, ConsumerGroup, ConsumerGroupHandler, GroupSession, RawMessage,
};
use crate::error::BrokerError;

const CLAIM_BUFFER: usize = 256;
const ERROR_BUFFER: usize = 64;

impl BrokerClient for KafkaClient {
    type Group = KafkaConsumerGroup;

    fn consumer_group(&self, group_id: &str) -> Result<KafkaConsumerGroup, BrokerError> {
        KafkaConsumerGroup::new(self.consumer_config(group_id), self.return_errors())
    }
}

pub struct GroupContext {
    return_errors: bool,
    errors: mpsc::Sender<BrokerError>,
    revocations: watch::Sender<u64>,
}

impl ClientContext for GroupContext {
    fn error(&self, error: KafkaError, reason: &str) {
        error!("librdkafka: {}: {}", error, reason);
        if self.return_errors && self.errors.try_send(BrokerError::Kafka(error)).is_err() {
            warn!("consumer error buffer is full, dropping error");
        }
    }
}

impl ConsumerContext for GroupContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(partitions) if partitions.count() > 0 => {
                info!("revoking {} partitions", partitions.count());
                self.revocations.send_modify(|n| *n += 1);
            }
            Rebalance::Revoke(_) => debug!("skipping empty revoke rebalance"),
            Rebalance::Assign(partitions) => {
                info!("assigning {} partitions", partitions.count());
            }
            Rebalance::Error(e) => error!("rebalance error: {}", e),
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        match result {
            Ok(()) | Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {}
            Err(e) => warn!("failed to commit offsets: {}", e),
        }
    }
}

/// A consumer-group member backed by a librdkafka `StreamConsumer`.
///
/// Messages are routed into one [`Claim`] per partition. A session ends when any partition is
/// revoked, after which the next call to `consume` starts a new one with the current assignment.
pub struct KafkaConsumerGroup {
    consumer: Arc<StreamConsumer<GroupContext>>,
    errors: Mutex<mpsc::Receiver<BrokerError>>,
    revocations: watch::Receiver<u64>,
    subscribed: AtomicBool,
}

impl KafkaConsumerGroup {
    pub fn new(config: ClientConfig, return_errors: bool) -> Result<Self, BrokerError> {
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_BUFFER);
        let (revocations_tx, revocations_rx) = watch::channel(0);
        let context = GroupContext {
            return_errors,
            errors: errors_tx,
            revocations: revocations_tx,
        };

        let consumer: StreamConsumer<GroupContext> = config
            .create_with_context(context)
            .map_err(|e| BrokerError::GroupCreation(e.to_string()))?;

        Ok(Self {
            consumer: Arc::new(consumer),
            errors: Mutex::new(errors_rx),
            revocations: revocations_rx,
            subscribed: AtomicBool::new(false),
        })
    }

    fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        if let Err(e) = self.consumer.subscribe(&topics) {
            self.subscribed.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        info!(topics = ?topics, "subscribed");
        Ok(())
    }
}

#[async_trait]
impl ConsumerGroup for KafkaConsumerGroup {
    async fn consume(
        &self,
        cancel: CancellationToken,
        topics: &[String],
        handler: Arc<dyn ConsumerGroupHandler>,
    ) -> Result<(), BrokerError> {
        self.subscribe(topics)?;

        let mut revocations = self.revocations.clone();
        revocations.borrow_and_update();

        let session = Arc::new(KafkaSession {
            consumer: self.consumer.clone(),
        });
        handler.setup(session.as_ref()).await?;

        let mut claims: HashMap<(String, i32), mpsc::Sender<RawMessage>> = HashMap::new();
        let mut tasks = JoinSet::new();
        let mut outcome = Ok(());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = revocations.changed() => {
                    if changed.is_ok() {
                        info!("partitions revoked, ending session");
                    }
                    break;
                }
                received = self.consumer.recv() => {
                    let message = match received {
                        Ok(message) => raw_message(&message),
                        Err(e) => {
                            outcome = Err(BrokerError::Kafka(e));
                            break;
                        }
                    };

                    let key = (message.topic.clone(), message.partition);
                    let claim = claims.entry(key).or_insert_with(|| {
                        let (tx, mut claim) =
                            Claim::channel(&message.topic, message.partition, CLAIM_BUFFER);
                        let handler = handler.clone();
                        let session = session.clone();
                        tasks.spawn(async move {
                            handler.consume_claim(session.as_ref(), &mut claim).await
                        });
                        tx
                    });

                    // Backpressure: a full claim holds up delivery until it drains
                    tokio::select! {
                        sent = claim.send(message) => {
                            if sent.is_err() {
                                warn!("claim loop exited early, dropping message");
                            }
                        }
                        _ = cancel.cancelled() => break,
                    }
                }
            }
        }

        // Closing the claim streams lets every consume_claim return
        claims.clear();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "claim returned an error"),
                Err(e) => error!(error = %e, "claim task panicked"),
            }
        }

        handler.cleanup(session.as_ref()).await?;
        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || commit(&consumer)).await?;

        outcome
    }

    async fn next_error(&self) -> Option<BrokerError> {
        self.errors.lock().await.recv().await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || {
            commit(&consumer);
            consumer.unsubscribe();
        })
        .await?;
        info!("consumer group closed");
        Ok(())
    }
}

struct KafkaSession {
    consumer: Arc<StreamConsumer<GroupContext>>,
}

impl GroupSession for KafkaSession {
    fn mark_message(&self, message: &RawMessage) {
        // The committed offset is the next one to read
        if let Err(e) =
            self.consumer
                .store_offset(&message.topic, message.partition, message.offset + 1)
        {
            warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %e,
                "failed to store offset"
            );
        }
    }
}

fn commit(consumer: &StreamConsumer<GroupContext>) {
    match consumer.commit_consumer_state(CommitMode::Sync) {
        Ok(()) | Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {}
        Err(e) => warn!(error = %e, "failed to commit offsets"),
    }
}

fn raw_message(message: &BorrowedMessage<'_>) -> RawMessage {
    RawMessage {
        topic: message.topic().to_owned(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec),
        timestamp: message.timestamp().to_millis(),
    }
}
