use std::sync::Arc;

use kafka_common::Metrics;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::{BrokerClient, ConsumerGroup, ConsumerGroupHandler};
use crate::config::WorkerConfig;
use crate::consumer_handler::ConsumerHandler;
use crate::error::{BrokerError, WorkerError};
use crate::event::{Event, MessageBuilder};
use crate::message_handler::{HandlerConfig, MessageHandler};
use crate::signals::ShutdownSignals;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Running,
    ShuttingDown,
    Closed,
    TimedOut,
}

/// Supervises a consumer-group session from start to a bounded shutdown.
///
/// Decoded events are pushed into the destination queue. The queue receiver observes
/// end-of-stream once the worker has shut down.
pub struct Worker<C, E> {
    client: C,
    config: WorkerConfig,
    destination: mpsc::Sender<E>,
    builder: Box<dyn MessageBuilder<E>>,
    metrics: Metrics,
    shutdown: CancellationToken,
    state: watch::Sender<WorkerState>,
}

impl<C, E> Worker<C, E>
where
    C: BrokerClient,
    E: Event,
{
    pub fn new<B>(
        client: C,
        config: WorkerConfig,
        destination: mpsc::Sender<E>,
        builder: B,
        metrics: Metrics,
    ) -> Self
    where
        B: MessageBuilder<E> + 'static,
    {
        let (state, _) = watch::channel(WorkerState::Created);
        Self {
            client,
            config,
            destination,
            builder: Box::new(builder),
            metrics,
            shutdown: CancellationToken::new(),
            state,
        }
    }

    /// Shut down when `token` is cancelled.
    pub fn with_parent_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Cancelling the returned token shuts the worker down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Consume until an OS signal, a session error or cancellation, then shut down.
    ///
    /// Returns `Ok` only when the shutdown completed within the configured timeout.
    pub async fn run(self) -> Result<(), WorkerError> {
        let Worker {
            client,
            config,
            destination,
            builder,
            metrics,
            shutdown,
            state,
        } = self;

        let mut signals =
            ShutdownSignals::listen(&config.shutdown_signals).map_err(WorkerError::Signal)?;

        let group = match client.consumer_group(&config.group_id) {
            Ok(group) => Arc::new(group),
            Err(e) => {
                error!(group = %config.group_id, error = %e, "can't create consumer group client");
                return Err(WorkerError::SessionCreation(e));
            }
        };

        let handler_config = HandlerConfig {
            batch_size: config.batch_size,
            read_since: config.read_since,
        };
        let message_handler = Arc::new(MessageHandler::new(destination, handler_config, builder));

        // Every session shares this token, so cancelling it ends the current one
        let session_token = shutdown.child_token();
        let consumer_handler: Arc<dyn ConsumerGroupHandler> = Arc::new(ConsumerHandler::new(
            message_handler.clone(),
            config.keep_offset,
            metrics.clone(),
            session_token.clone(),
        ));

        let (errors_tx, mut errors_rx) = mpsc::channel(1);
        let consume_task = tokio::spawn(consume_loop(
            group.clone(),
            config.topics.clone(),
            consumer_handler,
            session_token.clone(),
            errors_tx,
            metrics.clone(),
        ));

        state.send_replace(WorkerState::Running);
        info!(
            group = %config.group_id,
            topics = ?config.topics,
            "consumer running..."
        );

        tokio::select! {
            Some(e) = errors_rx.recv() => {
                error!(error = %e, "terminating: consumer error");
            }
            kind = signals.recv() => {
                info!(signal = ?kind, "terminating: signal received");
            }
            _ = shutdown.cancelled() => {
                info!("terminating: context cancelled");
            }
        }

        state.send_replace(WorkerState::ShuttingDown);
        let close = async move {
            session_token.cancel();
            let (closed, consumed) = tokio::join!(group.close(), async move {
                message_handler.close();
                consume_task.await
            });
            if let Err(e) = closed {
                warn!(error = %e, "failed to close consumer group");
            }
            if let Err(e) = consumed {
                error!(error = %e, "consume loop panicked");
            }
        };

        match tokio::time::timeout(config.shutdown_timeout, close).await {
            Ok(()) => {
                state.send_replace(WorkerState::Closed);
                info!("done, consumer closed");
                Ok(())
            }
            Err(_) => {
                state.send_replace(WorkerState::TimedOut);
                warn!(
                    timeout = ?config.shutdown_timeout,
                    "shutdown abandoned after timeout"
                );
                Err(WorkerError::ShutdownTimeout(config.shutdown_timeout))
            }
        }
    }
}

/// Run sessions back to back until cancelled. The first broker error is forwarded to the worker
/// and ends the loop once the current session has wound down.
async fn consume_loop<G: ConsumerGroup>(
    group: Arc<G>,
    topics: Vec<String>,
    handler: Arc<dyn ConsumerGroupHandler>,
    cancel: CancellationToken,
    errors: mpsc::Sender<BrokerError>,
    metrics: Metrics,
) {
    while !cancel.is_cancelled() {
        let session = group.consume(cancel.clone(), &topics, handler.clone());
        tokio::pin!(session);
        let mut failed = false;

        // The worker cancels the session after a broker error, so cleanup still runs
        let outcome = loop {
            tokio::select! {
                outcome = &mut session => break outcome,
                Some(e) = group.next_error(), if !failed => {
                    error!(error = %e, "consumer error");
                    metrics.record_session_error(&e.to_string());
                    forward(&errors, e).await;
                    failed = true;
                }
            }
        };
        if failed {
            return;
        }

        if let Err(e) = outcome {
            if cancel.is_cancelled() {
                info!(error = %e, "session ended during shutdown");
                return;
            }
            error!(error = %e, "error during consuming");
            metrics.record_session_error(&e.to_string());
            forward(&errors, e).await;
            return;
        }
    }
}

async fn forward(errors: &mpsc::Sender<BrokerError>, e: BrokerError) {
    if errors.send(e).await.is_err() {
        warn!("worker no longer listening for consumer errors");
    }
}
