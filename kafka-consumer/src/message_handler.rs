use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broker::RawMessage;
use crate::error::HandlerError;
use crate::event::{Event, MessageBuilder};

/// Per-session handler settings.
#[derive(Debug, Clone, Copy)]
pub struct HandlerConfig {
    pub batch_size: usize,
    /// Messages at or before this instant are dropped. `None` disables filtering.
    pub read_since: Option<DateTime<Utc>>,
}

/// Decodes raw messages, drops the ones older than `read_since`, and forwards the rest into the
/// application queue.
///
/// The queue is opened at the start of every session and closed at its end. The application
/// receiver only observes end-of-stream once [`MessageHandler::close`] drops the last sender.
pub struct MessageHandler<E> {
    destination: Mutex<Option<mpsc::Sender<E>>>,
    active: Mutex<Option<mpsc::Sender<E>>>,
    builder: Box<dyn MessageBuilder<E>>,
    config: HandlerConfig,
}

impl<E: Event> MessageHandler<E> {
    pub fn new(
        destination: mpsc::Sender<E>,
        config: HandlerConfig,
        builder: Box<dyn MessageBuilder<E>>,
    ) -> Self {
        if config.read_since.is_none() {
            warn!("read since not set, every message will be forwarded");
        }

        Self {
            destination: Mutex::new(Some(destination)),
            active: Mutex::new(None),
            builder,
            config,
        }
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Open the queue for a new session. No-op once the handler has been closed for good.
    pub fn open(&self) {
        let destination = self
            .destination
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if destination.is_none() {
            debug!("output queue already closed, not reopening");
        }
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = destination;
    }

    /// Close the queue at the end of a session.
    pub fn close_session(&self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Close the queue for good: the application receiver sees end-of-stream once in-flight
    /// pushes complete.
    pub fn close(&self) {
        self.close_session();
        self.destination
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_open(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Decode and forward one message, waiting for room in the queue. The wait gives up once
    /// `cancel` fires.
    pub async fn handle(
        &self,
        message: &RawMessage,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let event = self.builder.build(message).map_err(HandlerError::Decode)?;

        if let Some(read_since) = self.config.read_since {
            if event.time() <= read_since.timestamp() {
                return Err(HandlerError::Stale);
            }
        }

        // Clone under the lock, send outside of it
        let sender = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(HandlerError::QueueClosed)?;

        tokio::select! {
            sent = sender.send(event) => sent.map_err(|_| HandlerError::QueueClosed),
            _ = cancel.cancelled() => Err(HandlerError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DecodeError;
    use chrono::Duration;

    #[derive(Debug, PartialEq)]
    struct Timed(i64);

    impl Event for Timed {
        fn time(&self) -> i64 {
            self.0
        }
    }

    fn parse_seconds(message: &RawMessage) -> Result<Timed, DecodeError> {
        let value = message.value.as_deref().ok_or("empty payload")?;
        Ok(Timed(std::str::from_utf8(value)?.parse()?))
    }

    fn message(value: &str) -> RawMessage {
        RawMessage {
            topic: "events".to_owned(),
            partition: 0,
            offset: 0,
            key: None,
            value: Some(value.as_bytes().to_vec()),
            timestamp: None,
        }
    }

    fn handler(
        capacity: usize,
        read_since: Option<DateTime<Utc>>,
    ) -> (MessageHandler<Timed>, mpsc::Receiver<Timed>) {
        let (tx, rx) = mpsc::channel(capacity);
        let config = HandlerConfig {
            batch_size: capacity,
            read_since,
        };
        let handler = MessageHandler::new(tx, config, Box::new(parse_seconds));
        handler.open();
        (handler, rx)
    }

    #[tokio::test]
    async fn forwards_newer_messages() {
        let now = Utc::now();
        let (handler, mut rx) = handler(4, Some(now - Duration::hours(1)));

        handler
            .handle(&message(&now.timestamp().to_string()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), Timed(now.timestamp()));
    }

    #[tokio::test]
    async fn drops_messages_at_or_before_read_since() {
        let read_since = Utc::now();
        let (handler, mut rx) = handler(4, Some(read_since));
        let cancel = CancellationToken::new();

        let at = message(&read_since.timestamp().to_string());
        let before = message(&(read_since.timestamp() - 10).to_string());

        assert!(matches!(handler.handle(&at, &cancel).await, Err(HandlerError::Stale)));
        assert!(matches!(handler.handle(&before, &cancel).await, Err(HandlerError::Stale)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unset_read_since_forwards_everything() {
        let (handler, mut rx) = handler(4, None);

        handler
            .handle(&message("0"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), Timed(0));
    }

    #[tokio::test]
    async fn decode_failures_are_reported() {
        let (handler, mut rx) = handler(4, None);

        let result = handler
            .handle(&message("not a number"), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(HandlerError::Decode(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_session_rejects_messages() {
        let (handler, _rx) = handler(4, None);
        handler.close_session();
        assert!(!handler.is_open());

        let result = handler
            .handle(&message("1"), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(HandlerError::QueueClosed)));

        // A new session reopens the queue
        handler.open();
        assert!(handler
            .handle(&message("1"), &CancellationToken::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn close_ends_the_application_stream() {
        let (handler, mut rx) = handler(4, None);
        handler
            .handle(&message("5"), &CancellationToken::new())
            .await
            .unwrap();

        handler.close();
        handler.open();
        assert!(!handler.is_open());

        assert_eq!(rx.recv().await, Some(Timed(5)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn full_queue_blocks_until_drained() {
        let (handler, mut rx) = handler(1, None);
        let cancel = CancellationToken::new();
        handler.handle(&message("1"), &cancel).await.unwrap();

        let second = message("2");
        let pending = handler.handle(&second, &cancel);
        tokio::pin!(pending);

        // Nothing is dropped or rejected while the queue is full
        let waited = tokio::time::timeout(std::time::Duration::from_millis(50), &mut pending).await;
        assert!(waited.is_err());
        assert_eq!(rx.len(), 1);

        assert_eq!(rx.recv().await, Some(Timed(1)));
        pending.await.unwrap();
        assert_eq!(rx.recv().await, Some(Timed(2)));
    }

    #[tokio::test]
    async fn blocked_push_gives_up_on_cancellation() {
        let (handler, _rx) = handler(1, None);
        let cancel = CancellationToken::new();

        handler.handle(&message("1"), &cancel).await.unwrap();

        cancel.cancel();
        let result = handler.handle(&message("2"), &cancel).await;
        assert!(matches!(result, Err(HandlerError::Cancelled)));
    }
}
