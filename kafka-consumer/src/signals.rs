use std::io;

use futures::future::select_all;
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Hangup, interrupt, terminate and quit.
pub fn default_shutdown_signals() -> Vec<SignalKind> {
    vec![
        SignalKind::hangup(),
        SignalKind::interrupt(),
        SignalKind::terminate(),
        SignalKind::quit(),
    ]
}

/// OS signals that trigger a worker shutdown.
pub(crate) struct ShutdownSignals {
    streams: Vec<(SignalKind, Signal)>,
}

impl ShutdownSignals {
    pub(crate) fn listen(kinds: &[SignalKind]) -> io::Result<Self> {
        let streams = kinds
            .iter()
            .map(|kind| signal(*kind).map(|stream| (*kind, stream)))
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self { streams })
    }

    /// Resolves with the first signal received. Never resolves when listening to nothing.
    pub(crate) async fn recv(&mut self) -> SignalKind {
        if self.streams.is_empty() {
            return std::future::pending().await;
        }

        let waiting = self.streams.iter_mut().map(|(kind, stream)| {
            Box::pin(async move {
                stream.recv().await;
                *kind
            })
        });
        let (kind, _, _) = select_all(waiting).await;
        kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn no_signals_never_resolve() {
        let mut signals = ShutdownSignals::listen(&[]).unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(20), signals.recv()).await;
        assert!(waited.is_err());
    }
}
