use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Cancels a token on SIGTERM or SIGINT.
///
/// The token is handed to the HTTP server for graceful shutdown and to every
/// login flow, so a classification in progress stops with the process.
pub struct SigDown {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl SigDown {
    /// Returns an error if signal registration fails.
    pub fn try_new() -> Result<Self, std::io::Error> {
        Self::with_token(CancellationToken::new())
    }

    /// Listens for signals and cancels `token` when one arrives.
    pub fn with_token(token: CancellationToken) -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let inner = token.clone();
        let task_tracker = TaskTracker::new();
        task_tracker.spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("SIGTERM received, shutting down"),
                _ = sigint.recv() => tracing::info!("SIGINT received, shutting down"),
                _ = inner.cancelled() => return,
            }
            inner.cancel();
        });
        task_tracker.close();
        Ok(Self {
            task_tracker,
            cancellation_token: token,
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Waits for shutdown and for the signal task to finish.
    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
        self.task_tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn external_cancellation_releases_the_listener() {
        let token = CancellationToken::new();
        let sig_down = SigDown::with_token(token.clone()).unwrap();
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), sig_down.recv())
            .await
            .unwrap();
        assert!(sig_down.cancellation_token().is_cancelled());
    }
}
