//! Graceful shutdown plumbing shared by the service binaries.
//!
//! A [`ShutdownController`] is created in `main`, its tokens are handed to
//! every long-running task, and the process exits once the controller has
//! observed SIGINT/SIGTERM (or a manual trigger) and the tasks have drained.

use std::future::Future;

use tokio::sync::watch;

/// Cloneable handle that observes a shutdown request.
#[derive(Clone)]
pub struct ShutdownToken {
    receiver: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until shutdown is requested.
    pub async fn cancelled(&mut self) {
        let _ = self.receiver.wait_for(|v| *v).await;
    }
}

/// Owner of the shutdown state for one process.
pub struct ShutdownController {
    sender: watch::Sender<bool>,
}

impl ShutdownController {
    /// Create a controller with shutdown not yet requested.
    pub fn new() -> Self {
        Self {
            sender: watch::channel(false).0,
        }
    }

    /// A token for a task to observe.
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.sender.subscribe(),
        }
    }

    /// Request shutdown.
    pub fn trigger(&self) {
        let _ = self.sender.send(true);
    }

    /// Block until SIGINT or SIGTERM arrives, then request shutdown.
    pub async fn wait_for_signal(&self) {
        wait_for_signal().await;
        tracing::info!("shutdown signal received");
        self.trigger();
    }

    /// Spawn a task that is abandoned when shutdown is requested.
    ///
    /// Tasks needing a drain phase should instead take a token and select
    /// on it themselves.
    pub fn spawn<F>(&self, name: &'static str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut token = self.token();
        tokio::spawn(async move {
            tokio::select! {
                _ = future => {}
                _ = token.cancelled() => {
                    tracing::debug!(task = name, "task cancelled by shutdown");
                }
            }
        })
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt =
        signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut terminate =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_wakes_tokens() {
        let controller = ShutdownController::new();
        let mut token = controller.token();
        assert!(!token.is_shutdown());

        controller.trigger();
        token.cancelled().await;
        assert!(token.is_shutdown());
    }

    #[tokio::test]
    async fn test_spawned_task_is_cancelled() {
        let controller = ShutdownController::new();
        let handle = controller.spawn("forever", async {
            std::future::pending::<()>().await;
        });

        controller.trigger();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_tokens_created_after_trigger_observe_it() {
        let controller = ShutdownController::new();
        controller.trigger();
        assert!(controller.token().is_shutdown());
    }
}
