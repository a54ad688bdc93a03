use tokio_util::sync::CancellationToken;

/// Coordinates graceful shutdown of the polling loop and the config watcher
///
/// Usage:
/// ```no_run
/// use ingress_uploader::shutdown::ShutdownCoordinator;
///
/// # async fn example() {
/// let coordinator = ShutdownCoordinator::new();
///
/// let token = coordinator.subscribe();
/// let worker = tokio::spawn(async move {
///     loop {
///         tokio::select! {
///             _ = token.cancelled() => break,
///             _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
///         }
///     }
/// });
///
/// coordinator.shutdown();
/// worker.await.ok();
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled when shutdown is triggered. Subscribing after shutdown
    /// returns an already-cancelled token.
    pub fn subscribe(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }
}
