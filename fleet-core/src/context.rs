use crate::logsink::LogSink;
use fleet_domain::{ContainerId, Error, LogLevel, PlayerId, Result};
use fleet_store::Ctx;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

/// Execution context threaded through the mediator into every handler.
/// Carries the player scope, cancellation, and the per-container log stream.
#[derive(Debug, Clone)]
pub struct ExecCtx {
    pub player_id: PlayerId,
    pub container_id: Option<ContainerId>,
    cancel: CancellationToken,
    sink: Option<Arc<LogSink>>,
}

impl ExecCtx {
    /// Context for direct RPC calls that run outside any container.
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            container_id: None,
            cancel: CancellationToken::new(),
            sink: None,
        }
    }

    pub fn for_container(player_id: PlayerId, container_id: ContainerId, cancel: CancellationToken, sink: Arc<LogSink>) -> Self {
        Self {
            player_id,
            container_id: Some(container_id),
            cancel,
            sink: Some(sink),
        }
    }

    pub fn store_ctx(&self) -> Ctx {
        Ctx::new(self.player_id)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Context-aware sleep: unblocks with `Cancelled` the moment the
    /// container is stopped.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    pub fn log(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Debug => event!(Level::DEBUG, container = ?self.container_id, "{message}"),
            LogLevel::Info => event!(Level::INFO, container = ?self.container_id, "{message}"),
            LogLevel::Warn => event!(Level::WARN, container = ?self.container_id, "{message}"),
            LogLevel::Error => event!(Level::ERROR, container = ?self.container_id, "{message}"),
        }
        if let (Some(sink), Some(container_id)) = (&self.sink, &self.container_id) {
            sink.log(self.player_id, container_id, level, message);
        }
    }

    pub fn info(&self, message: String) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: String) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: String) {
        self.log(LogLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sleep_unblocks_on_cancel() {
        let token = CancellationToken::new();
        let ctx = ExecCtx {
            player_id: PlayerId(1),
            container_id: None,
            cancel: token.clone(),
            sink: None,
        };

        let sleeper = tokio::spawn(async move { ctx.sleep(Duration::from_secs(300)).await });
        tokio::task::yield_now().await;
        token.cancel();

        let result = sleeper.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
