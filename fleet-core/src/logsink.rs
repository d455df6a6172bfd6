use chrono::Utc;
use fleet_domain::{message_hash, ContainerId, LogLevel, PlayerId};
use fleet_store::{with_transient_retry, LogBmcTrait, NewLogEntry};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{event, Level};

pub const DEFAULT_SINK_CAPACITY: usize = 1024;

/// Absorbs every worker log line without ever blocking the worker: a bounded
/// channel feeds one background writer that performs the dedup upsert. When
/// the channel is full the line is dropped and counted.
#[derive(Debug)]
pub struct LogSink {
    tx: mpsc::Sender<NewLogEntry>,
    next_log_id: AtomicI64,
    dropped: Arc<AtomicU64>,
    writer: JoinHandle<()>,
}

impl LogSink {
    pub fn spawn(log_bmc: Arc<dyn LogBmcTrait>, capacity: usize) -> Arc<LogSink> {
        let (tx, mut rx) = mpsc::channel::<NewLogEntry>(capacity);

        let writer = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                let result = with_transient_retry(|| log_bmc.upsert_within_window(entry.clone())).await;
                if let Err(err) = result {
                    event!(Level::WARN, error = %err, "container log write failed");
                }
            }
        });

        // log_id is allocated by the single sink so it stays monotonic per
        // process; the epoch-micros seed keeps it monotonic across restarts.
        Arc::new(LogSink {
            tx,
            next_log_id: AtomicI64::new(Utc::now().timestamp_micros()),
            dropped: Arc::new(AtomicU64::new(0)),
            writer,
        })
    }

    pub fn log(&self, player_id: PlayerId, container_id: &ContainerId, level: LogLevel, message: String) {
        let now = Utc::now();
        let entry = NewLogEntry {
            log_id: self.next_log_id.fetch_add(1, Ordering::SeqCst),
            container_id: container_id.clone(),
            player_id,
            timestamp: now,
            level,
            hash: message_hash(level, &message),
            message,
        };

        if self.tx.try_send(entry).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Lets tests and shutdown wait until queued lines are durable.
    pub async fn drain(&self) {
        while self.tx.capacity() < self.tx.max_capacity() {
            tokio::task::yield_now().await;
        }
        // the writer may still be inside its last upsert
        tokio::task::yield_now().await;
    }

    pub fn abort_writer(&self) {
        self.writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_store::{Ctx, InMemoryLogBmc};

    #[tokio::test]
    async fn sink_persists_and_dedupes_without_blocking() {
        let log_bmc = Arc::new(InMemoryLogBmc::new());
        let sink = LogSink::spawn(log_bmc.clone() as Arc<dyn LogBmcTrait>, DEFAULT_SINK_CAPACITY);
        let container_id = ContainerId("c-1".to_string());

        for _ in 0..3 {
            sink.log(PlayerId(1), &container_id, LogLevel::Info, "waiting for arrival".to_string());
        }
        sink.drain().await;
        tokio::task::yield_now().await;

        let logs = log_bmc
            .list_logs(&Ctx::new(PlayerId(1)), &container_id, 10, None)
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].count, 3);
        assert_eq!(sink.dropped_count(), 0);
    }

    #[tokio::test]
    async fn log_ids_are_monotonic() {
        let log_bmc = Arc::new(InMemoryLogBmc::new());
        let sink = LogSink::spawn(log_bmc.clone() as Arc<dyn LogBmcTrait>, DEFAULT_SINK_CAPACITY);
        let container_id = ContainerId("c-1".to_string());

        for i in 0..5 {
            sink.log(PlayerId(1), &container_id, LogLevel::Info, format!("step {i}"));
        }
        sink.drain().await;
        tokio::task::yield_now().await;

        let logs = log_bmc
            .list_logs_after(&Ctx::new(PlayerId(1)), &container_id, 0, 50)
            .await
            .unwrap();
        assert_eq!(logs.len(), 5);
        assert!(logs.windows(2).all(|pair| pair[0].log_id < pair[1].log_id));
    }
}
