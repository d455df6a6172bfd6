use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store-level error classification. `Transient` errors (deadlocks, broken
/// connections, pool exhaustion) are safe to retry; `Fatal` errors are not.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("row not found: {0}")]
    NotFound(String),

    #[error("constraint conflict: {0}")]
    Conflict(String),

    #[error("transient database error: {0}")]
    Transient(String),

    #[error("fatal database error: {0}")]
    Fatal(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() || db_err.is_foreign_key_violation() {
                    StoreError::Conflict(db_err.to_string())
                } else if is_transient_code(db_err.code().as_deref()) {
                    StoreError::Transient(db_err.to_string())
                } else {
                    StoreError::Fatal(db_err.to_string())
                }
            }
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
                StoreError::Transient(err.to_string())
            }
            _ => StoreError::Fatal(err.to_string()),
        }
    }
}

// 40001/40P01: postgres serialization failure & deadlock. SQLITE_BUSY/LOCKED
// surface through the sqlite driver with code 5/6.
fn is_transient_code(code: Option<&str>) -> bool {
    matches!(code, Some("40001") | Some("40P01") | Some("5") | Some("6"))
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Fatal(format!("entity (de)serialization failed: {err}"))
    }
}

impl From<chrono::ParseError> for StoreError {
    fn from(err: chrono::ParseError) -> Self {
        StoreError::Fatal(format!("stored timestamp unparsable: {err}"))
    }
}

impl From<StoreError> for fleet_domain::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => fleet_domain::Error::NotFound(msg),
            StoreError::Conflict(msg) => fleet_domain::Error::Conflict(msg),
            StoreError::Transient(msg) | StoreError::Fatal(msg) => fleet_domain::Error::Internal(msg),
        }
    }
}

const MAX_ATTEMPTS: u32 = 3;

/// Retries `Transient` failures with jittered backoff, up to a small bound.
/// Everything else propagates on first occurrence.
pub async fn with_transient_retry<T, F, Fut>(mut op: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(StoreError::Transient(msg)) if attempt < MAX_ATTEMPTS => {
                let backoff_ms = rand::thread_rng().gen_range(50..250) * attempt as u64;
                tracing::debug!(attempt, backoff_ms, error = %msg, "retrying transient store error");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_up_to_the_bound() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<u32> = with_transient_retry(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Transient("deadlock".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<u32> = with_transient_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Fatal("corrupt".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
