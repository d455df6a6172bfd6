use crate::error::{StoreError, StoreResult};
use crate::manager::{fmt_ts, parse_ts, DbModelManager};
use crate::Ctx;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fleet_domain::{ContainerId, ContainerLog, LogLevel, PlayerId};
use mockall::automock;
use sqlx::FromRow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Window within which identical `(container, level, message)` emissions
/// collapse into one row.
pub const DEDUP_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogEntry {
    pub log_id: i64,
    pub container_id: ContainerId,
    pub player_id: PlayerId,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub hash: String,
}

#[automock]
#[async_trait]
pub trait LogBmcTrait: Send + Sync + Debug {
    /// Atomic upsert: a row for the same `(container, hash)` whose
    /// `first_seen` is inside the window gets `count + 1` and a fresh
    /// `last_seen`; otherwise a new row is inserted.
    async fn upsert_within_window(&self, entry: NewLogEntry) -> StoreResult<()>;

    /// Newest first, keyset-paginated by `log_id`.
    async fn list_logs(&self, ctx: &Ctx, container_id: &ContainerId, limit: u32, before_log_id: Option<i64>) -> StoreResult<Vec<ContainerLog>>;

    /// Oldest first, everything after `after_log_id`. Drives log following.
    async fn list_logs_after(&self, ctx: &Ctx, container_id: &ContainerId, after_log_id: i64, limit: u32) -> StoreResult<Vec<ContainerLog>>;
}

#[derive(Debug, FromRow)]
struct LogRow {
    log_id: i64,
    container_id: String,
    timestamp: String,
    level: String,
    message: String,
    hash: String,
    count: i64,
    first_seen: String,
    last_seen: String,
}

impl LogRow {
    fn into_domain(self) -> StoreResult<ContainerLog> {
        Ok(ContainerLog {
            log_id: self.log_id,
            container_id: ContainerId(self.container_id),
            timestamp: parse_ts(&self.timestamp)?,
            level: LogLevel::from_str(&self.level).map_err(|e| StoreError::Fatal(format!("bad log level: {e}")))?,
            message: self.message,
            hash: self.hash,
            count: self.count as u32,
            first_seen: parse_ts(&self.first_seen)?,
            last_seen: parse_ts(&self.last_seen)?,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
select log_id, container_id, timestamp, level, message, hash, count, first_seen, last_seen
  from container_logs
"#;

#[derive(Debug)]
pub struct DbLogBmc {
    pub(crate) mm: DbModelManager,
}

#[async_trait]
impl LogBmcTrait for DbLogBmc {
    async fn upsert_within_window(&self, entry: NewLogEntry) -> StoreResult<()> {
        let window_start = entry.timestamp - Duration::seconds(DEDUP_WINDOW_SECS);
        let mut tx = self.mm.pool().begin().await?;

        let updated = sqlx::query(
            r#"
update container_logs
   set count = count + 1
     , last_seen = $1
 where container_id = $2
   and hash = $3
   and first_seen > $4
        "#,
        )
        .bind(fmt_ts(entry.timestamp))
        .bind(&entry.container_id.0)
        .bind(&entry.hash)
        .bind(fmt_ts(window_start))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            sqlx::query(
                r#"
insert into container_logs (log_id, container_id, player_id, timestamp, level, message, hash, count, first_seen, last_seen)
values ($1, $2, $3, $4, $5, $6, $7, 1, $8, $9)
        "#,
            )
            .bind(entry.log_id)
            .bind(&entry.container_id.0)
            .bind(entry.player_id.0)
            .bind(fmt_ts(entry.timestamp))
            .bind(entry.level.to_string())
            .bind(&entry.message)
            .bind(&entry.hash)
            .bind(fmt_ts(entry.timestamp))
            .bind(fmt_ts(entry.timestamp))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_logs(&self, ctx: &Ctx, container_id: &ContainerId, limit: u32, before_log_id: Option<i64>) -> StoreResult<Vec<ContainerLog>> {
        let rows: Vec<LogRow> = sqlx::query_as(&format!(
            r#"{SELECT_COLUMNS}
 where player_id = $1
   and container_id = $2
   and log_id < $3
 order by timestamp desc, log_id desc
 limit $4"#
        ))
        .bind(ctx.player_id.0)
        .bind(&container_id.0)
        .bind(before_log_id.unwrap_or(i64::MAX))
        .bind(limit as i64)
        .fetch_all(self.mm.pool())
        .await?;

        rows.into_iter().map(LogRow::into_domain).collect()
    }

    async fn list_logs_after(&self, ctx: &Ctx, container_id: &ContainerId, after_log_id: i64, limit: u32) -> StoreResult<Vec<ContainerLog>> {
        let rows: Vec<LogRow> = sqlx::query_as(&format!(
            r#"{SELECT_COLUMNS}
 where player_id = $1
   and container_id = $2
   and log_id > $3
 order by log_id asc
 limit $4"#
        ))
        .bind(ctx.player_id.0)
        .bind(&container_id.0)
        .bind(after_log_id)
        .bind(limit as i64)
        .fetch_all(self.mm.pool())
        .await?;

        rows.into_iter().map(LogRow::into_domain).collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLogBmc {
    state: Arc<RwLock<HashMap<(PlayerId, ContainerId), Vec<ContainerLog>>>>,
}

impl InMemoryLogBmc {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogBmcTrait for InMemoryLogBmc {
    async fn upsert_within_window(&self, entry: NewLogEntry) -> StoreResult<()> {
        let window_start = entry.timestamp - Duration::seconds(DEDUP_WINDOW_SECS);
        let mut guard = self.state.write().await;
        let logs = guard.entry((entry.player_id, entry.container_id.clone())).or_default();

        if let Some(existing) = logs
            .iter_mut()
            .find(|log| log.hash == entry.hash && log.first_seen > window_start)
        {
            existing.count += 1;
            existing.last_seen = entry.timestamp;
        } else {
            logs.push(ContainerLog {
                log_id: entry.log_id,
                container_id: entry.container_id,
                timestamp: entry.timestamp,
                level: entry.level,
                message: entry.message,
                hash: entry.hash,
                count: 1,
                first_seen: entry.timestamp,
                last_seen: entry.timestamp,
            });
        }
        Ok(())
    }

    async fn list_logs(&self, ctx: &Ctx, container_id: &ContainerId, limit: u32, before_log_id: Option<i64>) -> StoreResult<Vec<ContainerLog>> {
        let guard = self.state.read().await;
        let mut logs = guard
            .get(&(ctx.player_id, container_id.clone()))
            .map(|logs| {
                logs.iter()
                    .filter(|log| log.log_id < before_log_id.unwrap_or(i64::MAX))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        logs.sort_by(|a, b| (b.timestamp, b.log_id).cmp(&(a.timestamp, a.log_id)));
        logs.truncate(limit as usize);
        Ok(logs)
    }

    async fn list_logs_after(&self, ctx: &Ctx, container_id: &ContainerId, after_log_id: i64, limit: u32) -> StoreResult<Vec<ContainerLog>> {
        let guard = self.state.read().await;
        let mut logs = guard
            .get(&(ctx.player_id, container_id.clone()))
            .map(|logs| logs.iter().filter(|log| log.log_id > after_log_id).cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        logs.sort_by_key(|log| log.log_id);
        logs.truncate(limit as usize);
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(log_id: i64, message: &str, at: DateTime<Utc>) -> NewLogEntry {
        NewLogEntry {
            log_id,
            container_id: ContainerId("c-1".to_string()),
            player_id: PlayerId(1),
            timestamp: at,
            level: LogLevel::Info,
            message: message.to_string(),
            hash: fleet_domain::message_hash(LogLevel::Info, message),
        }
    }

    #[tokio::test]
    async fn repeats_inside_the_window_collapse_into_one_row() {
        let bmc = InMemoryLogBmc::new();
        let ctx = Ctx::new(PlayerId(1));
        let t0 = Utc::now();

        for i in 0..5 {
            bmc.upsert_within_window(entry(i, "waiting for arrival", t0 + Duration::seconds(i)))
                .await
                .unwrap();
        }

        let logs = bmc.list_logs(&ctx, &ContainerId("c-1".to_string()), 50, None).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].count, 5);
        assert_eq!(logs[0].first_seen, t0);
        assert_eq!(logs[0].last_seen, t0 + Duration::seconds(4));
    }

    #[tokio::test]
    async fn emission_past_the_window_opens_a_fresh_row() {
        let bmc = InMemoryLogBmc::new();
        let ctx = Ctx::new(PlayerId(1));
        let t0 = Utc::now();

        bmc.upsert_within_window(entry(1, "docking", t0)).await.unwrap();
        bmc.upsert_within_window(entry(2, "docking", t0 + Duration::seconds(DEDUP_WINDOW_SECS + 1)))
            .await
            .unwrap();

        let logs = bmc.list_logs(&ctx, &ContainerId("c-1".to_string()), 50, None).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|log| log.count == 1));
    }

    #[tokio::test]
    async fn distinct_levels_never_collapse() {
        let bmc = InMemoryLogBmc::new();
        let ctx = Ctx::new(PlayerId(1));
        let t0 = Utc::now();

        let mut warn = entry(1, "fuel low", t0);
        warn.level = LogLevel::Warn;
        warn.hash = fleet_domain::message_hash(LogLevel::Warn, "fuel low");
        bmc.upsert_within_window(warn).await.unwrap();
        bmc.upsert_within_window(entry(2, "fuel low", t0)).await.unwrap();

        let logs = bmc.list_logs(&ctx, &ContainerId("c-1".to_string()), 50, None).await.unwrap();
        assert_eq!(logs.len(), 2);
    }

    #[tokio::test]
    async fn pagination_walks_newest_first() {
        let bmc = InMemoryLogBmc::new();
        let ctx = Ctx::new(PlayerId(1));
        let t0 = Utc::now();

        for i in 0..4 {
            bmc.upsert_within_window(entry(i, &format!("message {i}"), t0 + Duration::seconds(i)))
                .await
                .unwrap();
        }

        let container_id = ContainerId("c-1".to_string());
        let first_page = bmc.list_logs(&ctx, &container_id, 2, None).await.unwrap();
        assert_eq!(first_page.iter().map(|l| l.log_id).collect::<Vec<_>>(), vec![3, 2]);

        let second_page = bmc.list_logs(&ctx, &container_id, 2, Some(2)).await.unwrap();
        assert_eq!(second_page.iter().map(|l| l.log_id).collect::<Vec<_>>(), vec![1, 0]);
    }
}
