use crate::error::{StoreError, StoreResult};
use crate::schema;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tracing::{event, Level};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Owns the connection pool. The backend is picked once at startup:
/// a `postgresql://` `DATABASE_URL` selects PostgreSQL, anything else falls
/// back to the embedded SQLite file store.
#[derive(Debug, Clone)]
pub struct DbModelManager {
    pool: AnyPool,
}

impl DbModelManager {
    pub async fn connect(database_url: Option<&str>, sqlite_path: &str) -> StoreResult<Self> {
        sqlx::any::install_default_drivers();

        let url = match database_url {
            Some(url) if url.starts_with("postgresql://") || url.starts_with("postgres://") => url.to_string(),
            _ => format!("sqlite://{}?mode=rwc", sqlite_path),
        };

        event!(Level::INFO, backend = backend_name(&url), "connecting persistence gateway");

        let pool = AnyPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub async fn init_schema(&self) -> StoreResult<()> {
        for statement in schema::STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        event!(Level::INFO, "schema bootstrap complete");
        Ok(())
    }
}

fn backend_name(url: &str) -> &'static str {
    if url.starts_with("postgres") {
        "postgresql"
    } else {
        "sqlite"
    }
}

/// Fixed-width RFC 3339 in UTC so string ordering equals time ordering.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(StoreError::from)?
        .with_timezone(&Utc))
}
