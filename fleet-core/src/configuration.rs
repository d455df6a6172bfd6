use clap::Parser;
use std::path::Path;

/// Preferred location for the embedded store; deployments usually mount a
/// volume here.
pub const SYSTEM_DB_PATH: &str = "/var/lib/spacetraders/daemon.db";

/// Fallback when the system location is not writable (developer laptops,
/// unprivileged runs).
pub const LOCAL_DB_PATH: &str = "./spacetraders-daemon.db";

/// Daemon configuration; every flag also binds to an environment variable so
/// deployments can stay file-free.
#[derive(Parser, Debug, Clone)]
#[command(name = "fleetd", about = "Autonomous fleet-operations daemon for the SpaceTraders universe")]
pub struct DaemonConfig {
    /// `postgresql://…` selects PostgreSQL; anything else (or unset) uses the
    /// embedded SQLite store.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Embedded store location. Unset, the daemon tries the system path and
    /// falls back to the working directory.
    #[arg(long, env = "SPACETRADERS_DB_PATH")]
    pub db_path: Option<String>,

    #[arg(long, env = "FLEETD_SOCKET_PATH", default_value = "/tmp/spacetraders-daemon.sock")]
    pub socket_path: String,

    #[arg(long, env = "SPACETRADERS_API_URL", default_value = "https://api.spacetraders.io/v2")]
    pub api_url: String,

    #[arg(long, env = "OPTIMIZER_GRPC_URL", default_value = "http://127.0.0.1:50051")]
    pub optimizer_url: String,

    /// Outbound requests queued beyond this depth are rejected with
    /// backpressure instead of waiting.
    #[arg(long, env = "FLEETD_MAX_QUEUE_DEPTH", default_value_t = 256)]
    pub max_queue_depth: usize,

    /// Disables the opportunistic market scan on arrival at marketplaces.
    #[arg(long, env = "FLEETD_DISABLE_MARKET_SCANS")]
    pub disable_market_scans: bool,
}

impl DaemonConfig {
    /// An explicit path wins; otherwise `/var/lib/spacetraders/daemon.db`
    /// when that location is usable, else a file in the working directory.
    pub fn resolve_db_path(&self) -> String {
        if let Some(path) = &self.db_path {
            return path.clone();
        }
        if is_usable_db_location(Path::new(SYSTEM_DB_PATH)) {
            SYSTEM_DB_PATH.to_string()
        } else {
            LOCAL_DB_PATH.to_string()
        }
    }
}

// Probes by creating the parent directory and opening the file the way the
// sqlite driver will; the file is left in place on success.
fn is_usable_db_location(path: &Path) -> bool {
    if let Some(parent) = path.parent() {
        if std::fs::create_dir_all(parent).is_err() {
            return false;
        }
    }
    std::fs::OpenOptions::new().read(true).append(true).create(true).open(path).is_ok()
}
