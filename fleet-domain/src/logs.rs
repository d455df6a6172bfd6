use crate::container::ContainerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use strum::{Display as StrumDisplay, EnumString};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Stable digest over `(level, message)` used as the dedup key. Uses the
/// keyless `DefaultHasher` so the value survives process restarts.
pub fn message_hash(level: LogLevel, message: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    level.hash(&mut hasher);
    message.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ContainerLog {
    pub log_id: i64,
    pub container_id: ContainerId,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub hash: String,
    pub count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_level_sensitive() {
        let a = message_hash(LogLevel::Info, "docking");
        let b = message_hash(LogLevel::Info, "docking");
        let c = message_hash(LogLevel::Error, "docking");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }
}
