pub mod accrual;
pub mod config;
pub mod curve;
pub mod error;
pub mod game;
pub mod leveling;
pub mod requirements;
pub mod store;
pub mod wheel;

#[cfg(test)]
mod tests;

use std::time::{SystemTime, UNIX_EPOCH};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub use config::GameConfig;
pub use error::{CommitError, ConfigError, GameError};
pub use game::{Game, Player};
pub use leveling::LevelTable;
pub use store::{GameStore, PendingEvent, PlayerCommit, SqliteStore};

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(i64::MAX)
}

/// RFC 3339 rendering of a unix-millisecond instant, for event payloads.
pub fn fmt_ms(ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| ms.to_string())
}
