use crate::config::GameConfig;
use crate::error::CommitError;
use anyhow::Context;
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, OpenFlags, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tapheart_protocol::{Character, GameEvent, GameStats, Upgrade, User, WheelReward};

/// Everything one mutating operation changed for one player, applied
/// all-or-nothing by [`GameStore::commit`].
#[derive(Debug, Clone)]
pub struct PlayerCommit {
    /// `user.rev` is the revision the change was computed against.
    pub user: User,
    pub stats: GameStats,
    /// Only the upgrade rows whose level changed.
    pub upgrades: Vec<Upgrade>,
    pub unlocks: Vec<String>,
    pub events: Vec<PendingEvent>,
    /// Operation instant; stamps unlocks and events.
    pub at_ms: i64,
}

#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub kind: &'static str,
    pub payload: serde_json::Value,
}

/// The engine's only I/O. Reads may be served from separate snapshots; a
/// commit is rejected with [`CommitError::Conflict`] when the user row moved
/// on since it was read.
pub trait GameStore: Send + Sync + 'static {
    fn get_user(&self, user_id: &str) -> anyhow::Result<Option<User>>;
    fn get_user_upgrades(&self, user_id: &str) -> anyhow::Result<Vec<Upgrade>>;
    fn get_user_stats(&self, user_id: &str) -> anyhow::Result<Option<GameStats>>;
    fn get_unlocked_characters(&self, user_id: &str) -> anyhow::Result<Vec<String>>;
    fn get_character(&self, character_id: &str) -> anyhow::Result<Option<Character>>;
    fn list_characters(&self) -> anyhow::Result<Vec<Character>>;
    fn list_wheel_rewards(&self) -> anyhow::Result<Vec<WheelReward>>;
    fn commit(&self, commit: &PlayerCommit) -> Result<i64, CommitError>;
    fn events_since(
        &self,
        user_id: &str,
        since_seq: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<GameEvent>>;
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn open(&self) -> anyhow::Result<Connection> {
        let path = self.db_path.clone();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create db dir: {}", dir.display()))?;
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("open sqlite db: {}", path.display()))?;

        // Durable + fast defaults.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        migrate(&conn)?;
        Ok(conn)
    }

    pub fn create_user(&self, user: &User) -> anyhow::Result<()> {
        let conn = self.open()?;
        insert_user(&conn, user)
    }

    pub fn create_upgrade(&self, upgrade: &Upgrade) -> anyhow::Result<()> {
        let conn = self.open()?;
        insert_upgrade(&conn, upgrade)?;
        Ok(())
    }

    pub fn create_character(&self, character: &Character) -> anyhow::Result<()> {
        let conn = self.open()?;
        insert_character(&conn, character)?;
        Ok(())
    }

    pub fn create_wheel_reward(&self, reward: &WheelReward) -> anyhow::Result<()> {
        let conn = self.open()?;
        insert_wheel_reward(&conn, reward)?;
        Ok(())
    }

    /// Inserts catalog characters and wheel rewards whose ids are missing.
    pub fn seed_catalog(&self, cfg: &GameConfig) -> anyhow::Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        for c in &cfg.characters {
            insert_character(&tx, c)?;
        }
        for r in &cfg.wheel_rewards {
            insert_wheel_reward(&tx, r)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Creates the player with starting balances, catalog upgrades at level 0
    /// and every level-1 character unlocked. For an existing player, catalog
    /// upgrades and starter characters added since are backfilled.
    pub fn init_player(
        &self,
        user_id: &str,
        username: &str,
        cfg: &GameConfig,
        now_ms: i64,
    ) -> anyhow::Result<User> {
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let starters: Vec<Character> = select_characters(&tx)?
            .into_iter()
            .filter(|c| c.required_level <= 1 && !c.is_wheel_reward)
            .collect();
        let existing = select_user(&tx, user_id)?;
        let user = match existing {
            Some(user) => user,
            None => {
                let user = User {
                    id: user_id.to_string(),
                    username: username.to_string(),
                    level: 1,
                    points: cfg.starting_points,
                    gems: cfg.starting_gems,
                    energy: cfg.base_max_energy,
                    max_energy: cfg.base_max_energy,
                    hourly_rate: 0,
                    last_active_ms: now_ms,
                    created_at_ms: now_ms,
                    rev: 1,
                    accrual_carry: 0,
                    regen_carry: 0,
                };
                insert_user(&tx, &user)?;

                let mut stats = GameStats::new(user_id);
                stats.selected_character_id = starters.first().map(|c| c.id.clone());
                insert_stats(&tx, &stats)?;
                user
            }
        };

        for c in &starters {
            unlock_character_tx(&tx, user_id, &c.id, now_ms)?;
        }

        for t in &cfg.upgrades {
            insert_upgrade(&tx, &t.instantiate(user_id))?;
        }
        tx.commit()?;
        Ok(user)
    }
}

impl GameStore for SqliteStore {
    fn get_user(&self, user_id: &str) -> anyhow::Result<Option<User>> {
        let conn = self.open()?;
        select_user(&conn, user_id)
    }

    fn get_user_upgrades(&self, user_id: &str) -> anyhow::Result<Vec<Upgrade>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, description, base_cost, level, max_level, hourly_bonus,
                    tap_bonus, energy_bonus, required_level, required_upgrades_json, is_capstone
             FROM upgrades WHERE user_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map([user_id], upgrade_from_row)?;
        rows.collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("load upgrades for {user_id}"))
    }

    fn get_user_stats(&self, user_id: &str) -> anyhow::Result<Option<GameStats>> {
        let conn = self.open()?;
        let stats = conn
            .query_row(
                "SELECT user_id, total_taps, total_earned, last_wheel_spin_ms,
                        wheel_spins_remaining, selected_character_id
                 FROM game_stats WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(GameStats {
                        user_id: row.get(0)?,
                        total_taps: row.get(1)?,
                        total_earned: row.get(2)?,
                        last_wheel_spin_ms: row.get(3)?,
                        wheel_spins_remaining: row.get(4)?,
                        selected_character_id: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(stats)
    }

    fn get_unlocked_characters(&self, user_id: &str) -> anyhow::Result<Vec<String>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT character_id FROM user_characters WHERE user_id = ?1
             ORDER BY unlocked_at_ms, character_id",
        )?;
        let rows = stmt.query_map([user_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    fn get_character(&self, character_id: &str) -> anyhow::Result<Option<Character>> {
        let conn = self.open()?;
        let c = conn
            .query_row(
                "SELECT id, name, bio, required_level, is_wheel_reward FROM characters WHERE id = ?1",
                [character_id],
                character_from_row,
            )
            .optional()?;
        Ok(c)
    }

    fn list_characters(&self) -> anyhow::Result<Vec<Character>> {
        let conn = self.open()?;
        select_characters(&conn)
    }

    fn list_wheel_rewards(&self) -> anyhow::Result<Vec<WheelReward>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, amount, max_amount, rarity, label, weight, character_id, is_active
             FROM wheel_rewards ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(WheelReward {
                id: row.get(0)?,
                kind: parse_text(row, 1)?,
                amount: row.get(2)?,
                max_amount: row.get(3)?,
                rarity: parse_text(row, 4)?,
                label: row.get(5)?,
                weight: row.get(6)?,
                character_id: row.get(7)?,
                is_active: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn commit(&self, commit: &PlayerCommit) -> Result<i64, CommitError> {
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let user_id = commit.user.id.as_str();

        let rev = update_user_tx(&tx, &commit.user)?;
        for u in &commit.upgrades {
            update_upgrade_tx(&tx, u)?;
        }
        update_user_stats_tx(&tx, &commit.stats)?;
        for character_id in &commit.unlocks {
            unlock_character_tx(&tx, user_id, character_id, commit.at_ms)?;
        }
        for e in &commit.events {
            append_event_tx(&tx, e.kind, user_id, commit.at_ms, &e.payload)?;
        }
        tx.commit()?;
        Ok(rev)
    }

    fn events_since(
        &self,
        user_id: &str,
        since_seq: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<GameEvent>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT seq, ts_ms, kind, user_id, payload_json FROM event_log
             WHERE user_id = ?1 AND seq > ?2 ORDER BY seq LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![user_id, since_seq, limit], |row| {
            let payload_json: String = row.get(4)?;
            Ok(GameEvent {
                seq: row.get(0)?,
                ts_ms: row.get(1)?,
                kind: row.get(2)?,
                user_id: row.get(3)?,
                payload: serde_json::from_str(&payload_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e))
                })?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn migrate(conn: &Connection) -> anyhow::Result<()> {
    // Lightweight migrations: `user_version` + IF NOT EXISTS + best-effort ALTERs.
    let v: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if v < 1 {
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS users (
  id TEXT PRIMARY KEY,
  username TEXT NOT NULL,
  level INTEGER NOT NULL DEFAULT 1,
  points INTEGER NOT NULL DEFAULT 0,
  gems INTEGER NOT NULL DEFAULT 0,
  energy INTEGER NOT NULL,
  max_energy INTEGER NOT NULL,
  hourly_rate INTEGER NOT NULL DEFAULT 0,
  last_active_ms INTEGER NOT NULL,
  created_at_ms INTEGER NOT NULL,
  rev INTEGER NOT NULL DEFAULT 1
);

-- Per-player instances of catalog upgrades; `id` is the catalog key.
CREATE TABLE IF NOT EXISTS upgrades (
  user_id TEXT NOT NULL REFERENCES users(id),
  id TEXT NOT NULL,
  name TEXT NOT NULL,
  description TEXT NOT NULL DEFAULT '',
  base_cost INTEGER NOT NULL,
  level INTEGER NOT NULL DEFAULT 0,
  max_level INTEGER NOT NULL,
  hourly_bonus INTEGER NOT NULL DEFAULT 0,
  tap_bonus INTEGER NOT NULL DEFAULT 0,
  energy_bonus INTEGER NOT NULL DEFAULT 0,
  required_level INTEGER NOT NULL DEFAULT 1,
  required_upgrades_json TEXT NOT NULL DEFAULT '{}',
  is_capstone INTEGER NOT NULL DEFAULT 0,
  PRIMARY KEY (user_id, id)
);

CREATE TABLE IF NOT EXISTS game_stats (
  user_id TEXT PRIMARY KEY REFERENCES users(id),
  total_taps INTEGER NOT NULL DEFAULT 0,
  total_earned INTEGER NOT NULL DEFAULT 0,
  last_wheel_spin_ms INTEGER,
  wheel_spins_remaining INTEGER NOT NULL DEFAULT 1,
  selected_character_id TEXT
);

CREATE TABLE IF NOT EXISTS characters (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  bio TEXT NOT NULL DEFAULT '',
  required_level INTEGER NOT NULL DEFAULT 1,
  is_wheel_reward INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS user_characters (
  user_id TEXT NOT NULL REFERENCES users(id),
  character_id TEXT NOT NULL REFERENCES characters(id),
  unlocked_at_ms INTEGER NOT NULL,
  PRIMARY KEY (user_id, character_id)
);

CREATE TABLE IF NOT EXISTS wheel_rewards (
  id TEXT PRIMARY KEY,
  kind TEXT NOT NULL,
  amount INTEGER NOT NULL DEFAULT 0,
  rarity TEXT NOT NULL DEFAULT 'common',
  label TEXT NOT NULL,
  weight INTEGER NOT NULL DEFAULT 100,
  character_id TEXT,
  is_active INTEGER NOT NULL DEFAULT 1
);

-- Monotonic per-player event feed for the client.
CREATE TABLE IF NOT EXISTS event_log (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  ts_ms INTEGER NOT NULL,
  kind TEXT NOT NULL,
  user_id TEXT NOT NULL,
  payload_json TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_event_log_user ON event_log(user_id, seq);
"#,
        )?;

        conn.pragma_update(None, "user_version", 1_i64)?;
    }

    // Remainder columns arrived after the first schema; add them to older DBs.
    ensure_column(conn, "users", "accrual_carry", "INTEGER NOT NULL DEFAULT 0")?;
    ensure_column(conn, "users", "regen_carry", "INTEGER NOT NULL DEFAULT 0")?;
    ensure_column(conn, "wheel_rewards", "max_amount", "INTEGER")?;

    Ok(())
}

fn ensure_column(conn: &Connection, table: &str, col: &str, decl: &str) -> anyhow::Result<()> {
    let sql = format!("ALTER TABLE {table} ADD COLUMN {col} {decl}");
    match conn.execute(&sql, []) {
        Ok(_) => Ok(()),
        Err(e) => {
            // Ignore "duplicate column name".
            if e.to_string().to_lowercase().contains("duplicate column") {
                return Ok(());
            }
            Err(e).with_context(|| format!("ensure column {table}.{col}"))
        }
    }
}

fn select_user(conn: &Connection, user_id: &str) -> anyhow::Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT id, username, level, points, gems, energy, max_energy, hourly_rate,
                    last_active_ms, created_at_ms, rev, accrual_carry, regen_carry
             FROM users WHERE id = ?1",
            [user_id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    level: row.get(2)?,
                    points: row.get(3)?,
                    gems: row.get(4)?,
                    energy: row.get(5)?,
                    max_energy: row.get(6)?,
                    hourly_rate: row.get(7)?,
                    last_active_ms: row.get(8)?,
                    created_at_ms: row.get(9)?,
                    rev: row.get(10)?,
                    accrual_carry: row.get(11)?,
                    regen_carry: row.get(12)?,
                })
            },
        )
        .optional()?;
    Ok(user)
}

fn select_characters(conn: &Connection) -> anyhow::Result<Vec<Character>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, bio, required_level, is_wheel_reward FROM characters
         ORDER BY required_level, rowid",
    )?;
    let rows = stmt.query_map([], character_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn character_from_row(row: &Row<'_>) -> rusqlite::Result<Character> {
    Ok(Character {
        id: row.get(0)?,
        name: row.get(1)?,
        bio: row.get(2)?,
        required_level: row.get(3)?,
        is_wheel_reward: row.get(4)?,
    })
}

fn upgrade_from_row(row: &Row<'_>) -> rusqlite::Result<Upgrade> {
    let required_json: String = row.get(11)?;
    let required_upgrades: BTreeMap<String, u32> = serde_json::from_str(&required_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(11, Type::Text, Box::new(e)))?;
    Ok(Upgrade {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        base_cost: row.get(4)?,
        level: row.get(5)?,
        max_level: row.get(6)?,
        hourly_bonus: row.get(7)?,
        tap_bonus: row.get(8)?,
        energy_bonus: row.get(9)?,
        required_level: row.get(10)?,
        required_upgrades,
        is_capstone: row.get(12)?,
    })
}

fn parse_text<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn insert_user(conn: &Connection, u: &User) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO users (id, username, level, points, gems, energy, max_energy, hourly_rate,
                            last_active_ms, created_at_ms, rev, accrual_carry, regen_carry)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            u.id,
            u.username,
            u.level,
            u.points,
            u.gems,
            u.energy,
            u.max_energy,
            u.hourly_rate,
            u.last_active_ms,
            u.created_at_ms,
            u.rev,
            u.accrual_carry,
            u.regen_carry
        ],
    )
    .with_context(|| format!("insert user {}", u.id))?;
    Ok(())
}

fn insert_stats(conn: &Connection, s: &GameStats) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO game_stats (user_id, total_taps, total_earned, last_wheel_spin_ms,
                                 wheel_spins_remaining, selected_character_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            s.user_id,
            s.total_taps,
            s.total_earned,
            s.last_wheel_spin_ms,
            s.wheel_spins_remaining,
            s.selected_character_id
        ],
    )?;
    Ok(())
}

/// Returns whether a row was inserted; existing `(user_id, id)` pairs are kept.
fn insert_upgrade(conn: &Connection, u: &Upgrade) -> anyhow::Result<bool> {
    if u.base_cost < 1 {
        anyhow::bail!("upgrade {} base cost must be at least 1", u.id);
    }
    let n = conn.execute(
        "INSERT OR IGNORE INTO upgrades (user_id, id, name, description, base_cost, level, max_level,
                                         hourly_bonus, tap_bonus, energy_bonus, required_level,
                                         required_upgrades_json, is_capstone)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            u.user_id,
            u.id,
            u.name,
            u.description,
            u.base_cost,
            u.level,
            u.max_level,
            u.hourly_bonus,
            u.tap_bonus,
            u.energy_bonus,
            u.required_level,
            serde_json::to_string(&u.required_upgrades)?,
            u.is_capstone
        ],
    )?;
    Ok(n > 0)
}

fn insert_character(conn: &Connection, c: &Character) -> anyhow::Result<bool> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO characters (id, name, bio, required_level, is_wheel_reward)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![c.id, c.name, c.bio, c.required_level, c.is_wheel_reward],
    )?;
    Ok(n > 0)
}

fn insert_wheel_reward(conn: &Connection, r: &WheelReward) -> anyhow::Result<bool> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO wheel_rewards (id, kind, amount, max_amount, rarity, label, weight,
                                              character_id, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            r.id,
            r.kind.as_str(),
            r.amount,
            r.max_amount,
            r.rarity.as_str(),
            r.label,
            r.weight,
            r.character_id,
            r.is_active
        ],
    )?;
    Ok(n > 0)
}

/// Writes the user row if it is still at `u.rev` and returns the new revision.
fn update_user_tx(tx: &Transaction<'_>, u: &User) -> Result<i64, CommitError> {
    let n = tx.execute(
        "UPDATE users SET username = ?1, level = ?2, points = ?3, gems = ?4, energy = ?5,
                          max_energy = ?6, hourly_rate = ?7, last_active_ms = ?8,
                          accrual_carry = ?9, regen_carry = ?10, rev = rev + 1
         WHERE id = ?11 AND rev = ?12",
        params![
            u.username,
            u.level,
            u.points,
            u.gems,
            u.energy,
            u.max_energy,
            u.hourly_rate,
            u.last_active_ms,
            u.accrual_carry,
            u.regen_carry,
            u.id,
            u.rev
        ],
    )?;
    if n == 0 {
        return Err(CommitError::Conflict {
            user_id: u.id.clone(),
            expected: u.rev,
        });
    }
    Ok(u.rev + 1)
}

fn update_upgrade_tx(tx: &Transaction<'_>, u: &Upgrade) -> Result<(), CommitError> {
    let n = tx.execute(
        "UPDATE upgrades SET level = ?1 WHERE user_id = ?2 AND id = ?3",
        params![u.level, u.user_id, u.id],
    )?;
    if n == 0 {
        return Err(anyhow::anyhow!("upgrade {} missing for user {}", u.id, u.user_id).into());
    }
    Ok(())
}

fn update_user_stats_tx(tx: &Transaction<'_>, s: &GameStats) -> Result<(), CommitError> {
    let n = tx.execute(
        "UPDATE game_stats SET total_taps = ?1, total_earned = ?2, last_wheel_spin_ms = ?3,
                               wheel_spins_remaining = ?4, selected_character_id = ?5
         WHERE user_id = ?6",
        params![
            s.total_taps,
            s.total_earned,
            s.last_wheel_spin_ms,
            s.wheel_spins_remaining,
            s.selected_character_id,
            s.user_id
        ],
    )?;
    if n == 0 {
        return Err(anyhow::anyhow!("stats missing for user {}", s.user_id).into());
    }
    Ok(())
}

fn unlock_character_tx(
    tx: &Connection,
    user_id: &str,
    character_id: &str,
    ts_ms: i64,
) -> rusqlite::Result<usize> {
    tx.execute(
        "INSERT OR IGNORE INTO user_characters (user_id, character_id, unlocked_at_ms)
         VALUES (?1, ?2, ?3)",
        (user_id, character_id, ts_ms),
    )
}

fn append_event_tx(
    tx: &Transaction<'_>,
    kind: &str,
    user_id: &str,
    ts_ms: i64,
    payload: &serde_json::Value,
) -> rusqlite::Result<i64> {
    let payload_json = payload.to_string();
    tx.execute(
        "INSERT INTO event_log (ts_ms, kind, user_id, payload_json) VALUES (?1, ?2, ?3, ?4)",
        (ts_ms, kind, user_id, payload_json),
    )?;
    Ok(tx.last_insert_rowid())
}
