use super::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tapheart_protocol::{
    Character, ErrorKind, GameEvent, GameStats, Rarity, RewardKind, RuleViolation, Upgrade, User,
    WheelReward,
};

const T0: i64 = 1_700_000_000_000;
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

fn temp_store() -> SqliteStore {
    let p = std::env::temp_dir().join(format!(
        "tapheart-engine-test-{}.db",
        time::OffsetDateTime::now_utc().unix_timestamp_nanos()
    ));
    let store = SqliteStore::new(p);
    store.seed_catalog(&GameConfig::default()).expect("seed catalog");
    store
}

fn new_game() -> (Game<SqliteStore>, SqliteStore) {
    let store = temp_store();
    store
        .init_player("p1", "Player", &GameConfig::default(), T0)
        .expect("init player");
    let game = Game::new(store.clone(), GameConfig::default()).expect("valid config");
    (game, store)
}

fn exec(store: &SqliteStore, sql: &str) {
    let conn = store.open().unwrap();
    conn.execute(sql, []).unwrap();
}

fn user(store: &SqliteStore) -> User {
    store.get_user("p1").unwrap().expect("user")
}

fn stats(store: &SqliteStore) -> GameStats {
    store.get_user_stats("p1").unwrap().expect("stats")
}

fn kinds(events: &[GameEvent]) -> Vec<&str> {
    events.iter().map(|e| e.kind.as_str()).collect()
}

#[test]
fn init_player_seeds_balances_upgrades_and_starter_character() {
    let (game, store) = new_game();
    let u = user(&store);
    assert_eq!(u.points, 1000);
    assert_eq!(u.gems, 50);
    assert_eq!(u.energy, 4500);
    assert_eq!(u.max_energy, 4500);
    assert_eq!(u.level, 1);

    let ids: Vec<String> = store
        .get_user_upgrades("p1")
        .unwrap()
        .into_iter()
        .map(|u| u.id)
        .collect();
    assert_eq!(ids, ["tap_power", "energy_boost", "auto_collector", "level_upgrade"]);
    assert_eq!(store.get_unlocked_characters("p1").unwrap(), ["luna"]);

    let state = game.state("p1", T0).unwrap();
    assert_eq!(state.character.map(|c| c.id).as_deref(), Some("luna"));
    assert_eq!(state.tap_value, 125);
    assert_eq!(state.next_level.map(|r| r.points_required), Some(1_000));
}

#[test]
fn init_player_is_idempotent() {
    let (_game, store) = new_game();
    exec(&store, "UPDATE users SET points = 42 WHERE id = 'p1'");
    let again = store
        .init_player("p1", "Other", &GameConfig::default(), T0 + 1)
        .unwrap();
    assert_eq!(again.points, 42);
    assert_eq!(again.username, "Player");
    assert_eq!(store.get_user_upgrades("p1").unwrap().len(), 4);
}

#[test]
fn init_player_backfills_new_starter_characters() {
    let (_game, store) = new_game();
    store
        .create_character(&Character {
            id: "nova".to_string(),
            name: "Nova".to_string(),
            bio: String::new(),
            required_level: 1,
            is_wheel_reward: false,
        })
        .unwrap();
    assert_eq!(store.get_unlocked_characters("p1").unwrap(), ["luna"]);

    store
        .init_player("p1", "Player", &GameConfig::default(), T0 + 5)
        .unwrap();
    assert_eq!(store.get_unlocked_characters("p1").unwrap(), ["luna", "nova"]);
    assert_eq!(stats(&store).selected_character_id.as_deref(), Some("luna"));
}

#[test]
fn tap_spends_energy_and_credits_points() {
    let (game, store) = new_game();
    let out = game.tap("p1", T0).unwrap();
    assert_eq!(out.points_earned, 125);
    assert_eq!(out.energy_spent, 1);
    assert_eq!(out.points, 1125);
    assert_eq!(out.energy, 4499);
    assert_eq!(out.total_taps, 1);
    assert!(out.level_ups.is_empty());

    let u = user(&store);
    assert_eq!(u.points, 1125);
    assert_eq!(u.rev, 2);
    assert_eq!(stats(&store).total_earned, 125);
}

#[test]
fn tap_without_energy_changes_nothing() {
    let (game, store) = new_game();
    exec(&store, "UPDATE users SET energy = 0 WHERE id = 'p1'");
    let before = (user(&store), stats(&store));

    let err = game.tap("p1", T0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RuleViolation);
    assert_eq!(err.violation().map(|v| v.code()), Some("OUT_OF_ENERGY"));
    assert_eq!((user(&store), stats(&store)), before);
}

#[test]
fn tap_crossing_several_thresholds_reports_each_level() {
    let (game, store) = new_game();
    exec(&store, "UPDATE game_stats SET total_earned = 5375 WHERE user_id = 'p1'");

    let out = game.tap("p1", T0).unwrap();
    let levels: Vec<u32> = out.level_ups.iter().map(|l| l.level).collect();
    assert_eq!(levels, vec![2, 3, 4]);
    assert_eq!(user(&store).level, 4);
    assert_eq!(store.get_unlocked_characters("p1").unwrap(), ["luna", "mira"]);

    let events = game.events("p1", 0, 50).unwrap();
    assert_eq!(
        kinds(&events),
        [
            "player.level_up",
            "player.level_up",
            "character.unlocked",
            "player.level_up"
        ]
    );
    assert_eq!(events[0].payload["level"], 2);
}

#[test]
fn purchase_deducts_cost_and_recomputes_rates() {
    let (game, store) = new_game();
    let out = game.purchase_upgrade("p1", "tap_power", T0).unwrap();
    assert_eq!(out.cost, 100);
    assert_eq!(out.points, 900);
    assert_eq!(out.upgrade.level, 1);
    assert_eq!(out.tap_value, 150);

    let out = game.purchase_upgrade("p1", "energy_boost", T0).unwrap();
    assert_eq!(out.cost, 150);
    assert_eq!(out.max_energy, 4750);
    assert_eq!(user(&store).max_energy, 4750);

    let state = game.state("p1", T0).unwrap();
    let tap_power = state
        .upgrades
        .iter()
        .find(|u| u.upgrade.id == "tap_power")
        .unwrap();
    assert_eq!(tap_power.upgrade.level, 1);
    assert_eq!(tap_power.next_cost, Some(115));

    let events = game.events("p1", 0, 50).unwrap();
    assert_eq!(kinds(&events), ["upgrade.purchased", "upgrade.purchased"]);
}

#[test]
fn purchase_rejections_leave_points_alone() {
    let (game, store) = new_game();

    let err = game.purchase_upgrade("p1", "auto_collector", T0).unwrap_err();
    assert!(matches!(
        err.violation(),
        Some(RuleViolation::LevelLocked {
            required_level: 2,
            current_level: 1
        })
    ));

    exec(&store, "UPDATE users SET level = 2 WHERE id = 'p1'");
    let err = game.purchase_upgrade("p1", "auto_collector", T0).unwrap_err();
    match err.violation() {
        Some(RuleViolation::PrereqLocked { missing }) => {
            assert_eq!(missing.len(), 1);
            assert_eq!(missing[0].upgrade_id, "tap_power");
            assert_eq!(missing[0].min_level, 2);
        }
        other => panic!("unexpected {other:?}"),
    }

    exec(&store, "UPDATE users SET points = 50 WHERE id = 'p1'");
    let err = game.purchase_upgrade("p1", "tap_power", T0).unwrap_err();
    assert_eq!(
        err.violation(),
        Some(&RuleViolation::InsufficientFunds {
            required: 100,
            available: 50
        })
    );
    assert_eq!(user(&store).points, 50);

    let err = game.purchase_upgrade("p1", "nope", T0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn capstone_waits_for_every_regular_upgrade() {
    let (game, store) = new_game();
    exec(&store, "UPDATE users SET level = 3, points = 100000 WHERE id = 'p1'");
    exec(
        &store,
        "UPDATE upgrades SET level = 4 WHERE user_id = 'p1' AND id IN ('tap_power', 'energy_boost')",
    );

    let err = game.purchase_upgrade("p1", "level_upgrade", T0).unwrap_err();
    match err.violation() {
        Some(RuleViolation::CapstoneLocked { threshold, below }) => {
            assert_eq!(*threshold, 4);
            let ids: Vec<&str> = below.iter().map(|s| s.upgrade_id.as_str()).collect();
            assert_eq!(ids, ["auto_collector"]);
        }
        other => panic!("unexpected {other:?}"),
    }

    exec(
        &store,
        "UPDATE upgrades SET level = 4 WHERE user_id = 'p1' AND id = 'auto_collector'",
    );
    let out = game.purchase_upgrade("p1", "level_upgrade", T0).unwrap();
    assert_eq!(out.cost, 5_000);
    assert_eq!(out.points, 95_000);
    assert_eq!(out.tap_value, 125 + 25 * 4 + 50);
    assert_eq!(out.hourly_rate, 70 + 220);
}

#[test]
fn state_projects_without_writing_and_sync_persists() {
    let (game, store) = new_game();
    exec(&store, "UPDATE users SET hourly_rate = 3600 WHERE id = 'p1'");

    let state = game.state("p1", T0 + 10_000).unwrap();
    assert_eq!(state.user.points, 1010);
    let stored = user(&store);
    assert_eq!(stored.points, 1000);
    assert_eq!(stored.rev, 1);

    let out = game.sync("p1", T0 + 10_000).unwrap();
    assert_eq!(out.accrued_points, 10);
    assert_eq!(out.user.points, 1010);
    assert_eq!(out.user.rev, 2);

    let again = game.sync("p1", T0 + 10_000).unwrap();
    assert_eq!(again.accrued_points, 0);
    assert_eq!(again.user.points, 1010);
}

#[test]
fn passive_income_levels_up_on_sync() {
    let (game, store) = new_game();
    exec(&store, "UPDATE users SET hourly_rate = 1000 WHERE id = 'p1'");
    let out = game.sync("p1", T0 + 3_600_000).unwrap();
    assert_eq!(out.accrued_points, 1000);
    assert_eq!(out.level_ups.len(), 1);
    assert_eq!(out.user.level, 2);
    assert_eq!(stats(&store).total_earned, 1000);
}

#[test]
fn wheel_spins_once_per_window() {
    let (game, store) = new_game();
    let mut rng = StdRng::seed_from_u64(7);

    assert!(game.wheel_status("p1", T0).unwrap().can_spin);
    let out = game.spin_wheel("p1", T0, &mut rng).unwrap();
    assert_eq!(out.next_spin_at_ms, T0 + DAY_MS);
    assert_eq!(stats(&store).last_wheel_spin_ms, Some(T0));

    let before = (user(&store), stats(&store));
    let err = game.spin_wheel("p1", T0 + 1_000, &mut rng).unwrap_err();
    assert_eq!(
        err.violation(),
        Some(&RuleViolation::SpinCooldown {
            remaining_ms: DAY_MS - 1_000,
            next_spin_at_ms: T0 + DAY_MS
        })
    );
    assert_eq!((user(&store), stats(&store)), before);
    assert!(!game.wheel_status("p1", T0 + 1_000).unwrap().can_spin);

    game.spin_wheel("p1", T0 + DAY_MS, &mut rng).unwrap();
    let kinds_seen = game.events("p1", 0, 50).unwrap();
    assert_eq!(
        kinds_seen.iter().filter(|e| e.kind == "wheel.spun").count(),
        2
    );
}

#[test]
fn ranged_wheel_reward_credits_rolled_amount() {
    let (game, store) = new_game();
    exec(&store, "UPDATE wheel_rewards SET is_active = 0 WHERE id != 'coins_small'");

    let out = game
        .spin_wheel("p1", T0, &mut StdRng::seed_from_u64(11))
        .unwrap();
    assert_eq!(out.reward.id, "coins_small");
    assert!((500..=1_000).contains(&out.amount), "amount {}", out.amount);
    assert_eq!(out.points, 1000 + out.amount);
    assert_eq!(stats(&store).total_earned, out.amount);

    let spun = game.events("p1", 0, 10).unwrap();
    assert_eq!(spun[0].kind, "wheel.spun");
    assert_eq!(spun[0].payload["amount"], out.amount);
}

#[test]
fn wheel_character_reward_unlocks_once() {
    let (game, store) = new_game();
    exec(&store, "UPDATE wheel_rewards SET is_active = 0 WHERE id != 'character_aria'");

    let out = game
        .spin_wheel("p1", T0, &mut StdRng::seed_from_u64(1))
        .unwrap();
    assert_eq!(out.unlocked_character.as_deref(), Some("aria"));
    assert!(store
        .get_unlocked_characters("p1")
        .unwrap()
        .contains(&"aria".to_string()));

    // Owned characters leave the pool, which is now empty.
    let err = game
        .spin_wheel("p1", T0 + DAY_MS, &mut StdRng::seed_from_u64(1))
        .unwrap_err();
    assert_eq!(err.violation(), Some(&RuleViolation::NoActiveRewards));
}

#[test]
fn unknown_character_reward_does_not_consume_spin() {
    let (game, store) = new_game();
    exec(&store, "UPDATE wheel_rewards SET is_active = 0");
    store
        .create_wheel_reward(&WheelReward {
            id: "ghost_reward".to_string(),
            kind: RewardKind::Character,
            amount: 0,
            max_amount: None,
            rarity: Rarity::Epic,
            label: "Ghost".to_string(),
            weight: 10,
            character_id: Some("ghost".to_string()),
            is_active: true,
        })
        .unwrap();

    let err = game
        .spin_wheel("p1", T0, &mut StdRng::seed_from_u64(3))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(stats(&store).last_wheel_spin_ms, None);
    assert!(game.wheel_status("p1", T0).unwrap().can_spin);
}

#[test]
fn select_character_requires_unlock() {
    let (game, store) = new_game();
    store
        .create_character(&Character {
            id: "extra".to_string(),
            name: "Extra".to_string(),
            bio: String::new(),
            required_level: 9,
            is_wheel_reward: false,
        })
        .unwrap();

    let err = game.select_character("p1", "extra", T0).unwrap_err();
    assert_eq!(
        err.violation(),
        Some(&RuleViolation::CharacterLocked {
            character_id: "extra".to_string()
        })
    );
    let err = game.select_character("p1", "nobody", T0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let out = game.select_character("p1", "luna", T0).unwrap();
    assert_eq!(out.character.id, "luna");
    assert_eq!(stats(&store).selected_character_id.as_deref(), Some("luna"));
}

#[test]
fn unknown_user_is_not_found() {
    let (game, _store) = new_game();
    assert_eq!(game.tap("ghost", T0).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(game.state("ghost", T0).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(game.events("ghost", 0, 10).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(game.tap("  ", T0).unwrap_err().kind(), ErrorKind::Validation);
}

#[test]
fn events_page_by_sequence() {
    let (game, _store) = new_game();
    for i in 0..3 {
        game.tap("p1", T0).unwrap();
        game.purchase_upgrade("p1", "tap_power", T0 + i).unwrap();
    }
    let first = game.events("p1", 0, 2).unwrap();
    assert_eq!(first.len(), 2);
    let rest = game.events("p1", first[1].seq, 50).unwrap();
    assert_eq!(rest.len(), 1);
    assert!(rest[0].seq > first[1].seq);
}

#[test]
fn events_and_unlocks_carry_the_operation_instant() {
    let (game, store) = new_game();
    exec(&store, "UPDATE game_stats SET total_earned = 5375 WHERE user_id = 'p1'");
    let at = T0 + 42_000;
    game.tap("p1", at).unwrap();

    let feed = game.events("p1", 0, 50).unwrap();
    assert!(!feed.is_empty());
    assert!(feed.iter().all(|e| e.ts_ms == at));

    let conn = store.open().unwrap();
    let unlocked_at: i64 = conn
        .query_row(
            "SELECT unlocked_at_ms FROM user_characters
             WHERE user_id = 'p1' AND character_id = 'mira'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(unlocked_at, at);
}

#[test]
fn concurrent_taps_for_one_player_all_land() {
    let (game, store) = new_game();
    let game = Arc::new(game);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let game = Arc::clone(&game);
            thread::spawn(move || {
                for _ in 0..25 {
                    game.tap("p1", T0).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(stats(&store).total_taps, 200);
    assert_eq!(stats(&store).total_earned, 200 * 125);
    let u = user(&store);
    assert_eq!(u.points, 1000 + 200 * 125);
    assert_eq!(u.energy, 4500 - 200);
}

/// Lets another writer bump the user row right before the next `bumps`
/// commits, so they hit a real revision conflict.
struct RacingStore {
    inner: SqliteStore,
    bumps: AtomicUsize,
}

impl GameStore for RacingStore {
    fn get_user(&self, user_id: &str) -> anyhow::Result<Option<User>> {
        self.inner.get_user(user_id)
    }
    fn get_user_upgrades(&self, user_id: &str) -> anyhow::Result<Vec<Upgrade>> {
        self.inner.get_user_upgrades(user_id)
    }
    fn get_user_stats(&self, user_id: &str) -> anyhow::Result<Option<GameStats>> {
        self.inner.get_user_stats(user_id)
    }
    fn get_unlocked_characters(&self, user_id: &str) -> anyhow::Result<Vec<String>> {
        self.inner.get_unlocked_characters(user_id)
    }
    fn get_character(&self, character_id: &str) -> anyhow::Result<Option<Character>> {
        self.inner.get_character(character_id)
    }
    fn list_characters(&self) -> anyhow::Result<Vec<Character>> {
        self.inner.list_characters()
    }
    fn list_wheel_rewards(&self) -> anyhow::Result<Vec<WheelReward>> {
        self.inner.list_wheel_rewards()
    }
    fn commit(&self, commit: &PlayerCommit) -> Result<i64, CommitError> {
        let pending = self.bumps.load(Ordering::SeqCst);
        if pending > 0 {
            self.bumps.store(pending - 1, Ordering::SeqCst);
            exec(&self.inner, "UPDATE users SET rev = rev + 1 WHERE id = 'p1'");
        }
        self.inner.commit(commit)
    }
    fn events_since(
        &self,
        user_id: &str,
        since_seq: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<GameEvent>> {
        self.inner.events_since(user_id, since_seq, limit)
    }
}

fn racing_game(bumps: usize) -> (Game<RacingStore>, SqliteStore) {
    let (_, store) = new_game();
    let racing = RacingStore {
        inner: store.clone(),
        bumps: AtomicUsize::new(bumps),
    };
    (Game::new(racing, GameConfig::default()).unwrap(), store)
}

#[test]
fn conflicting_commit_is_retried_from_fresh_state() {
    let (game, store) = racing_game(1);
    let out = game.tap("p1", T0).unwrap();
    assert_eq!(out.total_taps, 1);
    assert_eq!(stats(&store).total_taps, 1);
    // One foreign bump plus our own commit.
    assert_eq!(user(&store).rev, 3);
}

#[test]
fn persistent_conflicts_fail_without_partial_writes() {
    let (game, store) = racing_game(3);
    let err = game.purchase_upgrade("p1", "tap_power", T0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
    assert_eq!(user(&store).points, 1000);
    let tap_power = store
        .get_user_upgrades("p1")
        .unwrap()
        .into_iter()
        .find(|u| u.id == "tap_power")
        .unwrap();
    assert_eq!(tap_power.level, 0);
    assert!(game.events("p1", 0, 10).unwrap().is_empty());
}

#[test]
fn invalid_config_is_rejected() {
    let cfg = GameConfig {
        tap_energy_cost: 0,
        ..GameConfig::default()
    };
    assert!(matches!(
        Game::new(temp_store(), cfg),
        Err(ConfigError::MinViolation {
            field: "tap_energy_cost",
            ..
        })
    ));
}

#[test]
fn fmt_ms_renders_rfc3339() {
    assert_eq!(fmt_ms(0), "1970-01-01T00:00:00Z");
}
