use crate::accrual::{self, Accrual};
use crate::config::GameConfig;
use crate::curve;
use crate::error::{CommitError, ConfigError, GameError};
use crate::leveling::LevelTable;
use crate::requirements::{self, Rules};
use crate::store::{GameStore, PendingEvent, PlayerCommit};
use crate::wheel;
use rand::Rng;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tapheart_protocol::{
    events, GameEvent, GameState, GameStats, LevelUp, PurchaseOutcome, RewardKind, RuleViolation,
    SelectOutcome, SpinOutcome, SyncOutcome, TapOutcome, Upgrade, UpgradeView, User, WheelStatus,
};

const MAX_COMMIT_ATTEMPTS: usize = 3;
const MAX_EVENT_PAGE: u32 = 500;

/// One mutex per user id. Operations for different users never contend.
/// An entry lives only while some caller holds a slot for it.
#[derive(Default)]
struct UserLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    fn slot(&self, user_id: &str) -> UserLockSlot<'_> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = map.entry(user_id.to_string()).or_default().clone();
        UserLockSlot {
            locks: self,
            user_id: user_id.to_string(),
            lock,
        }
    }
}

struct UserLockSlot<'a> {
    locks: &'a UserLocks,
    user_id: String,
    lock: Arc<Mutex<()>>,
}

impl Drop for UserLockSlot<'_> {
    fn drop(&mut self) {
        let mut map = self.locks.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // Clones are only taken under the map lock: the map's copy plus ours
        // means nobody else is waiting.
        if Arc::strong_count(&self.lock) <= 2 {
            map.remove(&self.user_id);
        }
    }
}

/// Everything the engine reads for one player.
#[derive(Debug, Clone)]
pub struct Player {
    pub user: User,
    pub stats: GameStats,
    pub upgrades: Vec<Upgrade>,
    pub unlocked: Vec<String>,
}

#[derive(Debug, Default)]
struct Effects {
    dirty_upgrades: Vec<String>,
    unlocks: Vec<String>,
    events: Vec<PendingEvent>,
}

impl Effects {
    fn event(&mut self, kind: &'static str, payload: serde_json::Value) {
        self.events.push(PendingEvent { kind, payload });
    }
}

struct Committed<T> {
    value: T,
    player: Player,
    accrual: Accrual,
    level_ups: Vec<LevelUp>,
}

/// The progression engine. Mutating operations are serialized per user and
/// commit atomically; a rule violation or failure leaves stored state as it
/// was.
pub struct Game<S> {
    store: S,
    config: GameConfig,
    levels: LevelTable,
    rules: Rules,
    locks: UserLocks,
}

impl<S: GameStore> Game<S> {
    pub fn new(store: S, config: GameConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let levels = config.level_table()?;
        let rules = Rules {
            capstone_threshold: config.capstone_threshold,
            cost_growth: config.cost_growth,
        };
        Ok(Self {
            store,
            config,
            levels,
            rules,
            locks: UserLocks::default(),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn levels(&self) -> &LevelTable {
        &self.levels
    }

    /// Snapshot for the client, projected to `now_ms`. Writes nothing.
    pub fn state(&self, user_id: &str, now_ms: i64) -> Result<GameState, GameError> {
        let mut p = self.load(user_id)?;
        self.reconcile(&mut p, now_ms);
        let projected = self.levels.level_for(p.stats.total_earned);
        p.user.level = p.user.level.max(projected);

        let character = match &p.stats.selected_character_id {
            Some(id) => self.store.get_character(id)?,
            None => None,
        };
        let upgrades = p
            .upgrades
            .iter()
            .map(|u| UpgradeView {
                upgrade: u.clone(),
                next_cost: (u.level < u.max_level)
                    .then(|| curve::next_cost_with(u.base_cost, u.level, self.config.cost_growth)),
                hourly_bonus_now: if u.level > 0 {
                    curve::current_hourly_bonus_with(
                        u.hourly_bonus,
                        u.level,
                        self.config.bonus_growth,
                    )
                } else {
                    0
                },
                eligibility: requirements::eligibility(&p.user, u, &p.upgrades, &self.rules),
            })
            .collect();

        Ok(GameState {
            tap_value: curve::tap_value(self.config.base_tap_value, &p.upgrades),
            next_level: self.levels.next_after(p.user.level),
            next_spin_at_ms: wheel::next_spin_at(&p.stats, self.config.wheel_cooldown_ms()),
            character,
            upgrades,
            user: p.user,
            stats: p.stats,
        })
    }

    /// Persists accrual up to `now_ms` and fires any pending level-ups.
    pub fn sync(&self, user_id: &str, now_ms: i64) -> Result<SyncOutcome, GameError> {
        let c = self.mutate(user_id, now_ms, |_, _| Ok(()))?;
        Ok(SyncOutcome {
            accrued_points: c.accrual.accrued,
            regenerated_energy: c.accrual.regenerated,
            user: c.player.user,
            level_ups: c.level_ups,
        })
    }

    pub fn tap(&self, user_id: &str, now_ms: i64) -> Result<TapOutcome, GameError> {
        let cfg = &self.config;
        let c = self.mutate(user_id, now_ms, |p, _| {
            Ok(accrual::tap(&mut p.user, &mut p.stats, &p.upgrades, cfg)?)
        })?;
        Ok(TapOutcome {
            points_earned: c.value,
            energy_spent: cfg.tap_energy_cost,
            points: c.player.user.points,
            energy: c.player.user.energy,
            total_taps: c.player.stats.total_taps,
            level_ups: c.level_ups,
        })
    }

    pub fn purchase_upgrade(
        &self,
        user_id: &str,
        upgrade_id: &str,
        now_ms: i64,
    ) -> Result<PurchaseOutcome, GameError> {
        let cfg = &self.config;
        let c = self.mutate(user_id, now_ms, |p, fx| {
            let idx = p
                .upgrades
                .iter()
                .position(|u| u.id == upgrade_id)
                .ok_or_else(|| GameError::not_found("upgrade", upgrade_id))?;
            let quote =
                requirements::can_purchase(&p.user, &p.upgrades[idx], &p.upgrades, &self.rules)?;

            p.user.points -= quote.cost;
            p.upgrades[idx].level = quote.next_level;
            p.user.hourly_rate = curve::hourly_rate(&p.upgrades, cfg.bonus_growth);
            p.user.max_energy = curve::max_energy(cfg.base_max_energy, &p.upgrades);

            fx.dirty_upgrades.push(upgrade_id.to_string());
            fx.event(
                events::UPGRADE_PURCHASED,
                json!({ "upgrade_id": upgrade_id, "level": quote.next_level, "cost": quote.cost }),
            );
            tracing::info!(
                user_id,
                upgrade_id,
                level = quote.next_level,
                cost = quote.cost,
                "upgrade purchased"
            );
            Ok((quote.cost, p.upgrades[idx].clone()))
        })?;
        let (cost, upgrade) = c.value;
        Ok(PurchaseOutcome {
            upgrade,
            cost,
            points: c.player.user.points,
            hourly_rate: c.player.user.hourly_rate,
            max_energy: c.player.user.max_energy,
            tap_value: curve::tap_value(cfg.base_tap_value, &c.player.upgrades),
            level_ups: c.level_ups,
        })
    }

    /// One weighted draw, applied together with the cooldown stamp. If the
    /// reward cannot be applied the spin is not consumed.
    pub fn spin_wheel<R: Rng>(
        &self,
        user_id: &str,
        now_ms: i64,
        rng: &mut R,
    ) -> Result<SpinOutcome, GameError> {
        let rewards = self.store.list_wheel_rewards()?;
        let cooldown_ms = self.config.wheel_cooldown_ms();
        let c = self.mutate(user_id, now_ms, |p, fx| {
            wheel::check_cooldown(&p.stats, now_ms, cooldown_ms)?;
            let pool = wheel::eligible_pool(&rewards, &p.unlocked);
            let reward = wheel::select(&pool, &mut *rng)
                .ok_or(RuleViolation::NoActiveRewards)?
                .clone();

            let mut unlocked = None;
            let mut amount = 0;
            if reward.kind == RewardKind::Character {
                let character_id = reward.character_id.as_deref().ok_or_else(|| {
                    GameError::Validation(format!("reward {} names no character", reward.id))
                })?;
                let character = self
                    .store
                    .get_character(character_id)?
                    .ok_or_else(|| GameError::not_found("character", character_id))?;
                p.unlocked.push(character.id.clone());
                fx.unlocks.push(character.id.clone());
                fx.event(
                    events::CHARACTER_UNLOCKED,
                    json!({ "character_id": character.id, "source": "wheel" }),
                );
                unlocked = Some(character.id);
            } else {
                amount = wheel::roll_amount(&reward, &mut *rng);
                wheel::apply_currency(&mut p.user, &mut p.stats, reward.kind, amount);
            }
            wheel::record_spin(&mut p.stats, now_ms);
            fx.event(
                events::WHEEL_SPUN,
                json!({
                    "reward_id": reward.id,
                    "kind": reward.kind,
                    "amount": amount,
                    "at": crate::fmt_ms(now_ms),
                }),
            );
            tracing::info!(user_id, reward = %reward.id, amount, "wheel spun");
            Ok((reward, amount, unlocked))
        })?;
        let (reward, amount, unlocked_character) = c.value;
        Ok(SpinOutcome {
            reward,
            amount,
            points: c.player.user.points,
            gems: c.player.user.gems,
            energy: c.player.user.energy,
            unlocked_character,
            next_spin_at_ms: now_ms.saturating_add(cooldown_ms),
            level_ups: c.level_ups,
        })
    }

    pub fn select_character(
        &self,
        user_id: &str,
        character_id: &str,
        now_ms: i64,
    ) -> Result<SelectOutcome, GameError> {
        let c = self.mutate(user_id, now_ms, |p, fx| {
            let character = self
                .store
                .get_character(character_id)?
                .ok_or_else(|| GameError::not_found("character", character_id))?;
            if !p.unlocked.iter().any(|id| id == &character.id) {
                return Err(RuleViolation::CharacterLocked {
                    character_id: character.id,
                }
                .into());
            }
            p.stats.selected_character_id = Some(character.id.clone());
            fx.event(
                events::CHARACTER_SELECTED,
                json!({ "character_id": character.id }),
            );
            Ok(character)
        })?;
        Ok(SelectOutcome { character: c.value })
    }

    pub fn wheel_status(&self, user_id: &str, now_ms: i64) -> Result<WheelStatus, GameError> {
        let stats = self
            .store
            .get_user_stats(require_id(user_id)?)?
            .ok_or_else(|| GameError::not_found("user", user_id))?;
        let cooldown_ms = self.config.wheel_cooldown_ms();
        Ok(WheelStatus {
            can_spin: wheel::check_cooldown(&stats, now_ms, cooldown_ms).is_ok(),
            last_spin_ms: stats.last_wheel_spin_ms,
            next_spin_at_ms: wheel::next_spin_at(&stats, cooldown_ms),
        })
    }

    pub fn events(
        &self,
        user_id: &str,
        since_seq: i64,
        limit: u32,
    ) -> Result<Vec<GameEvent>, GameError> {
        if self.store.get_user(require_id(user_id)?)?.is_none() {
            return Err(GameError::not_found("user", user_id));
        }
        let limit = limit.clamp(1, MAX_EVENT_PAGE);
        Ok(self.store.events_since(user_id, since_seq, limit)?)
    }

    fn load(&self, user_id: &str) -> Result<Player, GameError> {
        let user_id = require_id(user_id)?;
        let user = self
            .store
            .get_user(user_id)?
            .ok_or_else(|| GameError::not_found("user", user_id))?;
        let stats = self
            .store
            .get_user_stats(user_id)?
            .ok_or_else(|| GameError::not_found("stats", user_id))?;
        Ok(Player {
            user,
            stats,
            upgrades: self.store.get_user_upgrades(user_id)?,
            unlocked: self.store.get_unlocked_characters(user_id)?,
        })
    }

    fn reconcile(&self, p: &mut Player, now_ms: i64) -> Accrual {
        let a = accrual::reconcile(&mut p.user, &mut p.stats, now_ms, &self.config);
        wheel::refresh_spins(&mut p.stats, now_ms, self.config.wheel_cooldown_ms());
        a
    }

    /// Load, reconcile, apply `op`, detect level-ups, commit. The whole unit
    /// is retried when another writer committed in between.
    fn mutate<T>(
        &self,
        user_id: &str,
        now_ms: i64,
        mut op: impl FnMut(&mut Player, &mut Effects) -> Result<T, GameError>,
    ) -> Result<Committed<T>, GameError> {
        // Unknown users never get a lock entry.
        if self.store.get_user(require_id(user_id)?)?.is_none() {
            return Err(GameError::not_found("user", user_id));
        }
        let slot = self.locks.slot(user_id);
        let _guard = slot.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut p = self.load(user_id)?;
            let mut fx = Effects::default();

            let accrual = self.reconcile(&mut p, now_ms);
            let mut level_ups = self.apply_level_ups(&mut p, &mut fx, now_ms)?;
            let value = match op(&mut p, &mut fx) {
                Ok(v) => v,
                Err(e) => {
                    if let GameError::Rule(v) = &e {
                        tracing::debug!(user_id, reason = v.code(), "rule violation");
                    }
                    return Err(e);
                }
            };
            level_ups.extend(self.apply_level_ups(&mut p, &mut fx, now_ms)?);

            let commit = PlayerCommit {
                user: p.user.clone(),
                stats: p.stats.clone(),
                upgrades: p
                    .upgrades
                    .iter()
                    .filter(|u| fx.dirty_upgrades.contains(&u.id))
                    .cloned()
                    .collect(),
                unlocks: fx.unlocks,
                events: fx.events,
                at_ms: now_ms,
            };
            match self.store.commit(&commit) {
                Ok(rev) => {
                    p.user.rev = rev;
                    return Ok(Committed {
                        value,
                        player: p,
                        accrual,
                        level_ups,
                    });
                }
                Err(CommitError::Conflict { expected, .. }) if attempt < MAX_COMMIT_ATTEMPTS => {
                    tracing::warn!(user_id, expected, attempt, "commit conflict, retrying");
                }
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "commit failed");
                    return Err(GameError::Persistence(e.into()));
                }
            }
        }
    }

    /// Raises `user.level` to what `total_earned` allows. Every crossed level
    /// gets its own event, and characters gated on it are unlocked.
    fn apply_level_ups(
        &self,
        p: &mut Player,
        fx: &mut Effects,
        now_ms: i64,
    ) -> Result<Vec<LevelUp>, GameError> {
        let ups = self.levels.advance(p.user.level, p.stats.total_earned);
        if ups.is_empty() {
            return Ok(ups);
        }
        let characters = self.store.list_characters()?;
        let mut prev = p.user.level;
        for up in &ups {
            tracing::info!(user_id = %p.user.id, level = up.level, "level up");
            fx.event(
                events::LEVEL_UP,
                json!({
                    "level": up.level,
                    "points_required": up.points_required,
                    "at": crate::fmt_ms(now_ms),
                }),
            );
            for c in characters.iter().filter(|c| {
                !c.is_wheel_reward && c.required_level > prev && c.required_level <= up.level
            }) {
                if p.unlocked.contains(&c.id) {
                    continue;
                }
                p.unlocked.push(c.id.clone());
                fx.unlocks.push(c.id.clone());
                fx.event(
                    events::CHARACTER_UNLOCKED,
                    json!({ "character_id": c.id, "source": "level", "level": up.level }),
                );
            }
            prev = up.level;
        }
        p.user.level = prev;
        Ok(ups)
    }
}

fn require_id(user_id: &str) -> Result<&str, GameError> {
    if user_id.trim().is_empty() {
        return Err(GameError::Validation("user id is empty".to_string()));
    }
    Ok(user_id)
}
