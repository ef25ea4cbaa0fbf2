//! Purchase gating for upgrades.
//!
//! [`can_purchase`] is deterministic and reads nothing but its arguments, so
//! the snapshot can show the same verdict the purchase path enforces.

use crate::curve;
use tapheart_protocol::{Eligibility, MissingPrereq, RuleViolation, Shortfall, Upgrade, User};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rules {
    pub capstone_threshold: u32,
    pub cost_growth: f64,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            capstone_threshold: 4,
            cost_growth: curve::COST_GROWTH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchaseQuote {
    pub cost: i64,
    pub next_level: u32,
}

/// Checks, in order: max level, player level, prerequisite levels (all
/// unmet ones collected), capstone threshold, funds. First failing rule wins.
pub fn can_purchase(
    user: &User,
    upgrade: &Upgrade,
    all: &[Upgrade],
    rules: &Rules,
) -> Result<PurchaseQuote, RuleViolation> {
    if upgrade.level >= upgrade.max_level {
        return Err(RuleViolation::MaxLevel {
            max_level: upgrade.max_level,
        });
    }

    if user.level < upgrade.required_level {
        return Err(RuleViolation::LevelLocked {
            required_level: upgrade.required_level,
            current_level: user.level,
        });
    }

    let missing: Vec<MissingPrereq> = upgrade
        .required_upgrades
        .iter()
        .filter_map(|(prereq_id, &min_level)| {
            let owned = all.iter().find(|u| &u.id == prereq_id);
            let current_level = owned.map(|u| u.level).unwrap_or(0);
            if owned.is_some() && current_level >= min_level {
                return None;
            }
            Some(MissingPrereq {
                upgrade_id: prereq_id.clone(),
                name: owned
                    .map(|u| u.name.clone())
                    .unwrap_or_else(|| prereq_id.clone()),
                min_level,
                current_level,
            })
        })
        .collect();
    if !missing.is_empty() {
        return Err(RuleViolation::PrereqLocked { missing });
    }

    if upgrade.is_capstone {
        let below = capstone_shortfall(upgrade, all, rules.capstone_threshold);
        if !below.is_empty() {
            return Err(RuleViolation::CapstoneLocked {
                threshold: rules.capstone_threshold,
                below,
            });
        }
    }

    let cost = curve::next_cost_with(upgrade.base_cost, upgrade.level, rules.cost_growth);
    if user.points < cost {
        return Err(RuleViolation::InsufficientFunds {
            required: cost,
            available: user.points,
        });
    }

    Ok(PurchaseQuote {
        cost,
        next_level: upgrade.level + 1,
    })
}

/// Regular upgrades other than `target` still below `threshold`.
fn capstone_shortfall(target: &Upgrade, all: &[Upgrade], threshold: u32) -> Vec<Shortfall> {
    all.iter()
        .filter(|u| u.id != target.id && !u.is_capstone && u.level < threshold)
        .map(|u| Shortfall {
            upgrade_id: u.id.clone(),
            name: u.name.clone(),
            level: u.level,
        })
        .collect()
}

pub fn eligibility(user: &User, upgrade: &Upgrade, all: &[Upgrade], rules: &Rules) -> Eligibility {
    match can_purchase(user, upgrade, all, rules) {
        Ok(_) => Eligibility {
            allowed: true,
            violation: None,
        },
        Err(v) => Eligibility {
            allowed: false,
            violation: Some(v),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::upgrade;

    fn user(level: u32, points: i64) -> User {
        User {
            id: "u1".to_string(),
            username: "Player".to_string(),
            level,
            points,
            gems: 0,
            energy: 100,
            max_energy: 100,
            hourly_rate: 0,
            last_active_ms: 0,
            created_at_ms: 0,
            rev: 1,
            accrual_carry: 0,
            regen_carry: 0,
        }
    }

    fn capstone() -> Upgrade {
        let mut u = upgrade("level_upgrade", 0, 5);
        u.name = "Level Upgrade".to_string();
        u.is_capstone = true;
        u
    }

    #[test]
    fn max_level_wins_regardless_of_funds() {
        let u = upgrade("tap", 10, 10);
        let all = vec![u.clone()];
        for points in [0, 1_000, i64::MAX] {
            assert_eq!(
                can_purchase(&user(99, points), &u, &all, &Rules::default()),
                Err(RuleViolation::MaxLevel { max_level: 10 })
            );
        }
    }

    #[test]
    fn level_gate_carries_required_level() {
        let mut u = upgrade("auto", 0, 10);
        u.required_level = 3;
        let err = can_purchase(&user(2, 10_000), &u, &[u.clone()], &Rules::default()).unwrap_err();
        assert_eq!(
            err,
            RuleViolation::LevelLocked {
                required_level: 3,
                current_level: 2
            }
        );
    }

    #[test]
    fn all_unmet_prereqs_are_collected() {
        let mut tap = upgrade("tap", 1, 10);
        tap.name = "Tap Power".to_string();
        let mut target = upgrade("auto", 0, 10);
        target.required_upgrades.insert("tap".to_string(), 2);
        target.required_upgrades.insert("ghost".to_string(), 1);
        let all = vec![tap, target.clone()];

        let err = can_purchase(&user(5, 10_000), &target, &all, &Rules::default()).unwrap_err();
        let RuleViolation::PrereqLocked { missing } = err else {
            panic!("expected PREREQ_LOCKED, got {err:?}");
        };
        assert_eq!(missing.len(), 2);
        assert_eq!(missing[0].upgrade_id, "ghost");
        assert_eq!(missing[1].name, "Tap Power");
        assert_eq!(missing[1].min_level, 2);
        assert_eq!(missing[1].current_level, 1);
    }

    #[test]
    fn capstone_requires_every_other_upgrade_at_threshold() {
        let cap = capstone();
        let mut all = vec![upgrade("a", 4, 10), upgrade("b", 5, 10), cap.clone()];
        let rich = user(10, 1_000_000);

        assert!(can_purchase(&rich, &cap, &all, &Rules::default()).is_ok());

        all[1].level = 3;
        let err = can_purchase(&rich, &cap, &all, &Rules::default()).unwrap_err();
        assert_eq!(
            err,
            RuleViolation::CapstoneLocked {
                threshold: 4,
                below: vec![Shortfall {
                    upgrade_id: "b".to_string(),
                    name: "b".to_string(),
                    level: 3
                }]
            }
        );
    }

    #[test]
    fn funds_checked_last_with_curve_cost() {
        let u = upgrade("tap", 2, 10);
        let all = vec![u.clone()];
        assert_eq!(
            can_purchase(&user(1, 131), &u, &all, &Rules::default()),
            Err(RuleViolation::InsufficientFunds {
                required: 132,
                available: 131
            })
        );
        assert_eq!(
            can_purchase(&user(1, 132), &u, &all, &Rules::default()),
            Ok(PurchaseQuote {
                cost: 132,
                next_level: 3
            })
        );
    }

    #[test]
    fn eligibility_mirrors_verdict() {
        let u = upgrade("tap", 0, 10);
        let e = eligibility(&user(1, 0), &u, &[u.clone()], &Rules::default());
        assert!(!e.allowed);
        assert_eq!(e.violation.map(|v| v.code()), Some("INSUFFICIENT_FUNDS"));
    }
}
