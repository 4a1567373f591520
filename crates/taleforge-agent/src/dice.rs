//! Dice notation grammar: `NdS`, `NdS±K`, `NdSkh<K>`, `NdSkl<K>`.

use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;
use taleforge_protocol::{RollKind, RollOutcome};
use thiserror::Error;

const ALLOWED_SIDES: [u32; 7] = [4, 6, 8, 10, 12, 20, 100];
const MAX_DICE: u32 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiceError {
    #[error("unrecognized dice notation: {0}")]
    InvalidNotation(String),
    #[error("dice count must be 1-{MAX_DICE}, got {0}")]
    CountOutOfRange(u32),
    #[error("unsupported die size d{0}; allowed: 4,6,8,10,12,20,100")]
    UnsupportedSides(u32),
    #[error("keep count {keep} cannot exceed dice count {count}")]
    KeepExceedsCount { keep: u32, count: u32 },
}

fn simple_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)d(\d+)([+-]\d+)?$").unwrap())
}

fn advantage_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)d(\d+)kh(\d+)$").unwrap())
}

fn disadvantage_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)d(\d+)kl(\d+)$").unwrap())
}

fn validate(count: u32, sides: u32) -> Result<(), DiceError> {
    if count < 1 || count > MAX_DICE {
        return Err(DiceError::CountOutOfRange(count));
    }
    if !ALLOWED_SIDES.contains(&sides) {
        return Err(DiceError::UnsupportedSides(sides));
    }
    Ok(())
}

fn roll_dice(count: u32, sides: u32, rng: &mut impl Rng) -> Vec<u32> {
    (0..count).map(|_| rng.gen_range(1..=sides)).collect()
}

/// Roll `notation` (e.g. `"2d6+3"`, `"1d20"`, `"4d6kh3"`) using `rng`.
pub fn roll(notation: &str, rng: &mut impl Rng) -> Result<RollOutcome, DiceError> {
    let notation_owned = notation.trim().to_string();
    let trimmed = notation_owned.as_str();

    if let Some(caps) = advantage_re().captures(trimmed) {
        let count: u32 = caps[1].parse().unwrap();
        let sides: u32 = caps[2].parse().unwrap();
        let keep: u32 = caps[3].parse().unwrap();
        validate(count, sides)?;
        if keep > count {
            return Err(DiceError::KeepExceedsCount { keep, count });
        }
        let mut rolls = roll_dice(count, sides, rng);
        let mut sorted = rolls.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        let kept: Vec<u32> = sorted.iter().take(keep as usize).copied().collect();
        let discarded: Vec<u32> = sorted.iter().skip(keep as usize).copied().collect();
        let total: i64 = kept.iter().map(|&r| r as i64).sum();
        rolls.sort_unstable();
        return Ok(RollOutcome {
            kind: RollKind::Advantage,
            notation: notation_owned,
            rolls,
            total,
            modifier: None,
            kept: Some(kept),
            discarded: Some(discarded),
            natural_20: None,
            natural_1: None,
        });
    }

    if let Some(caps) = disadvantage_re().captures(trimmed) {
        let count: u32 = caps[1].parse().unwrap();
        let sides: u32 = caps[2].parse().unwrap();
        let keep: u32 = caps[3].parse().unwrap();
        validate(count, sides)?;
        if keep > count {
            return Err(DiceError::KeepExceedsCount { keep, count });
        }
        let mut rolls = roll_dice(count, sides, rng);
        let mut sorted = rolls.clone();
        sorted.sort_unstable();
        let kept: Vec<u32> = sorted.iter().take(keep as usize).copied().collect();
        let discarded: Vec<u32> = sorted.iter().skip(keep as usize).copied().collect();
        let total: i64 = kept.iter().map(|&r| r as i64).sum();
        rolls.sort_unstable();
        return Ok(RollOutcome {
            kind: RollKind::Disadvantage,
            notation: notation_owned,
            rolls,
            total,
            modifier: None,
            kept: Some(kept),
            discarded: Some(discarded),
            natural_20: None,
            natural_1: None,
        });
    }

    if let Some(caps) = simple_re().captures(trimmed) {
        let count: u32 = caps[1].parse().unwrap();
        let sides: u32 = caps[2].parse().unwrap();
        let modifier: Option<i64> = caps.get(3).map(|m| m.as_str().parse().unwrap());
        validate(count, sides)?;
        let rolls = roll_dice(count, sides, rng);
        let sum: i64 = rolls.iter().map(|&r| r as i64).sum();
        let total = sum + modifier.unwrap_or(0);

        let is_single_d20 = count == 1 && sides == 20;
        let natural_20 = is_single_d20.then(|| rolls[0] == 20);
        let natural_1 = is_single_d20.then(|| rolls[0] == 1);

        return Ok(RollOutcome {
            kind: RollKind::Standard,
            notation: notation_owned,
            rolls,
            total,
            modifier,
            kept: None,
            discarded: None,
            natural_20,
            natural_1,
        });
    }

    Err(DiceError::InvalidNotation(notation_owned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> rand::rngs::StdRng {
        rand::rngs::StdRng::seed_from_u64(42)
    }

    #[test]
    fn simple_roll_totals_match_sum_plus_modifier() {
        let outcome = roll("2d6+3", &mut rng()).unwrap();
        let sum: i64 = outcome.rolls.iter().map(|&r| r as i64).sum();
        assert_eq!(outcome.total, sum + 3);
        assert_eq!(outcome.rolls.len(), 2);
    }

    #[test]
    fn single_d20_flags_crit_and_fumble() {
        for _ in 0..200 {
            let outcome = roll("1d20", &mut rng()).unwrap();
            assert!(outcome.natural_20.is_some());
            assert!(outcome.natural_1.is_some());
        }
    }

    #[test]
    fn multi_d20_does_not_flag_crit() {
        let outcome = roll("2d20", &mut rng()).unwrap();
        assert_eq!(outcome.natural_20, None);
        assert_eq!(outcome.natural_1, None);
    }

    #[test]
    fn advantage_keeps_highest() {
        let outcome = roll("4d6kh3", &mut rng()).unwrap();
        let kept = outcome.kept.unwrap();
        assert_eq!(kept.len(), 3);
        let total: i64 = kept.iter().map(|&r| r as i64).sum();
        assert_eq!(outcome.total, total);
    }

    #[test]
    fn disadvantage_keeps_lowest() {
        let outcome = roll("2d20kl1", &mut rng()).unwrap();
        let kept = outcome.kept.unwrap();
        assert_eq!(kept.len(), 1);
        assert!(kept[0] <= *outcome.discarded.as_ref().unwrap().first().unwrap_or(&20));
    }

    #[test]
    fn rejects_unsupported_die_size() {
        assert_eq!(roll("1d7", &mut rng()), Err(DiceError::UnsupportedSides(7)));
    }

    #[test]
    fn rejects_dice_count_over_limit() {
        assert_eq!(
            roll("101d6", &mut rng()),
            Err(DiceError::CountOutOfRange(101))
        );
    }

    #[test]
    fn rejects_garbage_notation() {
        assert!(matches!(
            roll("banana", &mut rng()),
            Err(DiceError::InvalidNotation(_))
        ));
    }

    #[test]
    fn rejects_keep_greater_than_count() {
        assert_eq!(
            roll("2d6kh3", &mut rng()),
            Err(DiceError::KeepExceedsCount { keep: 3, count: 2 })
        );
    }
}
