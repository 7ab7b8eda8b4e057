use chrono::{Days, NaiveDate};

use crate::metrics::STREAK_TRANSITIONS_TOTAL;
use crate::models::profile::{ProfileProgress, ProgressionDelta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakTransition {
    /// First qualifying activity, or the previous one is two or more days old.
    Started,
    Extended,
    /// Already counted today (or the stored date is ahead of `today`).
    Unchanged,
}

impl StreakTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreakTransition::Started => "started",
            StreakTransition::Extended => "extended",
            StreakTransition::Unchanged => "unchanged",
        }
    }
}

/// Applies a scored completion to the learner's progression snapshot.
///
/// Only a passing completion counts: it adds `xp_reward` and advances the
/// daily streak at most once per calendar day. `today` is supplied by the
/// caller; nothing here reads the clock.
pub fn advance(
    profile: &ProfileProgress,
    passed: bool,
    xp_reward: u32,
    today: NaiveDate,
) -> ProfileProgress {
    if !passed {
        return profile.clone();
    }

    let mut updated = profile.clone();
    updated.xp_points = profile.xp_points.saturating_add(u64::from(xp_reward));

    match streak_transition(profile.last_activity_date, today) {
        StreakTransition::Extended => {
            updated.current_streak = profile.current_streak.saturating_add(1);
            updated.last_activity_date = Some(today);
        }
        StreakTransition::Started => {
            updated.current_streak = 1;
            updated.last_activity_date = Some(today);
        }
        StreakTransition::Unchanged => {}
    }
    updated.longest_streak = updated.longest_streak.max(updated.current_streak);

    updated
}

pub fn streak_transition(last_day: Option<NaiveDate>, today: NaiveDate) -> StreakTransition {
    match last_day {
        None => StreakTransition::Started,
        Some(last) if last >= today => StreakTransition::Unchanged,
        Some(last) if Some(last) == today.checked_sub_days(Days::new(1)) => {
            StreakTransition::Extended
        }
        Some(_) => StreakTransition::Started,
    }
}

/// Runs [`advance`] and packages the before/after pair for the caller.
pub fn progression_delta(
    profile: &ProfileProgress,
    passed: bool,
    xp_reward: u32,
    today: NaiveDate,
) -> ProgressionDelta {
    let updated = advance(profile, passed, xp_reward, today);
    if passed {
        let transition = streak_transition(profile.last_activity_date, today);
        STREAK_TRANSITIONS_TOTAL
            .with_label_values(&[transition.as_str()])
            .inc();
    }

    ProgressionDelta {
        xp_awarded: updated.xp_points - profile.xp_points,
        level: updated.level(),
        previous: profile.clone(),
        updated,
    }
}
