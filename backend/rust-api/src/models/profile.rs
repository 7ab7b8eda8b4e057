use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const PROFILES_COLLECTION: &str = "profiles";

/// XP needed to climb one level.
pub const XP_PER_LEVEL: u64 = 1000;

/// Progression subset of a learner profile (`profiles` row keyed by user id).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileProgress {
    #[serde(default)]
    pub xp_points: u64,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub longest_streak: u32,
    #[serde(default)]
    pub last_activity_date: Option<NaiveDate>,
}

impl ProfileProgress {
    pub fn level(&self) -> LevelInfo {
        LevelInfo::from_xp(self.xp_points)
    }
}

/// Level derived from XP on read; never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelInfo {
    pub level: u64,
    pub xp_into_level: u64,
    pub xp_to_next_level: u64,
}

impl LevelInfo {
    pub fn from_xp(xp_points: u64) -> Self {
        let level = xp_points / XP_PER_LEVEL + 1;
        Self {
            level,
            xp_into_level: xp_points % XP_PER_LEVEL,
            xp_to_next_level: level * XP_PER_LEVEL - xp_points,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressionDelta {
    pub xp_awarded: u64,
    pub previous: ProfileProgress,
    pub updated: ProfileProgress,
    pub level: LevelInfo,
}

impl ProgressionDelta {
    pub fn leveled_up(&self) -> bool {
        self.updated.level().level > self.previous.level().level
    }
}

/// Read model served to dashboards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressView {
    pub user_id: String,
    #[serde(flatten)]
    pub progress: ProfileProgress,
    pub level: LevelInfo,
    pub lessons_completed: u64,
}
