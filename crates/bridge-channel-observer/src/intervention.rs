//! Cooldown & intervention-mode state machine (§3.5, §4.4.3) plus the
//! probability formula that gates `intervene` actions (§4.4.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::InterventionProbability;

/// Number of judge passes an `active` conversation stays exempt from the
/// idle cooldown gate before reverting to `idle`.
const ACTIVE_TURNS: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InterventionState {
    Idle,
    Active {
        remaining: u32,
        started_at: DateTime<Utc>,
    },
}

impl Default for InterventionState {
    fn default() -> Self {
        InterventionState::Idle
    }
}

/// Persisted per-channel intervention bookkeeping (§3.5, §4.4.3). Restart
/// must preserve both the active/idle mode and the recent-intervention log
/// so the probability function is stable across restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterventionMeta {
    #[serde(default)]
    pub state: InterventionState,
    #[serde(default)]
    pub last_intervention_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recent_log: Vec<DateTime<Utc>>,
}

impl InterventionMeta {
    pub fn minutes_since_last(&self, now: DateTime<Utc>) -> f64 {
        match self.last_intervention_at {
            None => f64::INFINITY,
            Some(last) => (now - last).num_seconds() as f64 / 60.0,
        }
    }

    /// Count of interventions logged within `window_secs` of `now`.
    pub fn recent_count(&self, now: DateTime<Utc>, window_secs: u64) -> usize {
        self.recent_log
            .iter()
            .filter(|ts| (now - **ts).num_seconds() <= window_secs as i64)
            .count()
    }

    /// Whether the idle-state cooldown currently blocks a new intervention.
    /// `active` mode is always exempt.
    pub fn can_intervene(&self, now: DateTime<Utc>, cooldown_secs: u64) -> bool {
        match self.state {
            InterventionState::Active { .. } => true,
            InterventionState::Idle => match self.last_intervention_at {
                None => true,
                Some(last) => (now - last).num_seconds() > cooldown_secs as i64,
            },
        }
    }

    /// Advance the state machine after a successful intervention send.
    pub fn record(&mut self, now: DateTime<Utc>, window_secs: u64) {
        self.state = match self.state {
            InterventionState::Idle => InterventionState::Active {
                remaining: ACTIVE_TURNS.saturating_sub(1),
                started_at: now,
            },
            InterventionState::Active { remaining, started_at } => {
                if remaining <= 1 {
                    self.last_intervention_at = Some(now);
                    InterventionState::Idle
                } else {
                    InterventionState::Active {
                        remaining: remaining - 1,
                        started_at,
                    }
                }
            }
        };
        self.recent_log.push(now);
        self.recent_log
            .retain(|ts| (now - *ts).num_seconds() <= window_secs as i64);
    }
}

/// `probability = time_factor · freq_factor`, `final_score = (importance/10)
/// · probability` (§4.4.2).
pub fn intervention_probability(
    importance: u8,
    mins_since: f64,
    recent: usize,
    threshold: f64,
) -> InterventionProbability {
    let time_factor = if mins_since.is_infinite() {
        1.0
    } else {
        1.0 - (-mins_since / 40.0).exp()
    };
    let freq_factor = 1.0 / (1.0 + recent as f64 * 0.3);
    let probability = time_factor * freq_factor;
    let final_score = (importance as f64 / 10.0) * probability;
    let passed = final_score >= threshold;

    InterventionProbability {
        importance,
        time_factor,
        freq_factor,
        probability,
        final_score,
        threshold,
        passed,
    }
}
