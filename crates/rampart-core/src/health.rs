//! Aggregate health scoring.
//!
//! The score is the mean of three sub-scores, each in `[0, 100]`:
//! 1. Circuit breaker health: share of breakers currently closed
//! 2. Error-rate health: 100 minus a penalty per critical event in the window
//! 3. Resolution health: share of windowed events marked resolved

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{HealthConfig, HealthThresholds};

/// Bucketed health score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthGrade {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthGrade {
    /// Bucket a score using the grade cut-offs.
    pub fn from_score(score: f64, thresholds: &HealthThresholds) -> Self {
        if score >= thresholds.excellent {
            HealthGrade::Excellent
        } else if score >= thresholds.good {
            HealthGrade::Good
        } else if score >= thresholds.fair {
            HealthGrade::Fair
        } else if score >= thresholds.poor {
            HealthGrade::Poor
        } else {
            HealthGrade::Critical
        }
    }
}

impl fmt::Display for HealthGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthGrade::Excellent => write!(f, "excellent"),
            HealthGrade::Good => write!(f, "good"),
            HealthGrade::Fair => write!(f, "fair"),
            HealthGrade::Poor => write!(f, "poor"),
            HealthGrade::Critical => write!(f, "critical"),
        }
    }
}

/// Counts the score is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthInputs {
    pub breakers_total: usize,
    pub breakers_closed: usize,

    /// Events in the window
    pub recent_events: usize,

    /// Critical events in the window
    pub recent_critical: usize,

    /// Resolved events in the window
    pub recent_resolved: usize,
}

/// Health score with its components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub score: f64,
    pub status: HealthGrade,
    pub circuit_breaker_health: f64,
    pub error_rate_health: f64,
    pub resolution_health: f64,
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        100.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Compute the aggregate health report.
pub fn compute_health(inputs: HealthInputs, config: &HealthConfig) -> HealthReport {
    let circuit_breaker_health = percentage(inputs.breakers_closed, inputs.breakers_total);
    let error_rate_health =
        (100.0 - config.critical_penalty * inputs.recent_critical as f64).max(0.0);
    let resolution_health = percentage(inputs.recent_resolved, inputs.recent_events);

    let score = (circuit_breaker_health + error_rate_health + resolution_health) / 3.0;

    HealthReport {
        score,
        status: HealthGrade::from_score(score, &config.thresholds),
        circuit_breaker_health,
        error_rate_health,
        resolution_health,
    }
}
