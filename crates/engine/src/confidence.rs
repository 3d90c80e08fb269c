//! Confidence manager
//!
//! Per-intent decision statistics feed an adaptive threshold: the configured
//! base drifts within ±0.05 depending on sustained success or failure at the
//! current threshold. Only aggregate per-intent statistics are kept;
//! per-user thresholds were considered and rejected (cold-start noise
//! dominates at realistic volumes).

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Band cutoffs for adaptive decisions
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceBands {
    pub high: f32,
    pub medium: f32,
    pub low: f32,
    pub reject: f32,
}

impl Default for ConfidenceBands {
    fn default() -> Self {
        Self {
            high: 0.85,
            medium: 0.70,
            low: 0.55,
            reject: 0.40,
        }
    }
}

/// Band a confidence value falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    Reject,
}

/// Aggregate statistics for one intent
#[derive(Debug, Clone, Copy, Default)]
struct IntentStats {
    n: u64,
    successes: u64,
    avg_confidence: f32,
    /// Current drift applied to the configured threshold
    adjustment: f32,
}

/// Maximum drift either direction
const MAX_ADJUSTMENT: f32 = 0.05;
/// Per-update drift step
const ADJUSTMENT_STEP: f32 = 0.01;
/// Observations before the threshold starts moving
const MIN_SAMPLE: u64 = 20;

/// Per-intent adaptive thresholds and band decisions
pub struct ConfidenceManager {
    bands: ConfidenceBands,
    stats: DashMap<String, IntentStats>,
}

impl ConfidenceManager {
    pub fn new(bands: ConfidenceBands) -> Self {
        Self {
            bands,
            stats: DashMap::new(),
        }
    }

    pub fn bands(&self) -> ConfidenceBands {
        self.bands
    }

    /// Effective threshold for an intent: configured base plus drift.
    pub fn threshold(&self, intent: &str, base: f32) -> f32 {
        let adjustment = self
            .stats
            .get(intent)
            .map(|s| s.adjustment)
            .unwrap_or(0.0);
        (base + adjustment).clamp(0.0, 1.0)
    }

    /// `passed` iff confidence meets the effective threshold.
    pub fn passes(&self, intent: &str, confidence: f32, base: f32) -> bool {
        confidence >= self.threshold(intent, base)
    }

    pub fn level(&self, confidence: f32) -> ConfidenceLevel {
        if confidence >= self.bands.high {
            ConfidenceLevel::High
        } else if confidence >= self.bands.medium {
            ConfidenceLevel::Medium
        } else if confidence >= self.bands.low {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::Reject
        }
    }

    /// Feed back one decision outcome. Sustained low success raises the
    /// threshold (be stricter), sustained high success lowers it.
    pub fn record_outcome(&self, intent: &str, confidence: f32, success: bool) {
        let mut stats = self.stats.entry(intent.to_string()).or_default();
        stats.n += 1;
        if success {
            stats.successes += 1;
        }
        // Running average
        stats.avg_confidence += (confidence - stats.avg_confidence) / stats.n as f32;

        if stats.n >= MIN_SAMPLE {
            let success_rate = stats.successes as f32 / stats.n as f32;
            if success_rate < 0.4 {
                stats.adjustment = (stats.adjustment + ADJUSTMENT_STEP).min(MAX_ADJUSTMENT);
            } else if success_rate > 0.8 {
                stats.adjustment = (stats.adjustment - ADJUSTMENT_STEP).max(-MAX_ADJUSTMENT);
            }
        }

        tracing::trace!(
            intent = intent,
            n = stats.n,
            success_rate = stats.successes as f32 / stats.n as f32,
            adjustment = stats.adjustment,
            "Confidence feedback recorded"
        );
    }

    /// `(n, successes, avg_confidence)` for diagnostics
    pub fn statistics(&self, intent: &str) -> Option<(u64, u64, f32)> {
        self.stats
            .get(intent)
            .map(|s| (s.n, s.successes, s.avg_confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bands() {
        let manager = ConfidenceManager::new(ConfidenceBands::default());
        assert_eq!(manager.level(0.9), ConfidenceLevel::High);
        assert_eq!(manager.level(0.75), ConfidenceLevel::Medium);
        assert_eq!(manager.level(0.6), ConfidenceLevel::Low);
        assert_eq!(manager.level(0.2), ConfidenceLevel::Reject);
    }

    #[test]
    fn test_threshold_without_history_is_base() {
        let manager = ConfidenceManager::new(ConfidenceBands::default());
        assert_eq!(manager.threshold("book_flight", 0.70), 0.70);
        assert!(manager.passes("book_flight", 0.70, 0.70));
        assert!(!manager.passes("book_flight", 0.69, 0.70));
    }

    #[test]
    fn test_sustained_failure_raises_threshold() {
        let manager = ConfidenceManager::new(ConfidenceBands::default());
        for _ in 0..40 {
            manager.record_outcome("book_flight", 0.72, false);
        }
        let threshold = manager.threshold("book_flight", 0.70);
        assert!(threshold > 0.70);
        assert!(threshold <= 0.75 + 1e-6);
    }

    #[test]
    fn test_sustained_success_lowers_threshold_bounded() {
        let manager = ConfidenceManager::new(ConfidenceBands::default());
        for _ in 0..200 {
            manager.record_outcome("check_balance", 0.9, true);
        }
        let threshold = manager.threshold("check_balance", 0.70);
        assert!(threshold < 0.70);
        // Drift is bounded at -0.05
        assert!(threshold >= 0.65 - 1e-6);
    }

    #[test]
    fn test_no_drift_below_sample_floor() {
        let manager = ConfidenceManager::new(ConfidenceBands::default());
        for _ in 0..5 {
            manager.record_outcome("rare_intent", 0.3, false);
        }
        assert_eq!(manager.threshold("rare_intent", 0.70), 0.70);
    }

    #[test]
    fn test_statistics_running_average() {
        let manager = ConfidenceManager::new(ConfidenceBands::default());
        manager.record_outcome("x", 0.8, true);
        manager.record_outcome("x", 0.6, true);
        let (n, successes, avg) = manager.statistics("x").unwrap();
        assert_eq!(n, 2);
        assert_eq!(successes, 2);
        assert!((avg - 0.7).abs() < 1e-6);
    }
}
