//! Ambiguity detector
//!
//! Multi-signal analysis over a ranked candidate list. The core signal is
//! the top-2 confidence gap: both candidates at or above the floor with a
//! gap inside the threshold flags ambiguity, and every candidate within the
//! gap window of the leader is included (bounded at five).

use serde::Serialize;

use dialogue_core::IntentCandidate;
use dialogue_text::jaccard;

/// Dominant flavor of a detected ambiguity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityType {
    /// Display names overlap semantically
    Semantic,
    /// The session context pulls toward more than one candidate
    Contextual,
    /// Pure confidence proximity
    Confidence,
}

/// One contributing signal
#[derive(Debug, Clone, Serialize)]
pub struct AmbiguitySignal {
    pub name: &'static str,
    pub strength: f32,
    pub description: String,
}

/// Analysis result
#[derive(Debug, Clone, Serialize)]
pub struct AmbiguityAnalysis {
    pub is_ambiguous: bool,
    /// 0 = clear, 1 = fully ambiguous
    pub score: f32,
    pub primary_type: Option<AmbiguityType>,
    pub signals: Vec<AmbiguitySignal>,
    /// Candidates inside the gap window, leader first (max 5)
    pub candidates: Vec<IntentCandidate>,
    /// proceed | disambiguate
    pub recommended_action: &'static str,
}

impl AmbiguityAnalysis {
    fn clear(candidates: &[IntentCandidate], score: f32) -> Self {
        Self {
            is_ambiguous: false,
            score,
            primary_type: None,
            signals: Vec::new(),
            candidates: candidates.to_vec(),
            recommended_action: "proceed",
        }
    }
}

const MAX_AMBIGUOUS_CANDIDATES: usize = 5;

/// Detector over ranked candidate lists
pub struct AmbiguityDetector {
    /// Max top-2 gap that still counts as ambiguous
    gap_threshold: f32,
    /// Candidates below this floor never participate
    min_confidence: f32,
}

impl AmbiguityDetector {
    pub fn new(gap_threshold: f32) -> Self {
        Self {
            gap_threshold,
            min_confidence: 0.5,
        }
    }

    /// Analyze a candidate list already in rank order.
    /// `context_intent` is the session's current intent, if any.
    pub fn detect(
        &self,
        candidates: &[IntentCandidate],
        context_intent: Option<&str>,
    ) -> AmbiguityAnalysis {
        if candidates.len() < 2 {
            return AmbiguityAnalysis::clear(candidates, 0.0);
        }

        let top1 = &candidates[0];
        let top2 = &candidates[1];
        let gap = top1.confidence - top2.confidence;

        let core_hit = top1.confidence >= self.min_confidence
            && top2.confidence >= self.min_confidence
            && gap <= self.gap_threshold;

        if !core_hit {
            return AmbiguityAnalysis::clear(candidates, gap.min(1.0));
        }

        let included: Vec<IntentCandidate> = candidates
            .iter()
            .filter(|c| {
                c.confidence >= self.min_confidence
                    && top1.confidence - c.confidence <= self.gap_threshold
            })
            .take(MAX_AMBIGUOUS_CANDIDATES)
            .cloned()
            .collect();

        let mut signals = vec![AmbiguitySignal {
            name: "confidence_gap",
            strength: 1.0 - gap / self.gap_threshold.max(f32::EPSILON),
            description: format!("top-2 gap {:.3} within {:.3}", gap, self.gap_threshold),
        }];

        let name_overlap = jaccard(&top1.display_name, &top2.display_name) as f32;
        if name_overlap > 0.3 {
            signals.push(AmbiguitySignal {
                name: "semantic_overlap",
                strength: name_overlap,
                description: format!(
                    "display names '{}' and '{}' overlap",
                    top1.display_name, top2.display_name
                ),
            });
        }

        let context_pull = context_intent
            .map(|current| included.iter().any(|c| c.name == current))
            .unwrap_or(false);
        if context_pull {
            signals.push(AmbiguitySignal {
                name: "context_pull",
                strength: 0.5,
                description: "session's current intent is among the candidates".to_string(),
            });
        }

        let primary_type = if name_overlap > 0.3 {
            AmbiguityType::Semantic
        } else if context_pull {
            AmbiguityType::Contextual
        } else {
            AmbiguityType::Confidence
        };

        AmbiguityAnalysis {
            is_ambiguous: true,
            score: (1.0 - gap).clamp(0.0, 1.0),
            primary_type: Some(primary_type),
            signals,
            candidates: included,
            recommended_action: "disambiguate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, display: &str, confidence: f32) -> IntentCandidate {
        IntentCandidate::new(name, display, confidence)
    }

    #[test]
    fn test_close_pair_is_ambiguous() {
        let detector = AmbiguityDetector::new(0.15);
        let candidates = vec![
            candidate("book_flight", "预订机票", 0.72),
            candidate("book_train", "预订火车票", 0.66),
        ];
        let analysis = detector.detect(&candidates, None);
        assert!(analysis.is_ambiguous);
        assert_eq!(analysis.candidates.len(), 2);
        assert_eq!(analysis.recommended_action, "disambiguate");
        // Shared 预订…票 tokens make this semantic, not purely confidence
        assert_eq!(analysis.primary_type, Some(AmbiguityType::Semantic));
    }

    #[test]
    fn test_wide_gap_is_clear() {
        let detector = AmbiguityDetector::new(0.15);
        let candidates = vec![
            candidate("book_flight", "预订机票", 0.92),
            candidate("check_balance", "查询余额", 0.55),
        ];
        let analysis = detector.detect(&candidates, None);
        assert!(!analysis.is_ambiguous);
        assert_eq!(analysis.recommended_action, "proceed");
    }

    #[test]
    fn test_low_confidence_pair_is_clear() {
        let detector = AmbiguityDetector::new(0.15);
        let candidates = vec![
            candidate("a", "甲", 0.45),
            candidate("b", "乙", 0.42),
        ];
        assert!(!detector.detect(&candidates, None).is_ambiguous);
    }

    #[test]
    fn test_included_candidates_within_window_and_bounded() {
        let detector = AmbiguityDetector::new(0.15);
        let candidates: Vec<IntentCandidate> = (0..8)
            .map(|i| candidate(&format!("intent_{}", i), &format!("意图{}", i), 0.9 - i as f32 * 0.02))
            .collect();
        let analysis = detector.detect(&candidates, None);
        assert!(analysis.is_ambiguous);
        assert!(analysis.candidates.len() <= 5);
        for c in &analysis.candidates {
            assert!(0.9 - c.confidence <= 0.15 + 1e-6);
            assert!(c.confidence >= 0.5);
        }
    }

    #[test]
    fn test_context_signal() {
        let detector = AmbiguityDetector::new(0.15);
        let candidates = vec![
            candidate("book_flight", "订机票服务", 0.70),
            candidate("check_balance", "账户余额", 0.65),
        ];
        let analysis = detector.detect(&candidates, Some("book_flight"));
        assert!(analysis.is_ambiguous);
        assert!(analysis.signals.iter().any(|s| s.name == "context_pull"));
    }

    #[test]
    fn test_single_candidate_never_ambiguous() {
        let detector = AmbiguityDetector::new(0.15);
        let candidates = vec![candidate("book_flight", "预订机票", 0.51)];
        assert!(!detector.detect(&candidates, None).is_ambiguous);
    }
}
