//! Multi-strategy ambiguity resolver
//!
//! Tries automatic rules, contextual inference and statistical learning in
//! dynamic priority order, with a hybrid vote when at least two apply. The
//! first strategy to resolve wins; when everything fails the caller falls
//! through to interactive clarification. Learning updates keep per-strategy
//! success history and a per-user preference model.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use dialogue_core::IntentCandidate;

use crate::ambiguity::AmbiguityAnalysis;

/// Resolution strategies in the fixed vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Automatic,
    Contextual,
    Statistical,
    Hybrid,
    Interactive,
}

/// Result class of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Resolved,
    Partial,
    Failed,
    Deferred,
}

/// Record of one strategy attempt
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionAttempt {
    pub strategy: Strategy,
    pub outcome: ResolutionOutcome,
    pub confidence: f32,
    pub selected_intent: Option<String>,
    pub reasoning: String,
    pub elapsed_ms: u64,
}

/// Everything a resolution pass may consult
#[derive(Debug, Clone)]
pub struct ResolutionContext<'a> {
    pub user_id: &'a str,
    pub analysis: &'a AmbiguityAnalysis,
    pub candidates: &'a [IntentCandidate],
    /// Intents of recent successful turns, newest first
    pub recent_intents: Vec<String>,
    pub current_intent: Option<String>,
    /// Local hour of the turn, injected for determinism
    pub hour_of_day: u32,
}

/// Per-user learned preferences
#[derive(Debug, Clone, Default)]
struct UserModel {
    intent_frequencies: HashMap<String, f64>,
    /// hour → intent → weight
    time_patterns: HashMap<u32, HashMap<String, f64>>,
    success_rates: HashMap<String, f64>,
}

impl UserModel {
    fn normalize(&mut self) {
        if let Some(max) = self
            .intent_frequencies
            .values()
            .cloned()
            .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.max(v))))
        {
            if max > 0.0 {
                for value in self.intent_frequencies.values_mut() {
                    *value /= max;
                }
            }
        }
        for value in self.success_rates.values_mut() {
            *value = value.min(1.0);
        }
    }

    fn frequent_intents(&self) -> Vec<&str> {
        self.intent_frequencies
            .iter()
            .filter(|(_, weight)| **weight >= 0.5)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

const SUCCESS_WINDOW: usize = 100;
const LEARNING_RATE: f64 = 0.1;
const RESOLUTION_CONFIDENCE_THRESHOLD: f32 = 0.8;

/// The resolver
pub struct MultiStrategyResolver {
    weights: HashMap<Strategy, f64>,
    success_history: DashMap<Strategy, VecDeque<bool>>,
    user_models: DashMap<String, UserModel>,
}

impl Default for MultiStrategyResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiStrategyResolver {
    pub fn new() -> Self {
        let weights = [
            (Strategy::Automatic, 0.3),
            (Strategy::Contextual, 0.25),
            (Strategy::Statistical, 0.2),
            (Strategy::Interactive, 0.15),
            (Strategy::Hybrid, 0.1),
        ]
        .into_iter()
        .collect();

        Self {
            weights,
            success_history: DashMap::new(),
            user_models: DashMap::new(),
        }
    }

    /// Attempt automatic resolution. `None` means fall through to
    /// interactive clarification; the attempt record says why.
    pub fn resolve(&self, context: &ResolutionContext<'_>) -> (Option<String>, ResolutionAttempt) {
        let started = std::time::Instant::now();

        let available = self.available_strategies(context);
        let ordered = self.prioritize(available, context);

        for strategy in ordered {
            let mut attempt = self.execute(strategy, context);
            attempt.elapsed_ms = started.elapsed().as_millis() as u64;

            match attempt.outcome {
                ResolutionOutcome::Resolved => {
                    self.record(strategy, true);
                    self.learn(context, &attempt);
                    tracing::info!(
                        strategy = ?strategy,
                        intent = attempt.selected_intent.as_deref().unwrap_or(""),
                        confidence = attempt.confidence,
                        "Ambiguity auto-resolved"
                    );
                    return (attempt.selected_intent.clone(), attempt);
                }
                ResolutionOutcome::Deferred => {
                    return (None, attempt);
                }
                _ => {
                    self.record(strategy, false);
                }
            }
        }

        (
            None,
            ResolutionAttempt {
                strategy: Strategy::Interactive,
                outcome: ResolutionOutcome::Deferred,
                confidence: 0.5,
                selected_intent: None,
                reasoning: "需要用户交互确认".to_string(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
        )
    }

    /// Learning feedback from the interactive path: the user picked an
    /// intent after the resolver gave up.
    pub fn record_user_resolution(&self, user_id: &str, intent: &str, hour_of_day: u32) {
        let mut model = self.user_models.entry(user_id.to_string()).or_default();
        *model.intent_frequencies.entry(intent.to_string()).or_insert(0.0) += LEARNING_RATE;
        *model
            .time_patterns
            .entry(hour_of_day)
            .or_default()
            .entry(intent.to_string())
            .or_insert(0.0) += LEARNING_RATE;
        *model.success_rates.entry(intent.to_string()).or_insert(0.0) += LEARNING_RATE;
        model.normalize();
    }

    // ===== strategy selection =====

    fn available_strategies(&self, context: &ResolutionContext<'_>) -> Vec<Strategy> {
        let mut available = Vec::new();

        let can_automatic = context.analysis.score < 0.8
            && context.candidates.len() <= 5
            && context.candidates.iter().any(|c| c.confidence > 0.7);
        if can_automatic {
            available.push(Strategy::Automatic);
        }

        if !context.recent_intents.is_empty() || context.current_intent.is_some() {
            available.push(Strategy::Contextual);
        }

        if self.user_models.contains_key(context.user_id) {
            available.push(Strategy::Statistical);
        }

        if available.len() >= 2 {
            available.push(Strategy::Hybrid);
        }

        available
    }

    fn prioritize(
        &self,
        strategies: Vec<Strategy>,
        context: &ResolutionContext<'_>,
    ) -> Vec<Strategy> {
        let mut scored: Vec<(Strategy, f64)> = strategies
            .into_iter()
            .map(|strategy| {
                let weight = self.weights.get(&strategy).copied().unwrap_or(0.1);
                let success = self.success_rate(strategy);
                let fitness = self.context_fitness(strategy, context);
                (strategy, weight * 0.4 + success * 0.4 + fitness * 0.2)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(s, _)| s).collect()
    }

    fn success_rate(&self, strategy: Strategy) -> f64 {
        self.success_history
            .get(&strategy)
            .map(|history| {
                if history.is_empty() {
                    0.5
                } else {
                    history.iter().filter(|b| **b).count() as f64 / history.len() as f64
                }
            })
            .unwrap_or(0.5)
    }

    fn context_fitness(&self, strategy: Strategy, context: &ResolutionContext<'_>) -> f64 {
        match strategy {
            Strategy::Automatic => {
                if context.candidates.iter().any(|c| c.confidence > 0.85) {
                    0.9
                } else {
                    0.5
                }
            }
            Strategy::Contextual => {
                if context.current_intent.is_some() {
                    0.8
                } else if !context.recent_intents.is_empty() {
                    0.6
                } else {
                    0.2
                }
            }
            Strategy::Statistical => {
                if self.user_models.contains_key(context.user_id) {
                    0.7
                } else {
                    0.1
                }
            }
            Strategy::Hybrid => 0.5,
            Strategy::Interactive => 0.4,
        }
    }

    fn record(&self, strategy: Strategy, success: bool) {
        let mut history = self.success_history.entry(strategy).or_default();
        if history.len() >= SUCCESS_WINDOW {
            history.pop_front();
        }
        history.push_back(success);
    }

    fn learn(&self, context: &ResolutionContext<'_>, attempt: &ResolutionAttempt) {
        if let Some(intent) = &attempt.selected_intent {
            self.record_user_resolution(context.user_id, intent, context.hour_of_day);
        }
    }

    // ===== strategy execution =====

    fn execute(&self, strategy: Strategy, context: &ResolutionContext<'_>) -> ResolutionAttempt {
        match strategy {
            Strategy::Automatic => self.execute_automatic(context),
            Strategy::Contextual => self.execute_contextual(context),
            Strategy::Statistical => self.execute_statistical(context),
            Strategy::Hybrid => self.execute_hybrid(context),
            Strategy::Interactive => ResolutionAttempt {
                strategy,
                outcome: ResolutionOutcome::Deferred,
                confidence: 0.5,
                selected_intent: None,
                reasoning: "需要用户交互确认".to_string(),
                elapsed_ms: 0,
            },
        }
    }

    fn attempt(
        strategy: Strategy,
        outcome: ResolutionOutcome,
        confidence: f32,
        selected_intent: Option<String>,
        reasoning: String,
    ) -> ResolutionAttempt {
        ResolutionAttempt {
            strategy,
            outcome,
            confidence,
            selected_intent,
            reasoning,
            elapsed_ms: 0,
        }
    }

    /// Declarative rules in fixed order: high-confidence single, context
    /// continuation, user-pattern match, temporal pattern.
    fn execute_automatic(&self, context: &ResolutionContext<'_>) -> ResolutionAttempt {
        let candidates = context.candidates;

        // high_confidence_single
        if let Some(first) = candidates.first() {
            let clear_lead = candidates
                .get(1)
                .map(|second| first.confidence - second.confidence > 0.3)
                .unwrap_or(true);
            if first.confidence > 0.9 && clear_lead {
                return Self::attempt(
                    Strategy::Automatic,
                    ResolutionOutcome::Resolved,
                    0.9,
                    Some(first.name.clone()),
                    "单个候选置信度极高".to_string(),
                );
            }
        }

        // context_continuation
        if let Some(current) = &context.current_intent {
            if context.analysis.score < 0.6
                && candidates.iter().any(|c| &c.name == current)
            {
                return Self::attempt(
                    Strategy::Automatic,
                    ResolutionOutcome::Resolved,
                    0.8,
                    Some(current.clone()),
                    "延续当前上下文意图".to_string(),
                );
            }
        }

        // user_pattern_match
        if let Some(model) = self.user_models.get(context.user_id) {
            let frequent = model.frequent_intents();
            if let Some(candidate) = candidates.iter().find(|c| frequent.contains(&c.name.as_str()))
            {
                return Self::attempt(
                    Strategy::Automatic,
                    ResolutionOutcome::Resolved,
                    0.75,
                    Some(candidate.name.clone()),
                    "匹配用户常用意图".to_string(),
                );
            }
        }

        // temporal_patterns
        if let Some(model) = self.user_models.get(context.user_id) {
            if let Some(hour_weights) = model.time_patterns.get(&context.hour_of_day) {
                let mut best: Option<(&str, f64)> = None;
                for candidate in candidates {
                    if let Some(weight) = hour_weights.get(&candidate.name) {
                        if best.map(|(_, w)| *weight > w).unwrap_or(*weight >= 0.5) {
                            best = Some((candidate.name.as_str(), *weight));
                        }
                    }
                }
                if let Some((intent, _)) = best {
                    return Self::attempt(
                        Strategy::Automatic,
                        ResolutionOutcome::Resolved,
                        0.7,
                        Some(intent.to_string()),
                        "基于时间模式选择".to_string(),
                    );
                }
            }
        }

        Self::attempt(
            Strategy::Automatic,
            ResolutionOutcome::Failed,
            0.0,
            None,
            "没有匹配的自动规则".to_string(),
        )
    }

    /// Recent-intent coherence plus per-candidate relevance.
    fn execute_contextual(&self, context: &ResolutionContext<'_>) -> ResolutionAttempt {
        let mut best: Option<(&IntentCandidate, f32)> = None;
        for candidate in context.candidates {
            let score = Self::context_relevance(candidate, context);
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((candidate, score));
            }
        }

        match best {
            Some((candidate, score)) if score > RESOLUTION_CONFIDENCE_THRESHOLD => Self::attempt(
                Strategy::Contextual,
                ResolutionOutcome::Resolved,
                score,
                Some(candidate.name.clone()),
                format!("上下文推理选择，相关度: {:.3}", score),
            ),
            Some((_, score)) => Self::attempt(
                Strategy::Contextual,
                ResolutionOutcome::Failed,
                score,
                None,
                format!("上下文相关度不足: {:.3}", score),
            ),
            None => Self::attempt(
                Strategy::Contextual,
                ResolutionOutcome::Failed,
                0.0,
                None,
                "无候选".to_string(),
            ),
        }
    }

    fn context_relevance(candidate: &IntentCandidate, context: &ResolutionContext<'_>) -> f32 {
        let mut relevance = 0.0f32;
        if context.current_intent.as_deref() == Some(candidate.name.as_str()) {
            relevance += 0.5;
        }
        if context
            .recent_intents
            .iter()
            .take(5)
            .any(|name| name == &candidate.name)
        {
            relevance += 0.3;
        }
        relevance += candidate.confidence * 0.2;
        relevance.min(1.0)
    }

    /// Per-user frequency, time-of-day and success-rate model.
    fn execute_statistical(&self, context: &ResolutionContext<'_>) -> ResolutionAttempt {
        let Some(model) = self.user_models.get(context.user_id) else {
            return Self::attempt(
                Strategy::Statistical,
                ResolutionOutcome::Failed,
                0.0,
                None,
                "用户偏好模型不存在".to_string(),
            );
        };

        let mut scored: Vec<(&IntentCandidate, f32)> = context
            .candidates
            .iter()
            .map(|candidate| {
                let mut score = 0.0f64;
                if let Some(freq) = model.intent_frequencies.get(&candidate.name) {
                    score += freq * 0.4;
                }
                if let Some(hour_weights) = model.time_patterns.get(&context.hour_of_day) {
                    if let Some(weight) = hour_weights.get(&candidate.name) {
                        score += weight * 0.3;
                    }
                }
                if let Some(rate) = model.success_rates.get(&candidate.name) {
                    score += rate * 0.3;
                }
                (candidate, score.min(1.0) as f32)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        match scored.first() {
            Some((candidate, score)) if *score > RESOLUTION_CONFIDENCE_THRESHOLD => Self::attempt(
                Strategy::Statistical,
                ResolutionOutcome::Resolved,
                *score,
                Some(candidate.name.clone()),
                format!("统计学习选择，得分: {:.3}", score),
            ),
            Some((_, score)) => Self::attempt(
                Strategy::Statistical,
                ResolutionOutcome::Failed,
                *score,
                None,
                "统计得分不足".to_string(),
            ),
            None => Self::attempt(
                Strategy::Statistical,
                ResolutionOutcome::Failed,
                0.0,
                None,
                "无候选".to_string(),
            ),
        }
    }

    /// Vote over the sub-strategies that resolved.
    fn execute_hybrid(&self, context: &ResolutionContext<'_>) -> ResolutionAttempt {
        let sub_attempts: Vec<ResolutionAttempt> = [
            self.execute_automatic(context),
            self.execute_contextual(context),
            self.execute_statistical(context),
        ]
        .into_iter()
        .filter(|a| a.outcome == ResolutionOutcome::Resolved)
        .collect();

        if sub_attempts.is_empty() {
            return Self::attempt(
                Strategy::Hybrid,
                ResolutionOutcome::Failed,
                0.0,
                None,
                "所有子策略都失败".to_string(),
            );
        }

        let mut votes: HashMap<String, Vec<f32>> = HashMap::new();
        for attempt in &sub_attempts {
            if let Some(intent) = &attempt.selected_intent {
                votes.entry(intent.clone()).or_default().push(attempt.confidence);
            }
        }

        let mut best: Option<(String, f32, usize)> = None;
        for (intent, confidences) in votes {
            let avg = confidences.iter().sum::<f32>() / confidences.len() as f32;
            let weighted = avg * confidences.len() as f32;
            if best.as_ref().map(|(_, w, _)| weighted > *w).unwrap_or(true) {
                best = Some((intent, weighted, confidences.len()));
            }
        }

        let (intent, weighted, vote_count) = best.expect("non-empty votes");
        Self::attempt(
            Strategy::Hybrid,
            ResolutionOutcome::Resolved,
            weighted.min(1.0),
            Some(intent),
            format!("混合策略投票选择，得票: {}", vote_count),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambiguity::AmbiguityDetector;

    fn candidates(pairs: &[(&str, f32)]) -> Vec<IntentCandidate> {
        pairs
            .iter()
            .map(|(name, conf)| IntentCandidate::new(*name, *name, *conf))
            .collect()
    }

    fn analysis_for(candidates: &[IntentCandidate]) -> AmbiguityAnalysis {
        AmbiguityDetector::new(0.15).detect(candidates, None)
    }

    #[test]
    fn test_context_continuation_rule() {
        let resolver = MultiStrategyResolver::new();
        let list = candidates(&[("book_flight", 0.72), ("book_train", 0.66)]);
        let analysis = analysis_for(&list);
        let context = ResolutionContext {
            user_id: "u1",
            analysis: &analysis,
            candidates: &list,
            recent_intents: vec!["book_flight".to_string()],
            current_intent: Some("book_flight".to_string()),
            hour_of_day: 10,
        };

        let (resolved, attempt) = resolver.resolve(&context);
        assert_eq!(resolved.as_deref(), Some("book_flight"));
        assert_eq!(attempt.outcome, ResolutionOutcome::Resolved);
    }

    #[test]
    fn test_no_context_defers_to_interactive() {
        let resolver = MultiStrategyResolver::new();
        let list = candidates(&[("book_flight", 0.62), ("book_train", 0.60)]);
        let analysis = analysis_for(&list);
        let context = ResolutionContext {
            user_id: "stranger",
            analysis: &analysis,
            candidates: &list,
            recent_intents: Vec::new(),
            current_intent: None,
            hour_of_day: 10,
        };

        let (resolved, attempt) = resolver.resolve(&context);
        assert!(resolved.is_none());
        assert_eq!(attempt.outcome, ResolutionOutcome::Deferred);
        assert_eq!(attempt.strategy, Strategy::Interactive);
    }

    #[test]
    fn test_statistical_resolution_after_learning() {
        let resolver = MultiStrategyResolver::new();
        for _ in 0..20 {
            resolver.record_user_resolution("u1", "check_balance", 10);
        }

        let list = candidates(&[("check_balance", 0.66), ("book_flight", 0.64)]);
        let analysis = analysis_for(&list);
        let context = ResolutionContext {
            user_id: "u1",
            analysis: &analysis,
            candidates: &list,
            recent_intents: Vec::new(),
            current_intent: None,
            hour_of_day: 10,
        };

        let (resolved, _) = resolver.resolve(&context);
        assert_eq!(resolved.as_deref(), Some("check_balance"));
    }

    #[test]
    fn test_high_confidence_single_rule() {
        let resolver = MultiStrategyResolver::new();
        // Gap 0.35 with a 0.92 leader: not flagged by the detector normally,
        // but the rule stands on its own when invoked
        let list = candidates(&[("book_flight", 0.92), ("book_train", 0.55)]);
        let analysis = analysis_for(&list);
        let context = ResolutionContext {
            user_id: "u1",
            analysis: &analysis,
            candidates: &list,
            recent_intents: vec!["other".to_string()],
            current_intent: None,
            hour_of_day: 10,
        };

        let attempt = resolver.execute_automatic(&context);
        assert_eq!(attempt.outcome, ResolutionOutcome::Resolved);
        assert_eq!(attempt.selected_intent.as_deref(), Some("book_flight"));
    }

    #[test]
    fn test_learning_updates_are_normalized() {
        let resolver = MultiStrategyResolver::new();
        for _ in 0..50 {
            resolver.record_user_resolution("u1", "a", 9);
        }
        resolver.record_user_resolution("u1", "b", 9);

        let model = resolver.user_models.get("u1").unwrap();
        let a = model.intent_frequencies["a"];
        let b = model.intent_frequencies["b"];
        assert!((a - 1.0).abs() < 1e-9);
        assert!(b < a);
        assert!(model.success_rates["a"] <= 1.0);
    }
}
