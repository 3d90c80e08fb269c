//! Choice parser
//!
//! Parses user replies to disambiguation prompts. Methods run in a fixed
//! order (negative, uncertain, numeric, textual, contextual, user-pattern,
//! correction, descriptive); the first high-confidence match wins. Given
//! fixed input, candidates, profile and context the result is
//! deterministic.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use dialogue_core::IntentCandidate;
use dialogue_text::{jaccard, keyword_match, ratio, tokenize};

/// How the reply selected an option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceType {
    Numeric,
    Textual,
    Mixed,
    Descriptive,
    Negative,
    Uncertain,
}

/// Confidence band of the parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceConfidence {
    High,
    Medium,
    Low,
    VeryLow,
}

/// Parse outcome
#[derive(Debug, Clone, Serialize)]
pub struct ParseResult {
    pub choice_type: ChoiceType,
    /// 1-based option index
    pub selected_option: Option<usize>,
    pub selected_text: Option<String>,
    pub confidence: f32,
    pub confidence_level: ChoiceConfidence,
    /// Runner-up matches: (option, display, confidence)
    pub alternatives: Vec<(usize, String, f32)>,
    pub corrections: Vec<String>,
    pub explanation: String,
}

impl ParseResult {
    pub fn is_selection(&self) -> bool {
        self.selected_option.is_some()
            && matches!(self.confidence_level, ChoiceConfidence::High | ChoiceConfidence::Medium)
    }
}

/// Context the caller can contribute
#[derive(Debug, Clone, Default)]
pub struct ChoiceContext {
    /// Intents from recent successful turns, newest first
    pub recent_intents: Vec<String>,
    /// Intents the user has stated a preference for
    pub preferred_intents: Vec<String>,
    pub current_intent: Option<String>,
}

const NEGATIVE_WORDS: &[&str] = &[
    "都不是", "不是", "没有", "不对", "错了", "不要", "不需要", "不符合", "不匹配", "不行",
    "不可以", "取消", "算了",
];

const UNCERTAIN_WORDS: &[&str] = &[
    "不知道", "不确定", "不清楚", "不太明白", "不太懂", "看不懂", "不明白", "搞不清",
    "不太理解", "模糊",
];

const PREFERENCE_WORDS: &[&str] = &["喜欢", "偏好", "倾向于", "更想要", "习惯"];

const MULTI_MARKERS: &[&str] = &["和", "还有", "以及", "也要", "都要", "全部"];

static FILLER_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[额呃嗯那这就我要选的是]+").unwrap());

static PUNCTUATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,.!?；，。！？]+").unwrap());

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static NUMBER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^(\d+)$",
        r"^第?(\d+)个?",
        r"^选择?(\d+)",
        r"^(\d+)号?",
        r"^([一二三四五六七八九十])$",
        r"第([一二三四五六七八九十])个",
        r"我选(\d+)",
        r"就(\d+)",
        r"要(\d+)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

const CHINESE_DIGITS: &[(&str, usize)] = &[
    ("一", 1),
    ("二", 2),
    ("三", 3),
    ("四", 4),
    ("五", 5),
    ("六", 6),
    ("七", 7),
    ("八", 8),
    ("九", 9),
    ("十", 10),
];

const SIMILARITY_THRESHOLD: f64 = 0.6;
const TYPO_RATIO_THRESHOLD: f64 = 0.7;
const DESCRIPTIVE_THRESHOLD: f64 = 0.4;

/// Per-user habit profile fed back by the orchestrator after resolutions
#[derive(Debug, Clone, Default)]
struct UserChoiceProfile {
    numeric_successes: u32,
    textual_successes: u32,
    /// intent name → times the user ended up choosing it
    chosen_intents: std::collections::HashMap<String, u32>,
}

/// The parser; stateful only in the per-user habit profiles
#[derive(Default)]
pub struct ChoiceParser {
    profiles: DashMap<String, UserChoiceProfile>,
}

impl ChoiceParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a single-choice reply.
    pub fn parse(
        &self,
        input: &str,
        candidates: &[IntentCandidate],
        user_id: Option<&str>,
        context: Option<&ChoiceContext>,
    ) -> ParseResult {
        let cleaned = Self::preprocess(input);

        if Self::contains_any(&cleaned, NEGATIVE_WORDS) {
            return Self::result(
                ChoiceType::Negative,
                None,
                None,
                0.9,
                Vec::new(),
                Vec::new(),
                "用户表示所有选项都不符合需求".to_string(),
            );
        }

        if Self::contains_any(&cleaned, UNCERTAIN_WORDS) {
            return Self::result(
                ChoiceType::Uncertain,
                None,
                None,
                0.8,
                Vec::new(),
                Vec::new(),
                "用户表示不确定或需要更多信息".to_string(),
            );
        }

        if let Some((option, display, confidence)) = Self::parse_numeric(&cleaned, candidates) {
            return Self::result(
                ChoiceType::Numeric,
                Some(option),
                Some(display),
                confidence,
                Vec::new(),
                Vec::new(),
                format!("解析为数字选择: {}", option),
            );
        }

        if let Some((option, display, confidence, alternatives)) =
            Self::parse_textual(&cleaned, candidates)
        {
            return Self::result(
                ChoiceType::Textual,
                Some(option),
                Some(display.clone()),
                confidence,
                alternatives,
                Vec::new(),
                format!("文本匹配: {}", display),
            );
        }

        if let Some((option, display, confidence)) =
            Self::parse_contextual(&cleaned, candidates, context)
        {
            return Self::result(
                ChoiceType::Mixed,
                Some(option),
                Some(display.clone()),
                confidence,
                Vec::new(),
                Vec::new(),
                format!("上下文感知匹配: {}", display),
            );
        }

        if let Some((option, display, confidence)) =
            self.parse_with_user_patterns(&cleaned, candidates, user_id)
        {
            return Self::result(
                ChoiceType::Mixed,
                Some(option),
                Some(display.clone()),
                confidence,
                Vec::new(),
                Vec::new(),
                format!("用户习惯匹配: {}", display),
            );
        }

        if let Some((option, display, confidence, corrections)) =
            Self::parse_with_correction(&cleaned, candidates)
        {
            return Self::result(
                ChoiceType::Mixed,
                Some(option),
                Some(display.clone()),
                confidence,
                Vec::new(),
                corrections,
                format!("智能纠错匹配: {}", display),
            );
        }

        if let Some((option, display, confidence, alternatives)) =
            Self::parse_descriptive(&cleaned, candidates)
        {
            return Self::result(
                ChoiceType::Descriptive,
                Some(option),
                Some(display.clone()),
                confidence,
                alternatives,
                Vec::new(),
                format!("描述性匹配: {}", display),
            );
        }

        Self::result(
            ChoiceType::Uncertain,
            None,
            None,
            0.1,
            Vec::new(),
            Self::correction_suggestions(candidates),
            "无法解析用户选择，建议用户重新输入".to_string(),
        )
    }

    /// Parse a reply that may select several options, when the caller
    /// allows multiple. Splits on conjunction markers and parses each part
    /// independently; without a marker this degrades to single-choice.
    pub fn parse_multi(
        &self,
        input: &str,
        candidates: &[IntentCandidate],
        allow_multiple: bool,
        user_id: Option<&str>,
        context: Option<&ChoiceContext>,
    ) -> Vec<ParseResult> {
        if !allow_multiple || !Self::contains_any(input, MULTI_MARKERS) {
            return vec![self.parse(input, candidates, user_id, context)];
        }

        static SPLIT_RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"和|还有|以及|、|,|，").unwrap());

        SPLIT_RE
            .split(input)
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .map(|part| self.parse(part, candidates, user_id, context))
            .collect()
    }

    /// Feed back whether a parse led to a successful resolution; biases the
    /// user-pattern method on later turns.
    pub fn record_outcome(&self, user_id: &str, result: &ParseResult, success: bool) {
        if !success {
            return;
        }
        let mut profile = self.profiles.entry(user_id.to_string()).or_default();
        match result.choice_type {
            ChoiceType::Numeric => profile.numeric_successes += 1,
            ChoiceType::Textual | ChoiceType::Descriptive => profile.textual_successes += 1,
            _ => {}
        }
        if let Some(text) = &result.selected_text {
            *profile.chosen_intents.entry(text.clone()).or_insert(0) += 1;
        }
    }

    // ===== pipeline steps =====

    fn preprocess(input: &str) -> String {
        let collapsed = WHITESPACE_RE.replace_all(input.trim(), " ");
        let no_filler = FILLER_PREFIX_RE.replace(&collapsed, "");
        let no_punct = PUNCTUATION_RE.replace_all(&no_filler, "");
        no_punct.to_lowercase()
    }

    fn contains_any(input: &str, words: &[&str]) -> bool {
        words.iter().any(|w| input.contains(w))
    }

    fn chinese_digit(s: &str) -> Option<usize> {
        CHINESE_DIGITS.iter().find(|(cn, _)| *cn == s).map(|(_, n)| *n)
    }

    fn parse_numeric(
        input: &str,
        candidates: &[IntentCandidate],
    ) -> Option<(usize, String, f32)> {
        for pattern in NUMBER_PATTERNS.iter() {
            if let Some(captures) = pattern.captures(input) {
                let token = captures.get(1)?.as_str();
                let number = Self::chinese_digit(token)
                    .or_else(|| token.parse::<usize>().ok())?;
                if number >= 1 && number <= candidates.len() {
                    let chosen = &candidates[number - 1];
                    return Some((number, chosen.display_name.clone(), 0.9));
                }
            }
        }
        None
    }

    fn parse_textual(
        input: &str,
        candidates: &[IntentCandidate],
    ) -> Option<(usize, String, f32, Vec<(usize, String, f32)>)> {
        let mut matches: Vec<(usize, String, f32)> = Vec::new();

        for (i, candidate) in candidates.iter().enumerate() {
            let display = candidate.display_name.to_lowercase();
            let name = candidate.name.to_lowercase();

            // Direct containment either way
            if input.contains(&display) || input.contains(&name) || display.contains(input) && input.chars().count() >= 2
            {
                matches.push((i + 1, candidate.display_name.clone(), 0.9));
                continue;
            }

            // Token overlap
            let mut token_hit = false;
            for token in tokenize(input) {
                if token.chars().count() > 1
                    && (display.contains(&token) || name.contains(&token))
                {
                    let similarity = ratio(&token, &display);
                    if similarity > SIMILARITY_THRESHOLD {
                        matches.push((i + 1, candidate.display_name.clone(), similarity as f32));
                        token_hit = true;
                        break;
                    }
                }
            }
            if token_hit {
                continue;
            }

            // Set similarity over tokens
            let similarity = jaccard(input, &candidate.display_name);
            if similarity >= SIMILARITY_THRESHOLD {
                matches.push((i + 1, candidate.display_name.clone(), similarity as f32));
            }
        }

        matches.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let best = matches.first()?.clone();
        let alternatives = matches.into_iter().skip(1).take(2).collect();
        Some((best.0, best.1, best.2, alternatives))
    }

    fn parse_contextual(
        input: &str,
        candidates: &[IntentCandidate],
        context: Option<&ChoiceContext>,
    ) -> Option<(usize, String, f32)> {
        let context = context?;

        // Continuation words pull toward the session's current intent
        if let Some(current) = &context.current_intent {
            if input.contains("继续") || input.contains("接着") || input.contains("还是这个") {
                if let Some((i, candidate)) = candidates
                    .iter()
                    .enumerate()
                    .find(|(_, c)| &c.name == current)
                {
                    return Some((i + 1, candidate.display_name.clone(), 0.75));
                }
            }
        }

        // References to earlier turns pull toward the most recent intent
        if input.contains("刚才") || input.contains("上次") || input.contains("之前") {
            for recent in &context.recent_intents {
                if let Some((i, candidate)) = candidates
                    .iter()
                    .enumerate()
                    .find(|(_, c)| &c.name == recent)
                {
                    return Some((i + 1, candidate.display_name.clone(), 0.72));
                }
            }
        }

        // Stated preferences
        if Self::contains_any(input, PREFERENCE_WORDS) {
            for preferred in &context.preferred_intents {
                if let Some((i, candidate)) = candidates
                    .iter()
                    .enumerate()
                    .find(|(_, c)| &c.name == preferred)
                {
                    return Some((i + 1, candidate.display_name.clone(), 0.7));
                }
            }
        }

        None
    }

    fn parse_with_user_patterns(
        &self,
        input: &str,
        candidates: &[IntentCandidate],
        user_id: Option<&str>,
    ) -> Option<(usize, String, f32)> {
        // Only worth applying to short, otherwise-unparseable replies
        if input.chars().count() > 4 {
            return None;
        }
        let profile = self.profiles.get(user_id?)?;

        let mut best: Option<(usize, String, u32)> = None;
        for (i, candidate) in candidates.iter().enumerate() {
            if let Some(count) = profile.chosen_intents.get(&candidate.display_name) {
                if best.as_ref().map(|(_, _, c)| count > c).unwrap_or(*count >= 2) {
                    best = Some((i + 1, candidate.display_name.clone(), *count));
                }
            }
        }

        // A longer success history makes the habitual pick more trustworthy
        let habit_strength = profile.numeric_successes + profile.textual_successes;
        let confidence = (0.6 + habit_strength.min(5) as f32 * 0.01).min(0.65);
        best.map(|(option, display, _)| (option, display, confidence))
    }

    fn canonicalize_typos(input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        for ch in input.chars() {
            let mapped = match ch {
                'l' | 'I' => '1',
                'o' | 'O' => '0',
                '０'..='９' => {
                    // Fullwidth digits map onto ASCII
                    char::from_u32('0' as u32 + (ch as u32 - '０' as u32)).unwrap_or(ch)
                }
                _ => ch,
            };
            if mapped.is_alphanumeric() || ('\u{4e00}'..='\u{9fff}').contains(&mapped) {
                out.push(mapped);
            }
        }
        out
    }

    fn parse_with_correction(
        input: &str,
        candidates: &[IntentCandidate],
    ) -> Option<(usize, String, f32, Vec<String>)> {
        let corrected = Self::canonicalize_typos(input);
        let mut corrections = Vec::new();

        if corrected != input {
            corrections.push(format!("纠正: '{}' -> '{}'", input, corrected));

            if let Some((option, display, confidence)) = Self::parse_numeric(&corrected, candidates)
            {
                return Some((option, display, confidence * 0.8, corrections));
            }
            if let Some((option, display, confidence, _)) =
                Self::parse_textual(&corrected, candidates)
            {
                return Some((option, display, confidence * 0.8, corrections));
            }
        }

        // Last resort: whole-input typo against each display name
        for (i, candidate) in candidates.iter().enumerate() {
            let display = &candidate.display_name;
            let length_gap = (input.chars().count() as i64
                - display.chars().count() as i64)
                .unsigned_abs();
            if length_gap <= 3 && ratio(input, display) > TYPO_RATIO_THRESHOLD {
                corrections.push(format!("拼写纠正: '{}' 可能是 '{}'", input, display));
                return Some((i + 1, display.clone(), 0.7, corrections));
            }
        }

        None
    }

    fn parse_descriptive(
        input: &str,
        candidates: &[IntentCandidate],
    ) -> Option<(usize, String, f32, Vec<(usize, String, f32)>)> {
        let keywords: Vec<String> = tokenize(input)
            .into_iter()
            .filter(|t| t.chars().count() >= 1)
            .collect();
        if keywords.is_empty() {
            return None;
        }

        let mut matches: Vec<(usize, String, f32)> = Vec::new();
        for (i, candidate) in candidates.iter().enumerate() {
            let haystack = format!("{} {}", candidate.display_name, candidate.name);
            let kw_score = keyword_match(&keywords, &haystack);
            let semantic = jaccard(input, &candidate.display_name);
            let combined = kw_score * 0.6 + semantic * 0.4;
            if combined > DESCRIPTIVE_THRESHOLD {
                matches.push((i + 1, candidate.display_name.clone(), combined as f32));
            }
        }

        matches.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let best = matches.first()?.clone();
        let alternatives = matches.into_iter().skip(1).take(2).collect();
        Some((best.0, best.1, best.2, alternatives))
    }

    fn correction_suggestions(candidates: &[IntentCandidate]) -> Vec<String> {
        let mut suggestions = vec!["请直接输入选项数字，例如：1".to_string()];
        let names: Vec<&str> = candidates
            .iter()
            .take(3)
            .map(|c| c.display_name.as_str())
            .collect();
        if !names.is_empty() {
            suggestions.push(format!("可选项：{}", names.join("、")));
        }
        suggestions.push("或者换一种说法描述您的需求".to_string());
        suggestions
    }

    fn level(confidence: f32) -> ChoiceConfidence {
        if confidence >= 0.8 {
            ChoiceConfidence::High
        } else if confidence >= 0.6 {
            ChoiceConfidence::Medium
        } else if confidence >= 0.4 {
            ChoiceConfidence::Low
        } else {
            ChoiceConfidence::VeryLow
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn result(
        choice_type: ChoiceType,
        selected_option: Option<usize>,
        selected_text: Option<String>,
        confidence: f32,
        alternatives: Vec<(usize, String, f32)>,
        corrections: Vec<String>,
        explanation: String,
    ) -> ParseResult {
        ParseResult {
            choice_type,
            selected_option,
            selected_text,
            confidence,
            confidence_level: Self::level(confidence),
            alternatives,
            corrections,
            explanation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<IntentCandidate> {
        vec![
            IntentCandidate::new("book_flight", "预订机票", 0.72),
            IntentCandidate::new("book_train", "预订火车票", 0.66),
            IntentCandidate::new("check_balance", "查询余额", 0.60),
        ]
    }

    #[test]
    fn test_numeric_variants() {
        let parser = ChoiceParser::new();
        for input in ["2", "第2个", "选2", "2号", "我选2", "第二个"] {
            let result = parser.parse(input, &candidates(), None, None);
            assert_eq!(result.choice_type, ChoiceType::Numeric, "input: {}", input);
            assert_eq!(result.selected_option, Some(2), "input: {}", input);
            assert_eq!(result.confidence_level, ChoiceConfidence::High);
        }
    }

    #[test]
    fn test_numeric_out_of_range_not_numeric() {
        let parser = ChoiceParser::new();
        let result = parser.parse("9", &candidates(), None, None);
        assert_ne!(result.choice_type, ChoiceType::Numeric);
    }

    #[test]
    fn test_negative_and_uncertain() {
        let parser = ChoiceParser::new();
        let negative = parser.parse("都不是", &candidates(), None, None);
        assert_eq!(negative.choice_type, ChoiceType::Negative);
        assert_eq!(negative.confidence, 0.9);

        let uncertain = parser.parse("我不知道", &candidates(), None, None);
        assert_eq!(uncertain.choice_type, ChoiceType::Uncertain);
        assert_eq!(uncertain.confidence, 0.8);
    }

    #[test]
    fn test_textual_direct_match() {
        let parser = ChoiceParser::new();
        let result = parser.parse("预订火车票", &candidates(), None, None);
        assert_eq!(result.choice_type, ChoiceType::Textual);
        assert_eq!(result.selected_option, Some(2));
        assert_eq!(result.confidence_level, ChoiceConfidence::High);
    }

    #[test]
    fn test_textual_partial_match() {
        let parser = ChoiceParser::new();
        let result = parser.parse("火车票", &candidates(), None, None);
        assert_eq!(result.selected_option, Some(2));
    }

    #[test]
    fn test_filler_prefix_stripped() {
        let parser = ChoiceParser::new();
        let result = parser.parse("嗯就选2吧", &candidates(), None, None);
        assert_eq!(result.selected_option, Some(2));
    }

    #[test]
    fn test_contextual_continuation() {
        let parser = ChoiceParser::new();
        let context = ChoiceContext {
            current_intent: Some("book_flight".to_string()),
            ..Default::default()
        };
        let result = parser.parse("继续那个", &candidates(), None, Some(&context));
        assert_eq!(result.selected_option, Some(1));
        assert_eq!(result.choice_type, ChoiceType::Mixed);
    }

    #[test]
    fn test_typo_correction_fullwidth_digit() {
        let parser = ChoiceParser::new();
        let result = parser.parse("２", &candidates(), None, None);
        assert_eq!(result.selected_option, Some(2));
        assert!(!result.corrections.is_empty());
    }

    #[test]
    fn test_failure_yields_suggestions() {
        let parser = ChoiceParser::new();
        let result = parser.parse("呜呜呜", &candidates(), None, None);
        assert_eq!(result.choice_type, ChoiceType::Uncertain);
        assert_eq!(result.confidence_level, ChoiceConfidence::VeryLow);
        assert!(result.corrections.iter().any(|c| c.contains("数字")));
        assert!(result.corrections.iter().any(|c| c.contains("预订机票")));
    }

    #[test]
    fn test_determinism() {
        let parser = ChoiceParser::new();
        let first = parser.parse("订机票", &candidates(), Some("u1"), None);
        let second = parser.parse("订机票", &candidates(), Some("u1"), None);
        assert_eq!(first.selected_option, second.selected_option);
        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.choice_type, second.choice_type);
    }

    #[test]
    fn test_user_pattern_bias_after_feedback() {
        let parser = ChoiceParser::new();
        // Teach the profile a habit
        for _ in 0..3 {
            let mut habitual = parser.parse("查询余额", &candidates(), Some("u1"), None);
            habitual.selected_text = Some("查询余额".to_string());
            parser.record_outcome("u1", &habitual, true);
        }
        // A short mumble that nothing else parses
        let result = parser.parse("呃那个", &candidates(), Some("u1"), None);
        assert_eq!(result.selected_option, Some(3));
        assert!(result.confidence >= 0.6 && result.confidence <= 0.65);
        assert_eq!(result.confidence_level, ChoiceConfidence::Medium);
    }

    #[test]
    fn test_multi_choice_split() {
        let parser = ChoiceParser::new();
        let results = parser.parse_multi("1和3", &candidates(), true, None, None);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].selected_option, Some(1));
        assert_eq!(results[1].selected_option, Some(3));
    }

    #[test]
    fn test_multi_choice_disabled_falls_back_to_single() {
        let parser = ChoiceParser::new();
        let results = parser.parse_multi("1和3", &candidates(), false, None, None);
        assert_eq!(results.len(), 1);
    }
}
