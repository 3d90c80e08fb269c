//! Slot value normalization
//!
//! Type-directed conversion of raw extracted strings into canonical form.
//! Normalization is idempotent: feeding a canonical value back through
//! produces the same value. Relative dates resolve against the turn-start
//! wall clock passed in by the caller, never against `now()` read here.

use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

use dialogue_config::{SlotType, ValidationRules};

static ISO_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap());

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^1[3-9][0-9]{9}$").unwrap());

/// Outcome of normalizing one raw value
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// Canonical value conforming to the slot type
    Valid(String),
    /// Kept as-is but not yet canonical (e.g. a date phrase we cannot parse)
    Pending(String),
    /// Rejected with a user-facing reason
    Invalid { value: String, error: String },
}

impl Normalized {
    pub fn value(&self) -> &str {
        match self {
            Self::Valid(v) | Self::Pending(v) => v,
            Self::Invalid { value, .. } => value,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

/// Normalize a raw value against its slot type and validation rules.
pub fn normalize_value(
    slot_type: SlotType,
    raw: &str,
    rules: &ValidationRules,
    today: NaiveDate,
) -> Normalized {
    match slot_type {
        SlotType::Date => normalize_date(raw, today),
        SlotType::Number => normalize_number(raw, rules),
        SlotType::Email => normalize_email(raw),
        SlotType::Phone => normalize_phone(raw),
        SlotType::Text | SlotType::Enum => normalize_text(raw, rules),
    }
}

/// Relative terms resolve against `today`; already-canonical dates pass
/// through; anything else is kept raw and flagged pending.
fn normalize_date(raw: &str, today: NaiveDate) -> Normalized {
    let value = raw.trim();

    let offset = if value.contains("今天") || value.contains("今日") {
        Some(0)
    } else if value.contains("明天") || value.contains("明日") {
        Some(1)
    } else if value.contains("后天") {
        Some(2)
    } else if value.contains("昨天") || value.contains("昨日") {
        Some(-1)
    } else if value.contains("前天") {
        Some(-2)
    } else {
        None
    };

    if let Some(days) = offset {
        return Normalized::Valid((today + Duration::days(days)).format("%Y-%m-%d").to_string());
    }

    if ISO_DATE_RE.is_match(value) {
        if NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok() {
            return Normalized::Valid(value.to_string());
        }
        return Normalized::Invalid {
            value: value.to_string(),
            error: "日期无效".to_string(),
        };
    }

    Normalized::Pending(value.to_string())
}

const CHINESE_DIGITS: &[(&str, &str)] = &[
    ("零", "0"),
    ("一", "1"),
    ("二", "2"),
    ("三", "3"),
    ("四", "4"),
    ("五", "5"),
    ("六", "6"),
    ("七", "7"),
    ("八", "8"),
    ("九", "9"),
    ("两", "2"),
    ("俩", "2"),
];

fn chinese_digit(s: &str) -> Option<&'static str> {
    CHINESE_DIGITS.iter().find(|(cn, _)| *cn == s).map(|(_, d)| *d)
}

/// Chinese digit words and compound forms, quantified expressions, then a
/// standard numeric parse. Integers come out without a decimal point.
fn normalize_number(raw: &str, rules: &ValidationRules) -> Normalized {
    let value = raw.trim();
    if value.is_empty() {
        return Normalized::Invalid {
            value: String::new(),
            error: "数值为空".to_string(),
        };
    }

    if let Some(converted) = convert_chinese_number(value) {
        return check_number_range(converted, rules);
    }

    if let Ok(parsed) = value.parse::<f64>() {
        let canonical = if parsed.fract() == 0.0 {
            format!("{}", parsed as i64)
        } else {
            format!("{}", parsed)
        };
        return check_number_range(canonical, rules);
    }

    // Quantified expressions ("3个"): take the leading numeric part
    let leading: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    if !leading.is_empty() {
        return check_number_range(leading, rules);
    }

    // Quantified Chinese forms ("一张", "十位"): first numeral wins
    for ch in value.chars() {
        let s = ch.to_string();
        if let Some(digit) = chinese_digit(&s) {
            return check_number_range(digit.to_string(), rules);
        }
        if s == "十" {
            return check_number_range("10".to_string(), rules);
        }
    }

    Normalized::Invalid {
        value: value.to_string(),
        error: "无法识别的数值".to_string(),
    }
}

/// Pure and compound Chinese numerals up to 99 (十二=12, 二十=20, 三十五=35).
fn convert_chinese_number(value: &str) -> Option<String> {
    if let Some(digit) = chinese_digit(value) {
        return Some(digit.to_string());
    }
    if value == "十" {
        return Some("10".to_string());
    }
    if let Some(rest) = value.strip_prefix('十') {
        // 十X -> 1X
        return chinese_digit(rest).map(|d| format!("1{}", d));
    }
    if let Some(rest) = value.strip_suffix('十') {
        // X十 -> X0
        return chinese_digit(rest).map(|d| format!("{}0", d));
    }
    if value.contains('十') {
        // X十Y -> XY
        let parts: Vec<&str> = value.splitn(2, '十').collect();
        if parts.len() == 2 {
            if let (Some(tens), Some(ones)) = (chinese_digit(parts[0]), chinese_digit(parts[1])) {
                return Some(format!("{}{}", tens, ones));
            }
        }
    }
    None
}

fn check_number_range(canonical: String, rules: &ValidationRules) -> Normalized {
    let parsed: f64 = match canonical.parse() {
        Ok(v) => v,
        Err(_) => {
            return Normalized::Invalid {
                value: canonical,
                error: "无法识别的数值".to_string(),
            }
        }
    };
    if let Some(min) = rules.min {
        if parsed < min {
            return Normalized::Invalid {
                value: canonical,
                error: format!("不能小于{}", min),
            };
        }
    }
    if let Some(max) = rules.max {
        if parsed > max {
            return Normalized::Invalid {
                value: canonical,
                error: format!("不能大于{}", max),
            };
        }
    }
    Normalized::Valid(canonical)
}

fn normalize_email(raw: &str) -> Normalized {
    let value = raw.trim().to_lowercase();
    if EMAIL_RE.is_match(&value) {
        Normalized::Valid(value)
    } else {
        Normalized::Invalid {
            value,
            error: "邮箱格式不正确".to_string(),
        }
    }
}

fn normalize_phone(raw: &str) -> Normalized {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if PHONE_RE.is_match(&digits) {
        Normalized::Valid(digits)
    } else {
        Normalized::Invalid {
            value: digits,
            error: "手机号格式不正确".to_string(),
        }
    }
}

fn normalize_text(raw: &str, rules: &ValidationRules) -> Normalized {
    let value = raw.trim().to_string();
    let len = value.chars().count();
    if let Some(min) = rules.min_length {
        if len < min {
            return Normalized::Invalid {
                value,
                error: format!("长度不能少于{}个字符", min),
            };
        }
    }
    if let Some(max) = rules.max_length {
        if len > max {
            return Normalized::Invalid {
                value,
                error: format!("长度不能超过{}个字符", max),
            };
        }
    }
    if let Some(pattern) = &rules.pattern {
        match Regex::new(pattern) {
            Ok(re) => {
                if !re.is_match(&value) {
                    return Normalized::Invalid {
                        value,
                        error: "格式不正确".to_string(),
                    };
                }
            }
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "Invalid validation pattern");
            }
        }
    }
    Normalized::Valid(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    fn no_rules() -> ValidationRules {
        ValidationRules::default()
    }

    #[test]
    fn test_relative_dates() {
        let cases = [
            ("今天", "2024-03-15"),
            ("明天", "2024-03-16"),
            ("后天", "2024-03-17"),
            ("昨天", "2024-03-14"),
            ("前天", "2024-03-13"),
        ];
        for (input, expected) in cases {
            assert_eq!(
                normalize_value(SlotType::Date, input, &no_rules(), today()),
                Normalized::Valid(expected.to_string()),
                "input: {}",
                input
            );
        }
    }

    #[test]
    fn test_iso_date_passthrough() {
        assert_eq!(
            normalize_value(SlotType::Date, "2024-05-01", &no_rules(), today()),
            Normalized::Valid("2024-05-01".to_string())
        );
        // Well-formed but not a real date
        assert!(matches!(
            normalize_value(SlotType::Date, "2024-13-40", &no_rules(), today()),
            Normalized::Invalid { .. }
        ));
    }

    #[test]
    fn test_unparseable_date_is_pending() {
        let result = normalize_value(SlotType::Date, "下周五", &no_rules(), today());
        assert_eq!(result, Normalized::Pending("下周五".to_string()));
    }

    #[test]
    fn test_date_idempotence() {
        let once = normalize_value(SlotType::Date, "明天", &no_rules(), today());
        let twice = normalize_value(SlotType::Date, once.value(), &no_rules(), today());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_chinese_numbers() {
        let cases = [
            ("一", "1"),
            ("两", "2"),
            ("俩", "2"),
            ("十", "10"),
            ("十二", "12"),
            ("二十", "20"),
            ("三十五", "35"),
        ];
        for (input, expected) in cases {
            assert_eq!(
                normalize_value(SlotType::Number, input, &no_rules(), today()),
                Normalized::Valid(expected.to_string()),
                "input: {}",
                input
            );
        }
    }

    #[test]
    fn test_quantified_numbers() {
        assert_eq!(
            normalize_value(SlotType::Number, "一张", &no_rules(), today()),
            Normalized::Valid("1".to_string())
        );
        assert_eq!(
            normalize_value(SlotType::Number, "3个", &no_rules(), today()),
            Normalized::Valid("3".to_string())
        );
    }

    #[test]
    fn test_numeric_parse() {
        assert_eq!(
            normalize_value(SlotType::Number, "42", &no_rules(), today()),
            Normalized::Valid("42".to_string())
        );
        // Integers come out without a decimal point
        assert_eq!(
            normalize_value(SlotType::Number, "42.0", &no_rules(), today()),
            Normalized::Valid("42".to_string())
        );
        assert_eq!(
            normalize_value(SlotType::Number, "3.5", &no_rules(), today()),
            Normalized::Valid("3.5".to_string())
        );
        assert!(matches!(
            normalize_value(SlotType::Number, "许多", &no_rules(), today()),
            Normalized::Invalid { .. }
        ));
    }

    #[test]
    fn test_number_range() {
        let rules = ValidationRules {
            min: Some(1.0),
            max: Some(9.0),
            ..Default::default()
        };
        assert!(normalize_value(SlotType::Number, "5", &rules, today()).is_valid());
        assert!(matches!(
            normalize_value(SlotType::Number, "12", &rules, today()),
            Normalized::Invalid { .. }
        ));
    }

    #[test]
    fn test_email() {
        assert_eq!(
            normalize_value(SlotType::Email, " User@Example.COM ", &no_rules(), today()),
            Normalized::Valid("user@example.com".to_string())
        );
        assert!(matches!(
            normalize_value(SlotType::Email, "not-an-email", &no_rules(), today()),
            Normalized::Invalid { .. }
        ));
    }

    #[test]
    fn test_phone() {
        assert_eq!(
            normalize_value(SlotType::Phone, "138-1234-5678", &no_rules(), today()),
            Normalized::Valid("13812345678".to_string())
        );
        assert!(matches!(
            normalize_value(SlotType::Phone, "12345", &no_rules(), today()),
            Normalized::Invalid { .. }
        ));
        // Must start 1[3-9]
        assert!(matches!(
            normalize_value(SlotType::Phone, "12012345678", &no_rules(), today()),
            Normalized::Invalid { .. }
        ));
    }

    #[test]
    fn test_text_length_rules() {
        let rules = ValidationRules {
            min_length: Some(2),
            max_length: Some(4),
            ..Default::default()
        };
        assert!(normalize_value(SlotType::Text, " 北京 ", &rules, today()).is_valid());
        assert!(matches!(
            normalize_value(SlotType::Text, "京", &rules, today()),
            Normalized::Invalid { .. }
        ));
        assert!(matches!(
            normalize_value(SlotType::Text, "呼和浩特东站", &rules, today()),
            Normalized::Invalid { .. }
        ));
    }

    #[test]
    fn test_number_idempotence() {
        for input in ["两张", "三十五", "7", "3.5"] {
            let once = normalize_value(SlotType::Number, input, &no_rules(), today());
            let twice = normalize_value(SlotType::Number, once.value(), &no_rules(), today());
            assert_eq!(once.value(), twice.value(), "input: {}", input);
        }
    }
}
