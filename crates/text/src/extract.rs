//! Heuristic slot extraction
//!
//! Pattern-driven extraction over raw user input, used alongside NLU entity
//! output: when the classifier returns no entity for a slot, the slot's
//! configured extraction patterns run here. Also the workhorse of the
//! slot-supplement path, where a short reply supplies a missing value.

use regex::Regex;

use dialogue_config::{SlotDefinition, SlotType};

/// One heuristically extracted slot value
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedSlot {
    pub name: String,
    pub value: String,
    /// Confidence assigned to pattern extraction; below NLU entity confidence
    pub confidence: f32,
}

const PATTERN_CONFIDENCE: f32 = 0.8;
const ENUM_CONFIDENCE: f32 = 0.85;
const BARE_CONFIDENCE: f32 = 0.6;

/// Run each slot's extraction patterns against the input. First matching
/// pattern per slot wins; the first capture group is the value when present,
/// the whole match otherwise.
pub fn extract_slots(input: &str, slots: &[SlotDefinition]) -> Vec<ExtractedSlot> {
    let mut extracted = Vec::new();

    for slot in slots {
        if slot.slot_type == SlotType::Enum && !slot.values.is_empty() {
            if let Some(value) = slot.values.iter().find(|v| input.contains(v.as_str())) {
                extracted.push(ExtractedSlot {
                    name: slot.name.clone(),
                    value: value.clone(),
                    confidence: ENUM_CONFIDENCE,
                });
                continue;
            }
        }

        for pattern in &slot.extraction_patterns {
            let re = match Regex::new(pattern) {
                Ok(re) => re,
                Err(e) => {
                    tracing::warn!(
                        slot = %slot.name,
                        pattern = %pattern,
                        error = %e,
                        "Skipping invalid extraction pattern"
                    );
                    continue;
                }
            };
            if let Some(captures) = re.captures(input) {
                let value = captures
                    .get(1)
                    .or_else(|| captures.get(0))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
                if !value.is_empty() {
                    extracted.push(ExtractedSlot {
                        name: slot.name.clone(),
                        value,
                        confidence: PATTERN_CONFIDENCE,
                    });
                    break;
                }
            }
        }
    }

    extracted
}

/// Supplement heuristic for a bare reply: when no pattern matched and exactly
/// one required slot is missing, a short free-text answer is taken as that
/// slot's value. Only text and enum slots accept a bare value; typed slots
/// (date, number, email, phone) must come through patterns or normalization.
pub fn bare_value_candidate<'a>(
    input: &str,
    missing: &[&'a SlotDefinition],
) -> Option<(&'a SlotDefinition, ExtractedSlot)> {
    if missing.len() != 1 {
        return None;
    }
    let slot = missing[0];
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.chars().count() > 30 {
        return None;
    }
    match slot.slot_type {
        SlotType::Text => Some((
            slot,
            ExtractedSlot {
                name: slot.name.clone(),
                value: trimmed.to_string(),
                confidence: BARE_CONFIDENCE,
            },
        )),
        SlotType::Enum => slot
            .values
            .iter()
            .find(|v| trimmed.contains(v.as_str()))
            .map(|value| {
                (
                    slot,
                    ExtractedSlot {
                        name: slot.name.clone(),
                        value: value.clone(),
                        confidence: ENUM_CONFIDENCE,
                    },
                )
            }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dialogue_config::ValidationRules;

    fn slot(name: &str, slot_type: SlotType, patterns: &[&str]) -> SlotDefinition {
        SlotDefinition {
            name: name.to_string(),
            slot_type,
            description: String::new(),
            is_required: true,
            validation: ValidationRules::default(),
            default: None,
            prompt_template: None,
            extraction_patterns: patterns.iter().map(|p| p.to_string()).collect(),
            values: Vec::new(),
        }
    }

    #[test]
    fn test_pattern_extraction() {
        let slots = vec![
            slot("departure_city", SlotType::Text, &["从([\\u4e00-\\u9fff]{2,5})(?:出发|到|去)"]),
            slot("arrival_city", SlotType::Text, &["到([\\u4e00-\\u9fff]{2,5})"]),
            slot("departure_date", SlotType::Date, &["(今天|明天|后天|昨天|前天)"]),
        ];
        let extracted = extract_slots("从北京到上海,明天一个人", &slots);
        assert_eq!(extracted.len(), 3);
        assert_eq!(extracted[0].value, "北京");
        assert_eq!(extracted[1].value, "上海");
        assert_eq!(extracted[2].value, "明天");
    }

    #[test]
    fn test_first_pattern_wins() {
        let slots = vec![slot(
            "departure_date",
            SlotType::Date,
            &["(明天)", "(后天)"],
        )];
        let extracted = extract_slots("明天或者后天都行", &slots);
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].value, "明天");
    }

    #[test]
    fn test_invalid_pattern_skipped() {
        let slots = vec![slot("broken", SlotType::Text, &["([unclosed"])];
        assert!(extract_slots("anything", &slots).is_empty());
    }

    #[test]
    fn test_enum_containment() {
        let mut card_type = slot("card_type", SlotType::Enum, &[]);
        card_type.values = vec!["储蓄卡".to_string(), "信用卡".to_string()];
        let extracted = extract_slots("查一下我信用卡的余额", &[card_type]);
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].value, "信用卡");
    }

    #[test]
    fn test_bare_value_single_missing_text_slot() {
        let arrival = slot("arrival_city", SlotType::Text, &[]);
        let missing = vec![&arrival];
        let (matched, extracted) = bare_value_candidate("上海", &missing).unwrap();
        assert_eq!(matched.name, "arrival_city");
        assert_eq!(extracted.value, "上海");
    }

    #[test]
    fn test_bare_value_rejected_for_multiple_missing() {
        let a = slot("arrival_city", SlotType::Text, &[]);
        let b = slot("departure_city", SlotType::Text, &[]);
        let missing = vec![&a, &b];
        assert!(bare_value_candidate("上海", &missing).is_none());
    }

    #[test]
    fn test_bare_value_rejected_for_typed_slot() {
        let date = slot("departure_date", SlotType::Date, &[]);
        let missing = vec![&date];
        assert!(bare_value_candidate("上海", &missing).is_none());
    }
}
