//! String similarity primitives
//!
//! Shared by the choice parser: sequence ratio for typo detection, Jaccard
//! over token sets for textual matching, keyword containment for descriptive
//! matching. Tokenization is CJK-aware: Han characters tokenize individually,
//! alphanumeric runs stay whole words.

use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

/// Ratcliff-Obershelp similarity over characters, in [0, 1].
///
/// 2*M / (len(a) + len(b)) where M is the total length of matching blocks
/// found by recursive longest-common-substring splitting.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let total = a_chars.len() + b_chars.len();
    if total == 0 {
        return 1.0;
    }
    let matched = matching_blocks(&a_chars, &b_chars);
    2.0 * matched as f64 / total as f64
}

fn matching_blocks(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (a_start, b_start, len) = longest_common_substring(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_blocks(&a[..a_start], &b[..b_start])
        + matching_blocks(&a[a_start + len..], &b[b_start + len..])
}

fn longest_common_substring(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    // Rolling DP over b for each a index
    let mut prev = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        let mut current = vec![0usize; b.len() + 1];
        for (j, &cb) in b.iter().enumerate() {
            if ca == cb {
                let len = prev[j] + 1;
                current[j + 1] = len;
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            }
        }
        prev = current;
    }
    best
}

/// CJK-aware tokenization: each Han character is its own token, alphanumeric
/// runs are whole tokens, everything else is dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.unicode_words() {
        if word.chars().any(is_cjk) {
            for ch in word.chars() {
                if is_cjk(ch) {
                    tokens.push(ch.to_string());
                } else if ch.is_alphanumeric() {
                    tokens.push(ch.to_lowercase().to_string());
                }
            }
        } else {
            tokens.push(word.to_lowercase());
        }
    }
    tokens
}

fn is_cjk(ch: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&ch)
}

/// Jaccard similarity of the token sets of two strings, in [0, 1].
pub fn jaccard(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = tokenize(a).into_iter().collect();
    let set_b: HashSet<String> = tokenize(b).into_iter().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

/// Fraction of keywords contained in `text`.
pub fn keyword_match(keywords: &[String], text: &str) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let matched = keywords.iter().filter(|k| text.contains(k.as_str())).count();
    matched as f64 / keywords.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_identical_and_disjoint() {
        assert_eq!(ratio("预订机票", "预订机票"), 1.0);
        assert_eq!(ratio("abc", "xyz"), 0.0);
        assert_eq!(ratio("", ""), 1.0);
    }

    #[test]
    fn test_ratio_partial_overlap() {
        // 预订机票 vs 预订火车票: blocks 预订 + 票 = 3, total 9
        let r = ratio("预订机票", "预订火车票");
        assert!((r - 2.0 * 3.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_ratio_typo() {
        assert!(ratio("bok flight", "book flight") > 0.7);
    }

    #[test]
    fn test_tokenize_mixed_script() {
        let tokens = tokenize("预订ABC机票 flight 123");
        assert!(tokens.contains(&"预".to_string()));
        assert!(tokens.contains(&"票".to_string()));
        assert!(tokens.contains(&"flight".to_string()));
        assert!(tokens.contains(&"123".to_string()));
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard("预订机票", "预订机票"), 1.0);
        assert!(jaccard("预订机票", "预订火车票") > 0.3);
        assert_eq!(jaccard("", "预订"), 0.0);
    }

    #[test]
    fn test_keyword_match() {
        let keywords = vec!["机票".to_string(), "预订".to_string()];
        assert_eq!(keyword_match(&keywords, "我要预订明天的机票"), 1.0);
        assert_eq!(keyword_match(&keywords, "查询余额"), 0.0);
        assert_eq!(keyword_match(&[], "anything"), 0.0);
    }
}
