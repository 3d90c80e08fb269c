//! Template rendering
//!
//! Substitution is lexical on `{name}` tokens. Unknown tokens are left
//! verbatim so a half-configured template degrades visibly instead of
//! silently. Structured values coerce to their JSON string representation.

use std::collections::HashMap;

/// Render `{name}` tokens in a template string from the variable map.
pub fn render_template(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let token = &after[..close];
                match vars.get(token) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(token);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Render a JSON template recursively. A string that is exactly one token
/// (`"{name}"`) is replaced whole; strings with embedded tokens render
/// lexically; objects and arrays recurse.
pub fn render_value(template: &serde_json::Value, vars: &HashMap<String, String>) -> serde_json::Value {
    match template {
        serde_json::Value::String(s) => {
            if s.starts_with('{') && s.ends_with('}') && s.len() > 2 {
                let token = &s[1..s.len() - 1];
                if !token.contains('{') && !token.contains('}') {
                    if let Some(value) = vars.get(token) {
                        return serde_json::Value::String(value.clone());
                    }
                }
            }
            serde_json::Value::String(render_template(s, vars))
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, vars)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| render_value(v, vars)).collect())
        }
        other => other.clone(),
    }
}

/// Build the variable map from the slot snapshot and handler output data.
/// Handler data wins on key collisions; structured values stringify.
pub fn vars_from(
    slots: &HashMap<String, String>,
    data: Option<&serde_json::Value>,
) -> HashMap<String, String> {
    let mut vars: HashMap<String, String> = slots.clone();
    if let Some(serde_json::Value::Object(map)) = data {
        for (key, value) in map {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            vars.insert(key.clone(), rendered);
        }
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_basic_substitution() {
        let rendered = render_template(
            "已为您预订{departure_city}到{arrival_city}的机票",
            &vars(&[("departure_city", "北京"), ("arrival_city", "上海")]),
        );
        assert_eq!(rendered, "已为您预订北京到上海的机票");
    }

    #[test]
    fn test_unknown_tokens_left_verbatim() {
        let rendered = render_template("订单号{order_id}", &vars(&[]));
        assert_eq!(rendered, "订单号{order_id}");
    }

    #[test]
    fn test_unclosed_brace() {
        let rendered = render_template("悬空{括号", &vars(&[]));
        assert_eq!(rendered, "悬空{括号");
    }

    #[test]
    fn test_render_value_whole_token_and_embedded() {
        let template = serde_json::json!({
            "from": "{departure_city}",
            "note": "出发: {departure_city}",
            "nested": {"to": "{arrival_city}"},
            "count": 1
        });
        let rendered = render_value(&template, &vars(&[("departure_city", "北京"), ("arrival_city", "上海")]));
        assert_eq!(rendered["from"], "北京");
        assert_eq!(rendered["note"], "出发: 北京");
        assert_eq!(rendered["nested"]["to"], "上海");
        assert_eq!(rendered["count"], 1);
    }

    #[test]
    fn test_vars_from_merges_data_over_slots() {
        let slots = vars(&[("city", "北京"), ("shared", "slot")]);
        let data = serde_json::json!({"shared": "data", "total": 42});
        let merged = vars_from(&slots, Some(&data));
        assert_eq!(merged["city"], "北京");
        assert_eq!(merged["shared"], "data");
        assert_eq!(merged["total"], "42");
    }
}
