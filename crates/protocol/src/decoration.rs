//! Decorations: flat dot-path annotations folded into nested JSON.

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

/// One decoration entry: a dot-path key and a JSON-encoded value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Decoration {
    pub key: String,
    pub value: String,
}

impl Decoration {
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Fold a flat decoration list into one nested structure.
///
/// Each key is split on `.` and every segment becomes one nesting level,
/// creating intermediate objects as needed. Later entries override earlier
/// ones at the same leaf path; non-conflicting paths deep-merge. Values are
/// parsed as JSON; a value that does not parse is kept verbatim as a
/// string, and an empty value becomes null.
#[must_use]
pub fn merge_decorations(decorations: &[Decoration]) -> Value {
    let mut root = Value::Object(Map::new());
    for decoration in decorations {
        insert_path(&mut root, decoration.key.split('.'), parse_value(&decoration.value));
    }
    root
}

fn parse_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn insert_path(target: &mut Value, mut path: std::str::Split<'_, char>, value: Value) {
    let Some(segment) = path.next() else {
        *target = value;
        return;
    };
    // A scalar in the way of a deeper path is replaced by an object.
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Some(map) = target.as_object_mut() {
        let child = map.entry(segment.to_string()).or_insert(Value::Null);
        insert_path(child, path, value);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {rstest::rstest, serde_json::json};

    use super::*;

    fn decorations(pairs: &[(&str, &str)]) -> Vec<Decoration> {
        pairs
            .iter()
            .map(|(key, value)| Decoration::new(*key, *value))
            .collect()
    }

    #[rstest]
    #[case(&[("a", "1")], json!({"a": 1}))]
    #[case(&[("a.b", "1"), ("a.c", "2")], json!({"a": {"b": 1, "c": 2}}))]
    #[case(&[("a.b", "1"), ("a.b", "2")], json!({"a": {"b": 2}}))]
    #[case(&[("a.b.c", "\"deep\"")], json!({"a": {"b": {"c": "deep"}}}))]
    #[case(&[("a", "1"), ("a.b", "2")], json!({"a": {"b": 2}}))]
    #[case(&[("stage", "\"1\"")], json!({"stage": "1"}))]
    fn merges(#[case] input: &[(&str, &str)], #[case] expected: Value) {
        assert_eq!(merge_decorations(&decorations(input)), expected);
    }

    #[test]
    fn invalid_json_kept_verbatim() {
        let merged = merge_decorations(&decorations(&[("note", "not json")]));
        assert_eq!(merged, json!({"note": "not json"}));
    }

    #[test]
    fn empty_value_becomes_null() {
        let merged = merge_decorations(&decorations(&[("gone", "")]));
        assert_eq!(merged, json!({"gone": null}));
    }

    #[test]
    fn structured_values_survive() {
        let merged = merge_decorations(&decorations(&[("order", r#"{"id": 7, "tags": ["a"]}"#)]));
        assert_eq!(merged, json!({"order": {"id": 7, "tags": ["a"]}}));
    }

    #[test]
    fn empty_input_yields_empty_object() {
        assert_eq!(merge_decorations(&[]), json!({}));
    }
}
