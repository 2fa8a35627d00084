//! Deserialization helpers that accept numbers and booleans where strings are expected.
//!
//! Host applications routinely send `"userId": 42` or `"rollout": 50`. Those are coerced to their
//! JSON text (`"42"`, `"50"`) instead of failing the whole payload. `null` is treated as absent.
use std::collections::HashMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

fn stringify(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

pub(crate) fn string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(stringify))
}

pub(crate) fn string_vec<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<String>, D::Error> {
    let values = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(values.into_iter().filter_map(stringify).collect())
}

pub(crate) fn string_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<HashMap<String, String>, D::Error> {
    let values = Option::<HashMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(values
        .into_iter()
        .filter_map(|(key, value)| stringify(value).map(|value| (key, value)))
        .collect())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Fields {
        #[serde(default, deserialize_with = "super::string")]
        single: Option<String>,
        #[serde(default, deserialize_with = "super::string_vec")]
        many: Vec<String>,
        #[serde(default, deserialize_with = "super::string_map")]
        map: HashMap<String, String>,
    }

    #[test]
    fn coerces_scalars_to_strings() {
        let probe: Fields = serde_json::from_str(
            r#"{"single": 42, "many": ["a", 7, true, null], "map": {"n": 1.5, "s": "x", "z": null}}"#,
        )
        .unwrap();
        assert_eq!(probe.single.as_deref(), Some("42"));
        assert_eq!(probe.many, vec!["a", "7", "true"]);
        assert_eq!(probe.map.get("n").map(String::as_str), Some("1.5"));
        assert_eq!(probe.map.get("s").map(String::as_str), Some("x"));
        assert!(!probe.map.contains_key("z"));
    }

    #[test]
    fn null_and_missing_are_absent() {
        let probe: Fields = serde_json::from_str(r#"{"single": null, "many": null}"#).unwrap();
        assert_eq!(probe.single, None);
        assert!(probe.many.is_empty());
        assert!(probe.map.is_empty());
    }
}
