//! Cache key derivation.

use serde_json::Value;

/// Deterministic key for an upstream call.
///
/// `serde_json` objects keep their keys sorted, so equal parameters always
/// serialize to the same text.
pub fn cache_key(owner: &str, params: &Value) -> String {
    format!("{owner}:{params}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_is_order_independent() {
        let a: Value = serde_json::from_str(r#"{"page": 1, "limit": 5}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"limit": 5, "page": 1}"#).unwrap();
        assert_eq!(cache_key("svc", &a), cache_key("svc", &b));
    }

    #[test]
    fn test_key_separates_owners_and_params() {
        assert_ne!(cache_key("a", &json!({})), cache_key("b", &json!({})));
        assert_ne!(cache_key("a", &json!({"p": 1})), cache_key("a", &json!({"p": 2})));
    }
}
