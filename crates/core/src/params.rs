//! Operator parameter maps.
//!
//! Every stage module and operator is configured from a JSON object. `Params`
//! wraps that object and offers typed getters that fall back to the caller's
//! default when a key is missing or holds the wrong type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};

/// A JSON-object parameter map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(Map<String, Value>);

impl Params {
    /// Create an empty parameter map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON value. `null` is treated as an empty map.
    pub fn from_value(value: Value) -> AppResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(AppError::Config(format!(
                "Parameters must be a JSON object, got: {}",
                other
            ))),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Drop both spellings of the strategy key.
    pub fn remove_strategy(&mut self) {
        self.0.remove("strategy");
        self.0.remove("type");
    }

    /// Overlay `other` on top of this map (other wins).
    pub fn merge(&mut self, other: &Params) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn opt_str(&self, key: &str) -> Option<String> {
        self.0.get(key).and_then(Value::as_str).map(str::to_string)
    }

    pub fn str_or(&self, key: &str, default: &str) -> String {
        self.opt_str(key).unwrap_or_else(|| default.to_string())
    }

    pub fn opt_usize(&self, key: &str) -> Option<usize> {
        self.0
            .get(key)
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
            .map(|v| v as usize)
    }

    pub fn usize_or(&self, key: &str, default: usize) -> usize {
        self.opt_usize(key).unwrap_or(default)
    }

    pub fn opt_f32(&self, key: &str) -> Option<f32> {
        self.0.get(key).and_then(Value::as_f64).map(|v| v as f32)
    }

    pub fn f32_or(&self, key: &str, default: f32) -> f32 {
        self.opt_f32(key).unwrap_or(default)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    /// A list of strings; non-string items are skipped.
    pub fn str_list(&self, key: &str) -> Option<Vec<String>> {
        self.0.get(key).and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
    }

    /// A list of numbers; non-numeric items are skipped.
    pub fn f32_list(&self, key: &str) -> Option<Vec<f32>> {
        self.0.get(key).and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect()
        })
    }

    /// A nested object as its own parameter map (empty when absent).
    pub fn section(&self, key: &str) -> Params {
        match self.0.get(key) {
            Some(Value::Object(map)) => Params(map.clone()),
            _ => Params::default(),
        }
    }

    /// The strategy name, read from `strategy` or `type`.
    pub fn strategy_or(&self, default: &str) -> String {
        self.opt_str("strategy")
            .or_else(|| self.opt_str("type"))
            .unwrap_or_else(|| default.to_string())
            .to_lowercase()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_getters_with_defaults() {
        let params = Params::from_value(json!({
            "k": 7,
            "weight": 0.25,
            "reverse_order": true,
            "model": "qwen-plus",
            "separators": ["\n\n", "\n"],
        }))
        .unwrap();

        assert_eq!(params.usize_or("k", 5), 7);
        assert_eq!(params.usize_or("missing", 5), 5);
        assert!((params.f32_or("weight", 0.5) - 0.25).abs() < f32::EPSILON);
        assert!(params.bool_or("reverse_order", false));
        assert_eq!(params.str_or("model", "x"), "qwen-plus");
        assert_eq!(
            params.str_list("separators"),
            Some(vec!["\n\n".to_string(), "\n".to_string()])
        );
    }

    #[test]
    fn test_wrong_type_falls_back() {
        let params = Params::new().with("k", "five");
        assert_eq!(params.usize_or("k", 5), 5);
    }

    #[test]
    fn test_float_accepted_for_usize() {
        let params = Params::new().with("k", 3.0);
        assert_eq!(params.opt_usize("k"), Some(3));
    }

    #[test]
    fn test_strategy_reads_type_alias() {
        let params = Params::new().with("type", "BM25");
        assert_eq!(params.strategy_or("dense"), "bm25");
        assert_eq!(Params::new().strategy_or("dense"), "dense");
    }

    #[test]
    fn test_section_and_merge() {
        let mut params = Params::from_value(json!({"splitter": {"type": "semantic"}})).unwrap();
        assert_eq!(params.section("splitter").strategy_or("recursive"), "semantic");
        assert!(params.section("loader").is_empty());

        params.merge(&Params::new().with("k", 2));
        assert_eq!(params.usize_or("k", 0), 2);
    }

    #[test]
    fn test_remove_strategy() {
        let mut params = Params::new().with("type", "hyde").with("strategy", "hyde").with("k", 1);
        params.remove_strategy();
        assert_eq!(params.strategy_or("dense"), "dense");
        assert_eq!(params.remove("k"), Some(json!(1)));
        assert!(params.is_empty());
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(Params::from_value(json!([1, 2])).is_err());
        assert!(Params::from_value(Value::Null).unwrap().is_empty());
    }
}
