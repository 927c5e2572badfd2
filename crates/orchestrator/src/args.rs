//! Read-only accessor over a tool call's raw JSON arguments.

use std::sync::OnceLock;

use {
    anyhow::Context,
    serde::de::DeserializeOwned,
    serde_json::Value,
};

/// Raw JSON argument payload of one tool call.
///
/// Lookups take dotted paths (`"filter.tags"`, `"urls.0"`). The payload is
/// parsed once on first lookup; malformed JSON makes every lookup miss while
/// [`Args::original_argument`] still returns the raw text.
#[derive(Debug, Clone)]
pub struct Args {
    raw: String,
    parsed: OnceLock<Option<Value>>,
}

impl Args {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            parsed: OnceLock::new(),
        }
    }

    pub fn original_argument(&self) -> &str {
        &self.raw
    }

    fn root(&self) -> Option<&Value> {
        self.parsed
            .get_or_init(|| serde_json::from_str(&self.raw).ok())
            .as_ref()
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = self.root()?;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(Value::as_bool)
    }

    /// Values at `path` as strings.
    ///
    /// Array elements are rendered one per entry (non-string scalars in their
    /// JSON form); a lone scalar becomes a single-entry list; a missing or
    /// `null` value yields an empty list.
    pub fn get_strings(&self, path: &str) -> Vec<String> {
        match self.get(path) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().map(value_to_string).collect(),
            Some(other) => vec![value_to_string(other)],
        }
    }

    /// Deserialize the whole payload into a typed input struct.
    pub fn parse<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_str(&self.raw).context("invalid tool arguments")
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
