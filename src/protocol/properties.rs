//! Resource property bag
//!
//! The orchestrator capitalises the first letter of every property key it
//! forwards (`iotThingName` arrives as `IotThingName`), so lookups accept
//! either spelling of the first character.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Error;

/// String-keyed property map from a request envelope
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(Map<String, Value>);

impl Properties {
    /// Create an empty property bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Number of properties
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no properties
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up a raw value, tolerating first-letter case differences
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0
            .get(key)
            .or_else(|| self.0.get(&swap_first_case(key)))
    }

    /// Look up a value rendered as a string
    ///
    /// Scalars are stringified; objects and arrays are rendered as compact
    /// JSON. Null and empty strings count as absent.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            other => Some(other.to_string()),
        }
    }

    /// Look up a required string property
    pub fn require_str(&self, key: &str) -> Result<String, Error> {
        self.get_str(key)
            .ok_or_else(|| Error::validation(format!("missing required property {key}")))
    }

    /// Interpret a property as a boolean flag
    ///
    /// Accepts JSON booleans and the strings `true`, `yes`, and `1`. Anything
    /// else, including absence, is false.
    pub fn flag(&self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => {
                matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1")
            }
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            _ => false,
        }
    }
}

impl From<Map<String, Value>> for Properties {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn swap_first_case(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_uppercase() => first.to_lowercase().chain(chars).collect(),
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
