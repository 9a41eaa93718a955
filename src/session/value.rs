//! Typed view over a single session value.
//!
//! Every accessor degrades to the type's zero value when the key is absent or
//! holds something else, so handlers never have to deal with a decode error.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionValue(Option<Value>);

impl SessionValue {
    pub(crate) fn new(value: Option<Value>) -> Self {
        Self(value)
    }

    /// The raw value, if the key was present
    pub fn value(&self) -> Option<&Value> {
        self.0.as_ref()
    }

    pub fn into_value(self) -> Option<Value> {
        self.0
    }

    pub fn is_present(&self) -> bool {
        self.0.is_some()
    }

    pub fn string(&self) -> String {
        match &self.0 {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    pub fn bool(&self) -> bool {
        matches!(self.0, Some(Value::Bool(true)))
    }

    /// Byte arrays are stored as arrays of numbers in 0..=255
    pub fn bytes(&self) -> Vec<u8> {
        let Some(Value::Array(items)) = &self.0 else {
            return Vec::new();
        };
        items
            .iter()
            .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect::<Option<Vec<u8>>>()
            .unwrap_or_default()
    }

    pub fn int(&self) -> i64 {
        self.int64()
    }

    pub fn int32(&self) -> i32 {
        i32::try_from(self.int64()).unwrap_or(0)
    }

    pub fn int64(&self) -> i64 {
        self.0.as_ref().and_then(Value::as_i64).unwrap_or(0)
    }

    /// Only values stored as floats; integers read as `0.0`
    pub fn float64(&self) -> f64 {
        match &self.0 {
            Some(Value::Number(n)) if n.is_f64() => n.as_f64().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    pub fn float32(&self) -> f32 {
        self.float64() as f32
    }

    /// A stored [`SystemTime`], or the Unix epoch
    pub fn time(&self) -> SystemTime {
        self.decode().unwrap_or(UNIX_EPOCH)
    }

    /// Decode into any deserializable type, `None` on mismatch
    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        self.0
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
