//! Label values and ordered label sets.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::array::NdArray;
use crate::error::StoreError;

use super::bits;

// =============================================================================
// LabelValue
// =============================================================================

/// A label value. Values are stored as given and never coerced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum LabelValue {
    String(String),
    Int(i64),
    Float(#[serde(with = "bits")] f64),
    Bool(bool),
    /// Fixed-shape numeric array
    Array(NdArray),
}

impl LabelValue {
    /// Name of the value's kind.
    pub const fn kind(&self) -> &'static str {
        match self {
            LabelValue::String(_) => "string",
            LabelValue::Int(_) => "int",
            LabelValue::Float(_) => "float",
            LabelValue::Bool(_) => "bool",
            LabelValue::Array(_) => "array",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            LabelValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            LabelValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            LabelValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            LabelValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            LabelValue::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Convert a JSON value.
    ///
    /// Strings, integers, floats and booleans map to the matching kind.
    /// Rectangular arrays of numbers become `i64` arrays (all integers) or
    /// `f64` arrays. Null, objects, ragged or mixed arrays and integers outside
    /// `i64` fail with `UnsupportedType`.
    pub fn from_json(value: &Value) -> Result<Self, StoreError> {
        match value {
            Value::String(s) => Ok(LabelValue::String(s.clone())),
            Value::Bool(b) => Ok(LabelValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(LabelValue::Int(i))
                } else if n.is_u64() {
                    Err(StoreError::UnsupportedType(format!("integer {} exceeds i64", n)))
                } else {
                    n.as_f64()
                        .map(LabelValue::Float)
                        .ok_or_else(|| StoreError::UnsupportedType(n.to_string()))
                }
            }
            Value::Array(_) => json_array(value).map(LabelValue::Array),
            Value::Null => Err(StoreError::UnsupportedType("null".to_string())),
            Value::Object(_) => Err(StoreError::UnsupportedType("object".to_string())),
        }
    }

    /// JSON rendering for display. Arrays are summarized by dtype and shape.
    pub fn to_json(&self) -> Value {
        match self {
            LabelValue::String(s) => Value::from(s.as_str()),
            LabelValue::Int(v) => Value::from(*v),
            LabelValue::Float(v) => Value::from(*v),
            LabelValue::Bool(v) => Value::from(*v),
            LabelValue::Array(a) => serde_json::json!({
                "dtype": a.dtype().name(),
                "shape": a.shape(),
            }),
        }
    }
}

impl PartialEq for LabelValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LabelValue::String(a), LabelValue::String(b)) => a == b,
            (LabelValue::Int(a), LabelValue::Int(b)) => a == b,
            (LabelValue::Float(a), LabelValue::Float(b)) => a.to_bits() == b.to_bits(),
            (LabelValue::Bool(a), LabelValue::Bool(b)) => a == b,
            (LabelValue::Array(a), LabelValue::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for LabelValue {
    fn from(v: &str) -> Self {
        LabelValue::String(v.to_string())
    }
}

impl From<String> for LabelValue {
    fn from(v: String) -> Self {
        LabelValue::String(v)
    }
}

impl From<i64> for LabelValue {
    fn from(v: i64) -> Self {
        LabelValue::Int(v)
    }
}

impl From<i32> for LabelValue {
    fn from(v: i32) -> Self {
        LabelValue::Int(v as i64)
    }
}

impl From<f64> for LabelValue {
    fn from(v: f64) -> Self {
        LabelValue::Float(v)
    }
}

impl From<bool> for LabelValue {
    fn from(v: bool) -> Self {
        LabelValue::Bool(v)
    }
}

impl From<NdArray> for LabelValue {
    fn from(v: NdArray) -> Self {
        LabelValue::Array(v)
    }
}

/// Flatten a rectangular JSON array of numbers.
fn json_array(value: &Value) -> Result<NdArray, StoreError> {
    fn walk<'a>(
        value: &'a Value,
        depth: usize,
        shape: &mut Vec<usize>,
        leaves: &mut Vec<&'a serde_json::Number>,
    ) -> Result<(), StoreError> {
        match value {
            Value::Array(items) => {
                if depth == shape.len() {
                    if !leaves.is_empty() {
                        return Err(StoreError::UnsupportedType("ragged array".to_string()));
                    }
                    shape.push(items.len());
                } else if shape[depth] != items.len() {
                    return Err(StoreError::UnsupportedType("ragged array".to_string()));
                }
                for item in items {
                    walk(item, depth + 1, shape, leaves)?;
                }
                Ok(())
            }
            Value::Number(n) if depth == shape.len() => {
                leaves.push(n);
                Ok(())
            }
            Value::Number(_) => Err(StoreError::UnsupportedType("ragged array".to_string())),
            other => Err(StoreError::UnsupportedType(format!(
                "array element {}",
                other
            ))),
        }
    }

    let mut shape = Vec::new();
    let mut leaves = Vec::new();
    walk(value, 0, &mut shape, &mut leaves)?;

    if leaves.len() != shape.iter().product::<usize>() {
        return Err(StoreError::UnsupportedType("ragged array".to_string()));
    }

    let ints: Option<Vec<i64>> = leaves.iter().map(|n| n.as_i64()).collect();
    match ints {
        Some(values) => NdArray::from_vec(shape, values),
        None => {
            let floats: Option<Vec<f64>> = leaves.iter().map(|n| n.as_f64()).collect();
            let values = floats
                .ok_or_else(|| StoreError::UnsupportedType("non-numeric array".to_string()))?;
            NdArray::from_vec(shape, values)
        }
    }
}

// =============================================================================
// Labels
// =============================================================================

/// An ordered set of labels.
///
/// Keys are unique and non-empty. Overwriting a key keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels {
    entries: Vec<(String, LabelValue)>,
}

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a label, returning the previous value if the key existed.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<LabelValue>,
    ) -> Result<Option<LabelValue>, StoreError> {
        let key = key.into();
        if key.is_empty() {
            return Err(StoreError::InvalidKey(key));
        }
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => Ok(Some(std::mem::replace(&mut entry.1, value))),
            None => {
                self.entries.push((key, value));
                Ok(None)
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&LabelValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<LabelValue> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LabelValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check keys of a decoded set (manifest input is untrusted).
    pub(crate) fn validate(&self) -> Result<(), StoreError> {
        for (i, (key, _)) in self.entries.iter().enumerate() {
            if key.is_empty() {
                return Err(StoreError::InvalidKey(key.clone()));
            }
            if self.entries[..i].iter().any(|(k, _)| k == key) {
                return Err(StoreError::DuplicateKey(key.clone()));
            }
        }
        Ok(())
    }
}
