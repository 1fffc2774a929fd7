//! Local value model
//!
//! Values are what callers pass into and get back from remote operations.
//! Remote state is never copied here: objects owned by the remote process
//! appear as [`RemoteRef`] handles.

use std::fmt;

use base64::prelude::*;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as Json};

use crate::registry::Callback;

/// Opaque handle the remote process uses to name one of its objects
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteId {
    Int(i64),
    Str(String),
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteId::Int(id) => write!(f, "{}", id),
            RemoteId::Str(id) => f.write_str(id),
        }
    }
}

impl From<i64> for RemoteId {
    fn from(id: i64) -> Self {
        RemoteId::Int(id)
    }
}

impl From<&str> for RemoteId {
    fn from(id: &str) -> Self {
        RemoteId::Str(id.to_string())
    }
}

impl From<String> for RemoteId {
    fn from(id: String) -> Self {
        RemoteId::Str(id)
    }
}

/// Reference to state owned by the remote process
///
/// `type_tag` is the wire type tag the reference arrived with, if any
/// (e.g. a custom kind such as `"object"` that no local converter claimed).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteRef {
    pub id: RemoteId,
    pub type_tag: Option<String>,
}

impl RemoteRef {
    pub fn new(id: impl Into<RemoteId>) -> Self {
        Self {
            id: id.into(),
            type_tag: None,
        }
    }

    pub fn with_type(id: impl Into<RemoteId>, type_tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_tag: Some(type_tag.into()),
        }
    }
}

/// Ordered dictionary with unique keys
///
/// Key order is preserved because the wire form encodes dictionaries as
/// parallel `keys`/`values` sequences.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dict {
    entries: Vec<(String, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; replacing keeps the key's original position
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Value)> for Dict {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut dict = Dict::new();
        for (key, value) in iter {
            dict.insert(key, value);
        }
        dict
    }
}

impl IntoIterator for Dict {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// A value crossing the process boundary
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// Millisecond precision on the wire; `From` truncates to match
    Date(DateTime<Utc>),
    Binary(Vec<u8>),
    Array(Vec<Value>),
    Dict(Dict),
    Remote(RemoteRef),
    Function(Callback),
}

impl Value {
    /// Convert plain JSON (no envelopes) into a value
    pub fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.clone()),
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => Value::Dict(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Lossy plain-JSON rendering for display and logging
    ///
    /// Dates become RFC 3339 strings, binary becomes base64, remote
    /// references become `{"id": ..}` and callbacks become `null`.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Undefined | Value::Null | Value::Function(_) => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => Json::Number(n.clone()),
            Value::String(s) => Json::String(s.clone()),
            Value::Date(d) => Json::String(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Value::Binary(bytes) => Json::String(BASE64_STANDARD.encode(bytes)),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Dict(dict) => {
                let map: Map<String, Json> = dict
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect();
                Json::Object(map)
            }
            Value::Remote(remote) => {
                let mut map = Map::new();
                map.insert("id".to_string(), serde_json::to_value(&remote.id).unwrap_or(Json::Null));
                Json::Object(map)
            }
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_remote(&self) -> Option<&RemoteRef> {
        match self {
            Value::Remote(remote) => Some(remote),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(dict) => Some(dict),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl From<f64> for Value {
    /// Non-finite floats have no JSON form and become `Null`
    fn from(n: f64) -> Self {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d.trunc_subsecs(3))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Dict> for Value {
    fn from(dict: Dict) -> Self {
        Value::Dict(dict)
    }
}

impl From<RemoteRef> for Value {
    fn from(remote: RemoteRef) -> Self {
        Value::Remote(remote)
    }
}

impl From<Callback> for Value {
    fn from(callback: Callback) -> Self {
        Value::Function(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dict_preserves_order_and_uniqueness() {
        let mut dict = Dict::new();
        dict.insert("b", Value::from(1));
        dict.insert("a", Value::from(2));
        let previous = dict.insert("b", Value::from(3));

        assert_eq!(previous, Some(Value::from(1)));
        assert_eq!(dict.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(dict.get("b"), Some(&Value::from(3)));
        assert_eq!(dict.len(), 2);

        assert_eq!(dict.remove("b"), Some(Value::from(3)));
        assert!(!dict.contains_key("b"));
    }

    #[test]
    fn test_from_json() {
        let value = Value::from_json(&json!({"name": "x", "tags": [1, null, true]}));
        let dict = value.as_dict().unwrap();

        assert_eq!(dict.get("name"), Some(&Value::from("x")));
        assert_eq!(
            dict.get("tags"),
            Some(&Value::Array(vec![Value::from(1), Value::Null, Value::Bool(true)]))
        );
    }

    #[test]
    fn test_to_json_is_lossy_for_special_values() {
        let date = DateTime::from_timestamp_millis(1_500_000_000_123).unwrap();
        let value = Value::Array(vec![
            Value::Date(date),
            Value::Binary(vec![1, 2, 3]),
            Value::Remote(RemoteRef::new(7)),
            Value::Undefined,
        ]);

        assert_eq!(
            value.to_json(),
            json!(["2017-07-14T02:40:00.123Z", "AQID", {"id": 7}, null])
        );
    }

    #[test]
    fn test_remote_id_wire_forms() {
        let int: RemoteId = serde_json::from_value(json!(12)).unwrap();
        let text: RemoteId = serde_json::from_value(json!("realm-1")).unwrap();

        assert_eq!(int, RemoteId::Int(12));
        assert_eq!(text, RemoteId::from("realm-1"));
        assert_eq!(text.to_string(), "realm-1");
    }

    #[test]
    fn test_non_finite_float_becomes_null() {
        assert_eq!(Value::from(f64::NAN), Value::Null);
        assert_eq!(Value::from(1.5).as_f64(), Some(1.5));
    }
}
