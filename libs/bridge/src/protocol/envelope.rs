//! Wire Envelope
//!
//! Tagged JSON representation of a value crossing the process boundary.
//!
//! ## Shapes
//!
//! - `{"id": h}`: remote reference, never carries `value`
//! - `{"value": v}`: primitive, or a sequence of nested envelopes for arrays
//! - `{"type": "dict", "keys": [..], "values": [..]}`: ordered dictionary
//! - `{"type": t, "value": v}`: tagged scalar (date millis, base64 binary,
//!   callback handle)
//! - `{"type": "undefined"}`
//!
//! `value` distinguishes an absent key from an explicit `null`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as Json;

use crate::value::RemoteId;
use crate::{BridgeError, Result};

/// Wire type tags
///
/// The known tags form a closed set; anything else is `Custom` and may be
/// claimed by a converter registered in [`super::ConverterTable`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TypeTag {
    Undefined,
    Function,
    Date,
    Binary,
    Dict,
    Custom(String),
}

impl TypeTag {
    pub fn as_str(&self) -> &str {
        match self {
            TypeTag::Undefined => "undefined",
            TypeTag::Function => "function",
            TypeTag::Date => "date",
            TypeTag::Binary => "binary",
            TypeTag::Dict => "dict",
            TypeTag::Custom(name) => name,
        }
    }
}

impl From<String> for TypeTag {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "undefined" => TypeTag::Undefined,
            "function" => TypeTag::Function,
            "date" => TypeTag::Date,
            "binary" => TypeTag::Binary,
            "dict" => TypeTag::Dict,
            _ => TypeTag::Custom(tag),
        }
    }
}

impl From<&str> for TypeTag {
    fn from(tag: &str) -> Self {
        TypeTag::from(tag.to_string())
    }
}

impl From<TypeTag> for String {
    fn from(tag: TypeTag) -> Self {
        match tag {
            TypeTag::Custom(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

/// Contents of an envelope's `value` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// Array elements, each its own envelope
    List(Vec<Envelope>),
    /// Primitive JSON value (including `null`)
    Scalar(Json),
}

/// Tagged wire representation of one value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<TypeTag>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub value: Option<Payload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RemoteId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Envelope>>,
}

/// A present `value` key is `Some` even when it holds `null`
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Payload>, D::Error>
where
    D: Deserializer<'de>,
{
    Payload::deserialize(deserializer).map(Some)
}

impl Envelope {
    pub fn undefined() -> Self {
        Self {
            tag: Some(TypeTag::Undefined),
            ..Self::default()
        }
    }

    pub fn scalar(value: Json) -> Self {
        Self {
            value: Some(Payload::Scalar(value)),
            ..Self::default()
        }
    }

    pub fn list(items: Vec<Envelope>) -> Self {
        Self {
            value: Some(Payload::List(items)),
            ..Self::default()
        }
    }

    pub fn reference(id: RemoteId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn tagged(tag: TypeTag, value: Json) -> Self {
        Self {
            tag: Some(tag),
            value: Some(Payload::Scalar(value)),
            ..Self::default()
        }
    }

    pub fn dict(keys: Vec<String>, values: Vec<Envelope>) -> Self {
        Self {
            tag: Some(TypeTag::Dict),
            keys: Some(keys),
            values: Some(values),
            ..Self::default()
        }
    }

    /// Scalar payload, if the envelope carries one
    pub fn scalar_value(&self) -> Option<&Json> {
        match &self.value {
            Some(Payload::Scalar(json)) => Some(json),
            _ => None,
        }
    }

    /// Check the structural invariants of this envelope (not its children)
    pub fn validate(&self) -> Result<()> {
        if self.id.is_some() && self.value.is_some() {
            return Err(BridgeError::protocol(
                "envelope carries both a remote id and a value",
            ));
        }

        match (&self.keys, &self.values) {
            (Some(keys), Some(values)) => {
                if keys.len() != values.len() {
                    return Err(BridgeError::protocol(format!(
                        "dict envelope has {} keys but {} values",
                        keys.len(),
                        values.len()
                    )));
                }
                for (index, key) in keys.iter().enumerate() {
                    if keys[..index].contains(key) {
                        return Err(BridgeError::protocol(format!(
                            "dict envelope repeats key '{}'",
                            key
                        )));
                    }
                }
            }
            (None, None) => {}
            _ => {
                return Err(BridgeError::protocol(
                    "dict envelope must carry both keys and values",
                ))
            }
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<Json> {
        serde_json::to_value(self)
            .map_err(|e| BridgeError::protocol_with_source("failed to encode envelope", e))
    }
}
