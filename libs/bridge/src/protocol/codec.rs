//! Envelope Codec
//!
//! Converts [`Value`]s to and from [`Envelope`]s. Callables are registered
//! in the shared [`CallbackRegistry`] on the way out and looked up on the
//! way back in. Remote references pass through as bare handles.
//!
//! Known wire tags are decoded by an exhaustive match; custom tags may be
//! claimed by converters registered in a [`ConverterTable`] before the
//! codec is built.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::prelude::*;
use chrono::DateTime;
use parking_lot::Mutex;
use serde_json::Value as Json;
use tracing::{trace, warn};

use super::envelope::{Envelope, Payload, TypeTag};
use crate::registry::{CallbackHandle, CallbackRegistry};
use crate::value::{Dict, RemoteId, RemoteRef, Value};
use crate::{BridgeError, Result};

/// Decoder for a custom wire tag: `(codec, context, envelope) -> value`
pub type Converter =
    Arc<dyn Fn(&Codec, Option<&RemoteId>, &Envelope) -> Result<Value> + Send + Sync>;

/// Extension table of decoders keyed by custom type tag
#[derive(Clone, Default)]
pub struct ConverterTable {
    converters: HashMap<String, Converter>,
}

impl ConverterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder for a custom tag, replacing any previous one
    ///
    /// Built-in tags (`undefined`, `function`, `date`, `binary`, `dict`) are
    /// always decoded by the codec itself and cannot be overridden.
    pub fn register<F>(&mut self, tag: impl Into<String>, converter: F) -> Result<&mut Self>
    where
        F: Fn(&Codec, Option<&RemoteId>, &Envelope) -> Result<Value> + Send + Sync + 'static,
    {
        let tag = tag.into();
        if !matches!(TypeTag::from(tag.as_str()), TypeTag::Custom(_)) {
            return Err(BridgeError::configuration(
                format!("type tag '{}' is built in", tag),
                Some("converters"),
            ));
        }
        self.converters.insert(tag, Arc::new(converter));
        Ok(self)
    }

    pub fn get(&self, tag: &str) -> Option<&Converter> {
        self.converters.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.converters.contains_key(tag)
    }
}

impl fmt::Debug for ConverterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.converters.keys()).finish()
    }
}

/// Value/envelope converter bound to a callback registry
pub struct Codec {
    registry: Arc<Mutex<CallbackRegistry>>,
    converters: ConverterTable,
}

impl Codec {
    pub fn new(registry: Arc<Mutex<CallbackRegistry>>, converters: ConverterTable) -> Self {
        Self {
            registry,
            converters,
        }
    }

    pub fn registry(&self) -> &Arc<Mutex<CallbackRegistry>> {
        &self.registry
    }

    /// Encode a value; callables are registered as a side effect
    pub fn serialize(&self, context: Option<&RemoteId>, value: &Value) -> Envelope {
        match value {
            Value::Undefined => Envelope::undefined(),
            Value::Function(callback) => {
                let handle = self.registry.lock().register(callback, false);
                Envelope::tagged(TypeTag::Function, Json::from(handle.0))
            }
            Value::Null => Envelope::scalar(Json::Null),
            Value::Bool(b) => Envelope::scalar(Json::Bool(*b)),
            Value::Number(n) => Envelope::scalar(Json::Number(n.clone())),
            Value::String(s) => Envelope::scalar(Json::String(s.clone())),
            Value::Remote(remote) => Envelope::reference(remote.id.clone()),
            Value::Date(date) => Envelope::tagged(TypeTag::Date, Json::from(date.timestamp_millis())),
            Value::Array(items) => Envelope::list(
                items
                    .iter()
                    .map(|item| self.serialize(context, item))
                    .collect(),
            ),
            Value::Binary(bytes) => {
                Envelope::tagged(TypeTag::Binary, Json::String(BASE64_STANDARD.encode(bytes)))
            }
            Value::Dict(dict) => {
                let (keys, values) = dict
                    .iter()
                    .map(|(key, item)| (key.to_string(), self.serialize(context, item)))
                    .unzip();
                Envelope::dict(keys, values)
            }
        }
    }

    /// Decode an envelope
    pub fn deserialize(&self, context: Option<&RemoteId>, envelope: &Envelope) -> Result<Value> {
        envelope.validate()?;

        match &envelope.tag {
            Some(TypeTag::Binary) => self.decode_binary(envelope),
            Some(TypeTag::Date) => self.decode_date(envelope),
            Some(TypeTag::Dict) => self.decode_dict(context, envelope),
            Some(TypeTag::Function) => self.decode_function(envelope),
            Some(TypeTag::Custom(tag)) => match self.converters.get(tag) {
                Some(converter) => converter(self, context, envelope),
                None => self.decode_plain(context, envelope),
            },
            Some(TypeTag::Undefined) | None => self.decode_plain(context, envelope),
        }
    }

    /// Untagged (or unclaimed) envelope: reference, list, or scalar
    fn decode_plain(&self, context: Option<&RemoteId>, envelope: &Envelope) -> Result<Value> {
        if let Some(id) = &envelope.id {
            return Ok(Value::Remote(RemoteRef {
                id: id.clone(),
                type_tag: match &envelope.tag {
                    Some(TypeTag::Custom(tag)) => Some(tag.clone()),
                    _ => None,
                },
            }));
        }

        match &envelope.value {
            Some(Payload::List(items)) => items
                .iter()
                .map(|item| self.deserialize(context, item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Some(Payload::Scalar(json)) => Ok(Value::from_json(json)),
            None => Ok(Value::Undefined),
        }
    }

    fn decode_binary(&self, envelope: &Envelope) -> Result<Value> {
        let text = envelope
            .scalar_value()
            .and_then(Json::as_str)
            .ok_or_else(|| BridgeError::codec("binary envelope without base64 text"))?;
        BASE64_STANDARD
            .decode(text)
            .map(Value::Binary)
            .map_err(|e| BridgeError::codec(format!("invalid base64 in binary envelope: {}", e)))
    }

    fn decode_date(&self, envelope: &Envelope) -> Result<Value> {
        let json = envelope
            .scalar_value()
            .ok_or_else(|| BridgeError::codec("date envelope without a timestamp"))?;
        let millis = json
            .as_i64()
            .or_else(|| json.as_f64().map(|f| f.round() as i64))
            .ok_or_else(|| BridgeError::codec(format!("date envelope timestamp is not a number: {}", json)))?;
        DateTime::from_timestamp_millis(millis)
            .map(Value::Date)
            .ok_or_else(|| BridgeError::codec(format!("date out of range: {}", millis)))
    }

    fn decode_dict(&self, context: Option<&RemoteId>, envelope: &Envelope) -> Result<Value> {
        let (Some(keys), Some(values)) = (&envelope.keys, &envelope.values) else {
            return Err(BridgeError::codec("dict envelope without keys and values"));
        };

        let mut dict = Dict::new();
        for (key, item) in keys.iter().zip(values) {
            dict.insert(key.clone(), self.deserialize(context, item)?);
        }
        Ok(Value::Dict(dict))
    }

    /// Unknown handles decode as `Undefined`; the dispatcher reports them
    fn decode_function(&self, envelope: &Envelope) -> Result<Value> {
        let handle = envelope
            .scalar_value()
            .and_then(Json::as_u64)
            .map(CallbackHandle)
            .ok_or_else(|| BridgeError::codec("function envelope without a handle"))?;

        match self.registry.lock().resolve(handle) {
            Some(callback) => {
                trace!(%handle, "decoded callback reference");
                Ok(Value::Function(callback))
            }
            None => {
                warn!(%handle, "function envelope names an unregistered callback");
                Ok(Value::Undefined)
            }
        }
    }
}
