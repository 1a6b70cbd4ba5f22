//! Character records
//!
//! A character is an opaque JSON document identified by its `id` field.
//! Only the identifier is interpreted, and only to name the backing file;
//! it may be a string or a number. Every other field is carried through
//! untouched, in its original order, so that front ends can store whatever
//! persona data they need.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A persisted conversational persona
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    /// Identifier, whose string or number form is the file stem on disk
    pub id: Value,
    /// Remaining fields, kept verbatim
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Character {
    /// Create a character with no fields besides its identifier
    pub fn new(id: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Storage key derived from `id`: the string itself or the number's text.
    ///
    /// `None` for ids of any other JSON type.
    pub fn key(&self) -> Option<String> {
        match &self.id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Builder-style setter for an arbitrary field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Look up a string field such as `name` or `description`
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Display name, if the record carries one
    pub fn name(&self) -> Option<&str> {
        self.str_field("name")
    }
}
