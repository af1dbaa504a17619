//! Case-insensitive metadata map carried by requests and responses.
//!
//! Keys are canonicalized with MIME-header rules (`next-agents` and
//! `NEXT-AGENTS` both address `Next-Agents`), values are a small set of
//! scalar and list shapes. The JSON form round-trips byte blobs through
//! base64 and keeps integer-valued numbers integral.

use std::collections::btree_map;
use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const METADATA_KEY_FINISH_REASON: &str = "Finish-Reason";
pub const METADATA_KEY_FINISH_MESSAGE: &str = "Finish-Message";

const KEY_USAGE_INPUT_TOKENS: &str = "Usage-Input-Tokens";
const KEY_USAGE_OUTPUT_TOKENS: &str = "Usage-Output-Tokens";
const KEY_USAGE_TOTAL_TOKENS: &str = "Usage-Total-Tokens";

/// One metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Str(String),
    List(Vec<String>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl MetadataValue {
    /// Coerce to a list of strings. Scalars become one-element lists,
    /// bytes become a single base64 string.
    pub fn to_strings(&self) -> Vec<String> {
        match self {
            MetadataValue::Str(s) => vec![s.clone()],
            MetadataValue::List(v) => v.clone(),
            MetadataValue::Int(n) => vec![n.to_string()],
            MetadataValue::Float(n) => vec![n.to_string()],
            MetadataValue::Bool(b) => vec![b.to_string()],
            MetadataValue::Bytes(b) => vec![BASE64.encode(b)],
        }
    }
}

/// Canonicalize a key with MIME-header rules: hyphen-separated segments,
/// first letter upper-cased, the rest lowered. Keys containing characters
/// that are not valid header tokens pass through unchanged.
pub fn canonical_key(key: &str) -> String {
    const TOKEN_EXTRA: &[u8] = b"!#$%&'*+-.^_`|~";
    let valid = key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || TOKEN_EXTRA.contains(&b));
    if key.is_empty() || !valid {
        return key.to_string();
    }
    let mut out = String::with_capacity(key.len());
    let mut upper = true;
    for b in key.bytes() {
        let c = if upper {
            b.to_ascii_uppercase()
        } else {
            b.to_ascii_lowercase()
        };
        out.push(c as char);
        upper = b == b'-';
    }
    out
}

/// Canonical-header-keyed map of mixed scalar / list values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(&canonical_key(key))
    }

    pub fn set(&mut self, key: &str, value: MetadataValue) {
        self.0.insert(canonical_key(key), value);
    }

    pub fn del(&mut self, key: &str) -> Option<MetadataValue> {
        self.0.remove(&canonical_key(key))
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(&canonical_key(key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, MetadataValue> {
        self.0.iter()
    }

    pub fn set_string(&mut self, key: &str, value: impl Into<String>) {
        self.set(key, MetadataValue::Str(value.into()));
    }

    pub fn set_strings(&mut self, key: &str, values: Vec<String>) {
        self.set(key, MetadataValue::List(values));
    }

    /// Append to an existing list value; any non-list value is replaced by
    /// a fresh single-string entry.
    pub fn add_string(&mut self, key: &str, value: impl Into<String>) {
        let key = canonical_key(key);
        match self.0.get_mut(&key) {
            Some(MetadataValue::List(list)) => list.push(value.into()),
            _ => {
                self.0.insert(key, MetadataValue::Str(value.into()));
            }
        }
    }

    pub fn set_int(&mut self, key: &str, value: i64) {
        self.set(key, MetadataValue::Int(value));
    }

    pub fn set_float(&mut self, key: &str, value: f64) {
        self.set(key, MetadataValue::Float(value));
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.set(key, MetadataValue::Bool(value));
    }

    pub fn set_bytes(&mut self, key: &str, value: Vec<u8>) {
        self.set(key, MetadataValue::Bytes(value));
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get_strings(key).into_iter().next()
    }

    /// Typed list access with scalar coercion; absent keys yield an empty
    /// list.
    pub fn get_strings(&self, key: &str) -> Vec<String> {
        self.get(key).map(MetadataValue::to_strings).unwrap_or_default()
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(MetadataValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(MetadataValue::Float(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(MetadataValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.get(key) {
            Some(MetadataValue::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    /// Pure merge: clone, then overwrite with `other`'s entries.
    pub fn merge(&self, other: &Metadata) -> Metadata {
        let mut merged = self.clone();
        merged.merge_in_place(other);
        merged
    }

    pub fn merge_in_place(&mut self, other: &Metadata) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn set_input_tokens(&mut self, tokens: i64) {
        self.set_int(KEY_USAGE_INPUT_TOKENS, tokens);
    }

    pub fn set_output_tokens(&mut self, tokens: i64) {
        self.set_int(KEY_USAGE_OUTPUT_TOKENS, tokens);
    }

    pub fn set_total_tokens(&mut self, tokens: i64) {
        self.set_int(KEY_USAGE_TOTAL_TOKENS, tokens);
    }

    pub fn input_tokens(&self) -> Option<i64> {
        self.get_int(KEY_USAGE_INPUT_TOKENS)
    }

    pub fn output_tokens(&self) -> Option<i64> {
        self.get_int(KEY_USAGE_OUTPUT_TOKENS)
    }

    pub fn total_tokens(&self) -> Option<i64> {
        self.get_int(KEY_USAGE_TOTAL_TOKENS)
    }
}

impl std::fmt::Display for Metadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (key, value) in &self.0 {
            writeln!(f, "{}: {}", key, value.to_strings().join(", "))?;
        }
        Ok(())
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            match value {
                MetadataValue::Str(s) => map.serialize_entry(key, s)?,
                MetadataValue::List(v) => map.serialize_entry(key, v)?,
                MetadataValue::Int(n) => map.serialize_entry(key, n)?,
                MetadataValue::Float(n) => map.serialize_entry(key, n)?,
                MetadataValue::Bool(b) => map.serialize_entry(key, b)?,
                MetadataValue::Bytes(b) => map.serialize_entry(key, &BASE64.encode(b))?,
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct MetadataVisitor;

        impl<'de> Visitor<'de> for MetadataVisitor {
            type Value = Metadata;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a map of metadata values")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Metadata, A::Error> {
                let mut metadata = Metadata::new();
                while let Some((key, value)) =
                    access.next_entry::<String, serde_json::Value>()?
                {
                    let value = decode_value(&value).ok_or_else(|| {
                        serde::de::Error::custom("unsupported metadata value type")
                    })?;
                    metadata.set(&key, value);
                }
                Ok(metadata)
            }
        }

        deserializer.deserialize_map(MetadataVisitor)
    }
}

/// Map a JSON value onto a typed metadata value. Strings that decode as
/// base64 come back as bytes, integer-valued numbers as `Int`, arrays must
/// be homogeneous strings.
fn decode_value(value: &serde_json::Value) -> Option<MetadataValue> {
    match value {
        serde_json::Value::String(s) => match BASE64.decode(s) {
            Ok(bytes) => Some(MetadataValue::Bytes(bytes)),
            Err(_) => Some(MetadataValue::Str(s.clone())),
        },
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(MetadataValue::Int(i))
            } else {
                n.as_f64().map(MetadataValue::Float)
            }
        }
        serde_json::Value::Bool(b) => Some(MetadataValue::Bool(*b)),
        serde_json::Value::Array(items) => {
            let mut strings = Vec::with_capacity(items.len());
            for item in items {
                strings.push(item.as_str()?.to_string());
            }
            Some(MetadataValue::List(strings))
        }
        _ => None,
    }
}
