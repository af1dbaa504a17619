//! Deterministic synthetic values from JSON schemas.
//!
//! The loader pre-renders every prompt once with generated data so that
//! template-level `ref()` calls surface as implicit dependencies. The
//! generator is seeded and walks object properties in sorted order, so a
//! given (seed, schema) pair always yields the same value.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

use plait_core::error::Result;

pub trait ValueGenerator: Send {
    fn generate(&mut self, schema: &Value) -> Result<Value>;
}

pub struct SchemaValueGenerator {
    rng: StdRng,
}

impl SchemaValueGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    fn generate_value(&mut self, schema: &Value) -> Value {
        // a schema without a string `type` yields null, even when it carries
        // enum/example/default; only object properties get the shortcut
        // checks without a type (see the object branch)
        let Some(schema_type) = schema.get("type").and_then(Value::as_str) else {
            return Value::Null;
        };
        if let Some(value) = self.shortcut_value(schema) {
            return value;
        }
        match schema_type {
            "string" => Value::String("example_string".to_string()),
            "number" => {
                let n: f64 = self.rng.gen::<f64>() * 100.0;
                serde_json::json!(n)
            }
            "integer" => serde_json::json!(self.rng.gen_range(0..100)),
            "boolean" => Value::Bool(self.rng.gen_range(0..2) == 1),
            "array" => match schema.get("items") {
                Some(items) if items.is_object() => {
                    let values: Vec<Value> =
                        (0..3).map(|_| self.generate_value(items)).collect();
                    Value::Array(values)
                }
                _ => Value::Array(Vec::new()),
            },
            "object" => {
                let mut data = serde_json::Map::new();
                if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                    let mut keys: Vec<&String> = properties.keys().collect();
                    keys.sort();
                    for key in keys {
                        let prop = &properties[key.as_str()];
                        if !prop.is_object() {
                            continue;
                        }
                        let value = match self.shortcut_value(prop) {
                            Some(value) => value,
                            None => self.generate_value(prop),
                        };
                        data.insert(key.clone(), value);
                    }
                }
                Value::Object(data)
            }
            _ => Value::Null,
        }
    }

    /// The enum/example/default shortcuts, in precedence order.
    fn shortcut_value(&mut self, schema: &Value) -> Option<Value> {
        if let Some(enum_values) = schema.get("enum").and_then(Value::as_array) {
            if !enum_values.is_empty() {
                let idx = self.rng.gen_range(0..enum_values.len());
                return Some(enum_values[idx].clone());
            }
        }
        if let Some(example) = schema.get("example") {
            return Some(example.clone());
        }
        if let Some(default) = schema.get("default") {
            return Some(default.clone());
        }
        None
    }
}

impl ValueGenerator for SchemaValueGenerator {
    fn generate(&mut self, schema: &Value) -> Result<Value> {
        Ok(self.generate_value(schema))
    }
}

impl ValueGenerator for Box<dyn ValueGenerator> {
    fn generate(&mut self, schema: &Value) -> Result<Value> {
        (**self).generate(schema)
    }
}
