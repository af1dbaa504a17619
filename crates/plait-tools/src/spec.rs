//! Remote-tool discovery documents and their cache.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Well-known path serving the specification document.
pub const DEFAULT_SPECIFICATION_PATH: &str = "/.well-known/estellm-tool-specification";

/// A remote tool's discovery document.
///
/// Unknown fields are carried in `extra` and marshal flat: the JSON form is
/// a single object with the core fields and the extras side by side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub input_schema: serde_json::Value,
    pub worker_endpoint: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Specifications keyed by endpoint URL, expiring by wall-clock delta.
pub struct SpecificationCache {
    entries: RwLock<HashMap<String, (Specification, DateTime<Utc>)>>,
    ttl: Duration,
}

const DEFAULT_TTL_MINUTES: i64 = 15;

impl SpecificationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, endpoint: &str) -> Option<Specification> {
        {
            let entries = self.entries.read().expect("specification cache poisoned");
            match entries.get(endpoint) {
                None => return None,
                Some((spec, cached_at)) => {
                    if Utc::now() - *cached_at <= self.ttl {
                        return Some(spec.clone());
                    }
                }
            }
            // expired: release the read lock before deleting; the window in
            // between is an acceptable staleness race
        }
        self.delete(endpoint);
        None
    }

    pub fn set(&self, endpoint: impl Into<String>, spec: Specification) {
        self.set_at(endpoint, spec, Utc::now());
    }

    pub(crate) fn set_at(
        &self,
        endpoint: impl Into<String>,
        spec: Specification,
        cached_at: DateTime<Utc>,
    ) {
        self.entries
            .write()
            .expect("specification cache poisoned")
            .insert(endpoint.into(), (spec, cached_at));
    }

    pub fn delete(&self, endpoint: &str) {
        self.entries
            .write()
            .expect("specification cache poisoned")
            .remove(endpoint);
    }
}

impl Default for SpecificationCache {
    fn default() -> Self {
        Self::new(Duration::minutes(DEFAULT_TTL_MINUTES))
    }
}

static DEFAULT_CACHE: Lazy<SpecificationCache> = Lazy::new(SpecificationCache::default);

/// The shared process-wide cache with the default 15-minute TTL.
pub fn default_specification_cache() -> &'static SpecificationCache {
    &DEFAULT_CACHE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> Specification {
        Specification {
            name: "weather".to_string(),
            description: "current weather".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
            worker_endpoint: "/worker".to_string(),
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn extras_marshal_flat_and_round_trip() {
        let mut s = spec();
        s.extra.insert("version".to_string(), serde_json::json!("2024-01-01"));
        s.extra.insert("auth".to_string(), serde_json::json!({"kind": "none"}));

        let json = serde_json::to_value(&s).unwrap();
        // flat: extras live at the top level next to the core fields
        assert_eq!(json["name"], "weather");
        assert_eq!(json["version"], "2024-01-01");
        assert_eq!(json["auth"]["kind"], "none");

        let back: Specification = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);
        assert_eq!(back.extra.len(), 2);
    }

    #[test]
    fn cache_returns_fresh_entries() {
        let cache = SpecificationCache::default();
        cache.set("http://tool.example", spec());
        assert_eq!(cache.get("http://tool.example").unwrap().name, "weather");
        assert!(cache.get("http://other.example").is_none());
    }

    #[test]
    fn cache_expires_by_wall_clock() {
        let cache = SpecificationCache::default();
        cache.set_at(
            "http://tool.example",
            spec(),
            Utc::now() - Duration::minutes(16),
        );
        assert!(cache.get("http://tool.example").is_none());
        // the expired entry was removed, not just hidden
        assert!(cache
            .entries
            .read()
            .unwrap()
            .get("http://tool.example")
            .is_none());
    }

    #[test]
    fn cache_delete_is_idempotent() {
        let cache = SpecificationCache::default();
        cache.set("k", spec());
        cache.delete("k");
        cache.delete("k");
        assert!(cache.get("k").is_none());
    }
}
