use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;
use crate::response::Response;
use crate::traits::ToolSet;

/// An execution request against the agent graph.
///
/// `include_downstream` defaults to true and `include_upstream` to false:
/// executing an agent runs it and everything that consumes it, but not the
/// agents it depends on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub previous_results: BTreeMap<String, Response>,
    #[serde(default)]
    pub include_upstream: bool,
    #[serde(default = "default_true")]
    pub include_downstream: bool,
    #[serde(default, skip_serializing_if = "ToolSet::is_empty")]
    pub tools: ToolSet,
}

fn default_true() -> bool {
    true
}

impl Request {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
            metadata: Metadata::new(),
            previous_results: BTreeMap::new(),
            include_upstream: false,
            include_downstream: true,
            tools: ToolSet::new(),
        }
    }

    /// The context a template sees when rendering against this request.
    pub fn template_data(&self) -> serde_json::Value {
        let previous: serde_json::Map<String, serde_json::Value> = self
            .previous_results
            .iter()
            .map(|(name, resp)| (name.clone(), resp.template_data()))
            .collect();
        serde_json::json!({
            "name": self.name,
            "payload": self.payload,
            "metadata": self.metadata,
            "previous_results": previous,
            "include_upstream": self.include_upstream,
            "include_downstream": self.include_downstream,
        })
    }
}
