//! Core capabilities: agents and tools.
//!
//! Both are object-safe traits returning boxed futures so implementations
//! stay macro-free and composable behind `Arc<dyn …>`.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::request::Request;
use crate::writer::ResponseWriter;

/// A named executable unit: renders its prompt, calls a provider or acts as
/// a controller, and streams typed parts into the writer.
pub trait Agent: Send + Sync {
    fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        req: &'a Request,
        w: &'a mut (dyn ResponseWriter + 'a),
    ) -> BoxFuture<'a, Result<()>>;
}

/// Adapter turning a closure into an [`Agent`].
pub struct FnAgent<F>(F);

impl<F> FnAgent<F>
where
    F: for<'a> Fn(
            &'a ExecutionContext,
            &'a Request,
            &'a mut (dyn ResponseWriter + 'a),
        ) -> BoxFuture<'a, Result<()>>
        + Send
        + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Agent for FnAgent<F>
where
    F: for<'a> Fn(
            &'a ExecutionContext,
            &'a Request,
            &'a mut (dyn ResponseWriter + 'a),
        ) -> BoxFuture<'a, Result<()>>
        + Send
        + Sync,
{
    fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        req: &'a Request,
        w: &'a mut (dyn ResponseWriter + 'a),
    ) -> BoxFuture<'a, Result<()>> {
        (self.0)(ctx, req, w)
    }
}

/// A callable tool: JSON in, streamed parts out.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;
    fn call<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        input: serde_json::Value,
        w: &'a mut (dyn ResponseWriter + 'a),
    ) -> BoxFuture<'a, Result<()>>;
}

/// An ordered set of tools, unique by name. Later registrations overwrite
/// earlier ones in place.
#[derive(Clone, Default)]
pub struct ToolSet(Vec<Arc<dyn Tool>>);

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) {
        for tool in tools {
            match self.0.iter_mut().find(|t| t.name() == tool.name()) {
                Some(slot) => *slot = tool,
                None => self.0.push(tool),
            }
        }
    }

    pub fn push(&mut self, tool: Arc<dyn Tool>) {
        self.append([tool]);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.0.iter().find(|t| t.name() == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<dyn Tool>> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|t| t.name()))
            .finish()
    }
}

impl<'a> IntoIterator for &'a ToolSet {
    type Item = &'a Arc<dyn Tool>;
    type IntoIter = std::slice::Iter<'a, Arc<dyn Tool>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Serialize for ToolSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for tool in &self.0 {
            seq.serialize_element(&serde_json::json!({
                "name": tool.name(),
                "description": tool.description(),
                "input_schema": tool.input_schema(),
            }))?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for ToolSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        // tools are runtime objects; the JSON form is advisory only
        let _ = serde::de::IgnoredAny::deserialize(deserializer)?;
        Ok(ToolSet::new())
    }
}
