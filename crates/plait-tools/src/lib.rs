//! Tools for plait agents: local adapters and the remote-tool protocol.

pub mod handler;
pub mod remote;
pub mod spec;

pub use handler::{RemoteToolHandler, RemoteToolHandlerConfig};
pub use remote::{RemoteTool, RemoteToolConfig, RemoteToolResult, ToolResultContent};
pub use spec::{
    default_specification_cache, Specification, SpecificationCache,
    DEFAULT_SPECIFICATION_PATH,
};

use std::sync::Arc;

use futures::future::BoxFuture;

use plait_core::error::Result;
use plait_core::request::Request;
use plait_core::traits::{Agent, Tool};
use plait_core::writer::ResponseWriter;
use plait_core::ExecutionContext;

/// Wire headers of the remote-tool protocol.
pub const HEADER_TOOL_NAME: &str = "Estellm-Tool-Name";
pub const HEADER_TOOL_USE_ID: &str = "Estellm-Tool-Use-ID";

/// Adapts an agent into a tool, so one agent can be called by another
/// through a tool-call edge.
pub struct AgentTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
    agent: Arc<dyn Agent>,
}

impl AgentTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        agent: Arc<dyn Agent>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            agent,
        }
    }
}

impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.input_schema.clone()
    }

    fn call<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        input: serde_json::Value,
        w: &'a mut (dyn ResponseWriter + 'a),
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let req = Request::new(self.name.clone(), input);
            self.agent.execute(ctx, &req, w).await
        })
    }
}

type ToolFnInner = dyn Fn(
        ExecutionContext,
        serde_json::Value,
    ) -> BoxFuture<'static, Result<(Vec<plait_core::message::ContentPart>, String)>>
    + Send
    + Sync;

/// A tool backed by a closure and an explicit input schema.
///
/// The closure produces the result parts plus a status message; the tool
/// writes them and finishes with `end_turn`.
pub struct FuncTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
    f: Box<ToolFnInner>,
}

impl FuncTool {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        f: F,
    ) -> Self
    where
        F: Fn(
                ExecutionContext,
                serde_json::Value,
            )
                -> BoxFuture<'static, Result<(Vec<plait_core::message::ContentPart>, String)>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            f: Box::new(f),
        }
    }
}

impl Tool for FuncTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.input_schema.clone()
    }

    fn call<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        input: serde_json::Value,
        w: &'a mut (dyn ResponseWriter + 'a),
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let (parts, status) = (self.f)(ctx.clone(), input).await?;
            w.write_part(&parts)?;
            w.finish(plait_core::response::FinishReason::EndTurn, &status)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plait_core::message::ContentPart;
    use plait_core::response::FinishReason;
    use plait_core::traits::FnAgent;
    use plait_core::writer::BatchResponseWriter;

    fn answer<'a>(
        _ctx: &'a ExecutionContext,
        req: &'a Request,
        w: &'a mut (dyn ResponseWriter + 'a),
    ) -> futures::future::BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let q = req.payload["q"].as_str().unwrap_or("?").to_string();
            w.write_part(&[ContentPart::text(format!("asked: {q}"))])?;
            w.finish(FinishReason::EndTurn, "ok")?;
            Ok(())
        })
    }

    #[tokio::test]
    async fn agent_tool_executes_the_agent() {
        let agent = Arc::new(FnAgent::new(answer));
        let tool = AgentTool::new(
            "search",
            "search things",
            serde_json::json!({"type": "object"}),
            agent,
        );
        let mut w = BatchResponseWriter::new();
        tool.call(
            &ExecutionContext::new(),
            serde_json::json!({"q": "weather"}),
            &mut w,
        )
        .await
        .unwrap();
        assert_eq!(w.response().message.text(), "asked: weather");
    }

    #[tokio::test]
    async fn func_tool_writes_parts_and_finishes() {
        let tool = FuncTool::new(
            "echo",
            "echo the input",
            serde_json::json!({"type": "object"}),
            |_ctx, input| {
                Box::pin(async move {
                    Ok((vec![ContentPart::text(input.to_string())], "ok".to_string()))
                })
            },
        );
        let mut w = BatchResponseWriter::new();
        tool.call(&ExecutionContext::new(), serde_json::json!({"a": 1}), &mut w)
            .await
            .unwrap();
        let resp = w.response();
        assert!(resp.message.text().contains("\"a\":1"));
        assert_eq!(resp.finish_reason, FinishReason::EndTurn);
        assert_eq!(resp.finish_message, "ok");
    }
}
