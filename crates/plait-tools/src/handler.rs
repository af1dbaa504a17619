//! Server half of the remote-tool protocol.
//!
//! A minimal router with exactly two routes: the specification document
//! (GET) and the worker (POST). Handler-level failures serialize as
//! `{error, message, status}`; tool-level failures are converted into a
//! successful HTTP response whose body carries `{status: "error"}` so the
//! caller can distinguish transport problems from tool problems.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{info, warn};

use plait_core::traits::Tool;
use plait_core::writer::BatchResponseWriter;
use plait_core::ExecutionContext;

use crate::remote::{RemoteToolResult, ToolResultContent};
use crate::spec::{Specification, DEFAULT_SPECIFICATION_PATH};
use crate::HEADER_TOOL_USE_ID;

pub struct RemoteToolHandlerConfig {
    pub worker_path: String,
    pub specification_path: Option<String>,
}

impl Default for RemoteToolHandlerConfig {
    fn default() -> Self {
        Self {
            worker_path: "/worker".to_string(),
            specification_path: None,
        }
    }
}

/// Serves one tool over HTTP.
pub struct RemoteToolHandler {
    tool: Arc<dyn Tool>,
    worker_path: String,
    specification_path: String,
}

impl RemoteToolHandler {
    pub fn new(tool: Arc<dyn Tool>, cfg: RemoteToolHandlerConfig) -> Self {
        let worker_path = ensure_leading_slash(&cfg.worker_path);
        let specification_path = ensure_leading_slash(
            &cfg.specification_path
                .unwrap_or_else(|| DEFAULT_SPECIFICATION_PATH.to_string()),
        );
        Self {
            tool,
            worker_path,
            specification_path,
        }
    }

    /// Build the router: GET spec, POST worker, JSON errors for everything
    /// else (404 unknown route, 405 wrong method).
    pub fn router(self) -> Router {
        let specification_path = self.specification_path.clone();
        let worker_path = self.worker_path.clone();
        let state = Arc::new(self);
        Router::new()
            .route(
                &specification_path,
                get(serve_specification).fallback(method_not_allowed),
            )
            .route(
                &worker_path,
                post(serve_worker).fallback(method_not_allowed),
            )
            .fallback(not_found)
            .with_state(state)
    }
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn error_body(status: StatusCode, message: String) -> Response {
    let body = serde_json::json!({
        "error": status.canonical_reason().unwrap_or("error"),
        "message": message,
        "status": status.as_u16(),
    });
    (status, Json(body)).into_response()
}

async fn not_found() -> Response {
    error_body(
        StatusCode::NOT_FOUND,
        "the requested resource was not found".to_string(),
    )
}

async fn method_not_allowed() -> Response {
    error_body(
        StatusCode::METHOD_NOT_ALLOWED,
        "the requested resource does not support this method".to_string(),
    )
}

async fn serve_specification(State(h): State<Arc<RemoteToolHandler>>) -> Response {
    let spec = Specification {
        name: h.tool.name().to_string(),
        description: h.tool.description().to_string(),
        input_schema: h.tool.input_schema(),
        worker_endpoint: h.worker_path.clone(),
        extra: serde_json::Map::new(),
    };
    Json(spec).into_response()
}

async fn serve_worker(
    State(h): State<Arc<RemoteToolHandler>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let input: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "failed to decode request body");
            return error_body(
                StatusCode::BAD_REQUEST,
                format!("failed to decode request body: {e}"),
            );
        }
    };

    let mut ctx = ExecutionContext::new().with_tool_name(h.tool.name());
    if let Some(use_id) = headers
        .get(HEADER_TOOL_USE_ID)
        .and_then(|v| v.to_str().ok())
    {
        ctx = ctx.with_tool_use_id(use_id);
    }
    info!(tool = %h.tool.name(), "remote tool invocation");

    let mut batch = BatchResponseWriter::new();
    let result = match h.tool.call(&ctx, input, &mut batch).await {
        Err(e) => RemoteToolResult {
            status: "error".to_string(),
            content: vec![ToolResultContent {
                kind: "text".to_string(),
                text: e.to_string(),
                ..Default::default()
            }],
        },
        Ok(()) => {
            let response = batch.response();
            match RemoteToolResult::from_parts(&response.message.parts) {
                Ok(content) => RemoteToolResult {
                    content,
                    status: response.finish_message,
                },
                Err(e) => {
                    warn!(error = %e, "failed to marshal tool result");
                    return error_body(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("failed to marshal tool result: {e}"),
                    );
                }
            }
        }
    };
    Json(result).into_response()
}
