use tokio_util::sync::CancellationToken;

/// Per-call execution context handed down to agents, tools, and providers.
///
/// Cancellation is cooperative: the engine never polls the token itself,
/// it passes the context unmodified and expects I/O-bound collaborators to
/// abort at their next event boundary.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    cancel: CancellationToken,
    tool_name: Option<String>,
    tool_use_id: Option<String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Scoped clone carrying the invoked tool's name.
    pub fn with_tool_name(&self, name: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.tool_name = Some(name.into());
        ctx
    }

    /// Scoped clone carrying the caller-assigned tool-use id.
    pub fn with_tool_use_id(&self, id: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.tool_use_id = Some(id.into());
        ctx
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.tool_name.as_deref()
    }

    pub fn tool_use_id(&self) -> Option<&str> {
        self.tool_use_id.as_deref()
    }
}
