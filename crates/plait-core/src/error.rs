use thiserror::Error;

/// A single structured issue from payload-schema validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// JSON pointer into the offending payload.
    pub instance_path: String,
    pub message: String,
}

/// Structured outcome of a failed payload validation.
///
/// Carried by [`PlaitError::DataValidate`] so callers of the render path can
/// inspect individual issues instead of a flattened string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataValidateError {
    pub issues: Vec<ValidationIssue>,
}

impl DataValidateError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }
}

impl std::fmt::Display for DataValidateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "data validation error: {} issues", self.issues.len())
    }
}

impl std::error::Error for DataValidateError {}

#[derive(Debug, Error)]
pub enum PlaitError {
    // Graph errors
    #[error("cycle detected")]
    CycleDetected,

    #[error("validate: {0}")]
    Validation(String),

    #[error("agent `{0}` not found")]
    AgentNotFound(String),

    #[error("agent name is required")]
    AgentNameRequired,

    #[error("prompt `{0}` is disabled")]
    AgentDisabled(String),

    #[error("multiple default agents: {0}, {1}")]
    MultipleDefaultAgents(String, String),

    // Registry errors
    #[error("agent type is empty")]
    AgentTypeEmpty,

    #[error("agent already registered")]
    AgentAlreadyRegistered,

    #[error("agent type not found: {0}")]
    AgentTypeNotFound(String),

    #[error("function name conflict: {0} has different signatures")]
    TemplateFuncConflict(String),

    // Prompt / config errors
    #[error("prompt `{name}`: {message}")]
    Config { name: String, message: String },

    #[error("duplicate prompt name: {0}")]
    DuplicatePromptName(String),

    #[error("template block not found: {0}")]
    TemplateBlockNotFound(String),

    #[error("template error: {0}")]
    Template(String),

    #[error(transparent)]
    DataValidate(#[from] DataValidateError),

    // Codec errors
    #[error("unsupported role: {0}")]
    UnsupportedRole(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("no messages")]
    NoMessages,

    // Provider errors
    #[error("model provider `{0}` not found")]
    ModelProviderNotFound(String),

    #[error("model provider name is empty")]
    ModelProviderNameEmpty,

    #[error("model provider error: {0}")]
    ModelProvider(String),

    // Tool errors
    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("remote tool: {0}")]
    RemoteTool(String),

    // Execution errors, wrapped with the failing node name
    #[error("execute `{node}`: {source}")]
    Execute {
        node: String,
        #[source]
        source: Box<PlaitError>,
    },

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PlaitError {
    /// Wrap an error with the name of the graph node it surfaced from.
    pub fn at_node(self, node: impl Into<String>) -> Self {
        PlaitError::Execute {
            node: node.into(),
            source: Box::new(self),
        }
    }

    /// Dig out a [`DataValidateError`] regardless of node wrapping.
    pub fn as_data_validate(&self) -> Option<&DataValidateError> {
        match self {
            PlaitError::DataValidate(e) => Some(e),
            PlaitError::Execute { source, .. } => source.as_data_validate(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlaitError>;
