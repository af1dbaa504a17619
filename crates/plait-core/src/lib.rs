//! Core types for the plait agent engine.
//!
//! Everything that crosses a subsystem boundary lives here: the message
//! model and its wire codecs, the metadata map, the response-writer stack,
//! execution requests/responses, the dependency-graph utilities, and the
//! `Agent`/`Tool` capabilities the rest of the workspace implements.

pub mod context;
pub mod decode;
pub mod encode;
pub mod error;
pub mod graph;
pub mod jsonutil;
pub mod message;
pub mod metadata;
pub mod request;
pub mod response;
pub mod traits;
pub mod writer;

pub use context::ExecutionContext;
pub use decode::{parse_src_url, MessageDecoder};
pub use encode::MessageEncoder;
pub use error::{DataValidateError, PlaitError, Result, ValidationIssue};
pub use message::{ContentPart, Message, Role};
pub use metadata::{Metadata, MetadataValue};
pub use request::Request;
pub use response::{FinishReason, Response};
pub use traits::{Agent, Tool, ToolSet};
pub use writer::{
    set_next_agents, AsReasoningResponseWriter, BatchResponseWriter,
    ReasoningMirrorResponseWriter, ResponseWriter, TextStreamingResponseWriter,
    METADATA_KEY_NEXT_AGENTS,
};
