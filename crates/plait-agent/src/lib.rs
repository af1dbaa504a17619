//! Agent registry, built-in agent types, and the `AgentMux` orchestrator.

pub mod builtin;
pub mod mux;
pub mod registry;

pub use mux::{AgentMiddleware, AgentMux, AgentMuxBuilder};
pub use registry::{default_registry, BuildContext, MermaidNodeFn, NewAgentFn, Registry};
