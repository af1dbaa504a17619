//! Prompt files and the configuration sub-language.
//!
//! A prompt file is a template whose `config` block is split out and
//! evaluated first (no request data); its output must be a JSON object
//! describing the agent. The rest of the file is the prompt body, rendered
//! against schema-validated request payloads with phase-specific template
//! functions.

pub mod config;
pub mod loader;
pub mod prompt;
pub mod schema;
pub mod template;
pub mod value_gen;

pub use config::{Config, ConfigArgument, PublishType};
pub use loader::Loader;
pub use prompt::Prompt;
pub use template::{TemplateFn, TemplateFuncs, TemplateSet};
pub use value_gen::{SchemaValueGenerator, ValueGenerator};
