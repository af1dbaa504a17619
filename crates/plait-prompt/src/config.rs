//! Agent configuration, parsed from a prompt file's `config` block.
//!
//! The block is a template rendered with no request data; its output must
//! be a JSON object with at least `"type"`. The raw block source is kept so
//! `decode` can re-evaluate it later (per-type fields, external variables).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use plait_core::error::{PlaitError, Result};
use plait_core::metadata::Metadata;

use crate::template::{TemplateFuncs, TemplateSet};

pub const PUBLISH_TYPE_TOOL: &str = "tool";
pub const PUBLISH_TYPE_PROMPT: &str = "prompt";

/// How a prompt may be published to hosts embedding the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishType {
    Tool,
    Prompt,
}

impl PublishType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishType::Tool => PUBLISH_TYPE_TOOL,
            PublishType::Prompt => PUBLISH_TYPE_PROMPT,
        }
    }
}

/// A declared argument, synthesized into one string property of the
/// payload schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    agent_type: String,
    enabled: Option<bool>,
    #[serde(default)]
    default: bool,
    #[serde(default)]
    description: String,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    tools: Vec<String>,
    payload_schema: Option<serde_json::Value>,
    arguments: Option<Vec<ConfigArgument>>,
    #[serde(default)]
    request_metadata: Metadata,
    #[serde(default)]
    response_metadata: Metadata,
    #[serde(default)]
    as_reasoning: bool,
    #[serde(default)]
    publish: bool,
    publish_types: Option<Vec<String>>,
}

/// Evaluation context a config needs to re-render its raw source.
#[derive(Debug, Default)]
pub struct ConfigEvaluator {
    pub includes: TemplateSet,
    pub funcs: TemplateFuncs,
    pub vars: BTreeMap<String, String>,
}

impl ConfigEvaluator {
    fn render(&self, prompt_path: &str, raw: &str) -> Result<String> {
        let ctx = serde_json::json!({ "vars": self.vars });
        self.includes
            .render_source(&format!("{prompt_path}#config"), raw, &self.funcs, &ctx)
    }
}

/// A fully validated agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    raw: String,
    prompt_path: String,
    evaluator: Arc<ConfigEvaluator>,
    raw_map: serde_json::Value,

    pub name: String,
    pub agent_type: String,
    pub enabled: bool,
    pub default: bool,
    pub description: String,
    pub depends_on: Vec<String>,
    pub tools: Vec<String>,
    pub payload_schema: serde_json::Value,
    pub arguments: Option<Vec<ConfigArgument>>,
    pub request_metadata: Metadata,
    pub response_metadata: Metadata,
    pub as_reasoning: bool,
    pub publish: bool,
    pub publish_types: Vec<PublishType>,

    dependents: Vec<String>,
}

impl Config {
    /// Evaluate a config block: render the raw source, parse the JSON
    /// object, apply defaults, and enforce the structural invariants.
    pub fn evaluate(
        evaluator: Arc<ConfigEvaluator>,
        raw: impl Into<String>,
        prompt_path: impl Into<String>,
    ) -> Result<Config> {
        let raw = raw.into();
        let prompt_path = prompt_path.into();
        let json = evaluator.render(&prompt_path, &raw)?;
        let parsed: RawConfig = serde_json::from_str(&json).map_err(|e| PlaitError::Config {
            name: prompt_path.clone(),
            message: format!("unmarshal config: {e}"),
        })?;

        let name = if parsed.name.is_empty() {
            basename_without_ext(&prompt_path)
        } else {
            parsed.name
        };
        let config_err = |message: String| PlaitError::Config {
            name: name.clone(),
            message,
        };

        if parsed.agent_type.is_empty() {
            return Err(config_err("type is empty".to_string()));
        }
        if parsed.arguments.is_some() && parsed.payload_schema.is_some() {
            return Err(config_err(
                "arguments and payload_schema are mutually exclusive".to_string(),
            ));
        }

        let payload_schema = if let Some(arguments) = &parsed.arguments {
            let mut properties = serde_json::Map::new();
            let mut required = Vec::new();
            for (i, arg) in arguments.iter().enumerate() {
                if arg.name.is_empty() {
                    return Err(config_err(format!("argument[{i}]: name is empty")));
                }
                let mut prop = serde_json::Map::new();
                prop.insert("type".to_string(), "string".into());
                if !arg.description.is_empty() {
                    prop.insert("description".to_string(), arg.description.clone().into());
                }
                properties.insert(arg.name.clone(), prop.into());
                if arg.required {
                    required.push(serde_json::Value::String(arg.name.clone()));
                }
            }
            let schema = serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            });
            debug!(prompt = %name, schema = %schema, "generated payload schema");
            schema
        } else {
            parsed
                .payload_schema
                .unwrap_or_else(|| serde_json::json!({}))
        };

        let publish_types = match parsed.publish_types {
            None => vec![PublishType::Tool],
            Some(raw_types) => {
                let mut types = Vec::new();
                for t in raw_types {
                    let t = t.to_lowercase();
                    let parsed_type = match t.as_str() {
                        PUBLISH_TYPE_TOOL => PublishType::Tool,
                        PUBLISH_TYPE_PROMPT => PublishType::Prompt,
                        other => {
                            return Err(config_err(format!("invalid publish type `{other}`")))
                        }
                    };
                    if parsed_type == PublishType::Prompt && parsed.arguments.is_none() {
                        return Err(config_err(format!(
                            "publish type `{t}` requires arguments"
                        )));
                    }
                    types.push(parsed_type);
                }
                types.sort();
                types.dedup();
                types
            }
        };

        let raw_map: serde_json::Value =
            serde_json::from_str(&json).map_err(|e| PlaitError::Config {
                name: name.clone(),
                message: format!("decode config: {e}"),
            })?;

        let mut depends_on = parsed.depends_on;
        depends_on.sort();
        depends_on.dedup();

        let config = Config {
            raw,
            prompt_path,
            evaluator,
            raw_map,
            name,
            agent_type: parsed.agent_type,
            enabled: parsed.enabled.unwrap_or(true),
            default: parsed.default,
            description: parsed.description,
            depends_on,
            tools: parsed.tools,
            payload_schema,
            arguments: parsed.arguments,
            request_metadata: parsed.request_metadata,
            response_metadata: parsed.response_metadata,
            as_reasoning: parsed.as_reasoning,
            publish: parsed.publish,
            publish_types,
            dependents: Vec::new(),
        };
        debug!(prompt = %config.name, r#type = %config.agent_type, "parsed config");
        Ok(config)
    }

    /// The config block's source, unevaluated.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Path of the prompt file this config came from, relative to the
    /// prompts root.
    pub fn prompt_path(&self) -> &str {
        &self.prompt_path
    }

    /// The evaluated config as a JSON map (including per-type fields).
    pub fn raw_as_map(&self) -> serde_json::Value {
        self.raw_map.clone()
    }

    pub fn dependents(&self) -> &[String] {
        &self.dependents
    }

    pub fn append_depends_on(&mut self, names: impl IntoIterator<Item = String>) {
        self.depends_on.extend(names);
        self.depends_on.sort();
        self.depends_on.dedup();
    }

    pub fn append_dependents(&mut self, names: impl IntoIterator<Item = String>) {
        self.dependents.extend(names);
        self.dependents.sort();
        self.dependents.dedup();
        if let serde_json::Value::Object(map) = &mut self.raw_map {
            map.insert(
                "dependents".to_string(),
                serde_json::json!(self.dependents),
            );
        }
    }

    /// Re-evaluate the raw config source and deserialize it into `T`.
    ///
    /// This is how agent types read their own fields (`model_provider`,
    /// `model_id`, …) without the engine knowing about them.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let json = self.evaluator.render(&self.prompt_path, &self.raw)?;
        serde_json::from_str(&json).map_err(|e| PlaitError::Config {
            name: self.name.clone(),
            message: format!("unmarshal config: {e}"),
        })
    }
}

fn basename_without_ext(path: &str) -> String {
    let base = path.rsplit('/').next().unwrap_or(path);
    match base.rsplit_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluate(raw: &str, path: &str) -> Result<Config> {
        Config::evaluate(Arc::new(ConfigEvaluator::default()), raw, path)
    }

    #[test]
    fn name_defaults_to_file_basename() {
        let cfg = evaluate(r#"{"type": "constant"}"#, "nested/echo.md").unwrap();
        assert_eq!(cfg.name, "echo");
        assert!(cfg.enabled);
        assert!(!cfg.default);
        assert_eq!(cfg.publish_types, vec![PublishType::Tool]);
    }

    #[test]
    fn type_is_required() {
        let err = evaluate(r#"{"name": "x"}"#, "x.md").unwrap_err();
        assert!(err.to_string().contains("type is empty"));
    }

    #[test]
    fn arguments_and_schema_are_exclusive() {
        let err = evaluate(
            r#"{"type": "t", "arguments": [{"name": "a"}], "payload_schema": {"type": "object"}}"#,
            "x.md",
        )
        .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn arguments_synthesize_schema() {
        let cfg = evaluate(
            r#"{"type": "t", "arguments": [
                {"name": "city", "description": "target city", "required": true},
                {"name": "when"}
            ]}"#,
            "weather.md",
        )
        .unwrap();
        let schema = &cfg.payload_schema;
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["city"]["type"], "string");
        assert_eq!(schema["properties"]["city"]["description"], "target city");
        assert_eq!(schema["required"], serde_json::json!(["city"]));
    }

    #[test]
    fn argument_name_must_be_present() {
        let err = evaluate(r#"{"type": "t", "arguments": [{"name": ""}]}"#, "x.md").unwrap_err();
        assert!(err.to_string().contains("name is empty"));
    }

    #[test]
    fn publish_prompt_requires_arguments() {
        let err = evaluate(
            r#"{"type": "t", "publish_types": ["prompt"]}"#,
            "x.md",
        )
        .unwrap_err();
        assert!(err.to_string().contains("requires arguments"));

        let ok = evaluate(
            r#"{"type": "t", "arguments": [{"name": "q"}], "publish_types": ["prompt", "tool"]}"#,
            "x.md",
        )
        .unwrap();
        assert_eq!(ok.publish_types, vec![PublishType::Tool, PublishType::Prompt]);
    }

    #[test]
    fn invalid_publish_type_rejected() {
        let err = evaluate(r#"{"type": "t", "publish_types": ["mcp"]}"#, "x.md").unwrap_err();
        assert!(err.to_string().contains("invalid publish type"));
    }

    #[test]
    fn config_block_is_a_template_with_vars() {
        let mut vars = BTreeMap::new();
        vars.insert("region".to_string(), "ap-northeast-1".to_string());
        let evaluator = Arc::new(ConfigEvaluator {
            includes: TemplateSet::default(),
            funcs: crate::template::builtin_funcs(),
            vars,
        });
        let cfg = Config::evaluate(
            evaluator,
            r#"{"type": "t", "description": "runs in {{ vars.region }}"}"#,
            "x.md",
        )
        .unwrap();
        assert_eq!(cfg.description, "runs in ap-northeast-1");
    }

    #[test]
    fn decode_reads_per_type_fields() {
        #[derive(Deserialize)]
        struct GenTextConfig {
            model_provider: String,
            model_id: String,
        }
        let cfg = evaluate(
            r#"{"type": "generate_text", "model_provider": "bedrock", "model_id": "anthropic.claude-3-5-sonnet"}"#,
            "gen.md",
        )
        .unwrap();
        let decoded: GenTextConfig = cfg.decode().unwrap();
        assert_eq!(decoded.model_provider, "bedrock");
        assert_eq!(decoded.model_id, "anthropic.claude-3-5-sonnet");
    }

    #[test]
    fn append_depends_on_dedupes_and_sorts() {
        let mut cfg = evaluate(r#"{"type": "t", "depends_on": ["b"]}"#, "x.md").unwrap();
        cfg.append_depends_on(["a".to_string(), "b".to_string()]);
        assert_eq!(cfg.depends_on, vec!["a", "b"]);
    }

    #[test]
    fn dependents_reflected_in_raw_map() {
        let mut cfg = evaluate(r#"{"type": "t"}"#, "x.md").unwrap();
        cfg.append_dependents(["z".to_string(), "y".to_string()]);
        assert_eq!(cfg.dependents(), &["y".to_string(), "z".to_string()]);
        assert_eq!(cfg.raw_as_map()["dependents"], serde_json::json!(["y", "z"]));
    }
}
