//! `decision`: asks the model which dependent agent runs next and signals
//! the choice back to the engine through `Next-Agents` metadata.

use std::sync::Arc;

use futures::future::BoxFuture;
use minijinja::value::Value;
use serde::Deserialize;

use plait_core::error::{PlaitError, Result};
use plait_core::jsonutil::first_json;
use plait_core::message::ContentPart;
use plait_core::request::Request;
use plait_core::response::FinishReason;
use plait_core::traits::Agent;
use plait_core::writer::{set_next_agents, BatchResponseWriter, ResponseWriter};
use plait_core::ExecutionContext;
use plait_llm::{GenerateTextRequest, ModelProvider};
use plait_prompt::template::{TemplateFn, TemplateFuncs};
use plait_prompt::Prompt;

use crate::registry::Registry;

pub const AGENT_TYPE: &str = "decision";

#[derive(Debug, Deserialize)]
struct DecisionConfig {
    #[serde(flatten)]
    model: ModelFields,
    #[serde(default)]
    fallback_agent: String,
    fallback_threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ModelFields {
    #[serde(default)]
    model_provider: String,
    #[serde(default)]
    model_id: String,
    #[serde(default)]
    model_params: serde_json::Value,
}

/// The JSON object the model is asked to produce.
#[derive(Debug, Default, Deserialize)]
struct Output {
    #[serde(default)]
    next_agent: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    confidence: f64,
}

/// The output schema handed to templates via `decision_schema(names)`,
/// with the candidate agents as the `next_agent` enum.
pub fn output_schema(agents: &[String]) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "next_agent": {
                "type": "string",
                "description": "name of the agent to execute next",
                "enum": agents,
            },
            "reasoning": {
                "type": "string",
                "description": "why this agent was selected",
            },
            "confidence": {
                "type": "number",
                "description": "confidence in the selection, 0.0 to 1.0",
            },
        },
        "required": ["next_agent", "confidence"],
    })
}

pub fn register(registry: &Registry) -> Result<()> {
    registry.register(
        AGENT_TYPE,
        Arc::new(|ctx, prompt| {
            let cfg: DecisionConfig = prompt.config().decode()?;
            let config_err = |message: &str| PlaitError::Config {
                name: prompt.name().to_string(),
                message: message.to_string(),
            };
            if cfg.model.model_provider.is_empty() {
                return Err(config_err("model_provider is required"));
            }
            if cfg.model.model_id.is_empty() {
                return Err(config_err("model_id is required"));
            }
            let provider = ctx.providers.get(&cfg.model.model_provider)?;
            Ok(Box::new(DecisionAgent {
                prompt,
                cfg,
                provider,
            }) as Box<dyn Agent>)
        }),
    )?;

    let mut funcs = TemplateFuncs::new();
    funcs.insert(
        "decision_schema",
        TemplateFn::List(Arc::new(|agents| {
            Ok(Value::from_serialize(&output_schema(&agents)))
        })),
    );
    registry.set_template_funcs(AGENT_TYPE, funcs)?;
    registry.set_mermaid_node_wrapper(AGENT_TYPE, Arc::new(|name| format!("{{{name}}}")))?;
    Ok(())
}

struct DecisionAgent {
    prompt: Arc<Prompt>,
    cfg: DecisionConfig,
    provider: Arc<dyn ModelProvider>,
}

impl Agent for DecisionAgent {
    fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        req: &'a Request,
        w: &'a mut (dyn ResponseWriter + 'a),
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let (system, messages) = self.prompt.decode(req)?;
            let model_req = GenerateTextRequest {
                metadata: req.metadata.clone(),
                model_id: self.cfg.model.model_id.clone(),
                model_params: self.cfg.model.model_params.clone(),
                system,
                messages,
                tools: req.tools.clone(),
            };
            let mut batch = BatchResponseWriter::new();
            self.provider
                .generate_text(ctx, &model_req, &mut batch)
                .await?;
            let resp = batch.response();
            let output: Output = first_json(&resp.text())?;

            if !output.reasoning.is_empty() {
                w.metadata()
                    .set_string("Next-Agents-Reasoning", output.reasoning.clone());
                w.metadata()
                    .set_float("Next-Agents-Confidence", output.confidence);
                w.write_part(&[ContentPart::reasoning(output.reasoning.clone())])?;
            }

            let mut next_agent = output.next_agent;
            if let Some(threshold) = self.cfg.fallback_threshold {
                if output.confidence < threshold {
                    next_agent = self.cfg.fallback_agent.clone();
                }
            }
            if next_agent.is_empty() {
                next_agent = self.cfg.fallback_agent.clone();
            }
            if next_agent.is_empty() {
                return Err(PlaitError::Config {
                    name: self.prompt.name().to_string(),
                    message: "next_agent is empty".to_string(),
                });
            }
            set_next_agents(w, &[next_agent]);
            w.finish(FinishReason::EndTurn, "select next agent")?;
            Ok(())
        })
    }
}
