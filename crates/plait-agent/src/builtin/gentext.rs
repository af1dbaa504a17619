//! `generate_text`: decodes its prompt into (system, messages) and streams
//! the configured model provider's response.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;

use plait_core::error::{PlaitError, Result};
use plait_core::request::Request;
use plait_core::traits::Agent;
use plait_core::writer::ResponseWriter;
use plait_core::ExecutionContext;
use plait_llm::{GenerateTextRequest, ModelProvider};
use plait_prompt::Prompt;

use crate::registry::Registry;

pub const AGENT_TYPE: &str = "generate_text";

#[derive(Debug, Deserialize)]
pub(crate) struct GenTextConfig {
    #[serde(default)]
    pub model_provider: String,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub model_params: serde_json::Value,
}

impl GenTextConfig {
    pub(crate) fn load(prompt: &Prompt) -> Result<GenTextConfig> {
        let cfg: GenTextConfig = prompt.config().decode()?;
        let config_err = |message: &str| PlaitError::Config {
            name: prompt.name().to_string(),
            message: message.to_string(),
        };
        if cfg.model_provider.is_empty() {
            return Err(config_err("model_provider is required"));
        }
        if cfg.model_id.is_empty() {
            return Err(config_err("model_id is required"));
        }
        Ok(cfg)
    }
}

pub fn register(registry: &Registry) -> Result<()> {
    registry.register(
        AGENT_TYPE,
        Arc::new(|ctx, prompt| {
            let cfg = GenTextConfig::load(&prompt)?;
            let provider = ctx.providers.get(&cfg.model_provider)?;
            Ok(Box::new(GenerateTextAgent {
                prompt,
                cfg,
                provider,
            }) as Box<dyn Agent>)
        }),
    )
}

struct GenerateTextAgent {
    prompt: Arc<Prompt>,
    cfg: GenTextConfig,
    provider: Arc<dyn ModelProvider>,
}

impl Agent for GenerateTextAgent {
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
                model_id: self.cfg.model_id.clone(),
                model_params: self.cfg.model_params.clone(),
                system,
                messages,
                tools: req.tools.clone(),
            };
            self.provider.generate_text(ctx, &model_req, w).await
        })
    }
}
