//! `constant`: renders its prompt body and emits it verbatim.

use std::sync::Arc;

use futures::future::BoxFuture;

use plait_core::error::Result;
use plait_core::message::ContentPart;
use plait_core::request::Request;
use plait_core::response::FinishReason;
use plait_core::traits::Agent;
use plait_core::writer::ResponseWriter;
use plait_core::ExecutionContext;
use plait_prompt::Prompt;

use crate::registry::Registry;

pub const AGENT_TYPE: &str = "constant";

pub fn register(registry: &Registry) -> Result<()> {
    registry.register(
        AGENT_TYPE,
        Arc::new(|_ctx, prompt| Ok(Box::new(ConstantAgent { prompt }) as Box<dyn Agent>)),
    )
}

struct ConstantAgent {
    prompt: Arc<Prompt>,
}

impl Agent for ConstantAgent {
    fn execute<'a>(
        &'a self,
        _ctx: &'a ExecutionContext,
        req: &'a Request,
        w: &'a mut (dyn ResponseWriter + 'a),
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let content = self.prompt.render(req)?;
            w.write_part(&[ContentPart::text(content)])?;
            w.finish(FinishReason::EndTurn, "write content")?;
            Ok(())
        })
    }
}
