//! A loaded prompt: config plus renderable body.

use std::collections::BTreeMap;
use std::sync::Arc;

use plait_core::decode::MessageDecoder;
use plait_core::error::Result;
use plait_core::message::Message;
use plait_core::request::Request;

use crate::config::Config;
use crate::schema::validate_payload;
use crate::template::{execution_funcs, ExecutionBindings, TemplateFuncs, TemplateSet};

#[derive(Debug)]
pub struct Prompt {
    cfg: Config,
    blocks: Vec<String>,
    pre_rendered: String,
    set: Arc<TemplateSet>,
    funcs: TemplateFuncs,
    /// Sibling prompt name -> its evaluated config map. Populated by the
    /// loader once the whole prompt set is known.
    related: BTreeMap<String, serde_json::Value>,
}

impl Prompt {
    pub(crate) fn new(
        cfg: Config,
        blocks: Vec<String>,
        pre_rendered: String,
        set: Arc<TemplateSet>,
        funcs: TemplateFuncs,
    ) -> Self {
        Self {
            cfg,
            blocks,
            pre_rendered,
            set,
            funcs,
            related: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub(crate) fn config_mut(&mut self) -> &mut Config {
        &mut self.cfg
    }

    pub(crate) fn set_related(&mut self, related: BTreeMap<String, serde_json::Value>) {
        self.related = related;
    }

    /// Named blocks of the body, excluding `config` and the root.
    pub fn blocks(&self) -> &[String] {
        &self.blocks
    }

    /// The body as rendered at load time with synthetic data.
    pub fn pre_rendered(&self) -> &str {
        &self.pre_rendered
    }

    fn bindings(&self, req: &Request) -> ExecutionBindings {
        let previous = req
            .previous_results
            .iter()
            .map(|(name, resp)| (name.clone(), resp.template_data()))
            .collect();
        ExecutionBindings {
            self_config: self.cfg.raw_as_map(),
            related: self.related.clone(),
            previous,
            dependent_names: self.cfg.dependents().to_vec(),
        }
    }

    fn render_funcs(&self, req: &Request) -> TemplateFuncs {
        self.funcs.overlay(&execution_funcs(self.bindings(req)))
    }

    /// Render the whole prompt body against a schema-validated request.
    pub fn render(&self, req: &Request) -> Result<String> {
        validate_payload(&self.cfg.payload_schema, &req.payload)?;
        self.set.render(
            self.cfg.prompt_path(),
            &self.render_funcs(req),
            &req.template_data(),
        )
    }

    /// Render one named block of the prompt body.
    pub fn render_block(&self, block: &str, req: &Request) -> Result<String> {
        validate_payload(&self.cfg.payload_schema, &req.payload)?;
        self.set.render_block(
            self.cfg.prompt_path(),
            block,
            &self.render_funcs(req),
            &req.template_data(),
        )
    }

    /// Render, then stream the result through the message decoder.
    pub fn decode(&self, req: &Request) -> Result<(String, Vec<Message>)> {
        let rendered = self.render(req)?;
        MessageDecoder::new(&rendered).decode()
    }

    /// Render a named block, then decode it.
    pub fn decode_block(&self, block: &str, req: &Request) -> Result<(String, Vec<Message>)> {
        let rendered = self.render_block(block, req)?;
        MessageDecoder::new(&rendered).decode()
    }
}
