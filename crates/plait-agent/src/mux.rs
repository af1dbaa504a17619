//! The `AgentMux`: owns the compiled agent graph and executes requested
//! subgraphs.
//!
//! Execution walks the graph layer by layer. A sink node streams straight
//! into the caller's writer; every other node runs behind a batch collector
//! with a reasoning mirror, so downstream agents consume its full response
//! while the caller still sees its reasoning live. A decision node prunes
//! its dependents at runtime through `Next-Agents` metadata.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock, Weak};

use futures::future::BoxFuture;
use tracing::{debug, warn};

use plait_core::error::{PlaitError, Result};
use plait_core::graph::{
    extract_downstream_subgraph, extract_upstream_subgraph, find_sink_nodes, pickup_dag,
    topological_sort, Graph,
};
use plait_core::request::Request;
use plait_core::response::{FinishReason, Response};
use plait_core::traits::{Agent, ToolSet};
use plait_core::writer::{
    AsReasoningResponseWriter, BatchResponseWriter, ReasoningMirrorResponseWriter,
    ResponseWriter, METADATA_KEY_NEXT_AGENTS,
};
use plait_core::ExecutionContext;
use plait_llm::ProviderManager;
use plait_prompt::config::Config;
use plait_prompt::template::TemplateFuncs;
use plait_prompt::value_gen::ValueGenerator;
use plait_prompt::{Loader, Prompt};
use plait_tools::AgentTool;

use crate::registry::{default_registry, BuildContext, Registry};

pub type AgentMiddleware = Arc<dyn Fn(Arc<dyn Agent>) -> Arc<dyn Agent> + Send + Sync>;

/// Builder for [`AgentMux`].
pub struct AgentMuxBuilder {
    prompts_dir: PathBuf,
    includes_dir: Option<PathBuf>,
    patterns: Option<Vec<String>>,
    registry: Arc<Registry>,
    providers: Arc<ProviderManager>,
    ext_vars: BTreeMap<String, String>,
    template_funcs: TemplateFuncs,
    generator: Option<Box<dyn ValueGenerator>>,
}

impl Default for AgentMuxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMuxBuilder {
    pub fn new() -> Self {
        Self {
            prompts_dir: PathBuf::from("prompts"),
            includes_dir: Some(PathBuf::from("includes")),
            patterns: None,
            registry: default_registry(),
            providers: Arc::new(plait_llm::global_manager().scoped()),
            ext_vars: BTreeMap::new(),
            template_funcs: TemplateFuncs::new(),
            generator: None,
        }
    }

    pub fn prompts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompts_dir = dir.into();
        self
    }

    pub fn includes_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.includes_dir = Some(dir.into());
        self
    }

    pub fn patterns(mut self, patterns: Vec<String>) -> Self {
        self.patterns = Some(patterns);
        self
    }

    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn providers(mut self, providers: Arc<ProviderManager>) -> Self {
        self.providers = providers;
        self
    }

    pub fn ext_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.ext_vars = vars;
        self
    }

    pub fn template_funcs(mut self, funcs: TemplateFuncs) -> Self {
        self.template_funcs = self.template_funcs.overlay(&funcs);
        self
    }

    pub fn value_generator(mut self, generator: impl ValueGenerator + 'static) -> Self {
        self.generator = Some(Box::new(generator));
        self
    }

    pub fn build(self) -> Result<Arc<AgentMux>> {
        let mut loader = Loader::new();
        loader.template_funcs(
            &self
                .registry
                .merged_template_funcs()
                .overlay(&self.template_funcs),
        );
        if let Some(dir) = &self.includes_dir {
            loader.includes(dir.clone());
        }
        if let Some(patterns) = self.patterns {
            loader.patterns(patterns);
        }
        loader.ext_vars(self.ext_vars);
        if let Some(generator) = self.generator {
            loader.value_generator(generator);
        }
        let (prompts, dependents) = loader.load_dir(&self.prompts_dir)?;
        let prompts: BTreeMap<String, Arc<Prompt>> = prompts
            .into_iter()
            .map(|(name, prompt)| (name, Arc::new(prompt)))
            .collect();

        let build_ctx = BuildContext {
            providers: self.providers.clone(),
        };
        let mut agents: BTreeMap<String, Arc<dyn Agent>> = BTreeMap::new();
        let mut tools_dependents = Graph::new();
        let mut default_agent = None;
        for (name, prompt) in &prompts {
            let agent = self
                .registry
                .new_agent(&build_ctx, prompt.clone())
                .map_err(|e| PlaitError::Config {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
            agents.insert(name.clone(), Arc::from(agent));
            tools_dependents.insert(name.clone(), prompt.config().tools.clone());
            if prompt.config().default {
                default_agent = Some(name.clone());
            }
        }

        Ok(Arc::new_cyclic(|weak| AgentMux {
            default_agent,
            prompts,
            agents,
            dependents,
            tools_dependents,
            registry: self.registry,
            middleware: RwLock::new(Vec::new()),
            validation: OnceLock::new(),
            self_ref: weak.clone(),
        }))
    }
}

/// The orchestrator. Immutable after construction apart from middleware
/// appending, which must precede the first execution.
pub struct AgentMux {
    default_agent: Option<String>,
    prompts: BTreeMap<String, Arc<Prompt>>,
    agents: BTreeMap<String, Arc<dyn Agent>>,
    dependents: Graph,
    tools_dependents: Graph,
    registry: Arc<Registry>,
    middleware: RwLock<Vec<AgentMiddleware>>,
    validation: OnceLock<Option<String>>,
    self_ref: Weak<AgentMux>,
}

impl AgentMux {
    pub fn builder() -> AgentMuxBuilder {
        AgentMuxBuilder::new()
    }

    /// Append middleware wrapping every agent invocation, outermost last.
    pub fn use_middleware(&self, middleware: AgentMiddleware) {
        self.middleware
            .write()
            .expect("middleware list poisoned")
            .push(middleware);
    }

    /// Check the merged data + tool-call graph for cycles. Memoized; a
    /// cyclic graph is terminal for the mux.
    pub fn validate(&self) -> Result<()> {
        let outcome = self.validation.get_or_init(|| {
            let mut merged = self.dependents.clone();
            for (name, tools) in &self.tools_dependents {
                merged.entry(name.clone()).or_default().extend(tools.iter().cloned());
            }
            for deps in merged.values_mut() {
                deps.sort();
                deps.dedup();
            }
            match topological_sort(&merged) {
                Ok(_) => None,
                Err(e) => Some(format!("topological sort: {e}")),
            }
        });
        match outcome {
            None => Ok(()),
            Some(message) => Err(PlaitError::Validation(message.clone())),
        }
    }

    /// Names of the loaded prompts.
    pub fn agent_names(&self) -> Vec<String> {
        self.prompts.keys().cloned().collect()
    }

    pub fn prompt(&self, name: &str) -> Option<&Arc<Prompt>> {
        self.prompts.get(name)
    }

    /// Execute the subgraph around `req.name` (empty name resolves to the
    /// default agent), streaming into `w`.
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        req: &Request,
        w: &mut (dyn ResponseWriter + '_),
    ) -> Result<()> {
        self.validate()?;
        let (_, req) = self.validate_request(req)?;
        let graph = pickup_dag(&req.name, &self.dependents)
            .ok_or_else(|| PlaitError::AgentNotFound(req.name.clone()))?;
        let graph = if req.include_upstream {
            graph
        } else {
            extract_downstream_subgraph(&graph, &req.name)
        };
        let graph = if req.include_downstream {
            graph
        } else {
            extract_upstream_subgraph(&graph, &req.name)
        };
        self.execute_graph(ctx, &graph, &req, w).await
    }

    async fn execute_graph(
        &self,
        ctx: &ExecutionContext,
        graph: &Graph,
        req: &Request,
        w: &mut (dyn ResponseWriter + '_),
    ) -> Result<()> {
        let layers = topological_sort(graph)?;
        let sink_nodes = find_sink_nodes(graph);
        let mut previous = req.previous_results.clone();
        let mut done: BTreeSet<String> = BTreeSet::new();
        let mut skipped: BTreeSet<String> = BTreeSet::new();

        for layer in &layers {
            for node in layer {
                if previous.contains_key(node) {
                    done.insert(node.clone());
                }
                if done.contains(node) {
                    continue;
                }
                let prompt = self
                    .prompts
                    .get(node)
                    .ok_or_else(|| PlaitError::AgentNotFound(node.clone()))?;
                let cfg = prompt.config();
                if !cfg.depends_on.is_empty()
                    && cfg.depends_on.iter().all(|dep| skipped.contains(dep))
                {
                    debug!(node = %node, "skip node");
                    skipped.insert(node.clone());
                    done.insert(node.clone());
                    continue;
                }
                let mut refined = self.refine_request(cfg, req);
                refined.previous_results = previous.clone();
                let resp = self
                    .execute_one(ctx, cfg, &refined, &mut *w, &sink_nodes)
                    .await?;
                done.insert(node.clone());
                let Some(resp) = resp else {
                    continue;
                };
                let next_agents = resp.metadata.get_strings(METADATA_KEY_NEXT_AGENTS);
                previous.insert(node.clone(), resp);
                if next_agents.is_empty() {
                    continue;
                }
                let deps = cfg.dependents();
                let mut exec_targets = Vec::new();
                let mut skip_targets = Vec::new();
                for dep in deps {
                    if next_agents.iter().any(|n| n == dep) {
                        exec_targets.push(dep.clone());
                    } else {
                        skip_targets.push(dep.clone());
                    }
                }
                if exec_targets.is_empty() {
                    warn!(targets = ?skip_targets, "next node all skipped");
                    w.finish(FinishReason::EndTurn, "agents all skipped")?;
                    return Ok(());
                }
                for target in skip_targets {
                    skipped.insert(target.clone());
                    done.insert(target);
                }
            }
        }
        Ok(())
    }

    /// Run one node. Sink nodes stream into `w` directly and return no
    /// response; everything else returns its batched response for
    /// `previous_results`.
    async fn execute_one(
        &self,
        ctx: &ExecutionContext,
        cfg: &Config,
        req: &Request,
        w: &mut (dyn ResponseWriter + '_),
        sink_nodes: &[String],
    ) -> Result<Option<Response>> {
        let node = cfg.name.clone();
        let agent = self
            .agents
            .get(&node)
            .ok_or_else(|| PlaitError::AgentNotFound(node.clone()))?;
        if !cfg.enabled {
            return Err(PlaitError::AgentDisabled(node));
        }
        let mut agent = agent.clone();
        let middlewares: Vec<AgentMiddleware> = self
            .middleware
            .read()
            .expect("middleware list poisoned")
            .clone();
        for middleware in &middlewares {
            agent = middleware(agent);
        }
        w.metadata().merge_in_place(&cfg.response_metadata);
        debug!(node = %node, "execute node");

        if sink_nodes.iter().any(|n| n == &node) {
            agent
                .execute(ctx, req, w)
                .await
                .map_err(|e| e.at_node(node.as_str()))?;
            return Ok(None);
        }

        let mut batch = BatchResponseWriter::new();
        {
            let mut mirror = ReasoningMirrorResponseWriter::new(&mut batch, vec![&mut *w]);
            if cfg.as_reasoning {
                let mut as_reasoning = AsReasoningResponseWriter::new(&mut mirror);
                agent
                    .execute(ctx, req, &mut as_reasoning)
                    .await
                    .map_err(|e| e.at_node(node.as_str()))?;
            } else {
                agent
                    .execute(ctx, req, &mut mirror)
                    .await
                    .map_err(|e| e.at_node(node.as_str()))?;
            }
        }
        Ok(Some(batch.response()))
    }

    /// Clone the request for one node: rename it, merge the node's request
    /// metadata, and materialize its tool-call edges as agent tools.
    fn refine_request(&self, cfg: &Config, req: &Request) -> Request {
        let mut refined = req.clone();
        refined.name = cfg.name.clone();
        refined.metadata = req.metadata.merge(&cfg.request_metadata);
        let mut tools = ToolSet::new();
        if let Some(mux) = self.self_ref.upgrade() {
            for tool in &cfg.tools {
                let Some(prompt) = self.prompts.get(tool) else {
                    continue;
                };
                let tool_cfg = prompt.config();
                if !tool_cfg.enabled {
                    continue;
                }
                tools.push(Arc::new(AgentTool::new(
                    tool.clone(),
                    tool_cfg.description.clone(),
                    tool_cfg.payload_schema.clone(),
                    mux.clone() as Arc<dyn Agent>,
                )));
            }
        }
        refined.tools.append(tools.iter().cloned());
        refined
    }

    fn validate_request(&self, req: &Request) -> Result<(Arc<Prompt>, Request)> {
        let mut req = req.clone();
        if req.name.is_empty() {
            req.name = self.default_agent.clone().unwrap_or_default();
        }
        if req.name.is_empty() {
            return Err(PlaitError::AgentNameRequired);
        }
        let prompt = self
            .prompts
            .get(&req.name)
            .cloned()
            .ok_or_else(|| PlaitError::AgentNotFound(req.name.clone()))?;
        Ok((prompt, req))
    }

    /// Render the named agent's whole prompt body.
    pub fn render(&self, req: &Request) -> Result<String> {
        let (prompt, req) = self.validate_request(req)?;
        let refined = self.refine_request(prompt.config(), &req);
        prompt.render(&refined)
    }

    /// Render one named block of the agent's prompt.
    pub fn render_block(&self, block: &str, req: &Request) -> Result<String> {
        let (prompt, req) = self.validate_request(req)?;
        if !prompt.blocks().iter().any(|b| b == block) {
            return Err(PlaitError::TemplateBlockNotFound(format!(
                "`{block}` in agent `{}`",
                req.name
            )));
        }
        let refined = self.refine_request(prompt.config(), &req);
        prompt.render_block(block, &refined)
    }

    /// The agent's configuration: raw block source, or the evaluated form
    /// pretty-printed as JSON.
    pub fn render_config(&self, name: &str, raw: bool) -> Result<String> {
        let name = if name.is_empty() {
            self.default_agent.clone().unwrap_or_default()
        } else {
            name.to_string()
        };
        if name.is_empty() {
            return Err(PlaitError::AgentNameRequired);
        }
        let prompt = self
            .prompts
            .get(&name)
            .ok_or_else(|| PlaitError::AgentNotFound(name.clone()))?;
        if raw {
            return Ok(prompt.config().raw().to_string());
        }
        let value: serde_json::Value = prompt.config().decode()?;
        Ok(serde_json::to_string_pretty(&value)?)
    }

    /// Export the graph as a mermaid flowchart in a fenced markdown block.
    /// Data edges are solid, tool-call edges dotted.
    pub fn to_markdown(&self) -> String {
        let mut out = String::from("```mermaid\nflowchart TD\n");
        let nodes: Vec<&String> = self.dependents.keys().collect();
        let alias: BTreeMap<&str, String> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.as_str(), format!("A{i}")))
            .collect();
        for node in &nodes {
            let wrapper = self
                .prompts
                .get(node.as_str())
                .and_then(|p| self.registry.mermaid_node_wrapper(&p.config().agent_type));
            let decorated = match wrapper {
                Some(wrap) => wrap(node),
                None => format!("[{node}]"),
            };
            out.push_str(&format!("    {}{}\n", alias[node.as_str()], decorated));
        }
        for node in &nodes {
            for dep in &self.dependents[node.as_str()] {
                out.push_str(&format!(
                    "    {} --> {}\n",
                    alias[node.as_str()],
                    alias[dep.as_str()]
                ));
            }
            if let Some(tools) = self.tools_dependents.get(node.as_str()) {
                for tool in tools {
                    out.push_str(&format!(
                        "    {} -.->|tool_call| {}\n",
                        alias[node.as_str()],
                        alias[tool.as_str()]
                    ));
                }
            }
        }
        out.push_str("```\n");
        out
    }
}

impl Agent for AgentMux {
    fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        req: &'a Request,
        w: &'a mut (dyn ResponseWriter + 'a),
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.execute(ctx, req, w))
    }
}
