//! Agent-type registry: factories, per-type template functions, and
//! diagram decorators.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use plait_core::error::{PlaitError, Result};
use plait_core::traits::Agent;
use plait_llm::ProviderManager;
use plait_prompt::template::{merge_template_funcs, TemplateFuncs};
use plait_prompt::Prompt;

/// Everything an agent factory may need at construction time.
pub struct BuildContext {
    pub providers: Arc<ProviderManager>,
}

pub type NewAgentFn =
    Arc<dyn Fn(&BuildContext, Arc<Prompt>) -> Result<Box<dyn Agent>> + Send + Sync>;

pub type MermaidNodeFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Default)]
struct RegistryInner {
    new_fns: BTreeMap<String, NewAgentFn>,
    template_funcs: BTreeMap<String, TemplateFuncs>,
    mermaid_wrappers: BTreeMap<String, MermaidNodeFn>,
}

/// Thread-safe map of agent type -> factory, plus per-type template
/// functions and mermaid node decorators.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new agent type. Duplicate names are rejected.
    pub fn register(&self, name: impl Into<String>, f: NewAgentFn) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(PlaitError::AgentTypeEmpty);
        }
        let mut inner = self.inner.write().expect("registry poisoned");
        if inner.new_fns.contains_key(&name) {
            return Err(PlaitError::AgentAlreadyRegistered);
        }
        inner.new_fns.insert(name, f);
        Ok(())
    }

    /// Attach template functions to a registered type. The merged function
    /// map across all types must stay conflict-free.
    pub fn set_template_funcs(&self, name: impl Into<String>, funcs: TemplateFuncs) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(PlaitError::AgentTypeEmpty);
        }
        let mut inner = self.inner.write().expect("registry poisoned");
        if !inner.new_fns.contains_key(&name) {
            return Err(PlaitError::AgentTypeNotFound(name));
        }
        inner.template_funcs.insert(name, funcs);
        merge_template_funcs(&inner.template_funcs)?;
        Ok(())
    }

    pub fn set_mermaid_node_wrapper(
        &self,
        name: impl Into<String>,
        f: MermaidNodeFn,
    ) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(PlaitError::AgentTypeEmpty);
        }
        let mut inner = self.inner.write().expect("registry poisoned");
        if !inner.new_fns.contains_key(&name) {
            return Err(PlaitError::AgentTypeNotFound(name));
        }
        inner.mermaid_wrappers.insert(name, f);
        Ok(())
    }

    /// The conflict-checked union of every type's template functions.
    pub fn merged_template_funcs(&self) -> TemplateFuncs {
        let inner = self.inner.read().expect("registry poisoned");
        merge_template_funcs(&inner.template_funcs).unwrap_or_default()
    }

    pub fn mermaid_node_wrapper(&self, name: &str) -> Option<MermaidNodeFn> {
        self.inner
            .read()
            .expect("registry poisoned")
            .mermaid_wrappers
            .get(name)
            .cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.inner
            .read()
            .expect("registry poisoned")
            .new_fns
            .contains_key(name)
    }

    /// Instantiate the agent for a prompt by dispatching on its type.
    pub fn new_agent(&self, ctx: &BuildContext, prompt: Arc<Prompt>) -> Result<Box<dyn Agent>> {
        let agent_type = prompt.config().agent_type.clone();
        if agent_type.is_empty() {
            return Err(PlaitError::AgentTypeEmpty);
        }
        let f = {
            let inner = self.inner.read().expect("registry poisoned");
            inner
                .new_fns
                .get(&agent_type)
                .cloned()
                .ok_or(PlaitError::AgentTypeNotFound(agent_type))?
        };
        f(ctx, prompt)
    }
}

static DEFAULT_REGISTRY: Lazy<Arc<Registry>> = Lazy::new(|| {
    let registry = Arc::new(Registry::new());
    crate::builtin::register_builtins(&registry)
        .expect("built-in agent registration is infallible");
    registry
});

/// The conventional registry carrying the built-in agent types.
pub fn default_registry() -> Arc<Registry> {
    DEFAULT_REGISTRY.clone()
}
