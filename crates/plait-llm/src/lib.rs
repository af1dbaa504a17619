//! Model-provider capability and the provider manager.
//!
//! Concrete provider SDKs live outside the engine; this crate defines the
//! two generation capabilities they must expose and a registry with a
//! middleware chain. A process-wide default manager exists for
//! convention's sake; construction-scoped clones (`scoped`) let hosts
//! override providers without mutating global state.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use plait_core::error::{PlaitError, Result};
use plait_core::message::Message;
use plait_core::metadata::Metadata;
use plait_core::traits::ToolSet;
use plait_core::writer::ResponseWriter;
use plait_core::ExecutionContext;

/// Request for streamed text generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateTextRequest {
    #[serde(default)]
    pub metadata: Metadata,
    pub model_id: String,
    #[serde(default)]
    pub model_params: serde_json::Value,
    #[serde(default)]
    pub system: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "ToolSet::is_empty")]
    pub tools: ToolSet,
}

/// Request for image generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateImageRequest {
    #[serde(default)]
    pub metadata: Metadata,
    pub model_id: String,
    #[serde(default)]
    pub model_params: serde_json::Value,
    #[serde(default)]
    pub system: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// A language-model backend. Providers stream typed parts into the writer
/// and must abort at the next event boundary when the context is
/// cancelled.
pub trait ModelProvider: Send + Sync {
    fn generate_text<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        req: &'a GenerateTextRequest,
        w: &'a mut (dyn ResponseWriter + 'a),
    ) -> BoxFuture<'a, Result<()>>;

    fn generate_image<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        req: &'a GenerateImageRequest,
        w: &'a mut (dyn ResponseWriter + 'a),
    ) -> BoxFuture<'a, Result<()>>;
}

pub type ProviderMiddleware =
    Arc<dyn Fn(Arc<dyn ModelProvider>) -> Arc<dyn ModelProvider> + Send + Sync>;

/// Named providers plus a middleware stack applied on `get`.
#[derive(Default)]
pub struct ProviderManager {
    inner: RwLock<ManagerInner>,
}

#[derive(Default)]
struct ManagerInner {
    providers: BTreeMap<String, Arc<dyn ModelProvider>>,
    middlewares: Vec<ProviderMiddleware>,
}

impl ProviderManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn ModelProvider>,
    ) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(PlaitError::ModelProviderNameEmpty);
        }
        let mut inner = self.inner.write().expect("provider manager poisoned");
        inner.providers.insert(name, provider);
        Ok(())
    }

    /// Fetch a provider with the middleware chain applied, last-registered
    /// middleware outermost.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ModelProvider>> {
        let inner = self.inner.read().expect("provider manager poisoned");
        let mut provider = inner
            .providers
            .get(name)
            .cloned()
            .ok_or_else(|| PlaitError::ModelProviderNotFound(name.to_string()))?;
        for middleware in &inner.middlewares {
            provider = middleware(provider);
        }
        Ok(provider)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.inner
            .read()
            .expect("provider manager poisoned")
            .providers
            .contains_key(name)
    }

    pub fn list(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("provider manager poisoned")
            .providers
            .keys()
            .cloned()
            .collect()
    }

    pub fn use_middleware(&self, middleware: ProviderMiddleware) {
        self.inner
            .write()
            .expect("provider manager poisoned")
            .middlewares
            .push(middleware);
    }

    /// A detached clone: same providers, same middleware, independent
    /// registrations from here on.
    pub fn scoped(&self) -> ProviderManager {
        let inner = self.inner.read().expect("provider manager poisoned");
        ProviderManager {
            inner: RwLock::new(ManagerInner {
                providers: inner.providers.clone(),
                middlewares: inner.middlewares.clone(),
            }),
        }
    }
}

static GLOBAL_MANAGER: Lazy<ProviderManager> = Lazy::new(ProviderManager::new);

/// The conventional process-wide manager. Intended to be populated at
/// startup, before any mux executes.
pub fn global_manager() -> &'static ProviderManager {
    &GLOBAL_MANAGER
}

/// Register into the process-wide manager.
pub fn register_model_provider(
    name: impl Into<String>,
    provider: Arc<dyn ModelProvider>,
) -> Result<()> {
    GLOBAL_MANAGER.register(name, provider)
}

/// Fetch from the process-wide manager (middleware applied).
pub fn get_model_provider(name: &str) -> Result<Arc<dyn ModelProvider>> {
    GLOBAL_MANAGER
        .get(name)
        .map_err(|_| PlaitError::ModelProviderNotFound(name.to_string()))
}
