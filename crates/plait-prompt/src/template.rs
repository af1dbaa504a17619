//! Template environments and phase-specific function maps.
//!
//! Rendering happens in three phases with increasingly bound functions:
//!
//! 1. config-load: builtins only; `ref`/`this` return placeholder data.
//! 2. pre-render: `ref(name)` records an implicit dependency while still
//!    returning placeholder data.
//! 3. execution: `ref` resolves sibling configs and previous results;
//!    `resolve`, `dependents` and `dependent_names` become live.
//!
//! Per-agent-type functions from the registry merge into every phase; two
//! types may only register the same function name with the same signature
//! class.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use minijinja::value::Value;
use minijinja::{Environment, Error as TemplateError, ErrorKind};

use plait_core::error::{PlaitError, Result};

/// A template function restricted to one of the supported signature
/// classes. Conflict detection across agent types compares these classes.
#[derive(Clone)]
pub enum TemplateFn {
    /// `fn() -> value`
    Nullary(Arc<dyn Fn() -> std::result::Result<Value, TemplateError> + Send + Sync>),
    /// `fn(name) -> value`
    Unary(Arc<dyn Fn(String) -> std::result::Result<Value, TemplateError> + Send + Sync>),
    /// `fn(names) -> value`
    List(Arc<dyn Fn(Vec<String>) -> std::result::Result<Value, TemplateError> + Send + Sync>),
    /// `fn(tag, value) -> string`
    TagValue(
        Arc<dyn Fn(String, Value) -> std::result::Result<String, TemplateError> + Send + Sync>,
    ),
}

impl TemplateFn {
    fn signature(&self) -> &'static str {
        match self {
            TemplateFn::Nullary(_) => "fn() -> value",
            TemplateFn::Unary(_) => "fn(name) -> value",
            TemplateFn::List(_) => "fn(names) -> value",
            TemplateFn::TagValue(_) => "fn(tag, value) -> string",
        }
    }

    fn same_signature(&self, other: &TemplateFn) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl std::fmt::Debug for TemplateFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.signature())
    }
}

/// Named template functions, merged from the builtins, the registry, and
/// per-phase overlays.
#[derive(Debug, Clone, Default)]
pub struct TemplateFuncs(pub BTreeMap<String, TemplateFn>);

impl TemplateFuncs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, f: TemplateFn) {
        self.0.insert(name.into(), f);
    }

    /// Overlay `other` on top of `self`, later entries winning.
    pub fn overlay(&self, other: &TemplateFuncs) -> TemplateFuncs {
        let mut merged = self.clone();
        for (name, f) in &other.0 {
            merged.0.insert(name.clone(), f.clone());
        }
        merged
    }
}

/// Merge per-type function maps, rejecting same-name registrations whose
/// signature classes differ.
pub fn merge_template_funcs(
    maps: &BTreeMap<String, TemplateFuncs>,
) -> Result<TemplateFuncs> {
    let mut merged = TemplateFuncs::new();
    for funcs in maps.values() {
        for (name, f) in &funcs.0 {
            if let Some(existing) = merged.0.get(name) {
                if !existing.same_signature(f) {
                    return Err(PlaitError::TemplateFuncConflict(name.clone()));
                }
            }
            merged.0.insert(name.clone(), f.clone());
        }
    }
    Ok(merged)
}

/// An immutable set of template sources: the includes tree plus every
/// prompt body, addressable by relative path.
#[derive(Debug, Default)]
pub struct TemplateSet {
    sources: BTreeMap<String, String>,
}

impl TemplateSet {
    pub fn new(sources: BTreeMap<String, String>) -> Self {
        Self { sources }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    fn environment(&self, funcs: &TemplateFuncs) -> Result<Environment<'static>> {
        let mut env = Environment::new();
        for (name, source) in &self.sources {
            env.add_template_owned(name.clone(), source.clone())
                .map_err(template_error)?;
        }
        register_funcs(&mut env, funcs);
        Ok(env)
    }

    /// Render a whole template.
    pub fn render(
        &self,
        template: &str,
        funcs: &TemplateFuncs,
        ctx: &serde_json::Value,
    ) -> Result<String> {
        let env = self.environment(funcs)?;
        let tmpl = env.get_template(template).map_err(template_error)?;
        tmpl.render(Value::from_serialize(ctx)).map_err(template_error)
    }

    /// Render one named block of a template.
    pub fn render_block(
        &self,
        template: &str,
        block: &str,
        funcs: &TemplateFuncs,
        ctx: &serde_json::Value,
    ) -> Result<String> {
        let env = self.environment(funcs)?;
        let tmpl = env.get_template(template).map_err(template_error)?;
        let mut state = tmpl
            .eval_to_state(Value::from_serialize(ctx))
            .map_err(template_error)?;
        state.render_block(block).map_err(|e| {
            if e.kind() == ErrorKind::UnknownBlock {
                PlaitError::TemplateBlockNotFound(block.to_string())
            } else {
                template_error(e)
            }
        })
    }

    /// Render a standalone source against this set (used for config blocks,
    /// which are split out of their file before body registration).
    pub fn render_source(
        &self,
        name: &str,
        source: &str,
        funcs: &TemplateFuncs,
        ctx: &serde_json::Value,
    ) -> Result<String> {
        let mut env = self.environment(funcs)?;
        env.add_template_owned(name.to_string(), source.to_string())
            .map_err(template_error)?;
        let tmpl = env.get_template(name).map_err(template_error)?;
        tmpl.render(Value::from_serialize(ctx)).map_err(template_error)
    }
}

fn template_error(e: TemplateError) -> PlaitError {
    PlaitError::Template(e.to_string())
}

fn register_funcs(env: &mut Environment<'static>, funcs: &TemplateFuncs) {
    for (name, f) in &funcs.0 {
        match f.clone() {
            TemplateFn::Nullary(f) => {
                env.add_function(name.clone(), move || f());
            }
            TemplateFn::Unary(f) => {
                env.add_function(name.clone(), move |name: String| f(name));
            }
            TemplateFn::List(f) => {
                env.add_function(name.clone(), move |names: Vec<String>| f(names));
            }
            TemplateFn::TagValue(f) => {
                env.add_function(name.clone(), move |tag: String, value: Value| {
                    f(tag, value)
                });
            }
        }
    }
}

/// The reference object `ref(name)` / `this()` evaluate to: the referenced
/// agent's config plus its (previous) result.
pub fn reference(
    config: Option<serde_json::Value>,
    result: Option<serde_json::Value>,
) -> serde_json::Value {
    serde_json::json!({
        "config": config.unwrap_or_else(|| serde_json::json!({
            "enabled": true,
            "name": "dummy",
            "type": "dummy",
        })),
        "result": result.unwrap_or_else(|| serde_json::json!({
            "_raw": "[this is dummy result]",
        })),
    })
}

fn to_value(v: &serde_json::Value) -> Value {
    Value::from_serialize(v)
}

/// Builtins available in every phase: `to_xml`, plus placeholder `ref`,
/// `this`, `resolve`, `dependents`, `dependent_names` so templates render
/// in phases where those are not yet bound.
pub fn builtin_funcs() -> TemplateFuncs {
    let mut funcs = TemplateFuncs::new();
    funcs.insert(
        "to_xml",
        TemplateFn::TagValue(Arc::new(|tag, value| Ok(render_xml(&tag, &value)))),
    );
    funcs.insert(
        "ref",
        TemplateFn::Unary(Arc::new(|_name| Ok(to_value(&reference(None, None))))),
    );
    funcs.insert(
        "this",
        TemplateFn::Nullary(Arc::new(|| Ok(to_value(&reference(None, None))))),
    );
    funcs.insert(
        "resolve",
        TemplateFn::Unary(Arc::new(|_name| Ok(Value::from("")))),
    );
    funcs.insert(
        "dependents",
        TemplateFn::Nullary(Arc::new(|| Ok(Value::from(Vec::<Value>::new())))),
    );
    funcs.insert(
        "dependent_names",
        TemplateFn::Nullary(Arc::new(|| Ok(Value::from(Vec::<String>::new())))),
    );
    funcs
}

/// Pre-render phase: `ref(name)` records the name into `collector` and
/// `this()` exposes the prompt's own config.
pub fn pre_render_funcs(
    self_config: serde_json::Value,
    collector: Arc<Mutex<BTreeSet<String>>>,
) -> TemplateFuncs {
    let mut funcs = builtin_funcs();
    funcs.insert(
        "ref",
        TemplateFn::Unary(Arc::new(move |name| {
            collector
                .lock()
                .expect("dependency collector poisoned")
                .insert(name);
            Ok(to_value(&reference(None, None)))
        })),
    );
    funcs.insert(
        "this",
        TemplateFn::Nullary(Arc::new(move || {
            Ok(to_value(&reference(Some(self_config.clone()), None)))
        })),
    );
    funcs
}

/// Execution phase: everything is bound to the refined request.
pub struct ExecutionBindings {
    /// This prompt's decoded config map.
    pub self_config: serde_json::Value,
    /// Sibling prompt name -> decoded config map.
    pub related: BTreeMap<String, serde_json::Value>,
    /// Previous result name -> template view.
    pub previous: BTreeMap<String, serde_json::Value>,
    /// This prompt's dependents, sorted.
    pub dependent_names: Vec<String>,
}

pub fn execution_funcs(bindings: ExecutionBindings) -> TemplateFuncs {
    let ExecutionBindings {
        self_config,
        related,
        previous,
        dependent_names,
    } = bindings;
    let related = Arc::new(related);
    let previous = Arc::new(previous);
    let dependent_names = Arc::new(dependent_names);

    let mut funcs = builtin_funcs();
    {
        let related = related.clone();
        let previous = previous.clone();
        funcs.insert(
            "ref",
            TemplateFn::Unary(Arc::new(move |name| {
                Ok(to_value(&reference(
                    related.get(&name).cloned(),
                    previous.get(&name).cloned(),
                )))
            })),
        );
    }
    funcs.insert(
        "this",
        TemplateFn::Nullary(Arc::new(move || {
            Ok(to_value(&reference(Some(self_config.clone()), None)))
        })),
    );
    {
        let previous = previous.clone();
        funcs.insert(
            "resolve",
            TemplateFn::Unary(Arc::new(move |name| {
                let raw = previous
                    .get(&name)
                    .and_then(|v| v.get("_raw"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                Ok(Value::from(raw))
            })),
        );
    }
    {
        let related = related.clone();
        let names = dependent_names.clone();
        funcs.insert(
            "dependents",
            TemplateFn::Nullary(Arc::new(move || {
                let refs: Vec<serde_json::Value> = names
                    .iter()
                    .map(|n| reference(related.get(n).cloned(), None))
                    .collect();
                Ok(to_value(&serde_json::Value::Array(refs)))
            })),
        );
    }
    funcs.insert(
        "dependent_names",
        TemplateFn::Nullary(Arc::new(move || {
            Ok(Value::from((*dependent_names).clone()))
        })),
    );
    funcs
}

/// Render a JSON value as indented XML under `tag`.
fn render_xml(tag: &str, value: &Value) -> String {
    let json: serde_json::Value =
        serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
    let mut out = String::new();
    render_xml_value(tag, &json, 0, &mut out);
    out
}

fn render_xml_value(tag: &str, value: &serde_json::Value, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    match value {
        serde_json::Value::Object(map) => {
            out.push_str(&format!("{indent}<{tag}>\n"));
            for (key, item) in map {
                render_xml_value(key, item, depth + 1, out);
            }
            out.push_str(&format!("{indent}</{tag}>\n"));
        }
        serde_json::Value::Array(items) => {
            for item in items {
                render_xml_value(tag, item, depth, out);
            }
        }
        other => {
            let text = match other {
                serde_json::Value::String(s) => s.clone(),
                v => v.to_string(),
            };
            out.push_str(&format!(
                "{indent}<{tag}>{}</{tag}>\n",
                quick_xml::escape::escape(&text)
            ));
        }
    }
}
