//! Discovers prompt files, evaluates their configs, and wires the
//! dependency graph.
//!
//! Loading walks the prompts tree for `*.md` / `*.mdx` files, splits each
//! file's `config` block out of the body, evaluates it, then pre-renders
//! the body once with synthetic schema-valid data so that `ref()` calls
//! register implicit dependencies. Cross-references are validated and the
//! `dependents` map is computed before anything executes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use plait_core::error::{PlaitError, Result};
use plait_core::graph::Graph;
use plait_core::request::Request;

use crate::config::{Config, ConfigEvaluator};
use crate::prompt::Prompt;
use crate::template::{builtin_funcs, pre_render_funcs, TemplateFuncs, TemplateSet};
use crate::value_gen::{SchemaValueGenerator, ValueGenerator};

const DEFAULT_PATTERNS: &[&str] = &["*.md", "*.mdx"];

pub struct Loader {
    patterns: Vec<String>,
    includes_dir: Option<PathBuf>,
    ext_vars: BTreeMap<String, String>,
    funcs: TemplateFuncs,
    generator: Box<dyn ValueGenerator>,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader {
    pub fn new() -> Self {
        Self {
            patterns: DEFAULT_PATTERNS.iter().map(|s| s.to_string()).collect(),
            includes_dir: None,
            ext_vars: BTreeMap::new(),
            funcs: builtin_funcs(),
            generator: Box::new(SchemaValueGenerator::from_entropy()),
        }
    }

    /// Directory of shared templates addressable from prompt bodies.
    pub fn includes(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.includes_dir = Some(dir.into());
        self
    }

    /// External variables surfaced to config templates under `vars`.
    pub fn ext_vars(&mut self, vars: BTreeMap<String, String>) -> &mut Self {
        self.ext_vars = vars;
        self
    }

    /// Additional template functions (the registry's merged per-type map
    /// plus host extras).
    pub fn template_funcs(&mut self, funcs: &TemplateFuncs) -> &mut Self {
        self.funcs = self.funcs.overlay(funcs);
        self
    }

    pub fn value_generator(&mut self, generator: impl ValueGenerator + 'static) -> &mut Self {
        self.generator = Box::new(generator);
        self
    }

    pub fn patterns(&mut self, patterns: Vec<String>) -> &mut Self {
        self.patterns = patterns;
        self
    }

    /// Load every prompt under `dir`. Returns the prompts by name and the
    /// `dependents` map (name -> names depending on it).
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<(BTreeMap<String, Prompt>, Graph)> {
        let include_sources = match &self.includes_dir {
            Some(includes) if includes.is_dir() => {
                collect_sources(includes, &self.patterns, "includes/")?
            }
            _ => BTreeMap::new(),
        };
        let prompt_files = collect_sources(dir.as_ref(), &self.patterns, "")?;

        let evaluator = Arc::new(ConfigEvaluator {
            includes: TemplateSet::new(include_sources.clone()),
            funcs: self.funcs.clone(),
            vars: self.ext_vars.clone(),
        });

        // First pass: split every file and evaluate its config.
        let mut bodies = include_sources;
        let mut loaded: Vec<(Config, Vec<String>)> = Vec::new();
        for (path, source) in &prompt_files {
            let split = split_blocks(source).map_err(|message| PlaitError::Config {
                name: path.clone(),
                message,
            })?;
            let cfg = Config::evaluate(evaluator.clone(), split.config, path.clone())
                .map_err(|e| match e {
                    e @ PlaitError::Config { .. } => e,
                    other => PlaitError::Config {
                        name: path.clone(),
                        message: other.to_string(),
                    },
                })?;
            bodies.insert(path.clone(), split.body);
            loaded.push((cfg, split.blocks));
        }

        let set = Arc::new(TemplateSet::new(bodies));

        // Second pass: pre-render each body with synthetic data to collect
        // implicit dependencies from `ref()` calls.
        let mut prompts: BTreeMap<String, Prompt> = BTreeMap::new();
        let mut default_agent: Option<String> = None;
        for (mut cfg, blocks) in loaded {
            let collector = Arc::new(Mutex::new(BTreeSet::new()));
            let funcs = self
                .funcs
                .overlay(&pre_render_funcs(cfg.raw_as_map(), collector.clone()));
            let dummy_payload = self.generator.generate(&cfg.payload_schema)?;
            let dummy_req = Request::new(cfg.name.clone(), dummy_payload);
            let pre_rendered = set
                .render(cfg.prompt_path(), &funcs, &dummy_req.template_data())
                .map_err(|e| PlaitError::Config {
                    name: cfg.name.clone(),
                    message: format!("pre-render: {e}"),
                })?;
            let collected = collector.lock().expect("dependency collector poisoned");
            cfg.append_depends_on(collected.iter().cloned());
            drop(collected);
            debug!(prompt = %cfg.name, depends_on = ?cfg.depends_on, "pre-rendered prompt");

            if cfg.default {
                if let Some(existing) = &default_agent {
                    return Err(PlaitError::MultipleDefaultAgents(
                        existing.clone(),
                        cfg.name.clone(),
                    ));
                }
                default_agent = Some(cfg.name.clone());
            }

            let name = cfg.name.clone();
            let prompt = Prompt::new(cfg, blocks, pre_rendered, set.clone(), self.funcs.clone());
            if prompts.insert(name.clone(), prompt).is_some() {
                return Err(PlaitError::DuplicatePromptName(name));
            }
        }

        let dependents = check_dependencies(&mut prompts)?;
        Ok((prompts, dependents))
    }
}

/// Validate cross-references, compute the dependents map, and distribute
/// sibling configs for execution-time `ref()` resolution.
fn check_dependencies(prompts: &mut BTreeMap<String, Prompt>) -> Result<Graph> {
    let names: BTreeSet<String> = prompts.keys().cloned().collect();
    let mut dependents: Graph = names
        .iter()
        .map(|name| (name.clone(), Vec::new()))
        .collect();
    for (name, prompt) in prompts.iter() {
        let cfg = prompt.config();
        for dep in &cfg.depends_on {
            if !names.contains(dep) {
                return Err(PlaitError::Config {
                    name: name.clone(),
                    message: format!("depends on `{dep}` but not found"),
                });
            }
            dependents
                .get_mut(dep)
                .expect("dependency graph seeded with all names")
                .push(name.clone());
        }
        for tool in &cfg.tools {
            if !names.contains(tool) {
                return Err(PlaitError::Config {
                    name: name.clone(),
                    message: format!("references `{tool}` as tool, but not found"),
                });
            }
        }
    }
    for deps in dependents.values_mut() {
        deps.sort();
        deps.dedup();
    }

    let configs: BTreeMap<String, serde_json::Value> = prompts
        .iter()
        .map(|(name, p)| (name.clone(), p.config().raw_as_map()))
        .collect();
    for (name, prompt) in prompts.iter_mut() {
        let deps = dependents.get(name).cloned().unwrap_or_default();
        prompt.config_mut().append_dependents(deps);
        let mut related = configs.clone();
        related.remove(name);
        prompt.set_related(related);
    }
    Ok(dependents)
}

struct SplitPrompt {
    config: String,
    body: String,
    blocks: Vec<String>,
}

/// Split the `config` block out of a prompt source and list the remaining
/// named blocks. Other blocks stay in the body (they render inline and are
/// addressable via `render_block`); the config block must not nest blocks.
fn split_blocks(source: &str) -> std::result::Result<SplitPrompt, String> {
    let mut config: Option<String> = None;
    let mut blocks = Vec::new();
    let mut body = String::new();
    let mut i = 0;
    while let Some(rel) = source[i..].find("{%") {
        let tag_start = i + rel;
        let Some(end_rel) = source[tag_start..].find("%}") else {
            break;
        };
        let tag_end = tag_start + end_rel + 2;
        let mut words = tag_words(&source[tag_start..tag_end]);
        match (words.next(), words.next()) {
            (Some("block"), Some("config")) => {
                body.push_str(&source[i..tag_start]);
                let after = &source[tag_end..];
                let Some((content_end, close_end)) = find_endblock(after) else {
                    return Err("config block is not closed".to_string());
                };
                if config
                    .replace(after[..content_end].trim().to_string())
                    .is_some()
                {
                    return Err("multiple config blocks".to_string());
                }
                i = tag_end + close_end;
            }
            (Some("block"), Some(name)) => {
                blocks.push(name.to_string());
                body.push_str(&source[i..tag_end]);
                i = tag_end;
            }
            _ => {
                body.push_str(&source[i..tag_end]);
                i = tag_end;
            }
        }
    }
    body.push_str(&source[i..]);
    blocks.sort();
    blocks.dedup();
    Ok(SplitPrompt {
        config: config.ok_or_else(|| "missing config block".to_string())?,
        body: body.trim_start().to_string(),
        blocks,
    })
}

/// Words inside a `{% … %}` tag, whitespace-control dashes stripped.
fn tag_words(tag: &str) -> impl Iterator<Item = &str> {
    tag.trim_start_matches("{%")
        .trim_end_matches("%}")
        .trim_matches(|c: char| c == '-' || c.is_whitespace())
        .split_whitespace()
}

/// Offsets of the next `{% endblock %}` tag: (content end, end of tag),
/// both relative to `s`.
fn find_endblock(s: &str) -> Option<(usize, usize)> {
    let mut i = 0;
    while let Some(rel) = s[i..].find("{%") {
        let start = i + rel;
        let end = start + s[start..].find("%}")? + 2;
        if tag_words(&s[start..end]).next() == Some("endblock") {
            return Some((start, end));
        }
        i = end;
    }
    None
}

/// Recursively collect files under `dir` matching any pattern, keyed by
/// `prefix` + path relative to `dir` (with `/` separators).
fn collect_sources(
    dir: &Path,
    patterns: &[String],
    prefix: &str,
) -> Result<BTreeMap<String, String>> {
    let mut sources = BTreeMap::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if !patterns.iter().any(|p| pattern_match(p, &file_name)) {
                continue;
            }
            let rel = path
                .strip_prefix(dir)
                .expect("walked path is under its root")
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let source = std::fs::read_to_string(&path)?;
            sources.insert(format!("{prefix}{rel}"), source);
        }
    }
    Ok(sources)
}

/// `*`-wildcard match against a file name.
fn pattern_match(pattern: &str, name: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == name;
    }
    let mut rest = name;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}
