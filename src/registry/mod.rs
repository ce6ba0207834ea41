//! Component registry: query a class's data fields, fuzzy-search registered
//! class names, and find the plugin that provides a class.
//!
//! Registered names come from the plugin cache when it exists, otherwise from
//! the `registry.py names` probe. The probe result is written back to the
//! cache.

pub mod cache;
pub mod search;

use std::{
    collections::BTreeMap,
    sync::{
        Arc, LazyLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, RegistryConfig};
use crate::engine::{EngineError, RunRequest, ScriptRunner, scripts};

use cache::{PluginCache, PluginMap};
pub use search::SearchReport;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Sofa.Core not found. Make sure your environment is sourced correctly.")]
    EngineMissing,

    #[error("Could not create an instance of {0}.")]
    CreateFailed(String),

    #[error("An error occurred: {0}")]
    Other(String),

    #[error(
        "Component search is not available in this SOFA Python build. Provide an exact class name and use query_sofa_component instead."
    )]
    SearchUnavailable,

    #[error("query must be a non-empty string")]
    EmptyQuery,

    #[error("query must contain at least one alphanumeric character")]
    NoSearchToken,

    #[error("component_name must be a non-empty string")]
    EmptyName,

    #[error("plugin cache error: {0}")]
    Cache(String),

    #[error("An error occurred: {0}")]
    Engine(#[from] EngineError),
}

// ── Reports ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldInfo {
    #[serde(rename = "type", default)]
    pub type_name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkInfo {
    #[serde(rename = "type", default)]
    pub type_name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub help: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentReport {
    pub name: String,
    pub class_name: String,
    pub data_fields: BTreeMap<String, FieldInfo>,
    #[serde(default)]
    pub links: BTreeMap<String, LinkInfo>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub loaded_plugin: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PluginReport {
    pub class_name: String,
    pub plugin: Option<String>,
    pub found: bool,
    pub source: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RefreshReport {
    pub count: usize,
    pub path: String,
}

/// Query helper answer before classification.
#[derive(Deserialize)]
struct QueryFailure {
    error_kind: String,
    error: String,
}

#[derive(Deserialize)]
struct NamesProbe {
    #[serde(default)]
    error_kind: Option<String>,
    #[serde(default)]
    components: PluginMap,
}

// ── Missing-plugin diagnosis ──────────────────────────────────────────────────

static MODULE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bSofa\.[A-Za-z][\w]*(?:\.[A-Za-z][\w]*)*").unwrap_or_else(|e| panic!("bad regex: {e}"))
});

static PLUGIN_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)plugin\s*[:=]?\s*['"]([^'"]+)['"]"#).unwrap_or_else(|e| panic!("bad regex: {e}"))
});

/// Pull a plugin name out of an engine error message.
///
/// A quoted `plugin 'X'` phrase wins over bare `Sofa.*` module names; among
/// module names the longest (most specific) one is used.
pub fn plugin_from_error(text: &str) -> Option<String> {
    if let Some(c) = PLUGIN_PHRASE.captures(text) {
        return Some(c[1].trim().to_string());
    }
    MODULE_NAME
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches('.'))
        .filter(|m| *m != "Sofa.Core" && *m != "Sofa.Simulation")
        .max_by_key(|m| m.len())
        .map(str::to_string)
}

// ── Registry ──────────────────────────────────────────────────────────────────

pub struct Registry {
    runner: Arc<dyn ScriptRunner>,
    cache: PluginCache,
    min_expected: usize,
    auto_import: Vec<String>,
    auto_imported: AtomicBool,
    timeout: Duration,
}

impl Registry {
    pub fn new(runner: Arc<dyn ScriptRunner>, registry: &RegistryConfig, engine: &EngineConfig) -> Self {
        Self {
            runner,
            cache: PluginCache::new(registry.plugin_cache.clone()),
            min_expected: registry.min_expected_components,
            auto_import: registry.auto_import.clone(),
            auto_imported: AtomicBool::new(false),
            timeout: engine.query_timeout,
        }
    }

    pub fn auto_imported(&self) -> bool {
        self.auto_imported.load(Ordering::Relaxed)
    }

    /// Construct the class in a throwaway node and report its fields and links.
    /// A missing plugin is diagnosed and loaded for one retry.
    pub async fn query(&self, component_name: &str) -> Result<ComponentReport, RegistryError> {
        let name = component_name.trim();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }

        let failure = match self.query_once(name, None).await? {
            Ok(report) => return Ok(report),
            Err(f) => f,
        };
        if failure.error_kind == "import" {
            return Err(RegistryError::EngineMissing);
        }

        let plugin = match plugin_from_error(&failure.error) {
            Some(p) => Some(p),
            None => self.cached_plugin(name)?,
        };

        let Some(plugin) = plugin else {
            return Err(classify(name, failure));
        };

        info!(component = %name, %plugin, "retrying query with plugin loaded");
        match self.query_once(name, Some(&plugin)).await? {
            Ok(mut report) => {
                report.loaded_plugin = Some(plugin);
                Ok(report)
            }
            Err(retry) if retry.error_kind == "import" => Err(RegistryError::EngineMissing),
            Err(retry) => Err(classify(name, retry)),
        }
    }

    async fn query_once(
        &self,
        name: &str,
        plugin: Option<&str>,
    ) -> Result<Result<ComponentReport, QueryFailure>, RegistryError> {
        let mut req = RunRequest::new("registry-query", scripts::REGISTRY, self.timeout)
            .arg("query")
            .arg(name);
        if let Some(p) = plugin {
            req = req.arg(p);
        }
        let payload = self.runner.run(req).await?.result_payload()?;
        if payload.get("error_kind").is_some() {
            let failure: QueryFailure = serde_json::from_value(payload).map_err(EngineError::from)?;
            debug!(component = %name, kind = %failure.error_kind, "query failed: {}", failure.error);
            return Ok(Err(failure));
        }
        let report: ComponentReport = serde_json::from_value(payload).map_err(EngineError::from)?;
        Ok(Ok(report))
    }

    fn cached_plugin(&self, name: &str) -> Result<Option<String>, RegistryError> {
        let Some(map) = self.cache.load()? else {
            return Ok(None);
        };
        Ok(cache::lookup(&map, name)
            .map(|(_, p)| p.to_string())
            .filter(|p| !p.is_empty()))
    }

    /// Fuzzy search over registered class names.
    pub async fn search(&self, query: &str, limit: usize) -> Result<SearchReport, RegistryError> {
        let (names, _) = self.component_names().await?;
        if names.is_empty() {
            return Err(RegistryError::SearchUnavailable);
        }
        search::search(names.keys().map(String::as_str), query, limit)
    }

    /// Report which plugin provides `component_name`.
    pub async fn find_plugin(&self, component_name: &str) -> Result<PluginReport, RegistryError> {
        let name = component_name.trim();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let (names, source) = self.component_names().await?;
        if names.is_empty() {
            return Err(RegistryError::SearchUnavailable);
        }
        Ok(match cache::lookup(&names, name) {
            Some((class, plugin)) => PluginReport {
                class_name: class.to_string(),
                plugin: (!plugin.is_empty()).then(|| plugin.to_string()),
                found: true,
                source,
            },
            None => PluginReport {
                class_name: name.to_string(),
                plugin: None,
                found: false,
                source,
            },
        })
    }

    /// Drop the cache file and probe again.
    pub async fn refresh(&self) -> Result<RefreshReport, RegistryError> {
        self.cache.clear()?;
        let (names, _) = self.component_names().await?;
        Ok(RefreshReport {
            count: names.len(),
            path: self.cache.path().display().to_string(),
        })
    }

    /// Registered names with their plugins, and where they came from.
    async fn component_names(&self) -> Result<(PluginMap, &'static str), RegistryError> {
        if let Some(map) = self.cache.load()? {
            return Ok((map, "cache"));
        }

        let mut names = self.probe(self.auto_imported()).await?;
        if names.len() < self.min_expected && !self.auto_imported() {
            info!(
                found = names.len(),
                min_expected = self.min_expected,
                "registry looks under-populated, probing again with auto-import"
            );
            self.auto_imported.store(true, Ordering::Relaxed);
            for (class, plugin) in self.probe(true).await? {
                let slot = names.entry(class).or_default();
                if slot.is_empty() {
                    *slot = plugin;
                }
            }
        }

        if !names.is_empty() {
            if let Err(e) = self.cache.save(&names) {
                warn!("could not persist plugin cache: {e}");
            }
        }
        Ok((names, "registry"))
    }

    async fn probe(&self, with_imports: bool) -> Result<PluginMap, RegistryError> {
        let mut req = RunRequest::new("registry-names", scripts::REGISTRY, self.timeout).arg("names");
        if with_imports {
            for plugin in &self.auto_import {
                req = req.arg(plugin.clone());
            }
        }
        let payload: Value = self.runner.run(req).await?.result_payload()?;
        let probe: NamesProbe = serde_json::from_value(payload).map_err(EngineError::from)?;
        if probe.error_kind.as_deref() == Some("import") {
            return Err(RegistryError::EngineMissing);
        }
        debug!(count = probe.components.len(), with_imports, "registry probe finished");
        Ok(probe.components)
    }
}

fn classify(name: &str, failure: QueryFailure) -> RegistryError {
    match failure.error_kind.as_str() {
        "create" => RegistryError::CreateFailed(name.to_string()),
        _ => RegistryError::Other(failure.error),
    }
}
