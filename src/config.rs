//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory (or
//! the path given with `-f`), then applies `SOFA_MCP_WORK_DIR`,
//! `SOFA_MCP_LOG_LEVEL` and `SOFA_MCP_PYTHON` overrides. When no file is given
//! and the default one is missing, a built-in default is used.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::AppError;

/// Which transport serves the JSON-RPC endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Http,
    Stdio,
}

impl TransportMode {
    fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "http" => Ok(TransportMode::Http),
            "stdio" => Ok(TransportMode::Stdio),
            other => Err(AppError::Config(format!(
                "transport.mode must be \"http\" or \"stdio\", got \"{other}\""
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Http => "http",
            TransportMode::Stdio => "stdio",
        }
    }
}

/// Transport configuration (`[transport]`).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub mode: TransportMode,
    /// Socket address for the HTTP transport.
    pub bind: String,
    /// Route serving JSON-RPC requests (e.g. `/mcp`).
    pub path: String,
}

/// Helper-process configuration (`[engine]`).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Python interpreter that has the engine bindings importable.
    pub python: PathBuf,
    pub validate_timeout: Duration,
    pub query_timeout: Duration,
    pub step_timeout: Duration,
    pub sandbox_timeout: Duration,
}

/// Component registry configuration (`[registry]`).
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Plugin cache file (already joined onto `work_dir` when relative).
    pub plugin_cache: PathBuf,
    /// Below this many registered names the probe retries with auto-import.
    pub min_expected_components: usize,
    /// Plugins imported when the registry looks under-populated.
    pub auto_import: Vec<String>,
}

/// Scene tool configuration (`[scene]`).
#[derive(Debug, Clone)]
pub struct SceneConfig {
    pub max_load_bytes: u64,
    /// Time step used for the single validation step.
    pub validation_dt: f64,
}

/// Fully-resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_name: String,
    /// Working directory for caches and default outputs (already expanded, no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    pub transport: TransportConfig,
    pub engine: EngineConfig,
    pub registry: RegistryConfig,
    pub scene: SceneConfig,
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    server: RawServer,
    #[serde(default)]
    transport: RawTransport,
    #[serde(default)]
    engine: RawEngine,
    #[serde(default)]
    registry: RawRegistry,
    #[serde(default)]
    scene: RawScene,
}

#[derive(Deserialize)]
struct RawServer {
    #[serde(default = "default_server_name")]
    name: String,
    #[serde(default = "default_work_dir")]
    work_dir: String,
    #[serde(default = "default_log_level")]
    log_level: String,
}

impl Default for RawServer {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            work_dir: default_work_dir(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Deserialize)]
struct RawTransport {
    #[serde(default = "default_transport_mode")]
    mode: String,
    #[serde(default = "default_bind")]
    bind: String,
    #[serde(default = "default_rpc_path")]
    path: String,
}

impl Default for RawTransport {
    fn default() -> Self {
        Self {
            mode: default_transport_mode(),
            bind: default_bind(),
            path: default_rpc_path(),
        }
    }
}

#[derive(Deserialize)]
struct RawEngine {
    #[serde(default = "default_python")]
    python: String,
    #[serde(default = "default_validate_timeout")]
    validate_timeout_secs: u64,
    #[serde(default = "default_query_timeout")]
    query_timeout_secs: u64,
    #[serde(default = "default_step_timeout")]
    step_timeout_secs: u64,
    #[serde(default = "default_sandbox_timeout")]
    sandbox_timeout_secs: u64,
}

impl Default for RawEngine {
    fn default() -> Self {
        Self {
            python: default_python(),
            validate_timeout_secs: default_validate_timeout(),
            query_timeout_secs: default_query_timeout(),
            step_timeout_secs: default_step_timeout(),
            sandbox_timeout_secs: default_sandbox_timeout(),
        }
    }
}

#[derive(Deserialize)]
struct RawRegistry {
    #[serde(default = "default_plugin_cache")]
    plugin_cache: String,
    #[serde(default = "default_min_expected_components")]
    min_expected_components: usize,
    #[serde(default = "default_auto_import")]
    auto_import: Vec<String>,
}

impl Default for RawRegistry {
    fn default() -> Self {
        Self {
            plugin_cache: default_plugin_cache(),
            min_expected_components: default_min_expected_components(),
            auto_import: default_auto_import(),
        }
    }
}

#[derive(Deserialize)]
struct RawScene {
    #[serde(default = "default_max_load_bytes")]
    max_load_bytes: u64,
    #[serde(default = "default_validation_dt")]
    validation_dt: f64,
}

impl Default for RawScene {
    fn default() -> Self {
        Self {
            max_load_bytes: default_max_load_bytes(),
            validation_dt: default_validation_dt(),
        }
    }
}

fn default_server_name() -> String { "SOFA Sim2Real MCP".to_string() }
fn default_work_dir() -> String { "~/.sofa-mcp".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_transport_mode() -> String { "http".to_string() }
fn default_bind() -> String { "127.0.0.1:8000".to_string() }
fn default_rpc_path() -> String { "/mcp".to_string() }
fn default_python() -> String { "~/venv/bin/python".to_string() }
fn default_validate_timeout() -> u64 { 30 }
fn default_query_timeout() -> u64 { 60 }
fn default_step_timeout() -> u64 { 300 }
fn default_sandbox_timeout() -> u64 { 30 }
fn default_plugin_cache() -> String { "plugin_cache.json".to_string() }
fn default_min_expected_components() -> usize { 50 }
fn default_max_load_bytes() -> u64 { 1_000_000 }
fn default_validation_dt() -> f64 { 0.01 }

fn default_auto_import() -> Vec<String> {
    [
        "Sofa.Component.Topology",
        "Sofa.Component.IO.Mesh",
        "Sofa.Component.LinearSolver",
        "Sofa.Component.ODESolver",
        "Sofa.Component.StateContainer",
        "Sofa.Component.Mapping",
        "Sofa.Component.Mass",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Env-var overrides, collected once so tests can pass them explicitly.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub work_dir: Option<String>,
    pub log_level: Option<String>,
    pub python: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            work_dir: env::var("SOFA_MCP_WORK_DIR").ok(),
            log_level: env::var("SOFA_MCP_LOG_LEVEL").ok(),
            python: env::var("SOFA_MCP_PYTHON").ok(),
        }
    }
}

/// Load config from the given path, or `config/default.toml`, then apply env-var overrides.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let overrides = Overrides::from_env();

    if let Some(path) = config_path {
        return load_from(Path::new(path), &overrides);
    }

    let default_path = Path::new("config/default.toml");
    if default_path.exists() {
        load_from(default_path, &overrides)
    } else {
        resolve(RawConfig::default(), &overrides)
    }
}

/// Internal loader — accepts an explicit path and overrides.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    resolve(parsed, overrides)
}

fn resolve(parsed: RawConfig, overrides: &Overrides) -> Result<Config, AppError> {
    let s = parsed.server;

    let work_dir = expand_home(overrides.work_dir.as_deref().unwrap_or(&s.work_dir));
    let log_level = overrides.log_level.clone().unwrap_or(s.log_level);

    let t = parsed.transport;
    if !t.path.starts_with('/') {
        return Err(AppError::Config(format!(
            "transport.path must start with '/', got \"{}\"",
            t.path
        )));
    }

    let e = parsed.engine;
    let python = expand_home(overrides.python.as_deref().unwrap_or(&e.python));
    if e.validate_timeout_secs == 0 || e.query_timeout_secs == 0 || e.step_timeout_secs == 0 {
        return Err(AppError::Config("engine timeouts must be at least 1 second".into()));
    }

    let r = parsed.registry;
    let cache = PathBuf::from(&r.plugin_cache);
    let plugin_cache = if cache.is_absolute() {
        cache
    } else {
        work_dir.join(expand_home(&r.plugin_cache))
    };

    if !(parsed.scene.validation_dt > 0.0) {
        return Err(AppError::Config("scene.validation_dt must be positive".into()));
    }

    Ok(Config {
        server_name: s.name,
        work_dir,
        log_level,
        transport: TransportConfig {
            mode: TransportMode::parse(&t.mode)?,
            bind: t.bind,
            path: t.path,
        },
        engine: EngineConfig {
            python,
            validate_timeout: Duration::from_secs(e.validate_timeout_secs),
            query_timeout: Duration::from_secs(e.query_timeout_secs),
            step_timeout: Duration::from_secs(e.step_timeout_secs),
            sandbox_timeout: Duration::from_secs(e.sandbox_timeout_secs.max(1)),
        },
        registry: RegistryConfig {
            plugin_cache,
            min_expected_components: r.min_expected_components,
            auto_import: r.auto_import,
        },
        scene: SceneConfig {
            max_load_bytes: parsed.scene.max_load_bytes,
            validation_dt: parsed.scene.validation_dt,
        },
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

impl Config {
    /// Built-in defaults rooted at `work_dir`; no file or env access.
    pub fn test_default(work_dir: &Path) -> Self {
        let mut cfg = resolve(RawConfig::default(), &Overrides::default())
            .unwrap_or_else(|e| panic!("built-in defaults must resolve: {e}"));
        cfg.work_dir = work_dir.to_path_buf();
        cfg.registry.plugin_cache = work_dir.join(default_plugin_cache());
        cfg.engine.python = PathBuf::from("python3");
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[server]
name = "test-server"
work_dir = "~/.sofa-mcp-test"
log_level = "info"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_basic_config() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.server_name, "test-server");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.transport.mode, TransportMode::Http);
        assert_eq!(cfg.transport.bind, "127.0.0.1:8000");
        assert_eq!(cfg.transport.path, "/mcp");
        assert_eq!(cfg.engine.validate_timeout, Duration::from_secs(30));
        assert_eq!(cfg.registry.min_expected_components, 50);
        assert_eq!(cfg.scene.max_load_bytes, 1_000_000);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let f = write_toml("");
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.server_name, "SOFA Sim2Real MCP");
        assert!(cfg.registry.auto_import.contains(&"Sofa.Component.Mass".to_string()));
    }

    #[test]
    fn plugin_cache_is_relative_to_work_dir() {
        let f = write_toml(
            r#"
[server]
work_dir = "/tmp/sofa-mcp-work"

[registry]
plugin_cache = "cache/plugins.json"
"#,
        );
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(
            cfg.registry.plugin_cache,
            PathBuf::from("/tmp/sofa-mcp-work/cache/plugins.json")
        );
    }

    #[test]
    fn stdio_mode_parses() {
        let f = write_toml("[transport]\nmode = \"stdio\"\n");
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.transport.mode, TransportMode::Stdio);
    }

    #[test]
    fn bad_transport_mode_errors() {
        let f = write_toml("[transport]\nmode = \"carrier-pigeon\"\n");
        let err = load_from(f.path(), &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("transport.mode"));
    }

    #[test]
    fn rpc_path_must_be_absolute() {
        let f = write_toml("[transport]\npath = \"mcp\"\n");
        assert!(load_from(f.path(), &Overrides::default()).is_err());
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.sofa-mcp");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".sofa-mcp"));
    }

    #[test]
    fn absolute_path_unchanged() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), &Overrides::default());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn overrides_win() {
        let f = write_toml(MINIMAL_TOML);
        let overrides = Overrides {
            work_dir: Some("/tmp/test-override".into()),
            log_level: Some("debug".into()),
            python: Some("/opt/sofa/bin/python".into()),
        };
        let cfg = load_from(f.path(), &overrides).unwrap();
        assert_eq!(cfg.work_dir, PathBuf::from("/tmp/test-override"));
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.engine.python, PathBuf::from("/opt/sofa/bin/python"));
    }
}
