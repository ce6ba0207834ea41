//! Tools subsystem: the tool catalog and per-call dispatch.
//!
//! Every tool error is folded into the tool's own result object; only an
//! unknown tool name surfaces as a bus error. Calls run one at a time.

mod catalog;

use std::{sync::Arc, time::Instant};

use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::ScriptRunner;
use crate::mesh;
use crate::observer::{AnalysisRequest, ObserverService};
use crate::registry::Registry;
use crate::sandbox::Sandbox;
use crate::scene::SceneService;
use crate::supervisor::bus::{
    BusError, BusPayload, BusResult, ERR_INVALID_PARAMS, ERR_INVALID_PAYLOAD, ERR_METHOD_NOT_FOUND,
};
use crate::supervisor::dispatch::BusHandler;

pub use catalog::{ToolDef, definitions};

const DEFAULT_SEARCH_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("Unknown tool: {0}")]
    Unknown(String),

    #[error("Invalid arguments for {tool}: {detail}")]
    Arguments { tool: String, detail: String },
}

/// What a tool produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Json(Value),
    Text(String),
}

impl ToolOutput {
    /// MCP `tools/call` result body.
    pub fn into_call_result(self, is_error: bool) -> Value {
        match self {
            ToolOutput::Text(text) => json!({
                "content": [{ "type": "text", "text": text }],
                "isError": is_error,
            }),
            ToolOutput::Json(value) => {
                let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                let mut out = json!({
                    "content": [{ "type": "text", "text": text }],
                    "isError": is_error,
                });
                if value.is_object() {
                    out["structuredContent"] = value;
                }
                out
            }
        }
    }
}

// ── Arguments ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ScriptContentArgs {
    script_content: String,
}

#[derive(Deserialize)]
struct WriteArgs {
    script_content: String,
    output_filename: String,
}

#[derive(Deserialize)]
struct ScenePathArgs {
    scene_path: String,
}

#[derive(Deserialize)]
struct PatchArgs {
    scene_path: String,
    patch: Value,
}

#[derive(Deserialize)]
struct FieldArgs {
    scene_path: String,
    object_name: String,
    field_name: String,
    new_value: Value,
}

#[derive(Deserialize)]
struct MeshPathArgs {
    mesh_path: String,
}

#[derive(Deserialize)]
struct AssetArgs {
    path: String,
}

#[derive(Deserialize)]
struct FindVerticesArgs {
    mesh_path: String,
    selector: Value,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct ScriptArgs {
    script: String,
}

#[derive(Deserialize)]
struct ComponentArgs {
    component_name: String,
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct StepArgs {
    scene_path: String,
    steps: u64,
    dt: f64,
    node_path: String,
    field: String,
}

#[derive(Deserialize)]
struct RecordArgs {
    #[serde(flatten)]
    run: StepArgs,
    output_path: String,
}

#[derive(Deserialize)]
struct AnalyzeArgs {
    data_path: String,
    #[serde(default)]
    start_step: Option<u64>,
    #[serde(default)]
    end_step: Option<u64>,
    #[serde(default)]
    indices: Option<Vec<usize>>,
    #[serde(default)]
    metrics: Option<Vec<String>>,
    #[serde(default)]
    include_data: bool,
    #[serde(default)]
    settle_tolerance: Option<f64>,
    #[serde(default)]
    explosion_threshold: Option<f64>,
}

fn decode<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, ToolCallError> {
    let arguments = if arguments.is_null() { json!({}) } else { arguments };
    serde_json::from_value(arguments).map_err(|e| ToolCallError::Arguments {
        tool: tool.to_string(),
        detail: e.to_string(),
    })
}

/// Run synchronous mesh work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, Value>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, mesh::MeshError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(|e| e.to_json()),
        Err(e) => Err(json!({ "error": format!("mesh worker failed: {e}") })),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({ "error": format!("could not encode result: {e}") }))
}

fn fold<T: serde::Serialize, E>(result: Result<T, E>, on_err: impl FnOnce(E) -> Value) -> ToolOutput {
    ToolOutput::Json(match result {
        Ok(report) => to_json(&report),
        Err(e) => on_err(e),
    })
}

// ── Toolbox ───────────────────────────────────────────────────────────────────

/// All tool services behind one execution lock.
pub struct Toolbox {
    registry: Registry,
    scene: SceneService,
    observer: ObserverService,
    sandbox: Sandbox,
    lock: Mutex<()>,
}

impl Toolbox {
    pub fn new(runner: Arc<dyn ScriptRunner>, config: &Config) -> Self {
        Self {
            registry: Registry::new(runner.clone(), &config.registry, &config.engine),
            scene: SceneService::new(runner.clone(), &config.scene, &config.engine),
            observer: ObserverService::new(runner.clone(), &config.engine),
            sandbox: Sandbox::new(runner, &config.engine),
            lock: Mutex::new(()),
        }
    }

    /// Execute one tool. Calls are serialized.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolCallError> {
        let _guard = self.lock.lock().await;
        let started = Instant::now();
        let out = self.dispatch(name, arguments).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &out {
            Ok(_) => info!(tool = name, elapsed_ms, "tool call finished"),
            Err(e) => debug!(tool = name, elapsed_ms, error = %e, "tool call rejected"),
        }
        out
    }

    async fn dispatch(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolCallError> {
        let registry_err = |e: crate::registry::RegistryError| json!({ "error": e.to_string() });
        let scene_err = |e: crate::scene::SceneError| e.to_json();
        let observer_err = |e: crate::observer::ObserverError| e.to_json();

        Ok(match name {
            "validate_scene" => {
                let a: ScriptContentArgs = decode(name, arguments)?;
                fold(self.scene.validate(&a.script_content).await, scene_err)
            }
            "summarize_scene" => {
                let a: ScriptContentArgs = decode(name, arguments)?;
                fold(self.scene.summarize(&a.script_content).await, scene_err)
            }
            "write_scene" => {
                let a: WriteArgs = decode(name, arguments)?;
                fold(self.scene.write(&a.script_content, &a.output_filename).await, scene_err)
            }
            "write_and_test_scene" => {
                let a: WriteArgs = decode(name, arguments)?;
                fold(
                    self.scene.write_and_test(&a.script_content, &a.output_filename).await,
                    scene_err,
                )
            }
            "load_scene" => {
                let a: ScenePathArgs = decode(name, arguments)?;
                fold(self.scene.load(&a.scene_path).await, scene_err)
            }
            "patch_scene" => {
                let a: PatchArgs = decode(name, arguments)?;
                fold(self.scene.patch(&a.scene_path, &a.patch).await, scene_err)
            }
            "update_data_field" => {
                let a: FieldArgs = decode(name, arguments)?;
                fold(
                    self.scene
                        .update_field(&a.scene_path, &a.object_name, &a.field_name, &a.new_value)
                        .await,
                    scene_err,
                )
            }
            "get_mesh_bounding_box" => {
                let a: MeshPathArgs = decode(name, arguments)?;
                fold(blocking(move || mesh::get_mesh_bounding_box(&a.mesh_path)).await, |e| e)
            }
            "inspect_mesh_topology" => {
                let a: MeshPathArgs = decode(name, arguments)?;
                let label = tokio::task::spawn_blocking(move || mesh::inspect_mesh_topology(&a.mesh_path))
                    .await
                    .unwrap_or_else(|e| format!("Error inspecting mesh topology: {e}"));
                ToolOutput::Text(label)
            }
            "resolve_asset_path" => {
                let a: AssetArgs = decode(name, arguments)?;
                fold(blocking(move || Ok(mesh::resolve_asset_path(&a.path))).await, |e| e)
            }
            "mesh_stats" => {
                let a: MeshPathArgs = decode(name, arguments)?;
                fold(blocking(move || mesh::mesh_stats(&a.mesh_path)).await, |e| e)
            }
            "find_mesh_vertices" => {
                let a: FindVerticesArgs = decode(name, arguments)?;
                fold(
                    blocking(move || mesh::find_mesh_vertices(&a.mesh_path, &a.selector, a.limit)).await,
                    |e| e,
                )
            }
            "run_math_script" => {
                let a: ScriptArgs = decode(name, arguments)?;
                ToolOutput::Text(self.sandbox.run_math_script(&a.script).await)
            }
            "query_sofa_component" => {
                let a: ComponentArgs = decode(name, arguments)?;
                fold(self.registry.query(&a.component_name).await, registry_err)
            }
            "search_sofa_components" => {
                let a: SearchArgs = decode(name, arguments)?;
                let limit = a.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
                fold(self.registry.search(&a.query, limit).await, registry_err)
            }
            "find_component_plugin" => {
                let a: ComponentArgs = decode(name, arguments)?;
                fold(self.registry.find_plugin(&a.component_name).await, registry_err)
            }
            "refresh_component_cache" => fold(self.registry.refresh().await, registry_err),
            "run_and_extract" => {
                let a: StepArgs = decode(name, arguments)?;
                fold(
                    self.observer
                        .run_and_extract(&a.scene_path, a.steps, a.dt, &a.node_path, &a.field)
                        .await,
                    observer_err,
                )
            }
            "record_simulation" => {
                let RecordArgs { run: a, output_path } = decode(name, arguments)?;
                fold(
                    self.observer
                        .record(&a.scene_path, a.steps, a.dt, &a.node_path, &a.field, &output_path)
                        .await,
                    observer_err,
                )
            }
            "analyze_simulation_results" => {
                let a: AnalyzeArgs = decode(name, arguments)?;
                let req = AnalysisRequest {
                    start_step: a.start_step,
                    end_step: a.end_step,
                    indices: a.indices,
                    metrics: a.metrics,
                    include_data: a.include_data,
                    settle_tolerance: a.settle_tolerance,
                    explosion_threshold: a.explosion_threshold,
                };
                fold(self.observer.analyze(&a.data_path, &req).await, observer_err)
            }
            other => return Err(ToolCallError::Unknown(other.to_string())),
        })
    }
}

// ── Bus handler ───────────────────────────────────────────────────────────────

pub struct ToolsSubsystem {
    toolbox: Arc<Toolbox>,
}

impl ToolsSubsystem {
    pub fn new(toolbox: Arc<Toolbox>) -> Self {
        Self { toolbox }
    }
}

impl BusHandler for ToolsSubsystem {
    fn prefix(&self) -> &str {
        "tools"
    }

    fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        match (method, payload) {
            ("tools/list", _) => {
                let _ = reply_tx.send(Ok(BusPayload::Json {
                    data: json!({ "tools": definitions() }),
                }));
            }
            ("tools/call", BusPayload::ToolCall { name, arguments }) => {
                let toolbox = Arc::clone(&self.toolbox);
                tokio::spawn(async move {
                    let reply = match toolbox.call(&name, arguments).await {
                        Ok(output) => Ok(BusPayload::Json {
                            data: output.into_call_result(false),
                        }),
                        Err(ToolCallError::Unknown(tool)) => {
                            Err(BusError::new(ERR_INVALID_PARAMS, format!("Unknown tool: {tool}")))
                        }
                        Err(e @ ToolCallError::Arguments { .. }) => {
                            let detail = json!({ "error": { "type": "invalid_arguments", "message": e.to_string() } });
                            Ok(BusPayload::Json {
                                data: ToolOutput::Json(detail).into_call_result(true),
                            })
                        }
                    };
                    if reply_tx.send(reply).is_err() {
                        warn!(tool = %name, "caller went away before the tool finished");
                    }
                });
            }
            ("tools/call", _) => {
                let _ = reply_tx.send(Err(BusError::new(ERR_INVALID_PAYLOAD, "expected ToolCall payload")));
            }
            (other, _) => {
                let _ = reply_tx.send(Err(BusError::new(
                    ERR_METHOD_NOT_FOUND,
                    format!("method not found: {other}"),
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::ScriptedRunner;
    use tempfile::TempDir;

    fn toolbox(tmp: &TempDir, runner: ScriptedRunner) -> Arc<Toolbox> {
        let cfg = Config::test_default(tmp.path());
        Arc::new(Toolbox::new(Arc::new(runner), &cfg))
    }

    async fn request(sub: &ToolsSubsystem, method: &str, payload: BusPayload) -> BusResult {
        let (tx, rx) = oneshot::channel();
        sub.handle_request(method, payload, tx);
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn list_returns_catalog() {
        let tmp = TempDir::new().unwrap();
        let sub = ToolsSubsystem::new(toolbox(&tmp, ScriptedRunner::new()));
        let Ok(BusPayload::Json { data }) = request(&sub, "tools/list", BusPayload::Empty).await else {
            panic!("expected json");
        };
        assert_eq!(data["tools"].as_array().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn unknown_tool_is_invalid_params() {
        let tmp = TempDir::new().unwrap();
        let sub = ToolsSubsystem::new(toolbox(&tmp, ScriptedRunner::new()));
        let payload = BusPayload::ToolCall {
            name: "fly".into(),
            arguments: json!({}),
        };
        let err = request(&sub, "tools/call", payload).await.unwrap_err();
        assert_eq!(err.code, ERR_INVALID_PARAMS);
        assert_eq!(err.message, "Unknown tool: fly");
    }

    #[tokio::test]
    async fn bad_arguments_become_error_results() {
        let tmp = TempDir::new().unwrap();
        let sub = ToolsSubsystem::new(toolbox(&tmp, ScriptedRunner::new()));
        let payload = BusPayload::ToolCall {
            name: "load_scene".into(),
            arguments: json!({ "path": "x" }),
        };
        let Ok(BusPayload::Json { data }) = request(&sub, "tools/call", payload).await else {
            panic!("expected json");
        };
        assert_eq!(data["isError"], true);
        let message = data["structuredContent"]["error"]["message"].as_str().unwrap();
        assert!(message.contains("scene_path"), "{message}");
    }

    #[tokio::test]
    async fn text_tools_have_no_structured_content() {
        let tmp = TempDir::new().unwrap();
        let tb = toolbox(&tmp, ScriptedRunner::new().ok("4\n"));
        let out = tb.call("run_math_script", json!({ "script": "print(2 + 2)" })).await.unwrap();
        assert_eq!(out, ToolOutput::Text("4\n".into()));
        let body = out.into_call_result(false);
        assert_eq!(body["content"][0]["text"], "4\n");
        assert!(body.get("structuredContent").is_none());
    }

    #[tokio::test]
    async fn failures_fold_into_results() {
        let tmp = TempDir::new().unwrap();
        let tb = toolbox(&tmp, ScriptedRunner::new());
        let missing = tmp.path().join("missing.py").display().to_string();

        let ToolOutput::Json(v) = tb.call("load_scene", json!({ "scene_path": missing })).await.unwrap() else {
            panic!("expected json");
        };
        assert_eq!(v["success"], false);
        assert_eq!(v["message"], "Scene file not found.");

        let ToolOutput::Json(v) = tb
            .call("mesh_stats", json!({ "mesh_path": "/no/such/file.stl" }))
            .await
            .unwrap()
        else {
            panic!("expected json");
        };
        assert_eq!(v["error"], "Path does not exist");

        let ToolOutput::Text(t) = tb
            .call("inspect_mesh_topology", json!({ "mesh_path": "/no/such/file.stl" }))
            .await
            .unwrap()
        else {
            panic!("expected text");
        };
        assert!(t.starts_with("Error inspecting mesh topology: "));
    }

    #[tokio::test]
    async fn search_limit_defaults_to_fifty() {
        let tmp = TempDir::new().unwrap();
        let names: serde_json::Map<String, Value> =
            (0..60).map(|i| (format!("Widget{i:02}"), json!("Sofa.Widgets"))).collect();
        let runner = ScriptedRunner::new().result(json!({ "components": names, "imported": [] }));
        let tb = toolbox(&tmp, runner);
        let ToolOutput::Json(v) = tb.call("search_sofa_components", json!({ "query": "widget" })).await.unwrap() else {
            panic!("expected json");
        };
        assert_eq!(v["limit"], 50);
        assert_eq!(v["count"], 50);
    }
}
