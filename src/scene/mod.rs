//! Scene scripting tools: assemble, validate, summarize, write, load and
//! patch engine scene scripts.
//!
//! Validation and summaries run the assembled script in a helper process;
//! everything else is plain file and text handling.

pub mod fields;
pub mod patch;
pub mod template;

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{EngineConfig, SceneConfig, expand_home};
use crate::engine::{EngineError, RunRequest, ScriptRunner, scripts};

pub use template::build_scene_source;

const VALIDATION_FAILED: &str = "Validation failed. Please correct the script based on the error.";

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("ERROR: {}", template::MISSING_CALLBACK)]
    MissingCallback,

    #[error("{error}")]
    ValidationFailed { error: String, stdout: String },

    #[error("Timeout")]
    Timeout { building: bool },

    #[error("{0}")]
    SummaryFailed(String),

    #[error("{0}")]
    SummaryMissing(String),

    #[error("{source}")]
    Engine {
        stage: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("Path does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Not a file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("File size {size} exceeds max_bytes={max}")]
    TooLarge { path: PathBuf, size: u64, max: u64 },

    #[error("{}", .failure.error)]
    Patch { path: PathBuf, failure: patch::PatchFailure },

    #[error("Patch operations resulted in no modifications")]
    NoChanges(PathBuf),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found: {0}")]
    FieldFileNotFound(String),

    #[error("Syntax error in scene file: {0}")]
    FieldSyntax(String),

    #[error("Object '{name}' not found in {path}")]
    ObjectNotFound { name: String, path: String },

    #[error("Could not determine insertion point (no arguments found).")]
    NoInsertionPoint,
}

impl SceneError {
    /// Short hint shown next to the error text.
    pub fn message(&self) -> Option<&'static str> {
        Some(match self {
            SceneError::MissingCallback | SceneError::ValidationFailed { .. } => VALIDATION_FAILED,
            SceneError::Timeout { building: false } => {
                "The scene took too long to initialize (possible infinite loop or massive mesh)."
            }
            SceneError::Timeout { building: true } => {
                "The scene took too long to build (possible infinite loop or massive mesh)."
            }
            SceneError::SummaryFailed(_) => "Scene summary failed.",
            SceneError::SummaryMissing(_) => "Scene summary did not produce JSON output.",
            SceneError::Engine { stage, .. } => *stage,
            SceneError::NotFound(_) => "Scene file not found.",
            SceneError::NotAFile(_) => "Scene path is not a file.",
            SceneError::TooLarge { .. } => "Scene file is too large to load.",
            SceneError::Patch { failure, .. } => failure.message,
            SceneError::NoChanges(_) => "No changes applied.",
            SceneError::Io { .. } => "Could not access the scene file.",
            SceneError::FieldFileNotFound(_)
            | SceneError::FieldSyntax(_)
            | SceneError::ObjectNotFound { .. }
            | SceneError::NoInsertionPoint => return None,
        })
    }

    fn path(&self) -> Option<&Path> {
        match self {
            SceneError::NotFound(p)
            | SceneError::NotAFile(p)
            | SceneError::NoChanges(p)
            | SceneError::TooLarge { path: p, .. }
            | SceneError::Patch { path: p, .. }
            | SceneError::Io { path: p, .. } => Some(p.as_path()),
            _ => None,
        }
    }

    /// Result object for a failed scene tool call.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("success".into(), json!(false));
        out.insert("error".into(), json!(self.to_string()));
        if let Some(message) = self.message() {
            out.insert("message".into(), json!(message));
        }
        if let Some(path) = self.path() {
            out.insert("path".into(), json!(path.display().to_string()));
        }
        match self {
            SceneError::TooLarge { size, .. } => {
                out.insert("size_bytes".into(), json!(size));
            }
            SceneError::ValidationFailed { stdout, .. } => {
                out.insert("stdout".into(), json!(stdout));
            }
            SceneError::MissingCallback => {
                out.insert("stdout".into(), json!(""));
            }
            _ => {}
        }
        Value::Object(out)
    }
}

// ── Reports ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValidationReport {
    pub success: bool,
    pub message: &'static str,
    pub stdout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectSummary {
    pub class: String,
    pub name: Option<String>,
    pub template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSummary {
    pub path: String,
    pub name: Option<String>,
    #[serde(rename = "objectCount", default)]
    pub object_count: usize,
    #[serde(default)]
    pub objects: Vec<ObjectSummary>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Check {
    pub name: &'static str,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SummaryReport {
    pub success: bool,
    pub node_count: usize,
    pub object_count: usize,
    pub class_counts: BTreeMap<String, usize>,
    pub mechanical_object_count: usize,
    pub solver_node_exists: bool,
    pub user_object_count: usize,
    pub checks: Vec<Check>,
    pub nodes: Vec<NodeSummary>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WriteReport {
    pub success: bool,
    pub message: &'static str,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LoadReport {
    pub success: bool,
    pub message: &'static str,
    pub path: String,
    pub size_bytes: u64,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PatchReport {
    pub success: bool,
    pub message: &'static str,
    pub path: String,
    pub applied_ops: usize,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldReport {
    pub success: bool,
    pub message: String,
    pub path: String,
    pub action: &'static str,
}

#[derive(Deserialize)]
struct GraphDump {
    nodes: Vec<NodeSummary>,
}

// ── Service ───────────────────────────────────────────────────────────────────

pub struct SceneService {
    runner: Arc<dyn ScriptRunner>,
    timeout: Duration,
    max_load_bytes: u64,
    validation_dt: f64,
}

impl SceneService {
    pub fn new(runner: Arc<dyn ScriptRunner>, scene: &SceneConfig, engine: &EngineConfig) -> Self {
        Self {
            runner,
            timeout: engine.validate_timeout,
            max_load_bytes: scene.max_load_bytes,
            validation_dt: scene.validation_dt,
        }
    }

    /// Build, init and animate one step of the assembled scene.
    pub async fn validate(&self, script_content: &str) -> Result<ValidationReport, SceneError> {
        if !template::defines_callback(script_content) {
            return Err(SceneError::MissingCallback);
        }
        let source = build_scene_source(script_content);
        let req = RunRequest::new("scene-validate", scripts::SCENE_VALIDATE, self.timeout)
            .arg(self.validation_dt.to_string())
            .stdin(source);

        let out = match self.runner.run(req).await {
            Ok(out) => out,
            Err(EngineError::Timeout { .. }) => return Err(SceneError::Timeout { building: false }),
            Err(source) => {
                return Err(SceneError::Engine {
                    stage: "An unexpected error occurred during execution.",
                    source,
                });
            }
        };

        if out.success() {
            info!("scene validated");
            Ok(ValidationReport {
                success: true,
                message: "Scene validated.",
                stdout: out.stdout,
            })
        } else {
            debug!(exit_code = ?out.exit_code, "scene validation failed");
            Err(SceneError::ValidationFailed {
                error: out.failure_text().to_string(),
                stdout: out.stdout,
            })
        }
    }

    /// Build the scene graph (no init, no animate) and summarize it.
    pub async fn summarize(&self, script_content: &str) -> Result<SummaryReport, SceneError> {
        let source = build_scene_source(script_content);
        let req = RunRequest::new("scene-summary", scripts::SCENE_SUMMARY, self.timeout).stdin(source);

        let out = match self.runner.run(req).await {
            Ok(out) => out,
            Err(EngineError::Timeout { .. }) => return Err(SceneError::Timeout { building: true }),
            Err(source) => {
                return Err(SceneError::Engine {
                    stage: "An unexpected error occurred during summarization.",
                    source,
                });
            }
        };

        if !out.success() {
            return Err(SceneError::SummaryFailed(out.failure_text().to_string()));
        }
        let payload = out
            .result_payload()
            .map_err(|_| SceneError::SummaryMissing(out.stdout.clone()))?;
        let dump: GraphDump = serde_json::from_value(payload).map_err(|e| SceneError::SummaryMissing(e.to_string()))?;
        Ok(summarize_graph(dump.nodes))
    }

    /// Write the assembled scene without validating it.
    pub async fn write(&self, script_content: &str, output_filename: &str) -> Result<WriteReport, SceneError> {
        let path = absolute(&expand_home(output_filename))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|source| SceneError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        tokio::fs::write(&path, build_scene_source(script_content))
            .await
            .map_err(|source| SceneError::Io { path: path.clone(), source })?;
        info!(path = %path.display(), "scene written");
        Ok(WriteReport {
            success: true,
            message: "Scene saved.",
            path: path.display().to_string(),
            stdout: None,
        })
    }

    /// Validate, then write only on success.
    pub async fn write_and_test(&self, script_content: &str, output_filename: &str) -> Result<WriteReport, SceneError> {
        let validation = self.validate(script_content).await?;
        let written = self.write(script_content, output_filename).await?;
        Ok(WriteReport {
            success: true,
            message: "Scene validated and saved.",
            path: written.path,
            stdout: Some(validation.stdout),
        })
    }

    pub async fn load(&self, scene_path: &str) -> Result<LoadReport, SceneError> {
        let path = resolve(scene_path)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(SceneError::NotFound(path)),
            Err(source) => return Err(SceneError::Io { path, source }),
        };
        if !meta.is_file() {
            return Err(SceneError::NotAFile(path));
        }
        let size = meta.len();
        if size > self.max_load_bytes {
            return Err(SceneError::TooLarge {
                path,
                size,
                max: self.max_load_bytes,
            });
        }
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| SceneError::Io { path: path.clone(), source })?;
        Ok(LoadReport {
            success: true,
            message: "Scene loaded.",
            path: path.display().to_string(),
            size_bytes: size,
            content: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    /// Apply all patch operations or none.
    pub async fn patch(&self, scene_path: &str, patch_spec: &Value) -> Result<PatchReport, SceneError> {
        let loaded = self.load(scene_path).await?;
        let path = PathBuf::from(&loaded.path);

        let (updated, applied_ops) = patch::apply(&loaded.content, patch_spec).map_err(|failure| SceneError::Patch {
            path: path.clone(),
            failure,
        })?;
        if updated == loaded.content {
            return Err(SceneError::NoChanges(path));
        }

        tokio::fs::write(&path, &updated)
            .await
            .map_err(|source| SceneError::Io { path: path.clone(), source })?;
        info!(path = %path.display(), ops = applied_ops, "scene patched");
        Ok(PatchReport {
            success: true,
            message: "Scene patched.",
            path: loaded.path,
            applied_ops,
            size_bytes: updated.len() as u64,
        })
    }

    /// Replace or add one keyword argument on a named `addObject` call.
    pub async fn update_field(
        &self,
        scene_path: &str,
        object_name: &str,
        field_name: &str,
        new_value: &Value,
    ) -> Result<FieldReport, SceneError> {
        let path = expand_home(scene_path);
        let source = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SceneError::FieldFileNotFound(scene_path.to_string()));
            }
            Err(source) => return Err(SceneError::Io { path, source }),
        };

        let rendered = fields::python_literal(new_value);
        let outcome = fields::update_field(&source, object_name, field_name, &rendered)
            .map_err(|issue| SceneError::FieldSyntax(issue.0))?;

        let (updated, edit) = match outcome {
            fields::UpdateOutcome::Updated { source, edit } => (source, edit),
            fields::UpdateOutcome::ObjectNotFound => {
                return Err(SceneError::ObjectNotFound {
                    name: object_name.to_string(),
                    path: scene_path.to_string(),
                });
            }
            fields::UpdateOutcome::NoArguments => return Err(SceneError::NoInsertionPoint),
        };

        tokio::fs::write(&path, updated)
            .await
            .map_err(|source| SceneError::Io { path: path.clone(), source })?;
        info!(path = %path.display(), object = %object_name, field = %field_name, "data field updated");
        Ok(FieldReport {
            success: true,
            message: format!("Updated {field_name} for object {object_name}"),
            path: path.display().to_string(),
            action: match edit {
                fields::FieldEdit::Replaced => "replaced",
                fields::FieldEdit::Inserted => "inserted",
            },
        })
    }
}

fn absolute(path: &Path) -> Result<PathBuf, SceneError> {
    std::path::absolute(path).map_err(|source| SceneError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// `~` expansion, then canonicalize when possible.
fn resolve(scene_path: &str) -> Result<PathBuf, SceneError> {
    let expanded = expand_home(scene_path);
    match std::fs::canonicalize(&expanded) {
        Ok(p) => Ok(p),
        Err(_) => absolute(&expanded),
    }
}

/// Counts and structural checks over a dumped scene graph.
pub fn summarize_graph(mut nodes: Vec<NodeSummary>) -> SummaryReport {
    let mut class_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut object_count = 0;
    for node in &mut nodes {
        node.object_count = node.objects.len();
        object_count += node.objects.len();
        for obj in &node.objects {
            *class_counts.entry(obj.class.clone()).or_default() += 1;
        }
    }

    let root = nodes.iter().find(|n| n.path == "/root");
    let solver = nodes.iter().find(|n| n.path == "/root/solver_node");
    let named = |node: Option<&NodeSummary>, name: &str| {
        node.is_some_and(|n| n.objects.iter().any(|o| o.name.as_deref() == Some(name)))
    };
    let has_class = |node: Option<&NodeSummary>, class: &str| {
        node.is_some_and(|n| n.objects.iter().any(|o| o.class == class))
    };

    let user_object_count = solver.map_or(0, |n| {
        n.objects
            .iter()
            .filter(|o| !template::SOLVER_BASELINE_CLASSES.contains(&o.class.as_str()))
            .count()
    });
    let mechanical_object_count = class_counts.get("MechanicalObject").copied().unwrap_or(0);

    let mut missing = Vec::new();
    if !named(root, "AnimationLoop") {
        missing.push("FreeMotionAnimationLoop (name='AnimationLoop')");
    }
    if !named(root, "ConstraintSolver") {
        missing.push("NNCGConstraintSolver (name='ConstraintSolver')");
    }
    if solver.is_none() {
        missing.push("Child node 'solver_node'");
    } else {
        if !has_class(solver, "EulerImplicitSolver") {
            missing.push("EulerImplicitSolver (in solver_node)");
        }
        if !named(solver, "Solver") {
            missing.push("SparseLDLSolver (name='Solver')");
        }
        if !named(solver, "ConstraintCorrection") {
            missing.push("GenericConstraintCorrection (name='ConstraintCorrection')");
        }
    }

    let checks = vec![
        Check {
            name: "has_animation_loop",
            passed: named(root, "AnimationLoop"),
            detail: None,
        },
        Check {
            name: "has_constraint_solver",
            passed: named(root, "ConstraintSolver"),
            detail: None,
        },
        Check {
            name: "has_solver_node",
            passed: solver.is_some(),
            detail: None,
        },
        Check {
            name: "has_mechanical_object",
            passed: mechanical_object_count > 0,
            detail: (mechanical_object_count == 0).then(|| "No MechanicalObject found in the scene graph.".to_string()),
        },
        Check {
            name: "baseline_components_present",
            passed: missing.is_empty(),
            detail: (!missing.is_empty()).then(|| format!("Missing required baseline components: {}", missing.join("; "))),
        },
    ];

    SummaryReport {
        success: true,
        node_count: nodes.len(),
        object_count,
        class_counts,
        mechanical_object_count,
        solver_node_exists: solver.is_some(),
        user_object_count,
        checks,
        nodes,
    }
}
