//! Engine bridge — runs helper scripts in a child interpreter.
//!
//! The simulation engine only has Python bindings, so every engine-touching
//! operation is a short-lived helper process. Callers build a [`RunRequest`]
//! naming one of the embedded helper scripts and receive a [`RunOutput`]
//! with the captured streams. Helpers that return structured data print a
//! single line prefixed with [`RESULT_MARKER`] followed by JSON.

mod python;

use std::{future::Future, pin::Pin, time::Duration};

use serde_json::Value;
use thiserror::Error;

pub use python::PythonRunner;

/// Prefix of the stdout line carrying a helper's JSON answer.
pub const RESULT_MARKER: &str = "SOFA_MCP_RESULT:";

// ── Helper scripts ────────────────────────────────────────────────────────────

pub mod scripts {
    //! Helper scripts shipped with the crate.

    pub const REGISTRY: &str = include_str!("../../scripts/registry.py");
    pub const SCENE_VALIDATE: &str = include_str!("../../scripts/scene_validate.py");
    pub const SCENE_SUMMARY: &str = include_str!("../../scripts/scene_summary.py");
    pub const STEPPING: &str = include_str!("../../scripts/stepping.py");
    pub const SANDBOX: &str = include_str!("../../scripts/sandbox.py");
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start helper interpreter {python}: {source}")]
    Spawn {
        python: String,
        #[source]
        source: std::io::Error,
    },

    #[error("helper '{label}' timed out after {}s", .after.as_secs())]
    Timeout { label: String, after: Duration },

    #[error("helper io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("helper produced no result: {0}")]
    MissingResult(String),

    #[error("helper result is not valid JSON: {0}")]
    BadResult(#[from] serde_json::Error),
}

// ── Request / output ──────────────────────────────────────────────────────────

/// One helper invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Short name used in logs and timeout errors.
    pub label: String,
    /// Helper source, one of [`scripts`].
    pub script: &'static str,
    pub args: Vec<String>,
    /// Written to the child's stdin, then stdin is closed.
    pub stdin: Option<String>,
    pub timeout: Duration,
}

impl RunRequest {
    pub fn new(label: impl Into<String>, script: &'static str, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            script,
            args: Vec::new(),
            stdin: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

/// Captured result of a finished helper process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// The text worth showing for a failed run: stderr, else stdout.
    pub fn failure_text(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }

    /// Parse the last marker line on stdout as JSON.
    pub fn result_payload(&self) -> Result<Value, EngineError> {
        let line = self
            .stdout
            .lines()
            .rev()
            .find_map(|l| l.strip_prefix(RESULT_MARKER))
            .ok_or_else(|| {
                let text = self.failure_text().trim();
                EngineError::MissingResult(if text.is_empty() {
                    "empty output".to_string()
                } else {
                    text.to_string()
                })
            })?;
        Ok(serde_json::from_str(line)?)
    }
}

// ── Runner seam ───────────────────────────────────────────────────────────────

pub type RunFuture<'a> = Pin<Box<dyn Future<Output = Result<RunOutput, EngineError>> + Send + 'a>>;

/// Executes helper scripts. [`PythonRunner`] is the real implementation.
pub trait ScriptRunner: Send + Sync {
    fn run(&self, request: RunRequest) -> RunFuture<'_>;
}
