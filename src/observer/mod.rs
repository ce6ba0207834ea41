//! Simulation stepping and recording.
//!
//! `run_and_extract` drives the engine in a helper process and returns the
//! per-step values of one data field. Recordings are persisted as JSON and
//! analyzed natively.

pub mod metrics;
pub mod series;

use std::{path::PathBuf, sync::Arc, time::Duration};

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{EngineConfig, expand_home};
use crate::engine::{EngineError, RunRequest, ScriptRunner, scripts};

use metrics::{Displacement, Snapshot, Stability};
use series::{RunInfo, Sample, TimeSeries};

pub const DEFAULT_SETTLE_TOLERANCE: f64 = 1e-6;
pub const DEFAULT_EXPLOSION_THRESHOLD: f64 = 1e6;

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("Scene file not found: {0}")]
    SceneNotFound(String),

    /// Failure reported by the stepping helper, passed through verbatim.
    #[error("{0}")]
    Run(String),

    #[error("Simulation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("Data file not found: {0}")]
    DataNotFound(String),

    #[error("Failed to parse time-series file: {0}")]
    Parse(String),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("start_step ({start}) must be less than end_step ({end})")]
    BadRange { start: u64, end: u64 },

    #[error("Unknown metric '{0}' (expected 'displacement' or 'stability')")]
    UnknownMetric(String),

    #[error("No samples in the selected step range")]
    NoSamples,

    #[error("Value at step {0} is not numeric")]
    NotNumeric(u64),

    #[error("Snapshot shape changed at step {0}")]
    ShapeChanged(u64),

    #[error("Index {index} out of range for snapshot with {rows} rows at step {step}")]
    IndexOutOfRange { index: usize, rows: usize, step: u64 },
}

impl ObserverError {
    pub fn to_json(&self) -> Value {
        json!({ "success": false, "error": self.to_string() })
    }
}

// ── Reports ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Extraction {
    pub success: bool,
    pub data: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecordReport {
    pub success: bool,
    pub path: String,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Metrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub displacement: Option<Displacement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stability: Option<Stability>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnalysisReport {
    pub success: bool,
    pub path: String,
    pub metadata: series::Metadata,
    pub sample_count: usize,
    pub first_step: u64,
    pub last_step: u64,
    pub metrics: Metrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Sample>>,
}

/// Options for [`ObserverService::analyze`].
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub start_step: Option<u64>,
    pub end_step: Option<u64>,
    pub indices: Option<Vec<usize>>,
    /// `None` computes every metric; an empty list computes none.
    pub metrics: Option<Vec<String>>,
    pub include_data: bool,
    pub settle_tolerance: Option<f64>,
    pub explosion_threshold: Option<f64>,
}

// ── Service ───────────────────────────────────────────────────────────────────

pub struct ObserverService {
    runner: Arc<dyn ScriptRunner>,
    timeout: Duration,
}

impl ObserverService {
    pub fn new(runner: Arc<dyn ScriptRunner>, engine: &EngineConfig) -> Self {
        Self {
            runner,
            timeout: engine.step_timeout,
        }
    }

    /// Step the scene `steps` times, collecting `field` of `node_path` after each step.
    pub async fn run_and_extract(
        &self,
        scene_path: &str,
        steps: u64,
        dt: f64,
        node_path: &str,
        field: &str,
    ) -> Result<Extraction, ObserverError> {
        let path = expand_home(scene_path);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ObserverError::SceneNotFound(scene_path.to_string()));
        }

        let req = RunRequest::new("stepping", scripts::STEPPING, self.timeout)
            .arg(path.display().to_string())
            .arg(steps.to_string())
            .arg(dt.to_string())
            .arg(node_path)
            .arg(field);

        let out = match self.runner.run(req).await {
            Ok(out) => out,
            Err(EngineError::Timeout { after, .. }) => return Err(ObserverError::Timeout(after)),
            Err(e) => return Err(e.into()),
        };
        let payload = out.result_payload()?;
        if payload.get("success").and_then(Value::as_bool) != Some(true) {
            let error = payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("Simulation failed without an error message")
                .to_string();
            debug!(%error, "stepping helper reported failure");
            return Err(ObserverError::Run(error));
        }
        let data = match payload.get("data") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        info!(steps, samples = data.len(), "simulation stepped");
        Ok(Extraction { success: true, data })
    }

    /// Run, then persist the samples as a time-series file.
    pub async fn record(
        &self,
        scene_path: &str,
        steps: u64,
        dt: f64,
        node_path: &str,
        field: &str,
        output_path: &str,
    ) -> Result<RecordReport, ObserverError> {
        let extraction = self.run_and_extract(scene_path, steps, dt, node_path, field).await?;
        let out = expand_home(output_path);
        let out = std::path::absolute(&out).unwrap_or(out);
        let run = RunInfo {
            scene_path,
            node_path,
            field,
            steps,
            dt,
        };
        let ts = TimeSeries::from_values(&run, extraction.data);
        ts.save(&out).await?;
        info!(path = %out.display(), samples = ts.data.len(), "simulation recorded");
        Ok(RecordReport {
            success: true,
            path: out.display().to_string(),
            sample_count: ts.data.len(),
        })
    }

    /// Load a recording, slice it, and compute the requested metrics.
    pub async fn analyze(&self, data_path: &str, req: &AnalysisRequest) -> Result<AnalysisReport, ObserverError> {
        analyze(data_path, req).await
    }
}

pub async fn analyze(data_path: &str, req: &AnalysisRequest) -> Result<AnalysisReport, ObserverError> {
    let (want_displacement, want_stability) = wanted_metrics(req.metrics.as_deref())?;
    if let (Some(start), Some(end)) = (req.start_step, req.end_step) {
        if start >= end {
            return Err(ObserverError::BadRange { start, end });
        }
    }

    let path = expand_home(data_path);
    let ts = TimeSeries::load(&path).await?;
    let samples = ts.slice(req.start_step, req.end_step);
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return Err(ObserverError::NoSamples);
    };
    let (first_step, last_step) = (first.step, last.step);

    let mut snapshots = Vec::with_capacity(samples.len());
    for s in &samples {
        let rows = series::rows(&s.value).ok_or(ObserverError::NotNumeric(s.step))?;
        let rows = match &req.indices {
            Some(indices) => series::select_rows(rows, indices, s.step)?,
            None => rows,
        };
        snapshots.push(Snapshot { step: s.step, rows });
    }
    metrics::check_shapes(&snapshots).map_err(ObserverError::ShapeChanged)?;

    let mut out = Metrics::default();
    if want_displacement || want_stability {
        let displacement = metrics::displacement(&snapshots);
        if want_stability {
            let peak = displacement.as_ref().map_or(0.0, |d| d.peak_max);
            out.stability = Some(metrics::stability(
                &snapshots,
                peak,
                req.settle_tolerance.unwrap_or(DEFAULT_SETTLE_TOLERANCE),
                req.explosion_threshold.unwrap_or(DEFAULT_EXPLOSION_THRESHOLD),
            ));
        }
        if want_displacement {
            out.displacement = displacement;
        }
    }

    let data = req.include_data.then(|| {
        samples
            .iter()
            .zip(&snapshots)
            .map(|(s, snap)| Sample {
                step: s.step,
                time: s.time,
                value: if req.indices.is_some() {
                    series::rows_to_value(&s.value, &snap.rows)
                } else {
                    s.value.clone()
                },
            })
            .collect()
    });

    Ok(AnalysisReport {
        success: true,
        path: path.display().to_string(),
        metadata: ts.metadata.clone(),
        sample_count: snapshots.len(),
        first_step,
        last_step,
        metrics: out,
        data,
    })
}

fn wanted_metrics(names: Option<&[String]>) -> Result<(bool, bool), ObserverError> {
    let Some(names) = names else {
        return Ok((true, true));
    };
    let mut wanted = (false, false);
    for name in names {
        match name.as_str() {
            "displacement" => wanted.0 = true,
            "stability" => wanted.1 = true,
            other => return Err(ObserverError::UnknownMetric(other.to_string())),
        }
    }
    Ok(wanted)
}
