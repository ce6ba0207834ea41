//! Persisted time-series recordings.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ObserverError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    pub scene_path: String,
    pub node_path: String,
    pub field: String,
    pub steps: u64,
    pub dt: f64,
    pub recorded_at: String,
    pub sample_count: usize,
    pub server_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub step: u64,
    pub time: f64,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeSeries {
    pub metadata: Metadata,
    pub data: Vec<Sample>,
}

/// Parameters of the run that produced a recording.
#[derive(Debug, Clone)]
pub struct RunInfo<'a> {
    pub scene_path: &'a str,
    pub node_path: &'a str,
    pub field: &'a str,
    pub steps: u64,
    pub dt: f64,
}

impl TimeSeries {
    /// Wrap extracted values; sample `i` is step `i + 1` at time `(i + 1) * dt`.
    pub fn from_values(run: &RunInfo<'_>, values: Vec<Value>) -> Self {
        let data: Vec<Sample> = values
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                let step = i as u64 + 1;
                Sample {
                    step,
                    time: step as f64 * run.dt,
                    value,
                }
            })
            .collect();
        Self {
            metadata: Metadata {
                scene_path: run.scene_path.to_string(),
                node_path: run.node_path.to_string(),
                field: run.field.to_string(),
                steps: run.steps,
                dt: run.dt,
                recorded_at: chrono::Utc::now().to_rfc3339(),
                sample_count: data.len(),
                server_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            data,
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), ObserverError> {
        let io = |source| ObserverError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io)?;
        }
        let body = serde_json::to_vec_pretty(self).map_err(|e| ObserverError::Parse(e.to_string()))?;
        tokio::fs::write(path, body).await.map_err(io)
    }

    pub async fn load(path: &Path) -> Result<Self, ObserverError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ObserverError::DataNotFound(path.display().to_string()));
            }
            Err(source) => {
                return Err(ObserverError::Io {
                    path: PathBuf::from(path),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| ObserverError::Parse(e.to_string()))
    }

    /// Samples with `start <= step < end`.
    pub fn slice(&self, start: Option<u64>, end: Option<u64>) -> Vec<&Sample> {
        self.data
            .iter()
            .filter(|s| start.is_none_or(|lo| s.step >= lo) && end.is_none_or(|hi| s.step < hi))
            .collect()
    }
}

/// Numeric view of one sample value: a list of rows.
///
/// A scalar is one 1-wide row, a flat vector is one row, a list of vectors
/// is one row per vector.
pub fn rows(value: &Value) -> Option<Vec<Vec<f64>>> {
    match value {
        Value::Array(items) if items.iter().all(Value::is_array) && !items.is_empty() => items
            .iter()
            .map(|row| -> Option<Vec<f64>> { row.as_array()?.iter().map(number).collect() })
            .collect(),
        Value::Array(items) => Some(vec![items.iter().map(number).collect::<Option<Vec<_>>>()?]),
        other => Some(vec![vec![number(other)?]]),
    }
}

/// One sample component. Non-finite values arrive as `"nan"`, `"inf"`,
/// `"-inf"` or `null`, since JSON has no literal for them.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Null => Some(f64::NAN),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| !v.is_finite()),
        _ => None,
    }
}

/// Keep only the listed rows, in the given order.
pub fn select_rows(rows: Vec<Vec<f64>>, indices: &[usize], step: u64) -> Result<Vec<Vec<f64>>, ObserverError> {
    indices
        .iter()
        .map(|&i| {
            rows.get(i).cloned().ok_or(ObserverError::IndexOutOfRange {
                index: i,
                rows: rows.len(),
                step,
            })
        })
        .collect()
}

/// Rebuild a JSON value from selected rows, keeping the original shape family.
pub fn rows_to_value(original: &Value, rows: &[Vec<f64>]) -> Value {
    let nested = matches!(original, Value::Array(items) if items.first().is_some_and(Value::is_array));
    if nested {
        Value::from(rows.iter().map(|r| Value::from(r.clone())).collect::<Vec<_>>())
    } else if matches!(original, Value::Number(_)) && rows.len() == 1 && rows[0].len() == 1 {
        Value::from(rows[0][0])
    } else {
        Value::from(rows.iter().flatten().copied().collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn run() -> RunInfo<'static> {
        RunInfo {
            scene_path: "/tmp/scene.py",
            node_path: "solver_node/mo",
            field: "position",
            steps: 3,
            dt: 0.5,
        }
    }

    #[test]
    fn values_become_numbered_samples() {
        let ts = TimeSeries::from_values(&run(), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(ts.metadata.sample_count, 3);
        assert_eq!(ts.data[0].step, 1);
        assert_eq!(ts.data[2].time, 1.5);
        assert!(chrono::DateTime::parse_from_rfc3339(&ts.metadata.recorded_at).is_ok());
    }

    #[test]
    fn slice_is_half_open() {
        let ts = TimeSeries::from_values(&run(), vec![json!(1), json!(2), json!(3)]);
        let steps: Vec<u64> = ts.slice(Some(2), Some(3)).iter().map(|s| s.step).collect();
        assert_eq!(steps, vec![2]);
        assert_eq!(ts.slice(None, None).len(), 3);
        assert!(ts.slice(Some(5), None).is_empty());
    }

    #[tokio::test]
    async fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("runs/out.json");
        let ts = TimeSeries::from_values(&run(), vec![json!([[0.0, 1.0, 2.0]])]);
        ts.save(&path).await.unwrap();
        assert_eq!(TimeSeries::load(&path).await.unwrap(), ts);
    }

    #[tokio::test]
    async fn load_reports_missing_and_malformed_files() {
        let tmp = TempDir::new().unwrap();
        let missing = TimeSeries::load(&tmp.path().join("none.json")).await.unwrap_err();
        assert!(matches!(missing, ObserverError::DataNotFound(_)));

        let bad = tmp.path().join("bad.json");
        std::fs::write(&bad, "{not json").unwrap();
        let err = TimeSeries::load(&bad).await.unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse time-series file: "));
    }

    #[test]
    fn row_views() {
        assert_eq!(rows(&json!(2.5)), Some(vec![vec![2.5]]));
        assert_eq!(rows(&json!([1, 2, 3])), Some(vec![vec![1.0, 2.0, 3.0]]));
        assert_eq!(rows(&json!([[1, 2], [3, 4]])), Some(vec![vec![1.0, 2.0], vec![3.0, 4.0]]));
        assert_eq!(rows(&json!("text")), None);
        assert_eq!(rows(&json!([[1, "x"]])), None);
        assert_eq!(rows(&json!(["1.5"])), None);
    }

    #[test]
    fn non_finite_markers_are_read_as_numbers() {
        let parsed = rows(&json!([["nan", 0.0, "inf"], [null, "-Infinity", 2]])).unwrap();
        assert!(parsed[0][0].is_nan());
        assert_eq!(parsed[0][2], f64::INFINITY);
        assert!(parsed[1][0].is_nan());
        assert_eq!(parsed[1][1], f64::NEG_INFINITY);
        assert_eq!(parsed[1][2], 2.0);
        assert!(rows(&json!("inf")).unwrap()[0][0].is_infinite());
    }

    #[test]
    fn selecting_rows() {
        let picked = select_rows(vec![vec![0.0], vec![1.0], vec![2.0]], &[2, 0], 4).unwrap();
        assert_eq!(picked, vec![vec![2.0], vec![0.0]]);
        let err = select_rows(vec![vec![0.0]], &[3], 4).unwrap_err();
        assert_eq!(err.to_string(), "Index 3 out of range for snapshot with 1 rows at step 4");
        assert_eq!(rows_to_value(&json!([[0, 0]]), &picked), json!([[2.0], [0.0]]));
        assert_eq!(rows_to_value(&json!(1), &[vec![7.0]]), json!(7.0));
    }
}
