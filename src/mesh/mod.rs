//! Mesh inspection: path resolution, bounding boxes, topology labels,
//! element counts and vertex selection.
//!
//! All operations are synchronous file reads; callers on the async side run
//! them on the blocking pool.

pub mod formats;

use std::{collections::BTreeMap, path::Path};

use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::config::expand_home;

pub use formats::{Format, Mesh};

/// Tolerance for `eq`, `at_min`, `at_max` and box selectors when none is given.
pub const DEFAULT_TOLERANCE: f64 = 1e-6;
/// Maximum number of indices returned by [`find_mesh_vertices`] by default.
pub const DEFAULT_VERTEX_LIMIT: usize = 1000;

const VOLUMETRIC: &str = "Volumetric mesh (e.g., tetrahedra, hexahedra)";
const SURFACE: &str = "Surface mesh (e.g., triangles)";
const UNKNOWN: &str = "Unknown or unsupported mesh type";

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("{}", .0.error.as_deref().unwrap_or("Invalid path"))]
    InvalidPath(AssetPath),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Unsupported mesh format: '{0}'")]
    Unsupported(String),

    #[error("Failed to parse {format} mesh: {detail}")]
    Parse { format: &'static str, detail: String },

    #[error("Could not read mesh: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid selector: {0}")]
    Selector(String),
}

impl MeshError {
    /// Result object for a failed mesh tool call.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("error".into(), json!(self.to_string()));
        if let MeshError::InvalidPath(resolved) = self {
            if let Ok(Value::Object(fields)) = serde_json::to_value(resolved) {
                for (k, v) in fields {
                    out.entry(k).or_insert(v);
                }
            }
        }
        Value::Object(out)
    }
}

// ── Path resolution ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AssetPath {
    pub input: String,
    pub path: String,
    pub exists: bool,
    pub is_file: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Expand `~`, make absolute, and report what is on disk.
pub fn resolve_asset_path(input: &str) -> AssetPath {
    let expanded = expand_home(input);
    let absolute = std::path::absolute(&expanded).unwrap_or(expanded);
    let meta = std::fs::metadata(&absolute).ok();
    let exists = meta.is_some();
    let is_file = meta.as_ref().is_some_and(|m| m.is_file());
    AssetPath {
        input: input.to_string(),
        path: absolute.display().to_string(),
        exists,
        is_file,
        size_bytes: meta.filter(|m| m.is_file()).map(|m| m.len()),
        error: (!exists).then(|| "Path does not exist".to_string()),
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Lower-cased extension including the dot, or "".
pub fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

pub fn load(path: &Path) -> Result<Mesh, MeshError> {
    let ext = extension(path);
    let format = Format::from_extension(&ext).ok_or_else(|| MeshError::Unsupported(ext.clone()))?;
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => MeshError::NotFound(path.display().to_string()),
        _ => MeshError::Io(e),
    })?;
    formats::parse(format, &bytes)
}

// ── Bounding box ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BoundingBox {
    pub fn of(vertices: &[[f64; 3]]) -> Option<Self> {
        let first = *vertices.first()?;
        Some(vertices.iter().fold(
            BoundingBox {
                min: first,
                max: first,
            },
            |mut bb, v| {
                for a in 0..3 {
                    bb.min[a] = bb.min[a].min(v[a]);
                    bb.max[a] = bb.max[a].max(v[a]);
                }
                bb
            },
        ))
    }

    pub fn extent(&self) -> [f64; 3] {
        [0, 1, 2].map(|a| self.max[a] - self.min[a])
    }

    pub fn diagonal(&self) -> f64 {
        self.extent().iter().map(|e| e * e).sum::<f64>().sqrt()
    }
}

pub fn get_mesh_bounding_box(mesh_path: &str) -> Result<BoundingBox, MeshError> {
    let mesh = load(&expand_home(mesh_path))?;
    BoundingBox::of(&mesh.vertices).ok_or_else(|| MeshError::Parse {
        format: "mesh",
        detail: "Could not compute bounds".into(),
    })
}

// ── Topology ──────────────────────────────────────────────────────────────────

fn topology_label(ext: &str) -> &'static str {
    match ext {
        ".vtk" | ".msh" => VOLUMETRIC,
        ".stl" | ".obj" | ".ply" => SURFACE,
        _ => UNKNOWN,
    }
}

fn topology_kind(label: &str) -> &'static str {
    match label {
        SURFACE => "surface",
        VOLUMETRIC => "volumetric",
        _ => "unknown",
    }
}

/// Human-readable topology label; load failures are folded into the text.
pub fn inspect_mesh_topology(mesh_path: &str) -> String {
    let path = expand_home(mesh_path);
    match load(&path) {
        Ok(_) => topology_label(&extension(&path)).to_string(),
        Err(e) => format!("Error inspecting mesh topology: {e}"),
    }
}

// ── Stats ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MeshStats {
    pub path: String,
    pub extension: String,
    pub topology: &'static str,
    pub topology_kind: &'static str,
    pub bounding_box: BoundingBox,
    pub bbox_extent: [f64; 3],
    pub bbox_diagonal: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_type_counts: Option<BTreeMap<String, usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertex_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_count: Option<usize>,
}

pub fn mesh_stats(mesh_path: &str) -> Result<MeshStats, MeshError> {
    let resolved = resolve_asset_path(mesh_path);
    if !resolved.exists || !resolved.is_file {
        return Err(MeshError::InvalidPath(resolved));
    }
    let path = Path::new(&resolved.path);
    let ext = extension(path);
    let mesh = load(path)?;
    let bbox = BoundingBox::of(&mesh.vertices).ok_or_else(|| MeshError::Parse {
        format: "mesh",
        detail: "Could not compute bounds".into(),
    })?;
    let topology = topology_label(&ext);
    let volumetric = matches!(ext.as_str(), ".vtk" | ".msh");

    let cell_type_counts = mesh.cell_types.as_ref().map(|types| {
        types.iter().fold(BTreeMap::new(), |mut acc, t| {
            *acc.entry(t.to_string()).or_insert(0) += 1;
            acc
        })
    });

    Ok(MeshStats {
        path: resolved.path.clone(),
        extension: ext,
        topology,
        topology_kind: topology_kind(topology),
        bounding_box: bbox,
        bbox_extent: bbox.extent(),
        bbox_diagonal: bbox.diagonal(),
        point_count: volumetric.then_some(mesh.vertices.len()),
        cell_count: if volumetric { mesh.cells } else { None },
        cell_type_counts: if volumetric { cell_type_counts } else { None },
        vertex_count: (!volumetric).then_some(mesh.vertices.len()),
        face_count: (!volumetric).then_some(mesh.faces),
    })
}

// ── Vertex selection ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AxisOp {
    Lt(f64),
    Le(f64),
    Gt(f64),
    Ge(f64),
    Eq { value: f64, tolerance: f64 },
    Between { min: f64, max: f64 },
    AtMin { tolerance: f64 },
    AtMax { tolerance: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selector {
    Axis { axis: usize, op: AxisOp },
    Box { min: [f64; 3], max: [f64; 3], tolerance: f64 },
}

fn bad(msg: impl Into<String>) -> MeshError {
    MeshError::Selector(msg.into())
}

fn number(obj: &Map<String, Value>, key: &str) -> Result<f64, MeshError> {
    obj.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| bad(format!("'{key}' must be a number")))
}

fn point(obj: &Map<String, Value>, key: &str) -> Result<[f64; 3], MeshError> {
    let err = || bad(format!("'{key}' must be a list of 3 numbers"));
    let items = obj.get(key).and_then(Value::as_array).ok_or_else(err)?;
    if items.len() != 3 {
        return Err(err());
    }
    let mut out = [0.0; 3];
    for (slot, v) in out.iter_mut().zip(items) {
        *slot = v.as_f64().ok_or_else(err)?;
    }
    Ok(out)
}

impl Selector {
    pub fn from_json(value: &Value) -> Result<Self, MeshError> {
        let obj = value.as_object().ok_or_else(|| bad("selector must be an object"))?;
        let tolerance = match obj.get("tolerance") {
            None | Some(Value::Null) => DEFAULT_TOLERANCE,
            Some(_) => {
                let t = number(obj, "tolerance")?;
                if t < 0.0 {
                    return Err(bad("'tolerance' must be >= 0"));
                }
                t
            }
        };

        if obj.contains_key("box_min") || obj.contains_key("box_max") {
            let min = point(obj, "box_min")?;
            let max = point(obj, "box_max")?;
            if (0..3).any(|a| min[a] > max[a]) {
                return Err(bad("'box_min' must not exceed 'box_max'"));
            }
            return Ok(Selector::Box { min, max, tolerance });
        }

        let axis = match obj.get("axis") {
            Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "x" => 0,
                "y" => 1,
                "z" => 2,
                _ => return Err(bad(format!("unknown axis '{s}'"))),
            },
            Some(Value::Number(n)) => match n.as_u64() {
                Some(a @ 0..=2) => a as usize,
                _ => return Err(bad(format!("unknown axis '{n}'"))),
            },
            _ => return Err(bad("selector needs 'axis' (x, y, z) or 'box_min'/'box_max'")),
        };

        let op_name = obj.get("op").and_then(Value::as_str).ok_or_else(|| bad("selector needs 'op'"))?;
        let op = match op_name {
            "lt" => AxisOp::Lt(number(obj, "value")?),
            "le" => AxisOp::Le(number(obj, "value")?),
            "gt" => AxisOp::Gt(number(obj, "value")?),
            "ge" => AxisOp::Ge(number(obj, "value")?),
            "eq" => AxisOp::Eq {
                value: number(obj, "value")?,
                tolerance,
            },
            "between" => {
                let (min, max) = (number(obj, "min")?, number(obj, "max")?);
                if min > max {
                    return Err(bad("'min' must not exceed 'max'"));
                }
                AxisOp::Between { min, max }
            }
            "at_min" => AxisOp::AtMin { tolerance },
            "at_max" => AxisOp::AtMax { tolerance },
            other => return Err(bad(format!("unknown op '{other}'"))),
        };
        Ok(Selector::Axis { axis, op })
    }

    fn matcher(&self, vertices: &[[f64; 3]]) -> impl Fn(&[f64; 3]) -> bool + '_ {
        let bbox = BoundingBox::of(vertices);
        move |v: &[f64; 3]| match *self {
            Selector::Box { min, max, tolerance } => {
                (0..3).all(|a| v[a] >= min[a] - tolerance && v[a] <= max[a] + tolerance)
            }
            Selector::Axis { axis, op } => {
                let c = v[axis];
                match op {
                    AxisOp::Lt(x) => c < x,
                    AxisOp::Le(x) => c <= x,
                    AxisOp::Gt(x) => c > x,
                    AxisOp::Ge(x) => c >= x,
                    AxisOp::Eq { value, tolerance } => (c - value).abs() <= tolerance,
                    AxisOp::Between { min, max } => c >= min && c <= max,
                    AxisOp::AtMin { tolerance } => bbox.is_some_and(|b| (c - b.min[axis]).abs() <= tolerance),
                    AxisOp::AtMax { tolerance } => bbox.is_some_and(|b| (c - b.max[axis]).abs() <= tolerance),
                }
            }
        }
    }

    pub fn select(&self, vertices: &[[f64; 3]]) -> Vec<usize> {
        let matches = self.matcher(vertices);
        vertices
            .iter()
            .enumerate()
            .filter(|(_, v)| matches(v))
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VertexSelection {
    pub count: usize,
    pub indices: Vec<usize>,
    pub truncated: bool,
    pub vertex_count: usize,
}

pub fn find_mesh_vertices(mesh_path: &str, selector: &Value, limit: Option<usize>) -> Result<VertexSelection, MeshError> {
    let selector = Selector::from_json(selector)?;
    let mesh = load(&expand_home(mesh_path))?;
    let mut indices = selector.select(&mesh.vertices);
    let count = indices.len();
    let limit = limit.unwrap_or(DEFAULT_VERTEX_LIMIT);
    indices.truncate(limit);
    Ok(VertexSelection {
        count,
        truncated: count > indices.len(),
        indices,
        vertex_count: mesh.vertices.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CUBE_OBJ: &str = "v 0 0 0\nv 2 0 0\nv 2 3 0\nv 0 3 0\nv 0 0 1\nv 2 0 1\nv 2 3 1\nv 0 3 1\n\
f 1 2 3 4\nf 5 6 7 8\n";

    fn write(dir: &TempDir, name: &str, body: &str) -> String {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path.display().to_string()
    }

    #[test]
    fn resolve_reports_existing_file_and_missing_path() {
        let dir = TempDir::new().unwrap();
        let file = write(&dir, "a.obj", CUBE_OBJ);
        let found = resolve_asset_path(&file);
        assert!(found.exists && found.is_file);
        assert_eq!(found.size_bytes, Some(CUBE_OBJ.len() as u64));
        assert_eq!(found.error, None);

        let dir_only = resolve_asset_path(&dir.path().display().to_string());
        assert!(dir_only.exists && !dir_only.is_file);
        assert_eq!(dir_only.size_bytes, None);

        let missing = resolve_asset_path(&dir.path().join("nope.stl").display().to_string());
        assert!(!missing.exists);
        assert_eq!(missing.error.as_deref(), Some("Path does not exist"));
    }

    #[test]
    fn bounding_box_matches_extremes() {
        let dir = TempDir::new().unwrap();
        let bb = get_mesh_bounding_box(&write(&dir, "c.obj", CUBE_OBJ)).unwrap();
        assert_eq!(bb.min, [0.0, 0.0, 0.0]);
        assert_eq!(bb.max, [2.0, 3.0, 1.0]);
        assert!((bb.diagonal() - 14f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn topology_labels_and_errors() {
        let dir = TempDir::new().unwrap();
        assert_eq!(inspect_mesh_topology(&write(&dir, "c.obj", CUBE_OBJ)), SURFACE);
        let vtk = write(
            &dir,
            "t.vtk",
            "# vtk DataFile Version 3.0\nt\nASCII\nDATASET UNSTRUCTURED_GRID\nPOINTS 1 float\n0 0 0\n",
        );
        assert_eq!(inspect_mesh_topology(&vtk), VOLUMETRIC);
        let txt = write(&dir, "c.txt", "hello");
        assert_eq!(
            inspect_mesh_topology(&txt),
            "Error inspecting mesh topology: Unsupported mesh format: '.txt'"
        );
        assert!(inspect_mesh_topology("/definitely/missing.stl").starts_with("Error inspecting mesh topology: File not found"));
    }

    #[test]
    fn stats_for_surface_mesh() {
        let dir = TempDir::new().unwrap();
        let stats = mesh_stats(&write(&dir, "c.obj", CUBE_OBJ)).unwrap();
        assert_eq!(stats.extension, ".obj");
        assert_eq!(stats.topology_kind, "surface");
        assert_eq!(stats.vertex_count, Some(8));
        assert_eq!(stats.face_count, Some(4));
        assert_eq!(stats.point_count, None);
        assert_eq!(stats.bbox_extent, [2.0, 3.0, 1.0]);
    }

    #[test]
    fn stats_for_missing_path_carries_resolution() {
        let err = mesh_stats("/no/such/mesh.vtk").unwrap_err();
        let v = err.to_json();
        assert_eq!(v["error"], "Path does not exist");
        assert_eq!(v["exists"], false);
        assert_eq!(v["input"], "/no/such/mesh.vtk");
    }

    #[test]
    fn selector_parsing_errors() {
        assert!(Selector::from_json(&json!({"axis": "w", "op": "lt", "value": 1})).is_err());
        assert!(Selector::from_json(&json!({"axis": "x", "op": "lt"})).is_err());
        assert!(Selector::from_json(&json!({"axis": "x", "op": "between", "min": 2, "max": 1})).is_err());
        assert!(Selector::from_json(&json!({"box_min": [0, 0], "box_max": [1, 1, 1]})).is_err());
        assert!(Selector::from_json(&json!({"axis": 1, "op": "near"})).is_err());
        assert!(Selector::from_json(&json!({"axis": "z", "op": "at_min", "tolerance": -1})).is_err());
    }

    #[test]
    fn axis_and_box_selection() {
        let verts = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 1.0, 0.0], [2.0 + 1e-9, 5.0, 1.0]];
        let sel = |v: Value| Selector::from_json(&v).unwrap().select(&verts);
        assert_eq!(sel(json!({"axis": "x", "op": "lt", "value": 1})), vec![0]);
        assert_eq!(sel(json!({"axis": "x", "op": "le", "value": 1})), vec![0, 1]);
        assert_eq!(sel(json!({"axis": "x", "op": "at_max"})), vec![2, 3]);
        assert_eq!(sel(json!({"axis": "y", "op": "eq", "value": 5.0})), vec![3]);
        assert_eq!(sel(json!({"axis": 2, "op": "at_min"})), vec![0, 1, 2]);
        assert_eq!(sel(json!({"axis": "y", "op": "between", "min": 0.5, "max": 5})), vec![2, 3]);
        assert_eq!(sel(json!({"box_min": [0.5, -1, -1], "box_max": [2, 5, 2]})), vec![1, 2, 3]);
    }

    #[test]
    fn find_vertices_truncates() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "c.obj", CUBE_OBJ);
        let out = find_mesh_vertices(&path, &json!({"axis": "z", "op": "at_min"}), Some(2)).unwrap();
        assert_eq!(out.count, 4);
        assert_eq!(out.indices, vec![0, 1]);
        assert!(out.truncated);
        assert_eq!(out.vertex_count, 8);
    }
}
