//! Mesh file loaders.
//!
//! Only what the inspection tools need is kept: vertex coordinates, a face
//! count for surface formats, and cell counts/types for volumetric ones.
//! Faces are counted as triangles (an n-gon counts as n - 2).

use std::collections::HashMap;

use super::MeshError;

/// Format family, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Vtk,
    Msh,
    Obj,
    Stl,
    Ply,
}

impl Format {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            ".vtk" => Some(Format::Vtk),
            ".msh" => Some(Format::Msh),
            ".obj" => Some(Format::Obj),
            ".stl" => Some(Format::Stl),
            ".ply" => Some(Format::Ply),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Format::Vtk => "VTK",
            Format::Msh => "Gmsh",
            Format::Obj => "OBJ",
            Format::Stl => "STL",
            Format::Ply => "PLY",
        }
    }
}

/// A loaded mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<[f64; 3]>,
    /// Triangle count for surface data.
    pub faces: usize,
    /// Declared cell count (volumetric formats).
    pub cells: Option<usize>,
    /// Per-cell type codes (VTK cell types, Gmsh element types).
    pub cell_types: Option<Vec<i64>>,
}

pub fn parse(format: Format, bytes: &[u8]) -> Result<Mesh, MeshError> {
    let fail = |detail: String| MeshError::Parse {
        format: format.name(),
        detail,
    };
    match format {
        Format::Vtk => parse_vtk(&text(bytes)?).map_err(fail),
        Format::Msh => parse_msh(&text(bytes)?).map_err(fail),
        Format::Obj => parse_obj(&text(bytes)?).map_err(fail),
        Format::Stl => parse_stl(bytes).map_err(fail),
        Format::Ply => parse_ply(bytes).map_err(fail),
    }
}

fn text(bytes: &[u8]) -> Result<String, MeshError> {
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn num<T: std::str::FromStr>(token: Option<&str>, what: &str) -> Result<T, String> {
    let t = token.ok_or_else(|| format!("missing {what}"))?;
    t.parse().map_err(|_| format!("invalid {what}: '{t}'"))
}

// ── VTK (legacy ASCII) ────────────────────────────────────────────────────────

fn parse_vtk(src: &str) -> Result<Mesh, String> {
    let mut lines = src.lines();
    match lines.next() {
        Some(l) if l.trim_start().starts_with("# vtk DataFile") => {}
        _ => return Err("missing '# vtk DataFile' header".into()),
    }
    lines.next(); // title
    match lines.next().map(str::trim) {
        Some(f) if f.eq_ignore_ascii_case("ASCII") => {}
        Some(f) if f.eq_ignore_ascii_case("BINARY") => return Err("binary VTK files are not supported".into()),
        other => return Err(format!("unknown VTK encoding: {other:?}")),
    }

    let mut mesh = Mesh::default();
    // Remaining content as a token stream; section keywords start lines.
    let rest: Vec<&str> = lines.collect();
    let mut i = 0;
    while i < rest.len() {
        let line = rest[i].trim();
        let mut parts = line.split_whitespace();
        let keyword = parts.next().unwrap_or("").to_ascii_uppercase();
        match keyword.as_str() {
            "POINTS" => {
                let n: usize = num(parts.next(), "POINTS count")?;
                let total = n.checked_mul(3).ok_or("POINTS count out of range")?;
                let (values, next) = collect_numbers::<f64>(&rest, i + 1, total)?;
                mesh.vertices = values.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
                i = next;
                continue;
            }
            "CELLS" => {
                let n: usize = num(parts.next(), "CELLS count")?;
                mesh.cells = Some(n);
            }
            "POLYGONS" | "TRIANGLE_STRIPS" => {
                let n: usize = num(parts.next(), "POLYGONS count")?;
                let size: usize = num(parts.next(), "POLYGONS size")?;
                let (values, next) = collect_numbers::<i64>(&rest, i + 1, size)?;
                mesh.faces += polygon_triangles(&values, n);
                i = next;
                continue;
            }
            "CELL_TYPES" => {
                let n: usize = num(parts.next(), "CELL_TYPES count")?;
                let (values, next) = collect_numbers::<i64>(&rest, i + 1, n)?;
                mesh.cell_types = Some(values);
                i = next;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    if mesh.vertices.is_empty() {
        return Err("no POINTS section".into());
    }
    Ok(mesh)
}

/// Read `count` numbers starting at line `start`; returns them and the next line index.
fn collect_numbers<T: std::str::FromStr>(lines: &[&str], start: usize, count: usize) -> Result<(Vec<T>, usize), String> {
    // Declared counts are untrusted; reserve no more than the data could hold.
    let available: usize = lines.get(start..).unwrap_or_default().iter().map(|l| l.len() / 2 + 1).sum();
    let mut out = Vec::with_capacity(count.min(available));
    let mut j = start;
    while out.len() < count && j < lines.len() {
        for tok in lines[j].split_whitespace() {
            if out.len() == count {
                break;
            }
            out.push(tok.parse().map_err(|_| format!("invalid number '{tok}' on data line {}", j + 1))?);
        }
        j += 1;
    }
    if out.len() < count {
        return Err(format!("expected {count} values, found {}", out.len()));
    }
    Ok((out, j))
}

/// Triangles in a VTK connectivity list (`k i0 .. ik-1` records).
fn polygon_triangles(values: &[i64], n: usize) -> usize {
    let mut pos = 0;
    let mut tris = 0;
    for _ in 0..n {
        let Some(&k) = values.get(pos) else { break };
        let k = k.max(0) as usize;
        tris += k.saturating_sub(2);
        pos = pos.saturating_add(k).saturating_add(1);
    }
    tris
}

// ── Gmsh MSH (ASCII v2 / v4) ──────────────────────────────────────────────────

fn parse_msh(src: &str) -> Result<Mesh, String> {
    let lines: Vec<&str> = src.lines().map(str::trim).collect();
    let section = |name: &str| lines.iter().position(|l| *l == name);

    let fmt = section("$MeshFormat").ok_or("missing $MeshFormat section")?;
    let mut header = lines.get(fmt + 1).ok_or("truncated $MeshFormat")?.split_whitespace();
    let version: f64 = num(header.next(), "format version")?;
    let file_type: u32 = num(header.next(), "file type")?;
    if file_type != 0 {
        return Err("binary MSH files are not supported".into());
    }

    let nodes_at = section("$Nodes").ok_or("missing $Nodes section")?;
    let elements_at = section("$Elements");

    let mut mesh = Mesh::default();
    if version < 3.0 {
        let n: usize = num(lines.get(nodes_at + 1).copied(), "node count")?;
        let n = within(n, lines.len().saturating_sub(nodes_at + 2), "$Nodes")?;
        mesh.vertices.reserve(n);
        for k in 0..n {
            let line = lines.get(nodes_at + 2 + k).ok_or("truncated $Nodes")?;
            let mut t = line.split_whitespace().skip(1);
            mesh.vertices.push([
                num(t.next(), "node x")?,
                num(t.next(), "node y")?,
                num(t.next(), "node z")?,
            ]);
        }
        if let Some(at) = elements_at {
            let n: usize = num(lines.get(at + 1).copied(), "element count")?;
            let n = within(n, lines.len().saturating_sub(at + 2), "$Elements")?;
            let mut types = Vec::with_capacity(n);
            for k in 0..n {
                let line = lines.get(at + 2 + k).ok_or("truncated $Elements")?;
                types.push(num(line.split_whitespace().nth(1), "element type")?);
            }
            mesh.cells = Some(n);
            mesh.cell_types = Some(types);
        }
    } else {
        let mut head = lines.get(nodes_at + 1).ok_or("truncated $Nodes")?.split_whitespace();
        let blocks: usize = num(head.next(), "node block count")?;
        let mut cursor = nodes_at + 2;
        for _ in 0..blocks {
            let mut b = lines.get(cursor).ok_or("truncated node block")?.split_whitespace();
            let _dim: i64 = num(b.next(), "entity dim")?;
            let _tag: i64 = num(b.next(), "entity tag")?;
            let _parametric: i64 = num(b.next(), "parametric flag")?;
            let count: usize = num(b.next(), "block node count")?;
            // Tags then coordinates: two lines per node.
            let count = within(count, lines.len().saturating_sub(cursor + 1) / 2, "node block")?;
            cursor += 1 + count; // skip the node tags
            for k in 0..count {
                let mut t = lines.get(cursor + k).ok_or("truncated node coordinates")?.split_whitespace();
                mesh.vertices.push([num(t.next(), "node x")?, num(t.next(), "node y")?, num(t.next(), "node z")?]);
            }
            cursor += count;
        }
        if let Some(at) = elements_at {
            let mut head = lines.get(at + 1).ok_or("truncated $Elements")?.split_whitespace();
            let blocks: usize = num(head.next(), "element block count")?;
            let total: usize = num(head.next(), "element count")?;
            let mut types = Vec::with_capacity(total.min(lines.len()));
            let mut cursor = at + 2;
            for _ in 0..blocks {
                let mut b = lines.get(cursor).ok_or("truncated element block")?.split_whitespace();
                let _dim: i64 = num(b.next(), "entity dim")?;
                let _tag: i64 = num(b.next(), "entity tag")?;
                let etype: i64 = num(b.next(), "element type")?;
                let count: usize = num(b.next(), "block element count")?;
                let count = within(count, lines.len().saturating_sub(cursor + 1), "element block")?;
                types.extend(std::iter::repeat_n(etype, count));
                cursor += 1 + count;
            }
            mesh.cells = Some(total);
            mesh.cell_types = Some(types);
        }
    }

    if mesh.vertices.is_empty() {
        return Err("no nodes".into());
    }
    Ok(mesh)
}

/// Reject a declared count larger than the lines left to hold it.
fn within(count: usize, available: usize, section: &str) -> Result<usize, String> {
    if count > available {
        return Err(format!("truncated {section}: declares {count} entries, {available} lines remain"));
    }
    Ok(count)
}

// ── Wavefront OBJ ─────────────────────────────────────────────────────────────

fn parse_obj(src: &str) -> Result<Mesh, String> {
    let mut mesh = Mesh::default();
    for (lineno, line) in src.lines().enumerate() {
        let mut t = line.split_whitespace();
        match t.next() {
            Some("v") => {
                let at = |what: &str| format!("{what} on line {}", lineno + 1);
                mesh.vertices.push([
                    num(t.next(), &at("vertex x"))?,
                    num(t.next(), &at("vertex y"))?,
                    num(t.next(), &at("vertex z"))?,
                ]);
            }
            Some("f") => mesh.faces += t.count().saturating_sub(2),
            _ => {}
        }
    }
    if mesh.vertices.is_empty() {
        return Err("no vertices".into());
    }
    Ok(mesh)
}

// ── STL ───────────────────────────────────────────────────────────────────────

/// Merge exactly-equal vertices, returning index-stable unique positions.
#[derive(Default)]
struct Welder {
    seen: HashMap<[u64; 3], usize>,
    vertices: Vec<[f64; 3]>,
}

impl Welder {
    fn add(&mut self, v: [f64; 3]) {
        // -0.0 and 0.0 are the same point.
        let key = v.map(|c| if c == 0.0 { 0u64 } else { c.to_bits() });
        if !self.seen.contains_key(&key) {
            self.seen.insert(key, self.vertices.len());
            self.vertices.push(v);
        }
    }
}

fn parse_stl(bytes: &[u8]) -> Result<Mesh, String> {
    if bytes.len() >= 84 {
        let n = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
        if n.checked_mul(50).and_then(|b| b.checked_add(84)) == Some(bytes.len()) {
            return parse_stl_binary(bytes, n);
        }
    }
    let src = String::from_utf8_lossy(bytes);
    if !src.trim_start().starts_with("solid") {
        return Err("neither ASCII nor binary STL".into());
    }
    let mut welder = Welder::default();
    let mut faces = 0;
    for line in src.lines() {
        let mut t = line.split_whitespace();
        match t.next() {
            Some("vertex") => welder.add([num(t.next(), "vertex x")?, num(t.next(), "vertex y")?, num(t.next(), "vertex z")?]),
            Some("facet") => faces += 1,
            _ => {}
        }
    }
    if welder.vertices.is_empty() {
        return Err("no vertices".into());
    }
    Ok(Mesh {
        vertices: welder.vertices,
        faces,
        ..Mesh::default()
    })
}

fn parse_stl_binary(bytes: &[u8], n: usize) -> Result<Mesh, String> {
    let mut welder = Welder::default();
    for tri in bytes[84..].chunks_exact(50) {
        // 12 bytes normal, then three vertices of three f32 each.
        for v in 0..3 {
            let base = 12 + v * 12;
            let f = |o: usize| f32::from_le_bytes([tri[base + o], tri[base + o + 1], tri[base + o + 2], tri[base + o + 3]]) as f64;
            welder.add([f(0), f(4), f(8)]);
        }
    }
    if welder.vertices.is_empty() {
        return Err("no triangles".into());
    }
    Ok(Mesh {
        vertices: welder.vertices,
        faces: n,
        ..Mesh::default()
    })
}

// ── PLY ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Encoding {
    Ascii,
    Little,
    Big,
}

#[derive(Debug, Clone)]
enum Property {
    Scalar { name: String, ty: String },
    List { count_ty: String, item_ty: String },
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    count: usize,
    props: Vec<Property>,
}

fn scalar_size(ty: &str) -> Result<usize, String> {
    Ok(match ty {
        "char" | "uchar" | "int8" | "uint8" => 1,
        "short" | "ushort" | "int16" | "uint16" => 2,
        "int" | "uint" | "int32" | "uint32" | "float" | "float32" => 4,
        "double" | "float64" => 8,
        other => return Err(format!("unknown PLY type '{other}'")),
    })
}

fn read_scalar(data: &[u8], pos: &mut usize, ty: &str, enc: Encoding) -> Result<f64, String> {
    let size = scalar_size(ty)?;
    let end = pos.checked_add(size).ok_or("truncated binary PLY body")?;
    let raw = data.get(*pos..end).ok_or("truncated binary PLY body")?;
    *pos += size;
    macro_rules! conv {
        ($t:ty, $n:expr) => {{
            let mut buf = [0u8; $n];
            buf.copy_from_slice(raw);
            (if enc == Encoding::Little { <$t>::from_le_bytes(buf) } else { <$t>::from_be_bytes(buf) }) as f64
        }};
    }
    Ok(match ty {
        "char" | "int8" => conv!(i8, 1),
        "uchar" | "uint8" => conv!(u8, 1),
        "short" | "int16" => conv!(i16, 2),
        "ushort" | "uint16" => conv!(u16, 2),
        "int" | "int32" => conv!(i32, 4),
        "uint" | "uint32" => conv!(u32, 4),
        "float" | "float32" => conv!(f32, 4),
        _ => conv!(f64, 8),
    })
}

fn parse_ply(bytes: &[u8]) -> Result<Mesh, String> {
    let end_marker = b"end_header";
    let header_end = bytes
        .windows(end_marker.len())
        .position(|w| w == end_marker)
        .ok_or("missing end_header")?;
    let mut body = header_end + end_marker.len();
    // Skip to just past the newline ending the header line.
    while body < bytes.len() && bytes[body] != b'\n' {
        body += 1;
    }
    body += 1;

    let header = String::from_utf8_lossy(&bytes[..header_end]);
    let mut lines = header.lines();
    if lines.next().map(str::trim) != Some("ply") {
        return Err("missing 'ply' magic".into());
    }

    let mut encoding = None;
    let mut elements: Vec<Element> = Vec::new();
    for line in lines {
        let t: Vec<&str> = line.split_whitespace().collect();
        match t.as_slice() {
            ["format", "ascii", ..] => encoding = Some(Encoding::Ascii),
            ["format", "binary_little_endian", ..] => encoding = Some(Encoding::Little),
            ["format", "binary_big_endian", ..] => encoding = Some(Encoding::Big),
            ["element", name, count] => elements.push(Element {
                name: name.to_string(),
                count: num(Some(count), "element count")?,
                props: Vec::new(),
            }),
            ["property", "list", count_ty, item_ty, _name] => elements
                .last_mut()
                .ok_or("property before element")?
                .props
                .push(Property::List {
                    count_ty: count_ty.to_string(),
                    item_ty: item_ty.to_string(),
                }),
            ["property", ty, name] => elements
                .last_mut()
                .ok_or("property before element")?
                .props
                .push(Property::Scalar {
                    name: name.to_string(),
                    ty: ty.to_string(),
                }),
            _ => {}
        }
    }
    let encoding = encoding.ok_or("missing format line")?;

    let mut mesh = Mesh::default();
    let data = &bytes[body.min(bytes.len())..];
    let text = String::from_utf8_lossy(data);
    let mut ascii_lines = text.lines().filter(|l| !l.trim().is_empty());
    let mut pos = 0usize;

    for element in &elements {
        let axis = |name: &str| match name {
            "x" => Some(0),
            "y" => Some(1),
            "z" => Some(2),
            _ => None,
        };
        if encoding != Encoding::Ascii && element.count > 0 {
            // Every binary row consumes at least this many bytes.
            let min_row = element.props.iter().try_fold(0usize, |acc, p| {
                Ok::<_, String>(acc + match p {
                    Property::Scalar { ty, .. } => scalar_size(ty)?,
                    Property::List { count_ty, .. } => scalar_size(count_ty)?,
                })
            })?;
            if min_row == 0 {
                return Err(format!("element '{}' declares {} rows but no properties", element.name, element.count));
            }
            let remaining = data.len().saturating_sub(pos);
            if element.count > remaining / min_row {
                return Err(format!("truncated '{}' data: {} rows declared", element.name, element.count));
            }
        }
        for _ in 0..element.count {
            let mut v = [0.0f64; 3];
            let mut list_len = None;
            if encoding == Encoding::Ascii {
                let line = ascii_lines.next().ok_or_else(|| format!("truncated '{}' data", element.name))?;
                let mut toks = line.split_whitespace();
                for prop in &element.props {
                    match prop {
                        Property::Scalar { name, .. } => {
                            let value: f64 = num(toks.next(), "PLY value")?;
                            if let Some(a) = axis(name) {
                                v[a] = value;
                            }
                        }
                        Property::List { .. } => {
                            let k: usize = num(toks.next(), "PLY list length")?;
                            if toks.by_ref().take(k).count() < k {
                                return Err(format!("short list in '{}' data", element.name));
                            }
                            list_len.get_or_insert(k);
                        }
                    }
                }
            } else {
                for prop in &element.props {
                    match prop {
                        Property::Scalar { name, ty } => {
                            let value = read_scalar(data, &mut pos, ty, encoding)?;
                            if let Some(a) = axis(name) {
                                v[a] = value;
                            }
                        }
                        Property::List { count_ty, item_ty } => {
                            let k = read_scalar(data, &mut pos, count_ty, encoding)? as usize;
                            pos = k
                                .checked_mul(scalar_size(item_ty)?)
                                .and_then(|bytes| pos.checked_add(bytes))
                                .filter(|end| *end <= data.len())
                                .ok_or("truncated binary PLY body")?;
                            list_len.get_or_insert(k);
                        }
                    }
                }
            }
            match element.name.as_str() {
                "vertex" => mesh.vertices.push(v),
                "face" => mesh.faces += list_len.unwrap_or(0).saturating_sub(2),
                _ => {}
            }
        }
    }

    if mesh.vertices.is_empty() {
        return Err("no vertices".into());
    }
    Ok(mesh)
}
