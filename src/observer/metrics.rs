//! Displacement and stability metrics over a sliced recording.

use serde::Serialize;

/// One snapshot in numeric form.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub step: u64,
    pub rows: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct StepDisplacement {
    pub step: u64,
    pub max: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Displacement {
    pub per_step: Vec<StepDisplacement>,
    pub final_max: f64,
    pub final_mean: f64,
    pub peak_max: f64,
    pub peak_step: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Stability {
    pub finite: bool,
    pub max_step_delta: f64,
    pub final_step_delta: f64,
    pub settled: bool,
    pub exploded: bool,
    pub stable: bool,
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
}

/// Largest row-wise distance between two snapshots of the same shape.
fn max_row_distance(a: &Snapshot, b: &Snapshot) -> f64 {
    a.rows
        .iter()
        .zip(&b.rows)
        .map(|(x, y)| distance(x, y))
        .fold(0.0, f64::max)
}

/// Shape of the first snapshot every later one must match.
pub fn check_shapes(snapshots: &[Snapshot]) -> Result<(), u64> {
    let Some(first) = snapshots.first() else {
        return Ok(());
    };
    let shape: Vec<usize> = first.rows.iter().map(Vec::len).collect();
    for s in snapshots {
        if s.rows.len() != shape.len() || s.rows.iter().map(Vec::len).zip(&shape).any(|(n, m)| n != *m) {
            return Err(s.step);
        }
    }
    Ok(())
}

/// Displacement of each row relative to the first snapshot. Expects at least one snapshot.
pub fn displacement(snapshots: &[Snapshot]) -> Option<Displacement> {
    let reference = snapshots.first()?;
    let per_step: Vec<StepDisplacement> = snapshots
        .iter()
        .map(|s| {
            let dists: Vec<f64> = s.rows.iter().zip(&reference.rows).map(|(r, r0)| distance(r, r0)).collect();
            let max = dists.iter().copied().fold(0.0, f64::max);
            let mean = if dists.is_empty() {
                0.0
            } else {
                dists.iter().sum::<f64>() / dists.len() as f64
            };
            StepDisplacement { step: s.step, max, mean }
        })
        .collect();

    let last = *per_step.last()?;
    let peak = per_step
        .iter()
        .copied()
        .fold(per_step[0], |best, d| if d.max > best.max { d } else { best });
    Some(Displacement {
        final_max: last.max,
        final_mean: last.mean,
        peak_max: peak.max,
        peak_step: peak.step,
        per_step,
    })
}

pub fn stability(
    snapshots: &[Snapshot],
    peak_max: f64,
    settle_tolerance: f64,
    explosion_threshold: f64,
) -> Stability {
    let finite = snapshots.iter().all(|s| s.rows.iter().flatten().all(|v| v.is_finite()));
    let deltas: Vec<f64> = snapshots.windows(2).map(|w| max_row_distance(&w[0], &w[1])).collect();
    let max_step_delta = deltas.iter().copied().fold(0.0, f64::max);
    let final_step_delta = deltas.last().copied().unwrap_or(0.0);
    let exploded = !finite || peak_max > explosion_threshold;
    Stability {
        finite,
        max_step_delta,
        final_step_delta,
        settled: finite && final_step_delta <= settle_tolerance,
        exploded,
        stable: !exploded,
    }
}
