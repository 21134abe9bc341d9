//! Trial points: candidates projected to the bounds and snapped to the mesh.

use crate::error::{Error, Result};
use crate::mads::eval::Origin;
use crate::mads::mesh::MeshController;
use crate::mads::param::ValidParameters;

/// A candidate point, immutable once issued.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialPoint {
    pub x: Vec<f64>,
    pub origin: Origin,
}

impl TrialPoint {
    pub fn center(&self) -> &[f64] {
        &self.origin.center
    }
}

/// Poll candidates `center + d · δm`, one per direction.
///
/// Candidates that fall back onto the center after projection, or repeat an
/// earlier candidate, are dropped. Each kept point records the index of its
/// direction.
pub fn poll_trial_points(
    center: &[f64],
    directions: &[Vec<i64>],
    mesh: &MeshController,
    params: &ValidParameters,
) -> Vec<TrialPoint> {
    let mut points: Vec<TrialPoint> = Vec::with_capacity(directions.len());
    for (index, d) in directions.iter().enumerate() {
        let raw: Vec<f64> = (0..center.len())
            .map(|i| center[i] + d[i] as f64 * mesh.current_mesh(i))
            .collect();
        let x = project(center, raw, mesh, params);
        if x == center || points.iter().any(|p| p.x == x) {
            continue;
        }
        let direction = x.iter().zip(center).map(|(a, c)| a - c).collect();
        points.push(TrialPoint {
            x,
            origin: Origin {
                center: center.to_vec(),
                direction,
                index,
            },
        });
    }
    points
}

/// Snaps an arbitrary candidate (from a search strategy) to the mesh around
/// `center`, then projects it to the bounds.
///
/// Returns `None` when the snapped point is the center itself.
pub fn snap_trial_point(
    center: &[f64],
    candidate: &[f64],
    index: usize,
    mesh: &MeshController,
    params: &ValidParameters,
) -> Option<TrialPoint> {
    if candidate.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let raw: Vec<f64> = (0..center.len())
        .map(|i| {
            if !mesh.is_free(i) {
                return center[i];
            }
            let m = mesh.current_mesh(i);
            let z = ((candidate[i] - center[i]) / m).round();
            center[i] + z * m
        })
        .collect();
    let x = project(center, raw, mesh, params);
    if x == center {
        return None;
    }
    let direction = x.iter().zip(center).map(|(a, c)| a - c).collect();
    Some(TrialPoint {
        x,
        origin: Origin {
            center: center.to_vec(),
            direction,
            index,
        },
    })
}

/// Checks that a trial point is within bounds, respects the granularity and
/// lies on the current mesh around its center.
pub fn verify_trial_point(
    point: &TrialPoint,
    mesh: &MeshController,
    params: &ValidParameters,
) -> Result<()> {
    let lower = params.lower();
    let upper = params.upper();
    for (i, &v) in point.x.iter().enumerate() {
        if !(v >= lower[i] && v <= upper[i]) {
            return Err(Error::BoundsViolatedInternally(format!(
                "x[{i}] = {v} outside [{}, {}]",
                lower[i], upper[i]
            )));
        }
        if !params.input_types()[i].admits(v, params.epsilon) {
            return Err(Error::BoundsViolatedInternally(format!(
                "x[{i}] = {v} does not respect its granularity"
            )));
        }
    }
    if !mesh.is_on_mesh(point.center(), &point.x) {
        return Err(Error::BoundsViolatedInternally(format!(
            "trial point {:?} is not on the mesh",
            point.x
        )));
    }
    Ok(())
}

// Clips each free coordinate to its bounds by stepping back to the last mesh
// node inside, then rounds granular coordinates.
fn project(
    center: &[f64],
    mut x: Vec<f64>,
    mesh: &MeshController,
    params: &ValidParameters,
) -> Vec<f64> {
    let lower = params.lower();
    let upper = params.upper();
    for i in 0..x.len() {
        if !mesh.is_free(i) {
            x[i] = center[i];
            continue;
        }
        let m = mesh.current_mesh(i);
        if x[i] > upper[i] {
            let z = ((upper[i] - center[i]) / m).floor();
            x[i] = center[i] + z * m;
        } else if x[i] < lower[i] {
            let z = ((lower[i] - center[i]) / m).ceil();
            x[i] = center[i] + z * m;
        }
        x[i] = params.input_types()[i].round(x[i]).clamp(lower[i], upper[i]);
    }
    x
}
