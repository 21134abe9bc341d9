//! Search strategies run before the poll.
//!
//! A search proposes raw candidates around the frame center; the driver snaps
//! them to the mesh, projects them to the bounds and evaluates them like poll
//! points.

pub mod latin_hypercube;
pub mod nelder_mead;
pub mod quad_model;
pub mod speculative;

use ndarray::{Array1, Array2};

use crate::mads::cache::Cache;
use crate::mads::eval::{EvalPoint, OutputSchema};
use crate::mads::mesh::MeshController;
use crate::mads::param::ValidParameters;

pub use latin_hypercube::LatinHypercubeSearch;
pub use nelder_mead::NelderMeadSearch;
pub use quad_model::QuadModelSearch;
pub use speculative::SpeculativeSearch;

/// Everything a search may look at.
pub struct SearchContext<'a> {
    /// Iteration number, starting at 1.
    pub iteration: usize,
    /// Frame center: x^F or x^I.
    pub center: &'a EvalPoint,
    pub mesh: &'a MeshController,
    pub params: &'a ValidParameters,
    pub cache: &'a Cache,
    pub schema: &'a OutputSchema,
}

impl SearchContext<'_> {
    /// Usable cached points within `radius` frame sizes of the center, with
    /// the same values as the center on every non-free variable.
    pub fn nearby_points(&self, radius: f64) -> Vec<EvalPoint> {
        let c = &self.center.x;
        self.cache
            .entries()
            .into_iter()
            .map(|e| EvalPoint::new(e.x, e.outputs, e.status, e.tag, self.schema))
            .filter(|p| p.is_usable() && p.h.is_some_and(f64::is_finite))
            .filter(|p| {
                (0..c.len()).all(|i| {
                    if self.mesh.is_free(i) {
                        (p.x[i] - c[i]).abs() <= radius * self.mesh.current_frame(i)
                    } else {
                        p.x[i] == c[i]
                    }
                })
            })
            .collect()
    }

    /// Indices of the variables a search may move.
    pub fn free_variables(&self) -> &[usize] {
        self.params.free_variables()
    }
}

/// A search strategy.
pub trait Search: Send {
    fn name(&self) -> &'static str;

    /// Raw candidates, in variable space over all coordinates.
    fn generate(&mut self, ctx: &SearchContext<'_>) -> Vec<Vec<f64>>;
}

/// Enabled searches, in the order they run.
pub fn build_searches(params: &ValidParameters) -> Vec<Box<dyn Search>> {
    let mut searches: Vec<Box<dyn Search>> = Vec::new();
    if params.speculative_search && params.speculative_search_max > 0 {
        searches.push(Box::new(SpeculativeSearch::new(
            params.speculative_search_max,
        )));
    }
    if params.quad_model_search {
        searches.push(Box::new(QuadModelSearch::new()));
    }
    if params.nm_search {
        searches.push(Box::new(NelderMeadSearch::new()));
    }
    let (first, per_iteration) = params.lh_search;
    if first > 0 || per_iteration > 0 {
        searches.push(Box::new(LatinHypercubeSearch::new(
            first,
            per_iteration,
            params.seed,
        )));
    }
    searches
}

/// Ranking used to pick the best points: feasible before infeasible, then by
/// f for feasible points and by (h, f) for infeasible ones.
pub(crate) fn rank(a: &EvalPoint, b: &EvalPoint) -> std::cmp::Ordering {
    let key = |p: &EvalPoint| {
        let h = p.h.unwrap_or(f64::INFINITY);
        let f = p.f.unwrap_or(f64::INFINITY);
        if h == 0.0 {
            (0, f, 0.0)
        } else {
            (1, h, f)
        }
    };
    let (ka, kb) = (key(a), key(b));
    ka.0.cmp(&kb.0)
        .then(ka.1.total_cmp(&kb.1))
        .then(ka.2.total_cmp(&kb.2))
        .then(a.tag.cmp(&b.tag))
}

/// Solves `a · x = b` by Gaussian elimination with partial pivoting.
///
/// Returns `None` when the matrix is numerically singular.
pub(crate) fn solve_linear_system(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    let scale = a.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    if n == 0 || scale == 0.0 || !scale.is_finite() {
        return None;
    }
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))?;
        if a[[pivot, col]].abs() <= 1e-12 * scale {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}
