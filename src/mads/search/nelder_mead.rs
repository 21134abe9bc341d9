//! Nelder-Mead search.
//!
//! Builds a simplex from the best cached points around the frame center and
//! proposes the classic reflection, expansion and contraction points of its
//! worst vertex.

use ndarray::{Array1, Array2};
use num_traits::Float;
use std::fmt::Debug;

use crate::mads::eval::EvalPoint;
use crate::mads::search::{rank, solve_linear_system, Search, SearchContext};

/// Simplex points are taken within this many frame sizes of the center.
const SIMPLEX_RADIUS: f64 = 2.0;

/// Reflection, expansion, outside and inside contraction.
const COEFFICIENTS: [f64; 4] = [1.0, 2.0, 0.5, -0.5];

#[derive(Debug, Clone, Default)]
pub struct NelderMeadSearch;

impl NelderMeadSearch {
    pub fn new() -> Self {
        Self
    }
}

impl Search for NelderMeadSearch {
    fn name(&self) -> &'static str {
        "nelder_mead"
    }

    fn generate(&mut self, ctx: &SearchContext<'_>) -> Vec<Vec<f64>> {
        let free = ctx.free_variables();
        let n = free.len();
        if n == 0 {
            return Vec::new();
        }
        let mut points = ctx.nearby_points(SIMPLEX_RADIUS);
        if points.len() < n + 1 {
            return Vec::new();
        }
        points.sort_by(rank);

        let Some(simplex) = select_simplex(&points, free, n + 1) else {
            return Vec::new();
        };
        let (worst, rest) = match simplex.split_last() {
            Some(split) => split,
            None => return Vec::new(),
        };
        let centroid = compute_centroid(rest);
        let center = &ctx.center.x;
        COEFFICIENTS
            .iter()
            .map(|&coefficient| {
                let reduced = reflect(&centroid, worst, coefficient);
                let mut x = center.clone();
                for (k, &i) in free.iter().enumerate() {
                    x[i] = reduced[k];
                }
                x
            })
            .collect()
    }
}

// Greedily takes the best ranked points that keep the simplex affinely
// independent, in the coordinates of the free variables.
fn select_simplex(points: &[EvalPoint], free: &[usize], size: usize) -> Option<Vec<Vec<f64>>> {
    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(size);
    for p in points {
        let candidate: Vec<f64> = free.iter().map(|&i| p.x[i]).collect();
        simplex.push(candidate);
        if !affinely_independent(&simplex) {
            simplex.pop();
        }
        if simplex.len() == size {
            return Some(simplex);
        }
    }
    None
}

// Vertices v_1 - v_0, ..., v_k - v_0 have full rank: the Gram matrix of the
// edges is nonsingular.
fn affinely_independent(vertices: &[Vec<f64>]) -> bool {
    let k = vertices.len().saturating_sub(1);
    if k == 0 {
        return true;
    }
    let n = vertices[0].len();
    let mut edges = Array2::<f64>::zeros((k, n));
    for (row, v) in vertices[1..].iter().enumerate() {
        for col in 0..n {
            edges[[row, col]] = v[col] - vertices[0][col];
        }
    }
    let gram = edges.dot(&edges.t());
    solve_linear_system(gram, Array1::ones(k)).is_some()
}

// Compute centroid of points
fn compute_centroid<T>(points: &[Vec<T>]) -> Vec<T>
where
    T: Float + Debug,
{
    let n = points[0].len();
    let m = T::from(points.len()).unwrap_or_else(T::one);
    let mut centroid = vec![T::zero(); n];
    for point in points {
        for (c, &v) in centroid.iter_mut().zip(point) {
            *c = *c + v;
        }
    }
    centroid.iter().map(|&c| c / m).collect()
}

// Reflect point through centroid
fn reflect<T>(centroid: &[T], point: &[T], coefficient: T) -> Vec<T>
where
    T: Float + Debug,
{
    centroid
        .iter()
        .zip(point.iter())
        .map(|(&c, &p)| c + coefficient * (c - p))
        .collect()
}
