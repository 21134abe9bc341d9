//! Quadratic model search.
//!
//! Fits regression quadratics of the objective and of every constraint to
//! cached points around the frame center, in coordinates scaled by the frame
//! size, and proposes the minimizer of the objective model subject to the
//! constraint models over a box of twice the frame intersected with the
//! bounds.

use ndarray::{Array1, Array2};

use crate::mads::search::{solve_linear_system, Search, SearchContext};

/// Radius of the sampling region and of the model box, in frame sizes.
const MODEL_RADIUS: f64 = 2.0;
const RIDGE: f64 = 1e-10;
const MAX_SWEEPS: usize = 200;
const MAX_COMPASS_STEPS: usize = 1000;
const MIN_COMPASS_STEP: f64 = 1e-9;

/// m(y) = c + gᵀy + ½ yᵀHy.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadraticModel {
    pub constant: f64,
    pub gradient: Array1<f64>,
    pub hessian: Array2<f64>,
}

impl QuadraticModel {
    pub fn value(&self, y: &[f64]) -> f64 {
        let y = Array1::from(y.to_vec());
        self.constant + self.gradient.dot(&y) + 0.5 * y.dot(&self.hessian.dot(&y))
    }

    /// Least-squares fit. Uses the full quadratic basis when there are
    /// enough samples, the separable one (no cross terms) otherwise.
    ///
    /// Returns `None` with too few samples or a singular system.
    pub fn fit(samples: &[Vec<f64>], values: &[f64]) -> Option<Self> {
        let n = samples.first()?.len();
        let m = samples.len();
        let full = m >= (n + 1) * (n + 2) / 2;
        if !full && m < 2 * n + 1 {
            return None;
        }
        let features: Vec<Vec<f64>> = samples.iter().map(|y| basis(y, full)).collect();
        let p = features[0].len();

        let mut a = Array2::<f64>::zeros((m, p));
        for (row, f) in features.iter().enumerate() {
            for (col, v) in f.iter().enumerate() {
                a[[row, col]] = *v;
            }
        }
        let b = Array1::from(values.to_vec());
        let mut normal = a.t().dot(&a);
        let trace = normal.diag().sum().max(1.0);
        for k in 0..p {
            normal[[k, k]] += RIDGE * trace;
        }
        let beta = solve_linear_system(normal, a.t().dot(&b))?;

        let mut gradient = Array1::<f64>::zeros(n);
        let mut hessian = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            gradient[i] = beta[1 + i];
        }
        let mut k = 1 + n;
        for i in 0..n {
            hessian[[i, i]] = 2.0 * beta[k];
            k += 1;
        }
        if full {
            for i in 0..n {
                for j in i + 1..n {
                    hessian[[i, j]] = beta[k];
                    hessian[[j, i]] = beta[k];
                    k += 1;
                }
            }
        }
        Some(Self {
            constant: beta[0],
            gradient,
            hessian,
        })
    }

    /// Minimizes the model over `[lower, upper]` by exact coordinate
    /// descent, starting from the origin (which must lie in the box).
    pub fn minimize_in_box(&self, lower: &[f64], upper: &[f64]) -> Vec<f64> {
        let n = lower.len();
        let mut y: Vec<f64> = (0..n).map(|i| 0.0f64.clamp(lower[i], upper[i])).collect();
        for _ in 0..MAX_SWEEPS {
            let mut moved = 0.0f64;
            for i in 0..n {
                let a = 0.5 * self.hessian[[i, i]];
                let b = self.gradient[i]
                    + (0..n)
                        .filter(|&j| j != i)
                        .map(|j| self.hessian[[i, j]] * y[j])
                        .sum::<f64>();
                let along = |t: f64| a * t * t + b * t;
                let mut best = lower[i];
                if along(upper[i]) < along(best) {
                    best = upper[i];
                }
                if a > 0.0 {
                    let t = (-b / (2.0 * a)).clamp(lower[i], upper[i]);
                    if along(t) <= along(best) {
                        best = t;
                    }
                }
                if along(y[i]) <= along(best) {
                    best = y[i];
                }
                moved = moved.max((best - y[i]).abs());
                y[i] = best;
            }
            if moved < 1e-12 {
                break;
            }
        }
        y
    }
}

/// Merit of a model point: any predicted violation ranks after every
/// predicted feasible point, violations compare by h, feasible points by f.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Merit {
    infeasible: bool,
    value: f64,
}

impl Merit {
    fn of(objective: &QuadraticModel, constraints: &[QuadraticModel], y: &[f64]) -> Self {
        let h: f64 = constraints
            .iter()
            .map(|c| c.value(y))
            .filter(|&v| v > 0.0)
            .map(|v| v * v)
            .sum();
        if h > 0.0 {
            Self {
                infeasible: true,
                value: h,
            }
        } else {
            Self {
                infeasible: false,
                value: objective.value(y),
            }
        }
    }

    fn better_than(&self, other: &Merit) -> bool {
        match (self.infeasible, other.infeasible) {
            (false, true) => true,
            (true, false) => false,
            _ => self.value < other.value,
        }
    }
}

/// Minimizes `objective` subject to `constraints <= 0` over `[lower, upper]`
/// with a compass search on the models, starting from the origin.
///
/// Returns the best point and whether it beats the origin.
fn minimize_subject_to(
    objective: &QuadraticModel,
    constraints: &[QuadraticModel],
    lower: &[f64],
    upper: &[f64],
) -> (Vec<f64>, bool) {
    let n = lower.len();
    let mut y: Vec<f64> = (0..n).map(|i| 0.0f64.clamp(lower[i], upper[i])).collect();
    let start = Merit::of(objective, constraints, &vec![0.0; n]);
    let mut best = Merit::of(objective, constraints, &y);
    let mut step: Vec<f64> = (0..n).map(|i| (upper[i] - lower[i]) / 4.0).collect();

    for _ in 0..MAX_COMPASS_STEPS {
        let mut moved = None;
        'directions: for i in 0..n {
            for sign in [1.0, -1.0] {
                let mut z = y.clone();
                z[i] = (y[i] + sign * step[i]).clamp(lower[i], upper[i]);
                if z[i] == y[i] {
                    continue;
                }
                let merit = Merit::of(objective, constraints, &z);
                if merit.better_than(&best) {
                    moved = Some((z, merit));
                    break 'directions;
                }
            }
        }
        match moved {
            Some((z, merit)) => {
                y = z;
                best = merit;
            }
            None => {
                step.iter_mut().for_each(|s| *s /= 2.0);
                if step.iter().all(|&s| s < MIN_COMPASS_STEP) {
                    break;
                }
            }
        }
    }
    let improved = best.better_than(&start);
    (y, improved)
}

// Feature vector: 1, y_i, y_i², then y_i·y_j (i < j) for the full basis.
fn basis(y: &[f64], full: bool) -> Vec<f64> {
    let n = y.len();
    let mut f = Vec::with_capacity(1 + 2 * n + n * n / 2);
    f.push(1.0);
    f.extend_from_slice(y);
    f.extend(y.iter().map(|v| v * v));
    if full {
        for i in 0..n {
            for j in i + 1..n {
                f.push(y[i] * y[j]);
            }
        }
    }
    f
}

#[derive(Debug, Clone, Default)]
pub struct QuadModelSearch;

impl QuadModelSearch {
    pub fn new() -> Self {
        Self
    }
}

impl Search for QuadModelSearch {
    fn name(&self) -> &'static str {
        "quad_model"
    }

    fn generate(&mut self, ctx: &SearchContext<'_>) -> Vec<Vec<f64>> {
        let free = ctx.free_variables();
        if free.is_empty() {
            return Vec::new();
        }
        let center = &ctx.center.x;
        let frame: Vec<f64> = free.iter().map(|&i| ctx.mesh.current_frame(i)).collect();
        let constraint_outputs: Vec<usize> = ctx
            .schema
            .types()
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_constraint())
            .map(|(j, _)| j)
            .collect();

        let mut samples = Vec::new();
        let mut objective_values = Vec::new();
        let mut constraint_values = vec![Vec::new(); constraint_outputs.len()];
        for p in ctx.nearby_points(MODEL_RADIUS) {
            let Some(f) = p.f else {
                continue;
            };
            let Some(cs) = constraint_outputs
                .iter()
                .map(|&j| p.outputs.get(j).copied().flatten())
                .collect::<Option<Vec<f64>>>()
            else {
                continue;
            };
            samples.push(
                free.iter()
                    .zip(&frame)
                    .map(|(&i, df)| (p.x[i] - center[i]) / df)
                    .collect::<Vec<f64>>(),
            );
            objective_values.push(f);
            for (values, c) in constraint_values.iter_mut().zip(cs) {
                values.push(c);
            }
        }
        let Some(objective) = QuadraticModel::fit(&samples, &objective_values) else {
            return Vec::new();
        };
        let Some(constraints) = constraint_values
            .iter()
            .map(|values| QuadraticModel::fit(&samples, values))
            .collect::<Option<Vec<QuadraticModel>>>()
        else {
            return Vec::new();
        };

        let lower: Vec<f64> = free
            .iter()
            .zip(&frame)
            .map(|(&i, df)| ((ctx.params.lower()[i] - center[i]) / df).max(-MODEL_RADIUS))
            .collect();
        let upper: Vec<f64> = free
            .iter()
            .zip(&frame)
            .map(|(&i, df)| ((ctx.params.upper()[i] - center[i]) / df).min(MODEL_RADIUS))
            .collect();
        let y = if constraints.is_empty() {
            let y = objective.minimize_in_box(&lower, &upper);
            let decrease = objective.value(&vec![0.0; free.len()]) - objective.value(&y);
            if decrease.is_nan() || decrease <= 0.0 {
                return Vec::new();
            }
            y
        } else {
            let (y, improved) = minimize_subject_to(&objective, &constraints, &lower, &upper);
            if !improved {
                return Vec::new();
            }
            y
        };

        let mut x = center.clone();
        for (k, &i) in free.iter().enumerate() {
            x[i] = center[i] + frame[k] * y[k];
        }
        vec![x]
    }
}
