//! Parameter record consumed by the optimizer.
//!
//! A front-end fills a [`Parameters`] (directly, through the builder setters or
//! by deserializing it) and calls [`Parameters::check`]; the resulting
//! [`ValidParameters`] is frozen and carries the per-variable quantities the
//! core derives from it (resolved bounds, initial frame sizes, ...).

use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::mads::types::{BbOutputType, DirectionType, InputType};

/// Default relative tolerance for point equality.
pub const DEFAULT_EPSILON: f64 = 1e-13;

/// Growth of the frame beyond its initial size when a variable is unbounded.
const UNBOUNDED_FRAME_GROWTH: f64 = 1024.0;

/// Optimizer parameters, as produced by a parameter front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    /// Number of variables n.
    pub dimension: usize,
    /// Per-variable domain. Empty means all continuous.
    pub bb_input_type: Vec<InputType>,
    /// Role of each blackbox output, in output order.
    pub bb_output_type: Vec<BbOutputType>,
    /// Per-variable lower bound. Empty means unbounded.
    pub lower_bound: Vec<Option<f64>>,
    /// Per-variable upper bound. Empty means unbounded.
    pub upper_bound: Vec<Option<f64>>,
    /// Starting points.
    pub x0: Vec<Vec<f64>>,
    /// Budget of counted blackbox evaluations.
    pub max_bb_eval: Option<usize>,
    /// Budget of evaluations including cache hits.
    pub max_eval: Option<usize>,
    /// Wall-clock budget.
    pub max_time: Option<Duration>,
    pub max_iterations: Option<usize>,
    /// Stop as soon as f(x^F) <= target.
    pub f_target: Option<f64>,
    pub stop_if_feasible: bool,
    /// 0 silent, 1 summary, 2 incumbents, 3 iterations, 4 every evaluation.
    pub display_degree: u8,
    /// Template of incumbent lines, e.g. `"BBE ( SOL ) OBJ"`.
    pub display_stats: String,
    pub display_all_eval: bool,
    pub direction_type: DirectionType,
    pub opportunistic: bool,
    /// Number of concurrent blackbox evaluations k.
    pub nb_threads: usize,
    pub seed: u64,
    pub initial_frame_size: Option<Vec<f64>>,
    pub min_mesh_size: Option<Vec<f64>>,
    /// Frame contraction factor tau in (0, 1).
    pub frame_contraction: f64,
    /// Initial violation threshold. `None` is +infinity.
    pub h_max_0: Option<f64>,
    /// Relative tolerance for point equality.
    pub epsilon: f64,
    pub speculative_search: bool,
    pub speculative_search_max: usize,
    pub quad_model_search: bool,
    pub nm_search: bool,
    /// Latin hypercube search: points at the first iteration, points at later ones.
    pub lh_search: (usize, usize),
    /// Cache file loaded at start and written at the end of the run.
    pub cache_file: Option<PathBuf>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            dimension: 0,
            bb_input_type: Vec::new(),
            bb_output_type: vec![BbOutputType::Obj],
            lower_bound: Vec::new(),
            upper_bound: Vec::new(),
            x0: Vec::new(),
            max_bb_eval: None,
            max_eval: None,
            max_time: None,
            max_iterations: None,
            f_target: None,
            stop_if_feasible: false,
            display_degree: 2,
            display_stats: "BBE OBJ".to_string(),
            display_all_eval: false,
            direction_type: DirectionType::default(),
            opportunistic: true,
            nb_threads: 1,
            seed: 0,
            initial_frame_size: None,
            min_mesh_size: None,
            frame_contraction: 0.5,
            h_max_0: None,
            epsilon: DEFAULT_EPSILON,
            speculative_search: true,
            speculative_search_max: 1,
            quad_model_search: true,
            nm_search: true,
            lh_search: (0, 0),
            cache_file: None,
        }
    }
}

impl Parameters {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Default::default()
        }
    }

    pub fn bb_input_type(mut self, types: Vec<InputType>) -> Self {
        self.bb_input_type = types;
        self
    }

    pub fn bb_output_type(mut self, types: Vec<BbOutputType>) -> Self {
        self.bb_output_type = types;
        self
    }

    /// Sets finite lower bounds on every variable.
    pub fn lower_bound(mut self, lower: &[f64]) -> Self {
        self.lower_bound = lower.iter().map(|&l| Some(l)).collect();
        self
    }

    /// Sets finite upper bounds on every variable.
    pub fn upper_bound(mut self, upper: &[f64]) -> Self {
        self.upper_bound = upper.iter().map(|&u| Some(u)).collect();
        self
    }

    pub fn x0(mut self, x0: &[f64]) -> Self {
        self.x0.push(x0.to_vec());
        self
    }

    pub fn max_bb_eval(mut self, max: usize) -> Self {
        self.max_bb_eval = Some(max);
        self
    }

    pub fn max_eval(mut self, max: usize) -> Self {
        self.max_eval = Some(max);
        self
    }

    pub fn max_time(mut self, max: Duration) -> Self {
        self.max_time = Some(max);
        self
    }

    pub fn max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn f_target(mut self, target: f64) -> Self {
        self.f_target = Some(target);
        self
    }

    pub fn stop_if_feasible(mut self, stop: bool) -> Self {
        self.stop_if_feasible = stop;
        self
    }

    pub fn display_degree(mut self, degree: u8) -> Self {
        self.display_degree = degree;
        self
    }

    pub fn display_stats(mut self, template: &str) -> Self {
        self.display_stats = template.to_string();
        self
    }

    pub fn display_all_eval(mut self, all: bool) -> Self {
        self.display_all_eval = all;
        self
    }

    pub fn direction_type(mut self, direction_type: DirectionType) -> Self {
        self.direction_type = direction_type;
        self
    }

    pub fn opportunistic(mut self, opportunistic: bool) -> Self {
        self.opportunistic = opportunistic;
        self
    }

    pub fn nb_threads(mut self, k: usize) -> Self {
        self.nb_threads = k;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn initial_frame_size(mut self, sizes: &[f64]) -> Self {
        self.initial_frame_size = Some(sizes.to_vec());
        self
    }

    pub fn min_mesh_size(mut self, sizes: &[f64]) -> Self {
        self.min_mesh_size = Some(sizes.to_vec());
        self
    }

    pub fn frame_contraction(mut self, tau: f64) -> Self {
        self.frame_contraction = tau;
        self
    }

    pub fn h_max_0(mut self, h_max: f64) -> Self {
        self.h_max_0 = Some(h_max);
        self
    }

    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn speculative_search(mut self, enabled: bool) -> Self {
        self.speculative_search = enabled;
        self
    }

    pub fn quad_model_search(mut self, enabled: bool) -> Self {
        self.quad_model_search = enabled;
        self
    }

    pub fn nm_search(mut self, enabled: bool) -> Self {
        self.nm_search = enabled;
        self
    }

    pub fn lh_search(mut self, first: usize, per_iteration: usize) -> Self {
        self.lh_search = (first, per_iteration);
        self
    }

    pub fn cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_file = Some(path.into());
        self
    }

    /// Disables every search strategy, leaving a pure poll.
    pub fn without_search(self) -> Self {
        self.speculative_search(false)
            .quad_model_search(false)
            .nm_search(false)
            .lh_search(0, 0)
    }

    /// Validates the record and freezes it.
    pub fn check(self) -> Result<ValidParameters> {
        let n = self.dimension;
        if n == 0 {
            return invalid("DIMENSION must be positive");
        }

        let input_types = if self.bb_input_type.is_empty() {
            vec![InputType::Continuous; n]
        } else if self.bb_input_type.len() != n {
            return invalid(format!(
                "BB_INPUT_TYPE has {} entries, expected {n}",
                self.bb_input_type.len()
            ));
        } else {
            self.bb_input_type.clone()
        };
        for (i, t) in input_types.iter().enumerate() {
            if let InputType::Granular(g) = t {
                if !(g.is_finite() && *g > 0.0) {
                    return invalid(format!("granularity of x[{i}] must be positive"));
                }
            }
        }

        let n_obj = self
            .bb_output_type
            .iter()
            .filter(|t| **t == BbOutputType::Obj)
            .count();
        if n_obj != 1 {
            return invalid(format!(
                "BB_OUTPUT_TYPE must hold exactly one OBJ, found {n_obj}"
            ));
        }

        let lower = resolve_bounds(&self.lower_bound, n, f64::NEG_INFINITY, "LOWER_BOUND")?;
        let upper = resolve_bounds(&self.upper_bound, n, f64::INFINITY, "UPPER_BOUND")?;
        for i in 0..n {
            if lower[i] > upper[i] {
                return invalid(format!(
                    "lower bound {} exceeds upper bound {} on x[{i}]",
                    lower[i], upper[i]
                ));
            }
        }

        if self.x0.is_empty() {
            return invalid("X0 must hold at least one starting point");
        }
        for (k, x0) in self.x0.iter().enumerate() {
            if x0.len() != n {
                return invalid(format!("X0 #{k} has {} coordinates, expected {n}", x0.len()));
            }
            for (i, &v) in x0.iter().enumerate() {
                if !v.is_finite() {
                    return invalid(format!("X0 #{k}: x[{i}] is not finite"));
                }
                if v < lower[i] || v > upper[i] {
                    return invalid(format!("X0 #{k}: x[{i}] = {v} is out of bounds"));
                }
                if !input_types[i].admits(v, self.epsilon) {
                    return invalid(format!(
                        "X0 #{k}: x[{i}] = {v} does not respect granularity {}",
                        input_types[i].granularity()
                    ));
                }
            }
        }

        if self.nb_threads == 0 {
            return invalid("NB_THREADS must be at least 1");
        }
        if !(self.frame_contraction > 0.0 && self.frame_contraction < 1.0) {
            return invalid("FRAME_CONTRACTION must lie in (0, 1)");
        }
        if !(self.epsilon > 0.0 && self.epsilon < 1e-3) {
            return invalid("EPSILON must lie in (0, 1e-3)");
        }
        if let Some(h) = self.h_max_0 {
            if h.is_nan() || h <= 0.0 {
                return invalid("H_MAX_0 must be positive");
            }
        }

        let fixed: Vec<bool> = (0..n).map(|i| lower[i] == upper[i]).collect();

        let initial_frame = match &self.initial_frame_size {
            Some(sizes) => {
                if sizes.len() != n {
                    return invalid(format!(
                        "INITIAL_FRAME_SIZE has {} entries, expected {n}",
                        sizes.len()
                    ));
                }
                if sizes.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
                    return invalid("INITIAL_FRAME_SIZE entries must be positive");
                }
                sizes
                    .iter()
                    .zip(&input_types)
                    .map(|(&s, t)| snap_up(s, t.granularity()))
                    .collect::<Vec<_>>()
            }
            None => (0..n)
                .map(|i| {
                    let g = input_types[i].granularity();
                    let raw = if fixed[i] {
                        1.0
                    } else if lower[i].is_finite() && upper[i].is_finite() {
                        0.1 * (upper[i] - lower[i])
                    } else if self.x0[0][i] != 0.0 {
                        0.1 * self.x0[0][i].abs()
                    } else {
                        1.0
                    };
                    snap_up(raw, g)
                })
                .collect(),
        };

        let min_mesh = match &self.min_mesh_size {
            Some(sizes) => {
                if sizes.len() != n {
                    return invalid(format!(
                        "MIN_MESH_SIZE has {} entries, expected {n}",
                        sizes.len()
                    ));
                }
                if sizes.iter().any(|s| !(s.is_finite() && *s >= 0.0)) {
                    return invalid("MIN_MESH_SIZE entries must be non-negative");
                }
                // A zero floor would let a continuous mesh shrink forever.
                if sizes
                    .iter()
                    .zip(&input_types)
                    .any(|(&s, t)| s == 0.0 && !t.is_granular())
                {
                    return invalid("MIN_MESH_SIZE must be positive for continuous variables");
                }
                sizes
                    .iter()
                    .zip(&input_types)
                    .map(|(&s, t)| s.max(t.granularity()))
                    .collect()
            }
            None => input_types
                .iter()
                .map(|t| {
                    if t.is_granular() {
                        t.granularity()
                    } else {
                        self.epsilon
                    }
                })
                .collect(),
        };

        let max_frame = (0..n)
            .map(|i| {
                if lower[i].is_finite() && upper[i].is_finite() && !fixed[i] {
                    (upper[i] - lower[i]).max(initial_frame[i])
                } else {
                    initial_frame[i] * UNBOUNDED_FRAME_GROWTH
                }
            })
            .collect();

        let free_variables = (0..n)
            .filter(|&i| !fixed[i] && !input_types[i].is_categorical())
            .collect();

        Ok(ValidParameters {
            params: self,
            input_types,
            lower,
            upper,
            initial_frame,
            min_mesh,
            max_frame,
            free_variables,
        })
    }
}

fn invalid<T>(msg: impl Into<String>) -> Result<T> {
    Err(Error::ParameterInvalid(msg.into()))
}

fn resolve_bounds(bounds: &[Option<f64>], n: usize, missing: f64, name: &str) -> Result<Vec<f64>> {
    if bounds.is_empty() {
        return Ok(vec![missing; n]);
    }
    if bounds.len() != n {
        return invalid(format!("{name} has {} entries, expected {n}", bounds.len()));
    }
    bounds
        .iter()
        .enumerate()
        .map(|(i, b)| match b {
            Some(v) if v.is_nan() => invalid(format!("{name} of x[{i}] is NaN")),
            Some(v) => Ok(*v),
            None => Ok(missing),
        })
        .collect()
}

// Smallest multiple of g not below size (and at least g).
fn snap_up(size: f64, g: f64) -> f64 {
    if g > 0.0 {
        g * (size / g).ceil().max(1.0)
    } else {
        size
    }
}

/// A validated, frozen parameter record.
#[derive(Debug, Clone)]
pub struct ValidParameters {
    params: Parameters,
    input_types: Vec<InputType>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    initial_frame: Vec<f64>,
    min_mesh: Vec<f64>,
    max_frame: Vec<f64>,
    free_variables: Vec<usize>,
}

impl Deref for ValidParameters {
    type Target = Parameters;

    fn deref(&self) -> &Parameters {
        &self.params
    }
}

impl ValidParameters {
    pub fn input_types(&self) -> &[InputType] {
        &self.input_types
    }

    /// Lower bounds, `-inf` where absent.
    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    /// Upper bounds, `+inf` where absent.
    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    pub fn initial_frame(&self) -> &[f64] {
        &self.initial_frame
    }

    pub fn min_mesh(&self) -> &[f64] {
        &self.min_mesh
    }

    pub fn max_frame(&self) -> &[f64] {
        &self.max_frame
    }

    /// Indices of the variables poll and search may move.
    pub fn free_variables(&self) -> &[usize] {
        &self.free_variables
    }

    pub fn has_constraints(&self) -> bool {
        self.bb_output_type.iter().any(|t| t.is_constraint())
    }

    pub fn h_max_initial(&self) -> f64 {
        self.h_max_0.unwrap_or(f64::INFINITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rosenbrock_box() -> Parameters {
        Parameters::new(2)
            .lower_bound(&[-1.5, -0.5])
            .upper_bound(&[1.5, 2.5])
            .x0(&[0.1, 0.1])
    }

    #[test]
    fn test_defaults_from_bounds() {
        let p = rosenbrock_box().check().unwrap();
        assert_eq!(p.input_types(), &[InputType::Continuous; 2]);
        approx::assert_relative_eq!(p.initial_frame()[0], 0.3, epsilon = 1e-12);
        approx::assert_relative_eq!(p.initial_frame()[1], 0.3, epsilon = 1e-12);
        approx::assert_relative_eq!(p.max_frame()[0], 3.0, epsilon = 1e-12);
        assert_eq!(p.min_mesh(), &[DEFAULT_EPSILON; 2]);
        assert_eq!(p.free_variables(), &[0, 1]);
        assert!(!p.has_constraints());
        assert!(p.h_max_initial().is_infinite());
    }

    #[test]
    fn test_unbounded_initial_frame() {
        let p = Parameters::new(3)
            .bb_input_type(vec![
                InputType::Continuous,
                InputType::Continuous,
                InputType::Integer,
            ])
            .x0(&[5.0, 0.0, 0.0])
            .check()
            .unwrap();
        assert_eq!(p.initial_frame(), &[0.5, 1.0, 1.0]);
        assert_eq!(p.max_frame()[0], 0.5 * UNBOUNDED_FRAME_GROWTH);
        assert_eq!(p.min_mesh()[2], 1.0);
    }

    #[test]
    fn test_granular_frame_is_multiple_of_granularity() {
        let p = Parameters::new(1)
            .bb_input_type(vec![InputType::Granular(0.25)])
            .lower_bound(&[0.0])
            .upper_bound(&[3.0])
            .x0(&[1.5])
            .check()
            .unwrap();
        assert_eq!(p.initial_frame(), &[0.5]);
    }

    #[test]
    fn test_fixed_and_categorical_are_not_free() {
        let p = Parameters::new(3)
            .bb_input_type(vec![
                InputType::Continuous,
                InputType::Categorical,
                InputType::Continuous,
            ])
            .lower_bound(&[0.0, 0.0, 2.0])
            .upper_bound(&[1.0, 4.0, 2.0])
            .x0(&[0.5, 1.0, 2.0])
            .check()
            .unwrap();
        assert_eq!(p.free_variables(), &[0]);
    }

    #[test]
    fn test_rejects_invalid_records() {
        assert!(Parameters::new(0).x0(&[]).check().is_err());
        assert!(rosenbrock_box()
            .bb_output_type(vec![BbOutputType::Pb])
            .check()
            .is_err());
        assert!(rosenbrock_box()
            .bb_output_type(vec![BbOutputType::Obj, BbOutputType::Obj])
            .check()
            .is_err());
        assert!(Parameters::new(2)
            .lower_bound(&[1.0, 0.0])
            .upper_bound(&[0.0, 1.0])
            .x0(&[0.5, 0.5])
            .check()
            .is_err());
        assert!(Parameters::new(2)
            .lower_bound(&[0.0, 0.0])
            .upper_bound(&[1.0, 1.0])
            .x0(&[2.0, 0.5])
            .check()
            .is_err());
        assert!(Parameters::new(1)
            .bb_input_type(vec![InputType::Integer])
            .x0(&[0.5])
            .check()
            .is_err());
        assert!(rosenbrock_box().nb_threads(0).check().is_err());
        assert!(rosenbrock_box().frame_contraction(1.0).check().is_err());
        assert!(Parameters::new(2).check().is_err());
    }

    #[test]
    fn test_min_mesh_size_floor() {
        assert!(rosenbrock_box().min_mesh_size(&[0.0, 1e-6]).check().is_err());
        assert!(rosenbrock_box().min_mesh_size(&[-1e-6, 1e-6]).check().is_err());
        let p = rosenbrock_box().min_mesh_size(&[1e-6, 1e-4]).check().unwrap();
        assert_eq!(p.min_mesh(), &[1e-6, 1e-4]);
        // granular variables fall back to their granularity
        let p = Parameters::new(2)
            .bb_input_type(vec![InputType::Integer, InputType::Continuous])
            .lower_bound(&[-5.0, -5.0])
            .upper_bound(&[5.0, 5.0])
            .x0(&[0.0, 0.0])
            .min_mesh_size(&[0.0, 1e-3])
            .check()
            .unwrap();
        assert_eq!(p.min_mesh(), &[1.0, 1e-3]);
    }

    #[test]
    fn test_invalid_error_kind() {
        let err = Parameters::new(2).check().unwrap_err();
        assert_eq!(err.kind(), "parameter_invalid");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_json_ingest() {
        let json = r#"{
            "dimension": 2,
            "bb_output_type": ["OBJ", "PB", "EB"],
            "lower_bound": [-1.0, null],
            "x0": [[0.0, 0.0]],
            "max_bb_eval": 50,
            "direction_type": "Lt2N"
        }"#;
        let params: Parameters = serde_json::from_str(json).unwrap();
        let valid = params.check().unwrap();
        assert_eq!(valid.max_bb_eval, Some(50));
        assert_eq!(valid.direction_type, DirectionType::Lt2N);
        assert_eq!(valid.lower()[0], -1.0);
        assert!(valid.lower()[1].is_infinite());
        assert!(valid.has_constraints());
        assert!(valid.opportunistic);
    }
}
