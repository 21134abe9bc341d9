//! Mesh and frame sizes.
//!
//! Each variable carries a frame size δf and a mesh size
//! `δm = δf · min(1, δf / δf0)`, so `δm <= δf` and the ratio δf/δm grows as the
//! frame shrinks. Granular variables keep both sizes on multiples of their
//! granularity and never go below it.

use serde::{Deserialize, Serialize};

use crate::mads::param::ValidParameters;
use crate::mads::types::SuccessClass;

/// Snapshot of the mesh, reported to observers and in the run result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshState {
    pub mesh: Vec<f64>,
    pub frame: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct MeshController {
    frame: Vec<f64>,
    initial_frame: Vec<f64>,
    max_frame: Vec<f64>,
    min_mesh: Vec<f64>,
    granularity: Vec<f64>,
    free: Vec<bool>,
    exhausted: Vec<bool>,
    tau: f64,
}

impl MeshController {
    pub fn new(params: &ValidParameters) -> Self {
        let n = params.dimension;
        let mut free = vec![false; n];
        for &i in params.free_variables() {
            free[i] = true;
        }
        Self {
            frame: params.initial_frame().to_vec(),
            initial_frame: params.initial_frame().to_vec(),
            max_frame: params.max_frame().to_vec(),
            min_mesh: params.min_mesh().to_vec(),
            granularity: params.input_types().iter().map(|t| t.granularity()).collect(),
            exhausted: free.iter().map(|f| !f).collect(),
            free,
            tau: params.frame_contraction,
        }
    }

    pub fn dimension(&self) -> usize {
        self.frame.len()
    }

    /// Frame size δf of variable `i`.
    pub fn current_frame(&self, i: usize) -> f64 {
        self.frame[i]
    }

    /// Mesh size δm of variable `i`.
    pub fn current_mesh(&self, i: usize) -> f64 {
        let ratio = (self.frame[i] / self.initial_frame[i]).min(1.0);
        snap(self.frame[i] * ratio, self.granularity[i])
    }

    /// Ratio δf/δm of variable `i`: the number of mesh steps across the frame.
    pub fn rho(&self, i: usize) -> f64 {
        self.current_frame(i) / self.current_mesh(i)
    }

    /// Frame index r >= 1: the largest rho over the free variables, rounded.
    pub fn frame_index(&self) -> i64 {
        (0..self.dimension())
            .filter(|&i| self.free[i])
            .map(|i| self.rho(i).round() as i64)
            .max()
            .unwrap_or(1)
            .max(1)
    }

    pub fn is_free(&self, i: usize) -> bool {
        self.free[i]
    }

    /// Applies the outcome of an iteration to every free variable.
    pub fn on_iteration_result(&mut self, class: SuccessClass) {
        for i in 0..self.dimension() {
            if !self.free[i] {
                continue;
            }
            match class {
                SuccessClass::Dominating => {
                    self.frame[i] = enlarge(
                        self.frame[i],
                        self.tau,
                        self.max_frame[i],
                        self.granularity[i],
                    );
                    self.exhausted[i] = false;
                }
                SuccessClass::Improving => {}
                SuccessClass::Unsuccessful => {
                    if self.variable_at_minimum(i) {
                        self.exhausted[i] = true;
                    } else {
                        self.frame[i] = shrink(self.frame[i], self.tau, self.granularity[i]);
                    }
                }
            }
        }
    }

    /// Whether every free variable has reached its smallest mesh.
    pub fn is_at_minimum_mesh(&self) -> bool {
        (0..self.dimension()).all(|i| !self.free[i] || self.variable_at_minimum(i))
    }

    /// Whether every variable was already at its smallest mesh when an
    /// unsuccessful iteration ended.
    pub fn all_exhausted(&self) -> bool {
        self.exhausted.iter().all(|&e| e)
    }

    /// Whether `x` lies on the mesh centered at `center`. Non-free
    /// coordinates must equal the center's.
    pub fn is_on_mesh(&self, center: &[f64], x: &[f64]) -> bool {
        (0..self.dimension()).all(|i| {
            if !self.free[i] {
                return x[i] == center[i];
            }
            let z = (x[i] - center[i]) / self.current_mesh(i);
            (z - z.round()).abs() <= 1e-7 * z.abs().max(1.0)
        })
    }

    pub fn state(&self) -> MeshState {
        MeshState {
            mesh: (0..self.dimension()).map(|i| self.current_mesh(i)).collect(),
            frame: self.frame.clone(),
        }
    }

    fn variable_at_minimum(&self, i: usize) -> bool {
        let g = self.granularity[i];
        if g > 0.0 && self.frame[i] <= g {
            return true;
        }
        self.current_mesh(i) <= self.min_mesh[i]
    }
}

// Rounds a size to a positive multiple of the granularity.
fn snap(size: f64, g: f64) -> f64 {
    if g > 0.0 {
        g * (size / g).round().max(1.0)
    } else {
        size
    }
}

// Tolerance on granule counts computed in floating point.
const GRANULE_SLACK: f64 = 1e-9;

// Contracted frame. A granular frame drops by at least one granule and stops
// at one granule.
fn shrink(frame: f64, tau: f64, g: f64) -> f64 {
    if g > 0.0 {
        let granules = (frame / g).round();
        let target = (granules * tau + GRANULE_SLACK).floor();
        g * target.min(granules - 1.0).max(1.0)
    } else {
        frame * tau
    }
}

// Enlarged frame, capped at `max_frame`. A granular frame rounds up so that a
// single granule can grow.
fn enlarge(frame: f64, tau: f64, max_frame: f64, g: f64) -> f64 {
    let target = (frame / tau).min(max_frame);
    if g > 0.0 {
        let granules = (target / g - GRANULE_SLACK).ceil().max(1.0);
        let cap = (max_frame / g + GRANULE_SLACK).floor().max(1.0);
        g * granules.min(cap)
    } else {
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mads::param::Parameters;
    use crate::mads::types::InputType;
    use approx::assert_relative_eq;

    fn continuous() -> MeshController {
        let p = Parameters::new(2)
            .lower_bound(&[-1.0, -1.0])
            .upper_bound(&[1.0, 1.0])
            .x0(&[0.0, 0.0])
            .check()
            .unwrap();
        MeshController::new(&p)
    }

    fn integer() -> MeshController {
        let p = Parameters::new(2)
            .bb_input_type(vec![InputType::Integer; 2])
            .lower_bound(&[-10.0, -10.0])
            .upper_bound(&[10.0, 10.0])
            .x0(&[0.0, 0.0])
            .check()
            .unwrap();
        MeshController::new(&p)
    }

    #[test]
    fn test_initial_mesh_equals_frame() {
        let m = continuous();
        assert_relative_eq!(m.current_frame(0), 0.2, epsilon = 1e-12);
        assert_relative_eq!(m.current_mesh(0), 0.2, epsilon = 1e-12);
        assert_eq!(m.frame_index(), 1);
    }

    #[test]
    fn test_contraction_shrinks_mesh_faster() {
        let mut m = continuous();
        m.on_iteration_result(SuccessClass::Unsuccessful);
        assert_relative_eq!(m.current_frame(0), 0.1, epsilon = 1e-12);
        assert_relative_eq!(m.current_mesh(0), 0.05, epsilon = 1e-12);
        m.on_iteration_result(SuccessClass::Unsuccessful);
        assert_relative_eq!(m.rho(0), 4.0, epsilon = 1e-9);
        assert_eq!(m.frame_index(), 4);
        for i in 0..2 {
            assert!(m.current_mesh(i) <= m.current_frame(i));
        }
    }

    #[test]
    fn test_improving_keeps_sizes() {
        let mut m = continuous();
        let before = m.state();
        m.on_iteration_result(SuccessClass::Improving);
        assert_eq!(m.state(), before);
    }

    #[test]
    fn test_expansion_is_bounded() {
        let mut m = continuous();
        for _ in 0..10 {
            m.on_iteration_result(SuccessClass::Dominating);
        }
        assert_relative_eq!(m.current_frame(0), 2.0, epsilon = 1e-12);
        assert!(m.current_mesh(0) <= m.current_frame(0));
    }

    #[test]
    fn test_integer_mesh_never_below_one() {
        let mut m = integer();
        assert_eq!(m.current_frame(0), 2.0);
        m.on_iteration_result(SuccessClass::Unsuccessful);
        assert_eq!(m.current_frame(0), 1.0);
        assert_eq!(m.current_mesh(0), 1.0);
        assert!(m.is_at_minimum_mesh());
        assert!(!m.all_exhausted());

        m.on_iteration_result(SuccessClass::Unsuccessful);
        assert_eq!(m.current_mesh(0), 1.0);
        assert!(m.all_exhausted());

        m.on_iteration_result(SuccessClass::Dominating);
        assert_eq!(m.current_frame(0), 2.0);
        assert!(!m.all_exhausted());
    }

    #[test]
    fn test_integer_frame_with_slow_contraction() {
        let p = Parameters::new(2)
            .bb_input_type(vec![InputType::Integer; 2])
            .lower_bound(&[-10.0, -10.0])
            .upper_bound(&[10.0, 10.0])
            .x0(&[0.0, 0.0])
            .frame_contraction(0.8)
            .check()
            .unwrap();
        let mut m = MeshController::new(&p);
        assert_eq!(m.current_frame(0), 2.0);
        // 2 * 0.8 rounds back to 2; the frame must still lose a granule
        m.on_iteration_result(SuccessClass::Unsuccessful);
        assert_eq!(m.current_frame(0), 1.0);
        assert!(m.is_at_minimum_mesh());
        m.on_iteration_result(SuccessClass::Unsuccessful);
        assert_eq!(m.current_frame(0), 1.0);
        assert!(m.all_exhausted());

        // 1 / 0.8 rounds back to 1; the frame must still grow
        m.on_iteration_result(SuccessClass::Dominating);
        assert_eq!(m.current_frame(0), 2.0);
        assert!(!m.all_exhausted());
        m.on_iteration_result(SuccessClass::Dominating);
        assert_eq!(m.current_frame(0), 3.0);
        m.on_iteration_result(SuccessClass::Unsuccessful);
        assert_eq!(m.current_frame(0), 2.0);
        for _ in 0..20 {
            m.on_iteration_result(SuccessClass::Dominating);
        }
        assert_eq!(m.current_frame(0), 20.0);
    }

    #[test]
    fn test_unsuccessful_strictly_decreases_frame() {
        let mut m = integer();
        for _ in 0..3 {
            m.on_iteration_result(SuccessClass::Dominating);
        }
        while !m.is_at_minimum_mesh() {
            let before = m.state();
            m.on_iteration_result(SuccessClass::Unsuccessful);
            let after = m.state();
            assert!((0..2).any(|i| after.frame[i] < before.frame[i]));
        }
    }

    #[test]
    fn test_on_mesh() {
        let mut m = continuous();
        m.on_iteration_result(SuccessClass::Unsuccessful);
        let c = [0.1, 0.2];
        assert!(m.is_on_mesh(&c, &[0.1 + 3.0 * 0.05, 0.2 - 0.05]));
        assert!(!m.is_on_mesh(&c, &[0.1 + 0.01, 0.2]));
        assert!(m.is_on_mesh(&c, &c));
    }
}
