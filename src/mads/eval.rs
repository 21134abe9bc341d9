//! Blackbox evaluator capability and evaluated points.

use crate::mads::types::{BbOutputType, EvalStatus};

/// Error type returned by evaluators for system-level failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Raw result of one blackbox call.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Outputs aligned with `BB_OUTPUT_TYPE`. NaN marks an undefined output.
    pub outputs: Vec<f64>,
    /// Whether this call counts against `MAX_BB_EVAL`.
    pub count_eval: bool,
    /// `false` when the blackbox itself reports a failed evaluation.
    pub success: bool,
}

impl Evaluation {
    pub fn new(outputs: Vec<f64>) -> Self {
        Self {
            outputs,
            count_eval: true,
            success: true,
        }
    }

    /// A per-point failure ("rejected" by the blackbox).
    pub fn failed() -> Self {
        Self {
            outputs: Vec::new(),
            count_eval: true,
            success: false,
        }
    }

    pub fn uncounted(mut self) -> Self {
        self.count_eval = false;
        self
    }
}

/// The blackbox: anything that maps a point to outputs.
///
/// Implementations must be safe to call concurrently when more than one
/// worker thread is configured. Returning `Err` is a system-level failure
/// that ends the run; a per-point failure is `Ok(Evaluation::failed())`.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, x: &[f64]) -> Result<Evaluation, BoxError>;
}

/// Plain closures returning the output vector are evaluators.
impl<F> Evaluator for F
where
    F: Fn(&[f64]) -> Vec<f64> + Send + Sync,
{
    fn evaluate(&self, x: &[f64]) -> Result<Evaluation, BoxError> {
        Ok(Evaluation::new(self(x)))
    }
}

/// Interpretation of the output vector.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    types: Vec<BbOutputType>,
    epsilon: f64,
}

impl OutputSchema {
    pub fn new(types: &[BbOutputType], epsilon: f64) -> Self {
        Self {
            types: types.to_vec(),
            epsilon,
        }
    }

    pub fn types(&self) -> &[BbOutputType] {
        &self.types
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Converts a raw evaluation into stored outputs and a status.
    ///
    /// NaN and infinite values become undefined (`None`). An undefined
    /// objective or constraint, a size mismatch or a blackbox-reported
    /// failure make the evaluation `Failed`.
    pub fn interpret(&self, evaluation: &Evaluation) -> (Vec<Option<f64>>, EvalStatus) {
        let outputs: Vec<Option<f64>> = evaluation
            .outputs
            .iter()
            .map(|&v| if v.is_finite() { Some(v) } else { None })
            .collect();
        if !evaluation.success || outputs.len() != self.types.len() {
            return (outputs, EvalStatus::Failed);
        }
        let complete = self
            .types
            .iter()
            .zip(&outputs)
            .all(|(t, v)| *t == BbOutputType::Stat || v.is_some());
        let status = if complete {
            EvalStatus::Ok
        } else {
            EvalStatus::Failed
        };
        (outputs, status)
    }

    /// Objective value, if defined.
    pub fn f(&self, outputs: &[Option<f64>]) -> Option<f64> {
        self.types
            .iter()
            .zip(outputs)
            .find(|(t, _)| **t == BbOutputType::Obj)
            .and_then(|(_, v)| *v)
    }

    /// Aggregate violation h = sum of max(c_j, 0)^2 over PB outputs.
    ///
    /// `+inf` when an EB constraint is violated, `None` when a constraint is
    /// undefined. A positive violation never rounds to zero.
    pub fn h(&self, outputs: &[Option<f64>]) -> Option<f64> {
        if outputs.len() != self.types.len() {
            return None;
        }
        let mut h = 0.0;
        let mut violated = false;
        for (t, v) in self.types.iter().zip(outputs) {
            if !t.is_constraint() {
                continue;
            }
            let c = (*v)?;
            if c > 0.0 {
                if *t == BbOutputType::Eb {
                    return Some(f64::INFINITY);
                }
                violated = true;
                h += c * c;
            }
        }
        if violated && h == 0.0 {
            h = self.epsilon;
        }
        Some(h)
    }
}

/// How a point was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Origin {
    /// Frame center the point was generated from.
    pub center: Vec<f64>,
    /// Displacement from the center, in variable units.
    pub direction: Vec<f64>,
    /// Position of the direction in its generating set.
    pub index: usize,
}

/// A point together with what is known of its evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalPoint {
    pub x: Vec<f64>,
    pub outputs: Vec<Option<f64>>,
    pub status: EvalStatus,
    /// Cache insertion order.
    pub tag: u64,
    pub f: Option<f64>,
    pub h: Option<f64>,
    pub origin: Option<Origin>,
}

impl EvalPoint {
    pub fn new(
        x: Vec<f64>,
        outputs: Vec<Option<f64>>,
        status: EvalStatus,
        tag: u64,
        schema: &OutputSchema,
    ) -> Self {
        let (f, h) = if status == EvalStatus::Ok {
            (schema.f(&outputs), schema.h(&outputs))
        } else {
            (None, None)
        };
        Self {
            x,
            outputs,
            status,
            tag,
            f,
            h,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: Option<Origin>) -> Self {
        self.origin = origin;
        self
    }

    /// Evaluated, with defined f and h.
    pub fn is_usable(&self) -> bool {
        self.status == EvalStatus::Ok && self.f.is_some() && self.h.is_some()
    }

    pub fn is_feasible(&self) -> bool {
        self.is_usable() && self.h == Some(0.0)
    }

    pub fn violates_extreme_barrier(&self) -> bool {
        self.h == Some(f64::INFINITY)
    }

    /// Pareto dominance on (f, h): no worse on both, better on one.
    pub fn dominates(&self, other: &EvalPoint) -> bool {
        match (self.f, self.h, other.f, other.h) {
            (Some(f1), Some(h1), Some(f2), Some(h2)) => {
                f1 <= f2 && h1 <= h2 && (f1 < f2 || h1 < h2)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> OutputSchema {
        OutputSchema::new(
            &[
                BbOutputType::Obj,
                BbOutputType::Pb,
                BbOutputType::Eb,
                BbOutputType::Stat,
            ],
            1e-13,
        )
    }

    #[test]
    fn test_h_sums_squared_pb_violations() {
        let s = schema();
        let outputs = vec![Some(1.0), Some(3.0), Some(-1.0), None];
        assert_eq!(s.h(&outputs), Some(9.0));
        let feasible = vec![Some(1.0), Some(-3.0), Some(0.0), Some(7.0)];
        assert_eq!(s.h(&feasible), Some(0.0));
    }

    #[test]
    fn test_eb_violation_is_infinite() {
        let s = schema();
        let outputs = vec![Some(1.0), Some(-3.0), Some(0.5), None];
        assert_eq!(s.h(&outputs), Some(f64::INFINITY));
    }

    #[test]
    fn test_tiny_violation_is_not_feasible() {
        let s = schema();
        let outputs = vec![Some(1.0), Some(1e-200), Some(-1.0), None];
        assert_eq!(s.h(&outputs), Some(1e-13));
    }

    #[test]
    fn test_interpret_nan_objective_fails() {
        let s = schema();
        let (outputs, status) = s.interpret(&Evaluation::new(vec![f64::NAN, 0.0, 0.0, 1.0]));
        assert_eq!(status, EvalStatus::Failed);
        assert_eq!(outputs[0], None);

        let (outputs, status) = s.interpret(&Evaluation::new(vec![1.0, 0.0, 0.0, f64::NAN]));
        assert_eq!(status, EvalStatus::Ok);
        assert_eq!(outputs[3], None);

        let (_, status) = s.interpret(&Evaluation::new(vec![1.0, 0.0]));
        assert_eq!(status, EvalStatus::Failed);

        let (_, status) = s.interpret(&Evaluation::failed());
        assert_eq!(status, EvalStatus::Failed);
    }

    #[test]
    fn test_eval_point_dominance() {
        let s = OutputSchema::new(&[BbOutputType::Obj, BbOutputType::Pb], 1e-13);
        let a = EvalPoint::new(vec![0.0], vec![Some(1.0), Some(1.0)], EvalStatus::Ok, 0, &s);
        let b = EvalPoint::new(vec![1.0], vec![Some(2.0), Some(1.0)], EvalStatus::Ok, 1, &s);
        let c = EvalPoint::new(vec![2.0], vec![Some(0.5), Some(2.0)], EvalStatus::Ok, 2, &s);
        assert!(a.dominates(&b));
        assert!(!b.dominates(&a));
        assert!(!a.dominates(&c) && !c.dominates(&a));
        assert!(!a.dominates(&a));
        assert!(!a.is_feasible());
    }

    #[test]
    fn test_closure_is_an_evaluator() {
        let sphere = |x: &[f64]| vec![x.iter().map(|v| v * v).sum::<f64>()];
        let evaluation = sphere.evaluate(&[1.0, 2.0]).unwrap();
        assert_eq!(evaluation.outputs, vec![5.0]);
        assert!(evaluation.count_eval && evaluation.success);
    }
}
