//! Termination reasons and the order in which they are checked.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::mads::param::ValidParameters;

/// Why a run ended. Each reason has a stable identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    UserInterrupt,
    EvaluatorError,
    MaxBbEval,
    MaxEval,
    MaxTime,
    MeshExhausted,
    TargetReached,
    MaxIterations,
    StopIfFeasible,
    /// No starting point could be evaluated.
    X0Failed,
    /// An internal invariant was violated.
    InternalError,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::UserInterrupt => "user_interrupt",
            StopReason::EvaluatorError => "evaluator_error",
            StopReason::MaxBbEval => "max_bb_eval",
            StopReason::MaxEval => "max_eval",
            StopReason::MaxTime => "max_time",
            StopReason::MeshExhausted => "mesh_exhausted",
            StopReason::TargetReached => "target_reached",
            StopReason::MaxIterations => "max_iterations",
            StopReason::StopIfFeasible => "stop_if_feasible",
            StopReason::X0Failed => "x0_failed",
            StopReason::InternalError => "internal_error",
        }
    }

    /// Exit code when the optimizer runs as a command-line tool.
    pub fn exit_code(&self) -> i32 {
        match self {
            StopReason::EvaluatorError => 2,
            StopReason::UserInterrupt => 3,
            StopReason::InternalError => 4,
            _ => 0,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run quantities the stop conditions look at.
#[derive(Debug, Clone, Default)]
pub struct StopSnapshot {
    pub interrupted: bool,
    pub evaluator_failed: bool,
    pub bb_eval: usize,
    pub total_eval: usize,
    pub elapsed: Duration,
    pub mesh_exhausted: bool,
    pub best_feasible_f: Option<f64>,
    pub iterations: usize,
}

/// Termination limits taken from the parameters.
#[derive(Debug, Clone)]
pub struct StopRegistry {
    max_bb_eval: Option<usize>,
    max_eval: Option<usize>,
    max_time: Option<Duration>,
    f_target: Option<f64>,
    max_iterations: Option<usize>,
    stop_if_feasible: bool,
}

impl StopRegistry {
    pub fn new(params: &ValidParameters) -> Self {
        Self {
            max_bb_eval: params.max_bb_eval,
            max_eval: params.max_eval,
            max_time: params.max_time,
            f_target: params.f_target,
            max_iterations: params.max_iterations,
            stop_if_feasible: params.stop_if_feasible,
        }
    }

    /// First reason that holds, in priority order.
    pub fn check(&self, s: &StopSnapshot) -> Option<StopReason> {
        if s.interrupted {
            return Some(StopReason::UserInterrupt);
        }
        if s.evaluator_failed {
            return Some(StopReason::EvaluatorError);
        }
        if let Some(reason) = self.budget_reason(s) {
            return Some(reason);
        }
        if s.mesh_exhausted {
            return Some(StopReason::MeshExhausted);
        }
        if let (Some(target), Some(f)) = (self.f_target, s.best_feasible_f) {
            if f <= target {
                return Some(StopReason::TargetReached);
            }
        }
        if self.max_iterations.is_some_and(|max| s.iterations >= max) {
            return Some(StopReason::MaxIterations);
        }
        if self.stop_if_feasible && s.best_feasible_f.is_some() {
            return Some(StopReason::StopIfFeasible);
        }
        None
    }

    /// Evaluation and time budgets only. The evaluator queue checks these
    /// before every dispatch.
    pub fn budget_reason(&self, s: &StopSnapshot) -> Option<StopReason> {
        if self.max_bb_eval.is_some_and(|max| s.bb_eval >= max) {
            return Some(StopReason::MaxBbEval);
        }
        if self.max_eval.is_some_and(|max| s.total_eval >= max) {
            return Some(StopReason::MaxEval);
        }
        if self.max_time.is_some_and(|max| s.elapsed >= max) {
            return Some(StopReason::MaxTime);
        }
        None
    }

    /// Evaluations still allowed by the evaluation budgets.
    pub fn remaining_evaluations(&self, bb_eval: usize, total_eval: usize) -> usize {
        let bb = self.max_bb_eval.map_or(usize::MAX, |m| m.saturating_sub(bb_eval));
        let total = self.max_eval.map_or(usize::MAX, |m| m.saturating_sub(total_eval));
        bb.min(total)
    }
}
