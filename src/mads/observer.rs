//! Run events.
//!
//! The optimizer core reports exclusively through [`Observer`]; it never writes
//! to a global log sink itself. [`LogObserver`] forwards events to the `log`
//! facade with the verbosity of `DISPLAY_DEGREE`.

use std::time::Duration;

use crate::mads::eval::EvalPoint;
use crate::mads::mesh::MeshState;
use crate::mads::param::ValidParameters;
use crate::mads::stop::StopReason;
use crate::mads::types::{IncumbentKind, SuccessClass};

/// Counters at the time of an event.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Progress {
    pub iteration: usize,
    /// Counted blackbox evaluations.
    pub bb_eval: usize,
    /// Evaluations including cache hits.
    pub total_eval: usize,
    pub elapsed: Duration,
    /// Current violation threshold of the barrier.
    pub h_max: f64,
    /// Violation of the infeasible incumbent x^I, if any.
    pub h_infeasible: Option<f64>,
}

/// Receiver of run events. Every method defaults to doing nothing.
///
/// Observers are called on the coordinating thread and must return promptly.
#[allow(unused_variables)]
pub trait Observer: Send {
    fn iteration_started(&mut self, iteration: usize) {}

    /// A point received outputs, from the blackbox or from the cache.
    fn point_evaluated(&mut self, point: &EvalPoint, class: SuccessClass, progress: &Progress) {}

    fn new_incumbent(&mut self, kind: IncumbentKind, point: &EvalPoint, progress: &Progress) {}

    /// A search strategy ran around `center`; `trials` is the number of mesh
    /// points it submitted.
    fn search_finished(
        &mut self,
        search: &str,
        center: &EvalPoint,
        trials: usize,
        class: SuccessClass,
    ) {
    }

    /// `progress` reflects the barrier after the iteration's h_max update.
    fn iteration_finished(
        &mut self,
        iteration: usize,
        class: SuccessClass,
        mesh: &MeshState,
        progress: &Progress,
    ) {
    }

    fn run_finished(
        &mut self,
        reason: StopReason,
        best_feasible: Option<&EvalPoint>,
        best_infeasible: Option<&EvalPoint>,
        progress: &Progress,
    ) {
    }
}

/// Observer writing to the `log` facade.
///
/// Degree 1 logs the final summary, degree 2 adds every new incumbent
/// formatted with the `DISPLAY_STATS` template, degree 3 adds one line per
/// iteration at debug level, degree 4 (or `DISPLAY_ALL_EVAL`) adds every
/// evaluated point at trace level.
#[derive(Debug, Clone)]
pub struct LogObserver {
    degree: u8,
    all_eval: bool,
    template: Vec<String>,
}

impl LogObserver {
    pub fn new(params: &ValidParameters) -> Self {
        Self {
            degree: params.display_degree,
            all_eval: params.display_all_eval,
            template: params
                .display_stats
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        }
    }

    /// Renders one `DISPLAY_STATS` line for `point`.
    ///
    /// Known tokens: `BBE`, `EVAL`, `ITER`, `TIME`, `OBJ`, `CONS_H`, `SOL`,
    /// `BBO`. Anything else is printed as is.
    pub fn format_stats(&self, point: &EvalPoint, progress: &Progress) -> String {
        self.template
            .iter()
            .map(|token| match token.as_str() {
                "BBE" => progress.bb_eval.to_string(),
                "EVAL" => progress.total_eval.to_string(),
                "ITER" => progress.iteration.to_string(),
                "TIME" => format!("{:.3}", progress.elapsed.as_secs_f64()),
                "OBJ" => format_optional(point.f),
                "CONS_H" => format_optional(point.h),
                "SOL" => join(point.x.iter().map(|&v| format_number(v))),
                "BBO" => join(point.outputs.iter().map(|&v| format_optional(v))),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Observer for LogObserver {
    fn iteration_started(&mut self, iteration: usize) {
        if self.degree >= 3 {
            log::debug!("iteration {iteration} started");
        }
    }

    fn point_evaluated(&mut self, point: &EvalPoint, class: SuccessClass, progress: &Progress) {
        if self.degree >= 4 || (self.all_eval && self.degree >= 1) {
            log::trace!("{} ({class})", self.format_stats(point, progress));
        }
    }

    fn new_incumbent(&mut self, kind: IncumbentKind, point: &EvalPoint, progress: &Progress) {
        if self.degree >= 2 {
            let tag = match kind {
                IncumbentKind::Feasible => "",
                IncumbentKind::Infeasible => " (infeasible)",
            };
            log::info!("{}{tag}", self.format_stats(point, progress));
        }
    }

    fn search_finished(
        &mut self,
        search: &str,
        center: &EvalPoint,
        trials: usize,
        class: SuccessClass,
    ) {
        if self.degree >= 3 {
            log::debug!(
                "{search} search around ( {} ): {trials} trial points, {class}",
                join(center.x.iter().map(|&v| format_number(v)))
            );
        }
    }

    fn iteration_finished(
        &mut self,
        iteration: usize,
        class: SuccessClass,
        mesh: &MeshState,
        progress: &Progress,
    ) {
        if self.degree >= 3 {
            log::debug!(
                "iteration {iteration}: {class}, mesh = {:?}, frame = {:?}, h_max = {}",
                mesh.mesh,
                mesh.frame,
                format_number(progress.h_max)
            );
        }
    }

    fn run_finished(
        &mut self,
        reason: StopReason,
        best_feasible: Option<&EvalPoint>,
        best_infeasible: Option<&EvalPoint>,
        progress: &Progress,
    ) {
        if self.degree == 0 {
            return;
        }
        log::info!(
            "run finished ({reason}) after {} iterations, {} blackbox evaluations",
            progress.iteration,
            progress.bb_eval
        );
        match best_feasible {
            Some(p) => log::info!("best feasible solution: {}", self.format_stats(p, progress)),
            None => log::info!("no feasible solution"),
        }
        if let Some(p) = best_infeasible {
            log::info!("best infeasible solution: {}", self.format_stats(p, progress));
        }
    }
}

fn format_number(v: f64) -> String {
    let magnitude = v.abs();
    if v == 0.0 || (1e-4..1e7).contains(&magnitude) {
        format!("{v:.7}")
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        format!("{v:.6e}")
    }
}

fn format_optional(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), format_number)
}

fn join(values: impl Iterator<Item = String>) -> String {
    values.collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mads::eval::OutputSchema;
    use crate::mads::param::Parameters;
    use crate::mads::types::{BbOutputType, EvalStatus};

    #[test]
    fn test_format_stats() {
        let params = Parameters::new(2)
            .x0(&[0.0, 0.0])
            .bb_output_type(vec![BbOutputType::Obj, BbOutputType::Pb])
            .display_stats("BBE ( SOL ) OBJ CONS_H")
            .check()
            .unwrap();
        let observer = LogObserver::new(&params);
        let schema = OutputSchema::new(&params.bb_output_type, params.epsilon);
        let point = EvalPoint::new(
            vec![1.5, -0.25],
            vec![Some(3.0), Some(-1.0)],
            EvalStatus::Ok,
            0,
            &schema,
        );
        let progress = Progress {
            bb_eval: 12,
            ..Default::default()
        };
        assert_eq!(
            observer.format_stats(&point, &progress),
            "12 ( 1.5 -0.25 ) 3 0"
        );
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(1e-9), "1.000000e-9");
        assert_eq!(format_optional(None), "-");
    }
}
