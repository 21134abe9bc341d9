//! Progressive barrier.
//!
//! Keeps the best feasible point x^F and a filter of non-dominated infeasible
//! points whose violation does not exceed the threshold h_max. The infeasible
//! incumbent x^I is the filter point with the largest violation, which is
//! also the one with the lowest objective.

use std::collections::HashSet;

use crate::mads::eval::EvalPoint;
use crate::mads::types::{IncumbentKind, SuccessClass};

/// Result of offering one point to the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierOutcome {
    pub class: SuccessClass,
    /// Set when the point became an incumbent.
    pub incumbent: Option<IncumbentKind>,
}

impl BarrierOutcome {
    fn rejected() -> Self {
        Self {
            class: SuccessClass::Unsuccessful,
            incumbent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Barrier {
    h_max: f64,
    best_feasible: Option<EvalPoint>,
    // Sorted by increasing h, hence decreasing f.
    filter: Vec<EvalPoint>,
    seen: HashSet<String>,
}

impl Barrier {
    pub fn new(h_max_0: f64) -> Self {
        Self {
            h_max: h_max_0,
            best_feasible: None,
            filter: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn h_max(&self) -> f64 {
        self.h_max
    }

    pub fn best_feasible(&self) -> Option<&EvalPoint> {
        self.best_feasible.as_ref()
    }

    pub fn best_infeasible(&self) -> Option<&EvalPoint> {
        self.filter.last()
    }

    /// Non-dominated infeasible points, by increasing h.
    pub fn filter(&self) -> &[EvalPoint] {
        &self.filter
    }

    /// Poll centers: x^F first, then x^I.
    pub fn poll_centers(&self) -> Vec<&EvalPoint> {
        self.best_feasible
            .iter()
            .chain(self.best_infeasible())
            .collect()
    }

    /// Classifies `point` and adopts it when it enters the barrier.
    ///
    /// `key` identifies the point; a point already offered is ignored.
    pub fn update(&mut self, key: &str, point: &EvalPoint) -> BarrierOutcome {
        if !self.seen.insert(key.to_string()) {
            return BarrierOutcome::rejected();
        }
        let (f, h) = match (point.f, point.h) {
            (Some(f), Some(h)) if point.is_usable() => (f, h),
            _ => return BarrierOutcome::rejected(),
        };
        if h.is_infinite() {
            return BarrierOutcome::rejected();
        }

        if h == 0.0 {
            let improves = match &self.best_feasible {
                Some(best) => best.f.map_or(true, |fb| f < fb),
                None => true,
            };
            if !improves {
                return BarrierOutcome::rejected();
            }
            self.best_feasible = Some(point.clone());
            return BarrierOutcome {
                class: SuccessClass::Dominating,
                incumbent: Some(IncumbentKind::Feasible),
            };
        }

        if h > self.h_max {
            return BarrierOutcome::rejected();
        }
        if self
            .filter
            .iter()
            .any(|q| q.dominates(point) || (q.f == point.f && q.h == point.h))
        {
            return BarrierOutcome::rejected();
        }

        let class = match self.best_infeasible() {
            None => SuccessClass::Dominating,
            Some(incumbent) if point.dominates(incumbent) => SuccessClass::Dominating,
            Some(_) => SuccessClass::Improving,
        };
        let previous = self.best_infeasible().map(|p| p.tag);
        self.filter.retain(|q| !point.dominates(q));
        let at = self.filter.partition_point(|q| q.h.unwrap_or(0.0) < h);
        self.filter.insert(at, point.clone());

        let incumbent = match self.best_infeasible() {
            Some(best) if Some(best.tag) != previous && best.tag == point.tag => {
                Some(IncumbentKind::Infeasible)
            }
            _ => None,
        };
        BarrierOutcome { class, incumbent }
    }

    /// Tightens h_max at the end of an iteration.
    ///
    /// `h_reference` is h(x^I) when the iteration started. After an
    /// improving iteration the threshold drops to the largest filter
    /// violation below it, so that x^I moves toward feasibility; otherwise it
    /// drops to `h_reference` itself. Filter points above the new threshold
    /// are discarded.
    pub fn end_iteration(&mut self, class: SuccessClass, h_reference: Option<f64>) {
        let Some(h_ref) = h_reference else {
            return;
        };
        let target = match class {
            SuccessClass::Improving => self
                .filter
                .iter()
                .filter_map(|p| p.h)
                .filter(|&h| h < h_ref)
                .fold(None, |acc: Option<f64>, h| Some(acc.map_or(h, |a| a.max(h))))
                .unwrap_or(h_ref),
            SuccessClass::Dominating | SuccessClass::Unsuccessful => h_ref,
        };
        self.h_max = self.h_max.min(target);
        let h_max = self.h_max;
        self.filter.retain(|p| p.h.is_some_and(|h| h <= h_max));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mads::eval::OutputSchema;
    use crate::mads::types::{BbOutputType, EvalStatus};

    fn point(tag: u64, f: f64, c: f64) -> EvalPoint {
        let schema = OutputSchema::new(&[BbOutputType::Obj, BbOutputType::Pb], 1e-13);
        EvalPoint::new(
            vec![tag as f64],
            vec![Some(f), Some(c)],
            EvalStatus::Ok,
            tag,
            &schema,
        )
    }

    fn key(p: &EvalPoint) -> String {
        format!("{}", p.tag)
    }

    fn offer(b: &mut Barrier, p: &EvalPoint) -> SuccessClass {
        b.update(&key(p), p).class
    }

    #[test]
    fn test_feasible_points() {
        let mut b = Barrier::new(f64::INFINITY);
        let a = point(0, 5.0, -1.0);
        let outcome = b.update(&key(&a), &a);
        assert_eq!(outcome.class, SuccessClass::Dominating);
        assert_eq!(outcome.incumbent, Some(IncumbentKind::Feasible));
        assert_eq!(offer(&mut b, &point(1, 6.0, -1.0)), SuccessClass::Unsuccessful);
        assert_eq!(offer(&mut b, &point(2, 5.0, 0.0)), SuccessClass::Unsuccessful);
        assert_eq!(offer(&mut b, &point(3, 4.0, 0.0)), SuccessClass::Dominating);
        assert_eq!(b.best_feasible().map(|p| p.tag), Some(3));
    }

    #[test]
    fn test_infeasible_classification() {
        let mut b = Barrier::new(f64::INFINITY);
        // h = 4
        assert_eq!(offer(&mut b, &point(0, 10.0, 2.0)), SuccessClass::Dominating);
        // dominated
        assert_eq!(offer(&mut b, &point(1, 11.0, 3.0)), SuccessClass::Unsuccessful);
        // lower h, higher f: improving
        assert_eq!(offer(&mut b, &point(2, 12.0, 1.0)), SuccessClass::Improving);
        assert_eq!(b.best_infeasible().map(|p| p.tag), Some(0));
        // dominates x^I
        let outcome = b.update("3", &point(3, 9.0, 1.5));
        assert_eq!(outcome.class, SuccessClass::Dominating);
        assert_eq!(outcome.incumbent, Some(IncumbentKind::Infeasible));
        assert_eq!(b.best_infeasible().map(|p| p.tag), Some(3));
        assert_eq!(b.filter().len(), 2);
    }

    #[test]
    fn test_points_enter_at_most_once() {
        let mut b = Barrier::new(f64::INFINITY);
        let a = point(0, 1.0, -1.0);
        assert_eq!(offer(&mut b, &a), SuccessClass::Dominating);
        b.best_feasible = None;
        assert_eq!(offer(&mut b, &a), SuccessClass::Unsuccessful);
    }

    #[test]
    fn test_extreme_barrier_and_failures_are_rejected() {
        let schema = OutputSchema::new(&[BbOutputType::Obj, BbOutputType::Eb], 1e-13);
        let mut b = Barrier::new(f64::INFINITY);
        let eb = EvalPoint::new(vec![0.0], vec![Some(1.0), Some(1.0)], EvalStatus::Ok, 0, &schema);
        assert_eq!(b.update("eb", &eb).class, SuccessClass::Unsuccessful);
        let failed = EvalPoint::new(vec![1.0], vec![None, None], EvalStatus::Failed, 1, &schema);
        assert_eq!(b.update("failed", &failed).class, SuccessClass::Unsuccessful);
        assert!(b.best_feasible().is_none() && b.best_infeasible().is_none());
    }

    #[test]
    fn test_h_max_after_unsuccessful() {
        let mut b = Barrier::new(f64::INFINITY);
        offer(&mut b, &point(0, 10.0, 2.0));
        let h_ref = b.best_infeasible().and_then(|p| p.h);
        b.end_iteration(SuccessClass::Unsuccessful, h_ref);
        assert_eq!(b.h_max(), 4.0);
        assert_eq!(offer(&mut b, &point(1, 1.0, 3.0)), SuccessClass::Unsuccessful);
    }

    #[test]
    fn test_h_max_after_improving() {
        let mut b = Barrier::new(f64::INFINITY);
        offer(&mut b, &point(0, 10.0, 2.0));
        let h_ref = b.best_infeasible().and_then(|p| p.h);
        offer(&mut b, &point(1, 12.0, 1.0));
        offer(&mut b, &point(2, 14.0, 0.5));
        b.end_iteration(SuccessClass::Improving, h_ref);
        assert_eq!(b.h_max(), 1.0);
        assert_eq!(b.best_infeasible().map(|p| p.tag), Some(1));
        assert_eq!(b.filter().len(), 2);
    }

    #[test]
    fn test_h_max_never_increases() {
        let mut b = Barrier::new(2.0);
        b.end_iteration(SuccessClass::Unsuccessful, Some(5.0));
        assert_eq!(b.h_max(), 2.0);
        b.end_iteration(SuccessClass::Dominating, None);
        assert_eq!(b.h_max(), 2.0);
    }

    #[test]
    fn test_poll_centers() {
        let mut b = Barrier::new(f64::INFINITY);
        assert!(b.poll_centers().is_empty());
        offer(&mut b, &point(0, 10.0, 2.0));
        offer(&mut b, &point(1, 20.0, -1.0));
        let centers: Vec<u64> = b.poll_centers().iter().map(|p| p.tag).collect();
        assert_eq!(centers, vec![1, 0]);
    }
}
