//! Evaluator queue.
//!
//! Trial points submitted for one phase are deduplicated against the batch
//! and the cache, ordered by priority and sent to the blackbox in waves of at
//! most k concurrent evaluations on a rayon pool. Workers report through a
//! channel; results are handed back to the coordinator in dispatch order so
//! that a run does not depend on thread timing.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::mads::cache::{Cache, CacheEntry};
use crate::mads::eval::{EvalPoint, Evaluation, Evaluator, OutputSchema};
use crate::mads::stop::{StopRegistry, StopSnapshot};
use crate::mads::trial::TrialPoint;

type WorkerResult = std::result::Result<Evaluation, String>;

/// A point with outputs, ready for the barrier.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub point: EvalPoint,
    /// Cache key of the point.
    pub key: String,
    /// Outputs came from the cache rather than the blackbox.
    pub cached: bool,
}

pub struct EvaluatorQueue {
    evaluator: Arc<dyn Evaluator>,
    cache: Arc<Cache>,
    schema: OutputSchema,
    registry: StopRegistry,
    interrupt: Arc<AtomicBool>,
    start: Instant,
    k: usize,
    pool: Option<rayon::ThreadPool>,
    sender: Sender<(usize, WorkerResult)>,
    receiver: Receiver<(usize, WorkerResult)>,

    hits: VecDeque<(TrialPoint, CacheEntry)>,
    pending: VecDeque<TrialPoint>,
    in_flight: BTreeMap<usize, TrialPoint>,
    arrived: BTreeMap<usize, WorkerResult>,
    next_seq: usize,
    next_delivery: usize,

    bb_eval: usize,
    total_eval: usize,
    dispatched: usize,
}

impl EvaluatorQueue {
    /// Creates the queue and, when `k > 1`, a worker pool of `k` threads.
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        cache: Arc<Cache>,
        schema: OutputSchema,
        registry: StopRegistry,
        k: usize,
        interrupt: Arc<AtomicBool>,
    ) -> Result<Self> {
        let pool = if k > 1 {
            Some(rayon::ThreadPoolBuilder::new().num_threads(k).build()?)
        } else {
            None
        };
        let (sender, receiver) = mpsc::channel();
        Ok(Self {
            evaluator,
            cache,
            schema,
            registry,
            interrupt,
            start: Instant::now(),
            k: k.max(1),
            pool,
            sender,
            receiver,
            hits: VecDeque::new(),
            pending: VecDeque::new(),
            in_flight: BTreeMap::new(),
            arrived: BTreeMap::new(),
            next_seq: 0,
            next_delivery: 0,
            bb_eval: 0,
            total_eval: 0,
            dispatched: 0,
        })
    }

    /// Counted blackbox evaluations.
    pub fn bb_eval(&self) -> usize {
        self.bb_eval
    }

    /// Evaluations including cache hits.
    pub fn total_eval(&self) -> usize {
        self.total_eval
    }

    /// Points sent to the blackbox.
    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    pub fn started_at(&self) -> Instant {
        self.start
    }

    /// Budget-related quantities for the stop registry.
    pub fn snapshot(&self) -> StopSnapshot {
        StopSnapshot {
            interrupted: self.interrupt.load(Ordering::SeqCst),
            bb_eval: self.bb_eval,
            total_eval: self.total_eval,
            elapsed: self.start.elapsed(),
            ..Default::default()
        }
    }

    /// Whether nothing is waiting or running.
    pub fn is_idle(&self) -> bool {
        self.hits.is_empty() && self.pending.is_empty() && self.in_flight.is_empty()
    }

    /// Queues a batch of trial points.
    ///
    /// Points already queued or already in the batch are dropped. Points
    /// found in the cache are delivered without calling the blackbox. The
    /// rest are ordered by decreasing cosine between their direction and
    /// `priority` (the last dominating direction); ties keep submission
    /// order.
    pub fn submit(&mut self, points: Vec<TrialPoint>, priority: Option<&[f64]>) {
        let mut keys: HashSet<String> = self
            .pending
            .iter()
            .chain(self.in_flight.values())
            .chain(self.hits.iter().map(|(tp, _)| tp))
            .map(|tp| self.cache.key(&tp.x))
            .collect();

        let mut fresh: Vec<TrialPoint> = Vec::with_capacity(points.len());
        for tp in points {
            if !keys.insert(self.cache.key(&tp.x)) {
                continue;
            }
            match self.cache.lookup(&tp.x) {
                Some(entry) => self.hits.push_back((tp, entry)),
                None => fresh.push(tp),
            }
        }

        if let Some(reference) = priority {
            let mut scored: Vec<(f64, TrialPoint)> = fresh
                .into_iter()
                .map(|tp| (cosine(&tp.origin.direction, reference), tp))
                .collect();
            scored.sort_by(|a, b| b.0.total_cmp(&a.0));
            fresh = scored.into_iter().map(|(_, tp)| tp).collect();
        }
        self.pending.extend(fresh);
    }

    /// Drops every point not yet dispatched. Evaluations already running
    /// are still delivered.
    pub fn stop_dispatch(&mut self) {
        self.hits.clear();
        self.pending.clear();
    }

    /// Blocks until the next result is available.
    ///
    /// Returns `Ok(None)` once the batch is exhausted, or earlier when a
    /// budget is reached or an interrupt is requested. A system-level
    /// evaluator failure is returned as [`Error::EvaluatorFatal`].
    pub fn wait_for_next_result(&mut self) -> Result<Option<Delivered>> {
        loop {
            if let Some((tp, entry)) = self.hits.pop_front() {
                let remaining = self
                    .registry
                    .remaining_evaluations(self.bb_eval, self.total_eval);
                if self.interrupted() || remaining == 0 {
                    self.stop_dispatch();
                    continue;
                }
                self.total_eval += 1;
                let key = self.cache.key(&tp.x);
                let point =
                    EvalPoint::new(entry.x, entry.outputs, entry.status, entry.tag, &self.schema)
                        .with_origin(Some(tp.origin));
                return Ok(Some(Delivered {
                    point,
                    key,
                    cached: true,
                }));
            }

            if let Some(result) = self.arrived.remove(&self.next_delivery) {
                let seq = self.next_delivery;
                self.next_delivery += 1;
                let tp = self.in_flight.remove(&seq).ok_or_else(|| {
                    Error::EvaluatorFatal(format!("result {seq} has no matching dispatch"))
                })?;
                return self.record(tp, result).map(Some);
            }

            if !self.in_flight.is_empty() {
                let (seq, result) = self.receiver.recv().map_err(|_| {
                    Error::EvaluatorFatal("worker pool stopped reporting".to_string())
                })?;
                self.arrived.insert(seq, result);
                continue;
            }

            if self.pending.is_empty() {
                return Ok(None);
            }
            let wave = self.wave_size();
            if wave == 0 {
                self.stop_dispatch();
                return Ok(None);
            }
            self.dispatch(wave);
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    fn wave_size(&self) -> usize {
        if self.interrupted() || self.registry.budget_reason(&self.snapshot()).is_some() {
            return 0;
        }
        let remaining = self
            .registry
            .remaining_evaluations(self.bb_eval, self.total_eval);
        self.k.min(self.pending.len()).min(remaining)
    }

    fn dispatch(&mut self, count: usize) {
        for _ in 0..count {
            let Some(tp) = self.pending.pop_front() else {
                break;
            };
            let seq = self.next_seq;
            self.next_seq += 1;
            self.dispatched += 1;
            let x = tp.x.clone();
            self.in_flight.insert(seq, tp);
            match &self.pool {
                Some(pool) => {
                    let evaluator = Arc::clone(&self.evaluator);
                    let sender = self.sender.clone();
                    pool.spawn(move || {
                        // The coordinator may have stopped listening after a fatal error.
                        let _ = sender.send((seq, call_evaluator(evaluator.as_ref(), &x)));
                    });
                }
                None => {
                    let result = call_evaluator(self.evaluator.as_ref(), &x);
                    self.arrived.insert(seq, result);
                }
            }
        }
    }

    // Cache insertion happens before the point is handed to the barrier.
    fn record(&mut self, tp: TrialPoint, result: WorkerResult) -> Result<Delivered> {
        let evaluation = result.map_err(Error::EvaluatorFatal)?;
        let (outputs, status) = self.schema.interpret(&evaluation);
        if evaluation.count_eval {
            self.bb_eval += 1;
        }
        self.total_eval += 1;
        let entry = self.cache.insert(&tp.x, outputs, status)?;
        let key = self.cache.key(&entry.x);
        let point =
            EvalPoint::new(entry.x, entry.outputs, entry.status, entry.tag, &self.schema)
                .with_origin(Some(tp.origin));
        Ok(Delivered {
            point,
            key,
            cached: false,
        })
    }
}

fn call_evaluator(evaluator: &dyn Evaluator, x: &[f64]) -> WorkerResult {
    match panic::catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(x))) {
        Ok(Ok(evaluation)) => Ok(evaluation),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "evaluator panicked".to_string());
            Err(format!("evaluator panicked: {msg}"))
        }
    }
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mads::eval::{BoxError, Origin};
    use crate::mads::param::Parameters;
    use crate::mads::types::{BbOutputType, EvalStatus, InputType};
    use std::sync::atomic::AtomicUsize;

    fn trial(x: &[f64], index: usize) -> TrialPoint {
        TrialPoint {
            x: x.to_vec(),
            origin: Origin {
                center: vec![0.0; x.len()],
                direction: x.to_vec(),
                index,
            },
        }
    }

    fn queue_with(
        evaluator: Arc<dyn Evaluator>,
        k: usize,
        max_bb_eval: Option<usize>,
    ) -> (EvaluatorQueue, Arc<Cache>) {
        let mut params = Parameters::new(2).x0(&[0.0, 0.0]);
        params.max_bb_eval = max_bb_eval;
        let params = params.check().unwrap();
        let cache = Arc::new(Cache::new(
            &[InputType::Continuous; 2],
            &[BbOutputType::Obj],
        ));
        let queue = EvaluatorQueue::new(
            evaluator,
            Arc::clone(&cache),
            OutputSchema::new(&[BbOutputType::Obj], 1e-13),
            StopRegistry::new(&params),
            k,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        (queue, cache)
    }

    fn sphere() -> Arc<dyn Evaluator> {
        Arc::new(|x: &[f64]| vec![x.iter().map(|v| v * v).sum::<f64>()])
    }

    fn drain(queue: &mut EvaluatorQueue) -> Vec<Delivered> {
        let mut out = Vec::new();
        while let Some(d) = queue.wait_for_next_result().unwrap() {
            out.push(d);
        }
        out
    }

    #[test]
    fn test_batch_and_cache_dedup() {
        let (mut queue, cache) = queue_with(sphere(), 1, None);
        cache
            .insert(&[1.0, 1.0], vec![Some(2.0)], EvalStatus::Ok)
            .unwrap();
        queue.submit(
            vec![
                trial(&[1.0, 0.0], 0),
                trial(&[1.0, 0.0], 1),
                trial(&[1.0, 1.0], 2),
            ],
            None,
        );
        let delivered = drain(&mut queue);
        assert_eq!(delivered.len(), 2);
        assert!(delivered[0].cached);
        assert_eq!(delivered[0].point.f, Some(2.0));
        assert!(!delivered[1].cached);
        assert_eq!(delivered[1].point.f, Some(1.0));
        assert_eq!(queue.bb_eval(), 1);
        assert_eq!(queue.total_eval(), 2);
        assert_eq!(queue.dispatched(), 1);
        assert_eq!(cache.insert_count(), 2);
    }

    #[test]
    fn test_last_direction_first() {
        let (mut queue, _) = queue_with(sphere(), 1, None);
        queue.submit(
            vec![
                trial(&[-1.0, 0.0], 0),
                trial(&[0.0, 1.0], 1),
                trial(&[1.0, 0.1], 2),
                trial(&[0.0, -1.0], 3),
            ],
            Some(&[1.0, 0.0]),
        );
        let order: Vec<usize> = drain(&mut queue)
            .iter()
            .filter_map(|d| d.point.origin.as_ref().map(|o| o.index))
            .collect();
        assert_eq!(order, vec![2, 1, 3, 0]);
    }

    #[test]
    fn test_stop_dispatch_keeps_nothing_pending() {
        let (mut queue, _) = queue_with(sphere(), 1, None);
        queue.submit((0..5).map(|i| trial(&[i as f64, 1.0], i)).collect(), None);
        let first = queue.wait_for_next_result().unwrap();
        assert!(first.is_some());
        queue.stop_dispatch();
        assert!(queue.wait_for_next_result().unwrap().is_none());
        assert_eq!(queue.dispatched(), 1);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_budget_limits_dispatch() {
        let (mut queue, _) = queue_with(sphere(), 4, Some(3));
        queue.submit((0..10).map(|i| trial(&[i as f64, 0.5], i)).collect(), None);
        let delivered = drain(&mut queue);
        assert_eq!(delivered.len(), 3);
        assert_eq!(queue.bb_eval(), 3);
    }

    #[test]
    fn test_parallel_results_in_dispatch_order() {
        let evaluator: Arc<dyn Evaluator> = Arc::new(|x: &[f64]| {
            // later points finish first
            std::thread::sleep(std::time::Duration::from_millis((10.0 - x[0]) as u64 * 3));
            vec![x[0]]
        });
        let (mut queue, cache) = queue_with(evaluator, 4, None);
        queue.submit((0..10).map(|i| trial(&[i as f64, 0.0], i)).collect(), None);
        let values: Vec<f64> = drain(&mut queue)
            .iter()
            .filter_map(|d| d.point.f)
            .collect();
        assert_eq!(values, (0..10).map(|i| i as f64).collect::<Vec<_>>());
        assert_eq!(cache.insert_count(), queue.dispatched());
    }

    #[test]
    fn test_uncounted_and_failed_evaluations() {
        struct Flaky;
        impl Evaluator for Flaky {
            fn evaluate(&self, x: &[f64]) -> std::result::Result<Evaluation, BoxError> {
                if x[0] < 0.0 {
                    Ok(Evaluation::failed().uncounted())
                } else {
                    Ok(Evaluation::new(vec![f64::NAN]))
                }
            }
        }
        let (mut queue, _) = queue_with(Arc::new(Flaky), 1, None);
        queue.submit(vec![trial(&[-1.0, 0.0], 0), trial(&[1.0, 0.0], 1)], None);
        let delivered = drain(&mut queue);
        assert!(delivered
            .iter()
            .all(|d| d.point.status == EvalStatus::Failed));
        assert_eq!(queue.bb_eval(), 1);
        assert_eq!(queue.total_eval(), 2);
    }

    #[test]
    fn test_panicking_evaluator_is_fatal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let evaluator: Arc<dyn Evaluator> = Arc::new(move |_: &[f64]| -> Vec<f64> {
            counter.fetch_add(1, Ordering::SeqCst);
            panic!("blackbox crashed")
        });
        for k in [1, 2] {
            let (mut queue, _) = queue_with(Arc::clone(&evaluator), k, None);
            queue.submit(vec![trial(&[1.0, 0.0], 0)], None);
            let err = queue.wait_for_next_result().unwrap_err();
            assert_eq!(err.kind(), "evaluator_fatal");
            assert!(err.to_string().contains("blackbox crashed"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_interrupt_stops_dispatch() {
        let (mut queue, _) = queue_with(sphere(), 1, None);
        queue.interrupt.store(true, Ordering::SeqCst);
        queue.submit(vec![trial(&[1.0, 0.0], 0)], None);
        assert!(queue.wait_for_next_result().unwrap().is_none());
        assert_eq!(queue.dispatched(), 0);
    }
}
