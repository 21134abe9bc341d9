//! Iteration driver.
//!
//! Evaluates the starting points, then repeats search and poll until a stop
//! condition holds. Everything mutable during a run (mesh, barrier, direction
//! generator, counters) lives in a run context owned by the coordinating
//! thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::mads::barrier::Barrier;
use crate::mads::cache::Cache;
use crate::mads::directions::DirectionGenerator;
use crate::mads::eval::{EvalPoint, Evaluator, Origin, OutputSchema};
use crate::mads::mesh::{MeshController, MeshState};
use crate::mads::observer::{Observer, Progress};
use crate::mads::param::ValidParameters;
use crate::mads::queue::EvaluatorQueue;
use crate::mads::search::{build_searches, Search, SearchContext};
use crate::mads::stop::{StopReason, StopRegistry};
use crate::mads::trial::{poll_trial_points, snap_trial_point, verify_trial_point, TrialPoint};
use crate::mads::types::{EvalStatus, SuccessClass};

/// Outcome of a run.
#[derive(Debug)]
pub struct RunResult {
    pub stop_reason: StopReason,
    pub best_feasible: Option<EvalPoint>,
    pub best_infeasible: Option<EvalPoint>,
    pub h_max: f64,
    /// Counted blackbox evaluations.
    pub bb_eval: usize,
    /// Evaluations including cache hits.
    pub total_eval: usize,
    /// Points sent to the blackbox.
    pub dispatched: usize,
    /// Entries added to the cache during the run.
    pub cache_inserts: usize,
    pub iterations: usize,
    pub mesh: MeshState,
    /// Diagnostic of an abnormal termination.
    pub failure: Option<Error>,
}

impl RunResult {
    /// Exit code when the optimizer runs as a command-line tool.
    pub fn exit_code(&self) -> i32 {
        self.stop_reason.exit_code()
    }
}

/// A MADS optimizer ready to run.
///
/// ```no_run
/// use mads::{Mads, Parameters};
///
/// let params = Parameters::new(2)
///     .lower_bound(&[-1.5, -0.5])
///     .upper_bound(&[1.5, 2.5])
///     .x0(&[0.1, 0.1])
///     .max_bb_eval(200)
///     .check()?;
/// let rosenbrock = |x: &[f64]| vec![(1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2)];
/// let result = Mads::new(params, rosenbrock).run()?;
/// println!("{}: {:?}", result.stop_reason, result.best_feasible.map(|p| p.x));
/// # Ok::<(), mads::Error>(())
/// ```
pub struct Mads {
    params: ValidParameters,
    evaluator: Arc<dyn Evaluator>,
    observers: Vec<Box<dyn Observer>>,
    interrupt: Arc<AtomicBool>,
}

impl Mads {
    pub fn new<E: Evaluator + 'static>(params: ValidParameters, evaluator: E) -> Self {
        Self::with_shared_evaluator(params, Arc::new(evaluator))
    }

    pub fn with_shared_evaluator(params: ValidParameters, evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            params,
            evaluator,
            observers: Vec::new(),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn add_observer<O: Observer + 'static>(&mut self, observer: O) -> &mut Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Uses `flag` as the interrupt flag, e.g. one shared with a signal
    /// handler.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    /// Flag that cancels the run when set. Checked before each dispatch and
    /// after each result; running evaluations are allowed to finish.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub fn params(&self) -> &ValidParameters {
        &self.params
    }

    /// Runs the optimizer to completion.
    ///
    /// Errors raised before the first evaluation (cache file, worker pool)
    /// are returned as `Err`. Anything that ends the run later is reported
    /// through [`RunResult::stop_reason`] and [`RunResult::failure`], with
    /// the incumbents found so far.
    pub fn run(&mut self) -> Result<RunResult> {
        let params = &self.params;
        let schema = OutputSchema::new(&params.bb_output_type, params.epsilon);
        let cache = Arc::new(
            Cache::new(params.input_types(), &params.bb_output_type).with_epsilon(params.epsilon),
        );
        if let Some(path) = &params.cache_file {
            cache.load(path)?;
        }
        let registry = StopRegistry::new(params);
        let queue = EvaluatorQueue::new(
            Arc::clone(&self.evaluator),
            Arc::clone(&cache),
            schema.clone(),
            registry.clone(),
            params.nb_threads,
            Arc::clone(&self.interrupt),
        )?;
        let inserts_before = cache.insert_count();

        let mut run = RunContext {
            params,
            observers: &mut self.observers,
            interrupt: &self.interrupt,
            cache,
            schema,
            queue,
            mesh: MeshController::new(params),
            barrier: Barrier::new(params.h_max_initial()),
            directions: DirectionGenerator::new(params),
            searches: build_searches(params),
            registry,
            iteration: 0,
            last_success: None,
        };

        let (stop_reason, mut failure) = match run.execute() {
            Ok(reason) => (reason, None),
            Err(err) => {
                let reason = match &err {
                    Error::EvaluatorFatal(_) => StopReason::EvaluatorError,
                    Error::UserInterrupt => StopReason::UserInterrupt,
                    _ => StopReason::InternalError,
                };
                (reason, Some(err))
            }
        };

        if let Some(path) = &params.cache_file {
            if let Err(err) = run.cache.save(path) {
                failure.get_or_insert(err);
            }
        }

        let progress = run.progress();
        for observer in run.observers.iter_mut() {
            observer.run_finished(
                stop_reason,
                run.barrier.best_feasible(),
                run.barrier.best_infeasible(),
                &progress,
            );
        }

        Ok(RunResult {
            stop_reason,
            best_feasible: run.barrier.best_feasible().cloned(),
            best_infeasible: run.barrier.best_infeasible().cloned(),
            h_max: run.barrier.h_max(),
            bb_eval: run.queue.bb_eval(),
            total_eval: run.queue.total_eval(),
            dispatched: run.queue.dispatched(),
            cache_inserts: run.cache.insert_count() - inserts_before,
            iterations: run.iteration,
            mesh: run.mesh.state(),
            failure,
        })
    }
}

struct RunContext<'a> {
    params: &'a ValidParameters,
    observers: &'a mut Vec<Box<dyn Observer>>,
    interrupt: &'a AtomicBool,
    cache: Arc<Cache>,
    schema: OutputSchema,
    queue: EvaluatorQueue,
    mesh: MeshController,
    barrier: Barrier,
    directions: DirectionGenerator,
    searches: Vec<Box<dyn Search>>,
    registry: StopRegistry,
    iteration: usize,
    // Displacement that produced the last dominating point.
    last_success: Option<Vec<f64>>,
}

impl RunContext<'_> {
    fn execute(&mut self) -> Result<StopReason> {
        self.seed_from_cache();
        self.evaluate_starting_points()?;

        let mut last_class = None;
        loop {
            let mut snapshot = self.queue.snapshot();
            snapshot.mesh_exhausted =
                last_class == Some(SuccessClass::Unsuccessful) && self.mesh.all_exhausted();
            snapshot.best_feasible_f = self.barrier.best_feasible().and_then(|p| p.f);
            snapshot.iterations = self.iteration;
            if self.barrier.poll_centers().is_empty() {
                // An interrupt takes precedence over a failed start.
                let reason = self
                    .registry
                    .check(&snapshot)
                    .filter(|r| matches!(r, StopReason::UserInterrupt))
                    .unwrap_or(StopReason::X0Failed);
                return Ok(reason);
            }
            if let Some(reason) = self.registry.check(&snapshot) {
                return Ok(reason);
            }
            last_class = Some(self.iterate()?);
        }
    }

    fn iterate(&mut self) -> Result<SuccessClass> {
        self.iteration += 1;
        let iteration = self.iteration;
        for observer in self.observers.iter_mut() {
            observer.iteration_started(iteration);
        }
        let h_reference = self.barrier.best_infeasible().and_then(|p| p.h);

        let search_class = self.search()?;
        let poll_class = if search_class == SuccessClass::Dominating {
            SuccessClass::Unsuccessful
        } else {
            self.poll()?
        };
        let class = search_class.max(poll_class);

        self.barrier.end_iteration(class, h_reference);
        self.mesh.on_iteration_result(class);
        let state = self.mesh.state();
        let progress = self.progress();
        for observer in self.observers.iter_mut() {
            observer.iteration_finished(iteration, class, &state, &progress);
        }
        Ok(class)
    }

    // Successful entries of a loaded cache compete for the incumbents.
    fn seed_from_cache(&mut self) {
        for entry in self.cache.entries() {
            if entry.status != EvalStatus::Ok {
                continue;
            }
            let key = self.cache.key(&entry.x);
            let point = EvalPoint::new(entry.x, entry.outputs, entry.status, entry.tag, &self.schema);
            self.barrier.update(&key, &point);
        }
    }

    fn evaluate_starting_points(&mut self) -> Result<SuccessClass> {
        let trials = self
            .params
            .x0
            .iter()
            .enumerate()
            .map(|(index, x0)| {
                let x: Vec<f64> = x0
                    .iter()
                    .zip(self.params.input_types())
                    .map(|(&v, t)| t.round(v))
                    .collect();
                TrialPoint {
                    origin: Origin {
                        center: x.clone(),
                        direction: vec![0.0; x.len()],
                        index,
                    },
                    x,
                }
            })
            .collect();
        self.evaluate(trials, None, false)
    }

    // Every search runs around x^F, then around x^I.
    fn search(&mut self) -> Result<SuccessClass> {
        let centers: Vec<EvalPoint> = self.barrier.poll_centers().into_iter().cloned().collect();
        let mut class = SuccessClass::Unsuccessful;
        for center in &centers {
            for s in 0..self.searches.len() {
                let candidates = {
                    let ctx = SearchContext {
                        iteration: self.iteration,
                        center,
                        mesh: &self.mesh,
                        params: self.params,
                        cache: &self.cache,
                        schema: &self.schema,
                    };
                    self.searches[s].generate(&ctx)
                };
                let mut trials: Vec<TrialPoint> = Vec::with_capacity(candidates.len());
                for (index, candidate) in candidates.iter().enumerate() {
                    let Some(tp) =
                        snap_trial_point(&center.x, candidate, index, &self.mesh, self.params)
                    else {
                        continue;
                    };
                    verify_trial_point(&tp, &self.mesh, self.params)?;
                    if !trials.iter().any(|t| t.x == tp.x) {
                        trials.push(tp);
                    }
                }
                let submitted = trials.len();
                let outcome = self.evaluate(trials, None, self.params.opportunistic)?;
                let name = self.searches[s].name();
                for observer in self.observers.iter_mut() {
                    observer.search_finished(name, center, submitted, outcome);
                }
                class = class.max(outcome);
                if class == SuccessClass::Dominating && self.params.opportunistic {
                    return Ok(class);
                }
            }
        }
        Ok(class)
    }

    fn poll(&mut self) -> Result<SuccessClass> {
        let centers: Vec<EvalPoint> = self.barrier.poll_centers().into_iter().cloned().collect();
        if centers.is_empty() {
            return Ok(SuccessClass::Unsuccessful);
        }
        let directions = self
            .directions
            .poll_directions(&self.mesh, self.last_success.as_deref());
        let mut trials = Vec::new();
        for center in &centers {
            for tp in poll_trial_points(&center.x, &directions, &self.mesh, self.params) {
                verify_trial_point(&tp, &self.mesh, self.params)?;
                trials.push(tp);
            }
        }
        let priority = self.last_success.clone();
        self.evaluate(trials, priority.as_deref(), self.params.opportunistic)
    }

    // Pushes a batch through the queue and offers every result to the
    // barrier, in delivery order.
    fn evaluate(
        &mut self,
        trials: Vec<TrialPoint>,
        priority: Option<&[f64]>,
        opportunistic: bool,
    ) -> Result<SuccessClass> {
        self.queue.submit(trials, priority);
        let mut class = SuccessClass::Unsuccessful;
        while let Some(delivered) = self.queue.wait_for_next_result()? {
            let point = delivered.point;
            let outcome = self.barrier.update(&delivered.key, &point);
            let progress = self.progress();
            for observer in self.observers.iter_mut() {
                observer.point_evaluated(&point, outcome.class, &progress);
            }
            if let Some(kind) = outcome.incumbent {
                for observer in self.observers.iter_mut() {
                    observer.new_incumbent(kind, &point, &progress);
                }
            }
            if outcome.class == SuccessClass::Dominating {
                if let Some(origin) = &point.origin {
                    if origin.direction.iter().any(|&d| d != 0.0) {
                        self.last_success = Some(origin.direction.clone());
                    }
                }
            }
            class = class.max(outcome.class);
            if (opportunistic && class == SuccessClass::Dominating)
                || self.interrupt.load(Ordering::SeqCst)
            {
                self.queue.stop_dispatch();
            }
        }
        debug_assert!(self.queue.is_idle(), "batch left points in the queue");
        Ok(class)
    }

    fn progress(&self) -> Progress {
        Progress {
            iteration: self.iteration,
            bb_eval: self.queue.bb_eval(),
            total_eval: self.queue.total_eval(),
            elapsed: self.queue.started_at().elapsed(),
            h_max: self.barrier.h_max(),
            h_infeasible: self.barrier.best_infeasible().and_then(|p| p.h),
        }
    }
}
