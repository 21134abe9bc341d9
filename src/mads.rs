//! Mesh Adaptive Direct Search.
//!
//! Derivative-free minimization of a blackbox objective under blackbox
//! constraints. Each iteration runs optional search strategies, then polls
//! around the incumbents along directions that become dense as the mesh is
//! refined. Constraints are handled by a progressive barrier (PB outputs) or
//! an extreme barrier (EB outputs).
//!
//! Leaves first: [`mesh`] → [`directions`] → [`trial`] → [`queue`] ↔
//! [`cache`] → [`barrier`] → [`driver`].

pub mod barrier;
pub mod cache;
pub mod directions;
pub mod driver;
pub mod eval;
pub mod mesh;
pub mod observer;
pub mod param;
pub mod queue;
pub mod search;
pub mod stop;
pub mod trial;
pub mod types;


pub use barrier::{Barrier, BarrierOutcome};
pub use cache::{Cache, CacheEntry};
pub use directions::DirectionGenerator;
pub use driver::{Mads, RunResult};
pub use eval::{BoxError, EvalPoint, Evaluation, Evaluator, Origin, OutputSchema};
pub use mesh::{MeshController, MeshState};
pub use observer::{LogObserver, Observer, Progress};
pub use param::{Parameters, ValidParameters, DEFAULT_EPSILON};
pub use stop::StopReason;
pub use types::{
    parse_input_types, parse_output_types, BbOutputType, DirectionType, EvalStatus,
    IncumbentKind, InputType, SuccessClass,
};
