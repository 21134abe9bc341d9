//! Derivative-free constrained blackbox optimization with Mesh Adaptive
//! Direct Search.

pub mod error;
pub mod mads;

pub use error::{Error, Result};
pub use mads::{
    Evaluation, Evaluator, LogObserver, Mads, Observer, Parameters, RunResult, StopReason,
    ValidParameters,
};
