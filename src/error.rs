use thiserror::Error;

/// Errors raised by the optimizer.
///
/// Per-point evaluation failures are not errors: they are recorded on the
/// point itself (see [`crate::mads::EvalStatus::Failed`]) and never leave the
/// evaluator queue.
#[derive(Error, Debug)]
pub enum Error {
    /// The parameter record failed validation before the run started.
    #[error("invalid parameter: {0}")]
    ParameterInvalid(String),

    /// The evaluator failed at system level (error return or panic).
    #[error("evaluator fatal error: {0}")]
    EvaluatorFatal(String),

    /// Two different outputs were recorded for the same point.
    #[error("cache inconsistency: {0}")]
    CacheInconsistent(String),

    /// A generated trial point left the bounds or the mesh.
    #[error("bounds violated internally: {0}")]
    BoundsViolatedInternally(String),

    /// The run was cancelled through its interrupt handle.
    #[error("interrupted by user")]
    UserInterrupt,

    #[error("cache file I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache file format: {0}")]
    Json(#[from] serde_json::Error),

    #[error("worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    /// Exit code used when the optimizer is embedded in a command-line tool.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ParameterInvalid(_) => 1,
            Error::EvaluatorFatal(_) => 2,
            Error::UserInterrupt => 3,
            Error::CacheInconsistent(_) | Error::BoundsViolatedInternally(_) => 4,
            Error::Io(_) | Error::Json(_) | Error::ThreadPool(_) => 1,
        }
    }

    /// Stable identifier of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ParameterInvalid(_) | Error::Io(_) | Error::Json(_) | Error::ThreadPool(_) => {
                "parameter_invalid"
            }
            Error::EvaluatorFatal(_) => "evaluator_fatal",
            Error::CacheInconsistent(_) => "cache_inconsistent",
            Error::BoundsViolatedInternally(_) => "bounds_violated_internally",
            Error::UserInterrupt => "user_interrupt",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
