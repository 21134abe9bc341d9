//! Minimizes the 2-D Rosenbrock function from (0.1, 0.1) and logs the run.
//!
//! Verbosity follows the `MADS_LOG` environment variable (default `info`).

use env_logger::{Builder, Env};
use mads::{LogObserver, Mads, Parameters};

const MADS_LOG: &str = "MADS_LOG";

fn rosenbrock(x: &[f64]) -> Vec<f64> {
    vec![(1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2)]
}

fn main() {
    let env = Env::new().filter_or(MADS_LOG, "info");
    let mut builder = Builder::from_env(env);
    builder.target(env_logger::Target::Stdout);
    builder.try_init().ok();

    let params = match Parameters::new(2)
        .lower_bound(&[-1.5, -0.5])
        .upper_bound(&[1.5, 2.5])
        .x0(&[0.1, 0.1])
        .max_bb_eval(200)
        .display_stats("BBE ( SOL ) OBJ")
        .check()
    {
        Ok(params) => params,
        Err(err) => {
            log::error!("{err}");
            std::process::exit(err.exit_code());
        }
    };

    let observer = LogObserver::new(&params);
    let mut mads = Mads::new(params, rosenbrock);
    mads.add_observer(observer);
    let code = match mads.run() {
        Ok(result) => {
            if let Some(failure) = &result.failure {
                log::error!("{failure}");
            }
            result.exit_code()
        }
        Err(err) => {
            log::error!("{err}");
            err.exit_code()
        }
    };
    std::process::exit(code);
}
