//! The benchmark protocol: per-round driver and whole-run controller.

mod config;
mod controller;
mod driver;
mod report;

pub use self::config::{ConfigError, Role, RunConfig, N_RUNS_DEFAULT, SIZE_DEFAULT};
pub use self::controller::{RunController, RunError, RunState};
pub use self::driver::{BenchmarkDriver, DriverError, DriverOptions, RoundState};
pub use self::report::{RoundReport, RunSummary};
