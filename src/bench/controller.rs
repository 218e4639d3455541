use thiserror::Error;

use super::config::{ConfigError, RunConfig};
use super::driver::{BenchmarkDriver, DriverError, DriverOptions};
use super::report::RunSummary;
use crate::transport::{SgDescriptor, Transport, TransportError};

/// Lifecycle of a run. Transitions are linear and never retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    Unconfigured,
    Connected,
    Running,
    Synced,
    Done,
}

/// Errors of a run. All of them are terminal.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("run is not configured")]
    NotConfigured,

    #[error("invalid configuration")]
    Config(#[from] ConfigError),

    #[error("run already executed (state: {0:?})")]
    AlreadyExecuted(RunState),

    #[error("failed to establish transport")]
    Connect(#[source] TransportError),

    #[error("round {round} failed")]
    Round {
        round: u32,
        #[source]
        source: DriverError,
    },

    #[error("closing barrier failed")]
    FinalSync(#[source] TransportError),
}

/// Owns the configuration and drives the rounds of one run.
///
/// ```text
/// Unconfigured -> Connected -> Running -> Synced -> Done
/// ```
#[derive(Debug)]
pub struct RunController {
    config: Option<RunConfig>,
    state: RunState,
    executed: bool,
}

impl Default for RunController {
    fn default() -> Self {
        Self::new()
    }
}

impl RunController {
    pub fn new() -> Self {
        Self {
            config: None,
            state: RunState::Unconfigured,
            executed: false,
        }
    }

    /// Validate and store the configuration. Nothing touches the network.
    pub fn configure(&mut self, config: RunConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = Some(config);
        Ok(())
    }

    #[inline]
    pub fn state(&self) -> RunState {
        self.state
    }

    #[inline]
    pub fn config(&self) -> Option<&RunConfig> {
        self.config.as_ref()
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(next > self.state);
        log::debug!("perf_rdma: run state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Establish the transport with `connect`, run every round, and pass the
    /// closing barrier so neither peer tears down while the other is still
    /// completing.
    pub fn execute<T, F>(&mut self, connect: F) -> Result<RunSummary, RunError>
    where
        T: Transport,
        F: FnOnce(&RunConfig) -> Result<T, TransportError>,
    {
        if self.executed {
            return Err(RunError::AlreadyExecuted(self.state));
        }
        let config = self.config.clone().ok_or(RunError::NotConfigured)?;
        self.executed = true;

        let mut transport = connect(&config).map_err(RunError::Connect)?;
        self.advance(RunState::Connected);

        let driver = BenchmarkDriver::new(config.role, DriverOptions::from(&config));
        let sg = SgDescriptor::new(config.size);
        let mut summary = RunSummary::default();

        self.advance(RunState::Running);
        for round in 0..config.rounds {
            let report = driver
                .run_round(&mut transport, &sg, config.runs)
                .map_err(|source| RunError::Round { round, source })?;
            summary.push(report);
        }

        transport
            .sync(config.role.is_initiator())
            .map_err(RunError::FinalSync)?;
        self.advance(RunState::Synced);

        log::info!(
            "perf_rdma: {:?} done, {} round(s), mean {:.3} Gbit/s",
            config.role,
            summary.reports.len(),
            summary.mean_throughput_gbps()
        );
        self.advance(RunState::Done);
        Ok(summary)
    }
}
