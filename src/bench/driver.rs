use std::thread;
use std::time::Duration;

use quanta::Instant;
use thiserror::Error;

use super::config::{Role, RunConfig};
use super::report::RoundReport;
use crate::transport::{OpKind, SgDescriptor, Transport, TransportError};

/// Errors of one round.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("repeat count must be at least 1")]
    InvalidRepeatCount,

    #[error("invalid scatter-gather descriptor")]
    InvalidDescriptor(#[source] TransportError),

    /// The deadline passed before every completion arrived.
    #[error("timed out after {waited:?} with {observed}/{expected} completions")]
    Timeout {
        observed: u64,
        expected: u64,
        waited: Duration,
    },

    /// More completions than operations. The counter was not reset, or the
    /// peer is running a different configuration.
    #[error("observed {observed} completions, expected exactly {expected}")]
    CompletionOverflow { observed: u64, expected: u64 },

    #[error("transport fault")]
    Transport(#[from] TransportError),
}

/// Polling and deadline parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DriverOptions {
    /// Sleep between two observations of the completion counter.
    pub poll_interval: Duration,

    /// Minimum time between two progress observations.
    pub progress_interval: Duration,

    /// `None` waits forever.
    pub deadline: Option<Duration>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_micros(50),
            progress_interval: Duration::from_secs(1),
            deadline: Some(Duration::from_secs(30)),
        }
    }
}

impl From<&RunConfig> for DriverOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            progress_interval: config.progress_interval(),
            deadline: config.timeout(),
        }
    }
}

/// Mutable state of one round. Never outlives it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundState {
    pub role: Role,
    pub expected: u64,
    pub issued: u64,
    pub observed: u64,
}

impl RoundState {
    fn new(role: Role, expected: u64) -> Self {
        Self {
            role,
            expected,
            issued: 0,
            observed: 0,
        }
    }
}

/// Executes measured rounds of one-sided WRITEs.
///
/// A client round arms the buffer, clears completions, passes the barrier as
/// initiator, issues the whole burst back-to-back and then polls until the
/// `LocalWrite` count reaches the burst size. A server round clears, passes
/// the barrier as responder and polls `InboundWrite` the same way.
///
/// Completions are counted, never matched to individual operations.
#[derive(Clone, Copy, Debug)]
pub struct BenchmarkDriver {
    role: Role,
    opts: DriverOptions,
}

impl BenchmarkDriver {
    pub fn new(role: Role, opts: DriverOptions) -> Self {
        Self { role, opts }
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// The completion kind this side waits on.
    #[inline]
    pub fn completion_kind(&self) -> OpKind {
        match self.role {
            Role::Client => OpKind::LocalWrite,
            Role::Server => OpKind::InboundWrite,
        }
    }

    /// Run one round of `repeat_count` WRITEs over `sg`.
    pub fn run_round<T: Transport>(
        &self,
        transport: &mut T,
        sg: &SgDescriptor,
        repeat_count: u32,
    ) -> Result<RoundReport, DriverError> {
        if repeat_count == 0 {
            return Err(DriverError::InvalidRepeatCount);
        }
        sg.validate(transport.region_len(), transport.remote_region_len())
            .map_err(DriverError::InvalidDescriptor)?;

        let mut state = RoundState::new(self.role, repeat_count as u64);
        self.reset(transport, sg)?;
        self.sync(transport)?;

        let start = Instant::now();
        self.issue_burst(transport, sg, &mut state)?;
        let progress_reports = self.await_completion(transport, &mut state)?;
        let elapsed = start.elapsed();

        let report = RoundReport::new(
            self.role,
            sg.len,
            repeat_count,
            elapsed,
            state.observed,
            progress_reports,
        );
        log::info!("perf_rdma: {}", report);
        Ok(report)
    }

    /// Arm the payload (client only) and drop stale completions.
    pub fn reset<T: Transport>(
        &self,
        transport: &mut T,
        sg: &SgDescriptor,
    ) -> Result<(), DriverError> {
        if self.role == Role::Client {
            transport.local_mem().fill_sequential(sg)?;
        }
        transport.clear_completions();
        Ok(())
    }

    /// Rendezvous with the peer.
    pub fn sync<T: Transport>(&self, transport: &mut T) -> Result<(), DriverError> {
        transport.sync(self.role.is_initiator())?;
        Ok(())
    }

    /// Issue the whole burst without waiting on any completion. Servers
    /// issue nothing.
    pub fn issue_burst<T: Transport>(
        &self,
        transport: &mut T,
        sg: &SgDescriptor,
        state: &mut RoundState,
    ) -> Result<(), DriverError> {
        if self.role != Role::Client {
            return Ok(());
        }
        while state.issued < state.expected {
            transport.invoke(OpKind::RemoteWrite, sg)?;
            state.issued += 1;
            log::trace!("perf_rdma: issued WRITE {}/{}", state.issued, state.expected);
        }
        Ok(())
    }

    /// Poll until the completion count reaches `state.expected`. Returns the
    /// number of progress observations emitted.
    pub fn await_completion<T: Transport>(
        &self,
        transport: &T,
        state: &mut RoundState,
    ) -> Result<u32, DriverError> {
        let kind = self.completion_kind();
        let started = Instant::now();
        let mut last_report = started;
        let mut reports = 0;

        loop {
            state.observed = transport.completed_count(kind)?;
            if state.observed == state.expected {
                return Ok(reports);
            }
            if state.observed > state.expected {
                return Err(DriverError::CompletionOverflow {
                    observed: state.observed,
                    expected: state.expected,
                });
            }

            let now = Instant::now();
            let waited = now.duration_since(started);
            if let Some(deadline) = self.opts.deadline {
                if waited >= deadline {
                    log::error!(
                        "perf_rdma: {:?} gave up after {:?} at {}/{} {:?} completions",
                        self.role,
                        waited,
                        state.observed,
                        state.expected,
                        kind
                    );
                    return Err(DriverError::Timeout {
                        observed: state.observed,
                        expected: state.expected,
                        waited,
                    });
                }
            }
            if now.duration_since(last_report) >= self.opts.progress_interval {
                reports += 1;
                last_report = now;
                log::info!(
                    "perf_rdma: {:?} waiting on {}/{} {:?} completions ({:?})",
                    self.role,
                    state.observed,
                    state.expected,
                    kind,
                    waited
                );
            }
            thread::sleep(self.opts.poll_interval);
        }
    }
}
