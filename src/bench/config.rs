use std::io::Error as IoError;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ctrl::Connecter;
use crate::transport::{ELEMENT_SIZE, SQ_DEPTH_DEFAULT};

/// Default number of WRITEs per round.
pub const N_RUNS_DEFAULT: u32 = 50;

/// Default transfer size in bytes.
pub const SIZE_DEFAULT: usize = 64;

/// Which side of the benchmark this process is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Issues the WRITEs; initiator of every barrier.
    Client,

    /// Exposes the target region and counts what lands in it.
    Server,
}

impl Role {
    #[inline]
    pub fn is_initiator(self) -> bool {
        self == Role::Client
    }
}

/// Configuration of one benchmark run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub role: Role,

    /// Server to connect to. Required for the client.
    pub server: Option<Ipv4Addr>,

    /// Control port; the data connection uses the next one.
    pub port: u16,

    /// Transfer size in bytes.
    pub size: usize,

    /// WRITEs per round.
    pub runs: u32,

    /// Measured rounds.
    pub rounds: u32,

    pub progress_interval_ms: u64,
    pub poll_interval_us: u64,

    /// Completion deadline per round. `0` waits forever.
    pub timeout_secs: u64,

    /// WRITEs that may be outstanding at once.
    pub sq_depth: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            role: Role::Client,
            server: None,
            port: Connecter::DEFAULT_PORT,
            size: SIZE_DEFAULT,
            runs: N_RUNS_DEFAULT,
            rounds: 1,
            progress_interval_ms: 1000,
            poll_interval_us: 50,
            timeout_secs: 30,
            sq_depth: SQ_DEPTH_DEFAULT,
        }
    }
}

/// Configuration errors. All of them are detected before any network
/// activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("server address must be specified with -i")]
    MissingServer,

    #[error("repeat count must be at least 1")]
    ZeroRuns,

    #[error("round count must be at least 1")]
    ZeroRounds,

    #[error("transfer size {0} is not a positive multiple of {elem}", elem = ELEMENT_SIZE)]
    BadSize(usize),

    #[error("port {0} leaves no room for the data port")]
    BadPort(u16),

    #[error("send queue depth must be at least 1")]
    ZeroSqDepth,

    #[error("cannot read {path}")]
    Io {
        path: String,
        #[source]
        source: IoError,
    },

    #[error("cannot parse {path}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("perf_rdma configuration not found in {0}")]
    MissingTable(String),
}

#[derive(Deserialize)]
struct ConfigFile {
    perf_rdma: Option<RunConfig>,
}

impl RunConfig {
    /// Load the `[perf_rdma]` table of a TOML file. Absent keys take their
    /// default values.
    pub fn load_toml(config_file: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = config_file.as_ref().display().to_string();
        let toml_str = std::fs::read_to_string(config_file.as_ref()).map_err(|source| {
            ConfigError::Io {
                path: path.clone(),
                source,
            }
        })?;
        Self::from_toml_str(&toml_str, &path)
    }

    fn from_toml_str(toml_str: &str, path: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(toml_str).map_err(|source| ConfigError::Toml {
            path: path.to_owned(),
            source,
        })?;
        file.perf_rdma
            .ok_or_else(|| ConfigError::MissingTable(path.to_owned()))
    }

    /// Check everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.role == Role::Client && self.server.is_none() {
            return Err(ConfigError::MissingServer);
        }
        if self.runs == 0 {
            return Err(ConfigError::ZeroRuns);
        }
        if self.rounds == 0 {
            return Err(ConfigError::ZeroRounds);
        }
        if self.size == 0 || self.size % ELEMENT_SIZE != 0 {
            return Err(ConfigError::BadSize(self.size));
        }
        if self.port == u16::MAX {
            return Err(ConfigError::BadPort(self.port));
        }
        if self.sq_depth == 0 {
            return Err(ConfigError::ZeroSqDepth);
        }
        Ok(())
    }

    #[inline]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs != 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}
