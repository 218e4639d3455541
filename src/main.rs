use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use perf_rdma::bench::{Role, RunConfig, RunController, RunSummary};
use perf_rdma::transport::{LoopbackTransport, SoftRdma, SoftRdmaConfig};

#[derive(Parser, Debug)]
#[command(name = "perf_rdma")]
#[command(about = "One-sided RDMA WRITE benchmark")]
struct Cli {
    /// Print the run summary as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    role: RoleCmd,
}

#[derive(Subcommand, Debug)]
enum RoleCmd {
    /// Issue WRITEs against a server
    Client {
        /// Server's IP address
        #[arg(short = 'i', long = "ip_address")]
        ip_address: Option<Ipv4Addr>,

        #[command(flatten)]
        opts: CommonOpts,
    },
    /// Expose a region and count the WRITEs that land in it
    Server {
        #[command(flatten)]
        opts: CommonOpts,
    },
    /// Run client and server in this process, without any network
    Loopback {
        #[command(flatten)]
        opts: CommonOpts,
    },
}

#[derive(Args, Debug)]
struct CommonOpts {
    /// Number of times to repeat the test
    #[arg(short = 'r', long)]
    runs: Option<u32>,

    /// Transfer size in bytes
    #[arg(short = 'x', long)]
    size: Option<usize>,

    /// Number of measured rounds
    #[arg(long)]
    rounds: Option<u32>,

    /// Control port (the data connection uses the next port)
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Completion deadline per round in seconds; 0 waits forever
    #[arg(short = 't', long)]
    timeout: Option<u64>,

    /// Interval between progress reports while waiting, in milliseconds
    #[arg(long)]
    progress_ms: Option<u64>,

    /// Maximum number of outstanding WRITEs
    #[arg(long)]
    sq_depth: Option<usize>,

    /// TOML file with a [perf_rdma] table; flags override it
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

impl CommonOpts {
    fn into_config(self, role: Role, server: Option<Ipv4Addr>) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load_toml(path)?,
            None => RunConfig::default(),
        };
        config.role = role;
        if server.is_some() {
            config.server = server;
        }
        if let Some(runs) = self.runs {
            config.runs = runs;
        }
        if let Some(size) = self.size {
            config.size = size;
        }
        if let Some(rounds) = self.rounds {
            config.rounds = rounds;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(ms) = self.progress_ms {
            config.progress_interval_ms = ms;
        }
        if let Some(depth) = self.sq_depth {
            config.sq_depth = depth;
        }
        Ok(config)
    }
}

fn init_env_log(filter_env: &str, default_level: &str) {
    use chrono::Utc;
    use std::io::Write;

    let env = env_logger::Env::new().filter_or(filter_env, default_level);
    env_logger::Builder::from_env(env)
        .format(|buf, record| {
            let level_style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S%.6f"),
                level_style.value(record.level()),
                record.file().unwrap_or("<unnamed>"),
                record.line().unwrap_or(0),
                &record.args()
            )
        })
        .init();
}

fn soft_rdma(config: &RunConfig) -> SoftRdmaConfig {
    let peer = match config.role {
        Role::Client => config.server,
        Role::Server => None,
    };
    SoftRdmaConfig {
        sq_depth: config.sq_depth,
        ..SoftRdmaConfig::new(peer, config.port, config.size)
    }
}

fn run_networked(config: RunConfig) -> Result<RunSummary> {
    let mut ctrl = RunController::new();
    ctrl.configure(config)?;
    log::info!(
        "RDMA BENCHMARK: {}",
        match ctrl.config().map(|c| c.role) {
            Some(Role::Server) => "SERVER",
            _ => "CLIENT",
        }
    );
    let summary = ctrl.execute(|config| SoftRdma::connect(soft_rdma(config)))?;
    Ok(summary)
}

fn run_loopback(config: RunConfig) -> Result<RunSummary> {
    let client_config = RunConfig {
        role: Role::Client,
        server: Some(Ipv4Addr::LOCALHOST),
        ..config.clone()
    };
    let server_config = RunConfig {
        role: Role::Server,
        ..config
    };

    // Validate both sides before building anything.
    let mut client = RunController::new();
    client.configure(client_config)?;
    let mut server = RunController::new();
    server.configure(server_config)?;

    log::info!("RDMA BENCHMARK: LOOPBACK");
    let size = client.config().map_or(0, |c| c.size);
    let (client_side, server_side) = LoopbackTransport::pair(size);

    let server = thread::Builder::new()
        .name("perf-rdma-server".into())
        .spawn(move || server.execute(|_| Ok(server_side)))
        .with_context(|| "failed to spawn loopback server")?;
    // A failed client leaves the server parked at a barrier, so only join on
    // success.
    let summary = client.execute(|_| Ok(client_side))?;
    server
        .join()
        .map_err(|_| anyhow::anyhow!("loopback server panicked"))?
        .with_context(|| "loopback server failed")?;
    Ok(summary)
}

fn run(cli: Cli) -> Result<()> {
    let json = cli.json;
    let summary = match cli.role {
        RoleCmd::Client { ip_address, opts } => {
            run_networked(opts.into_config(Role::Client, ip_address)?)?
        }
        RoleCmd::Server { opts } => run_networked(opts.into_config(Role::Server, None)?)?,
        RoleCmd::Loopback { opts } => run_loopback(opts.into_config(Role::Client, None)?)?,
    };

    if json {
        println!("{}", summary.to_json()?);
    }
    Ok(())
}

fn main() -> ExitCode {
    init_env_log("PERF_RDMA_LOG", "info");

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("perf_rdma: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
