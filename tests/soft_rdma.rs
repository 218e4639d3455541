use std::net::Ipv4Addr;
use std::thread;

use perf_rdma::bench::{DriverError, Role, RunConfig, RunController, RunError, RunState};
use perf_rdma::transport::{SoftRdma, SoftRdmaConfig};

fn config(role: Role, port: u16, size: usize, runs: u32, rounds: u32) -> RunConfig {
    RunConfig {
        role,
        server: Some(Ipv4Addr::LOCALHOST),
        port,
        size,
        runs,
        rounds,
        poll_interval_us: 10,
        timeout_secs: 10,
        sq_depth: 8,
        ..Default::default()
    }
}

fn connect(config: &RunConfig) -> Result<SoftRdma, perf_rdma::transport::TransportError> {
    let peer = (config.role == Role::Client).then_some(Ipv4Addr::LOCALHOST);
    SoftRdma::connect(SoftRdmaConfig {
        sq_depth: config.sq_depth,
        ..SoftRdmaConfig::new(peer, config.port, config.size)
    })
}

#[test]
fn test_client_server_over_tcp() -> anyhow::Result<()> {
    const PORT: u16 = 24210;

    let server = thread::spawn(|| {
        let mut ctrl = RunController::new();
        ctrl.configure(config(Role::Server, PORT, 4096, 200, 2))?;
        let summary = ctrl.execute(connect)?;
        assert_eq!(ctrl.state(), RunState::Done);
        Ok::<_, RunError>(summary)
    });

    let mut ctrl = RunController::new();
    ctrl.configure(config(Role::Client, PORT, 4096, 200, 2))?;
    let summary = ctrl.execute(connect)?;
    assert_eq!(ctrl.state(), RunState::Done);

    let server_summary = server.join().unwrap()?;
    for summary in [&summary, &server_summary] {
        assert_eq!(summary.reports.len(), 2);
        for report in &summary.reports {
            assert_eq!(report.observed, 200);
            assert_eq!(report.size, 4096);
        }
    }
    Ok(())
}

#[test]
fn test_oversized_client_rejected() -> anyhow::Result<()> {
    const PORT: u16 = 24220;

    let server = thread::spawn(|| {
        let mut ctrl = RunController::new();
        ctrl.configure(RunConfig {
            timeout_secs: 1,
            ..config(Role::Server, PORT, 64, 1, 1)
        })?;
        ctrl.execute(connect)
    });

    // The client wants to write more than the server registered.
    let mut ctrl = RunController::new();
    ctrl.configure(config(Role::Client, PORT, 128, 1, 1))?;
    let ret = ctrl.execute(connect);
    assert!(matches!(
        ret,
        Err(RunError::Round {
            round: 0,
            source: DriverError::InvalidDescriptor(_)
        })
    ));
    drop(ctrl);

    // The server never gets its barrier partner.
    assert!(server.join().unwrap().is_err());
    Ok(())
}
