use std::process::{Command, Output};
use std::time::{Duration, Instant};

fn perf_rdma(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_perf_rdma"))
        .args(args)
        .env("PERF_RDMA_LOG", "info")
        .output()
        .expect("failed to run perf_rdma")
}

#[test]
fn test_client_without_server_fails_fast() {
    let start = Instant::now();
    let out = perf_rdma(&["client", "-r", "10", "-x", "64"]);
    assert!(!out.status.success());

    // Rejected before any connection attempt, which would retry for 30 s.
    assert!(start.elapsed() < Duration::from_secs(10));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("server address must be specified"), "{}", stderr);
    assert!(!stderr.contains("RDMA BENCHMARK"), "{}", stderr);
}

#[test]
fn test_invalid_flags_fail() {
    let out = perf_rdma(&["client", "-i", "127.0.0.1", "-r", "0"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("repeat count"));

    let out = perf_rdma(&["server", "-x", "6"]);
    assert!(!out.status.success());
}

#[test]
fn test_loopback_run_succeeds() -> anyhow::Result<()> {
    let out = perf_rdma(&["--json", "loopback", "-r", "20", "-x", "256", "--rounds", "2"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let summary: serde_json::Value = serde_json::from_slice(&out.stdout)?;
    let reports = summary["reports"].as_array().expect("reports");
    assert_eq!(reports.len(), 2);
    for report in reports {
        assert_eq!(report["observed"], 20);
        assert_eq!(report["size"], 256);
    }
    Ok(())
}
