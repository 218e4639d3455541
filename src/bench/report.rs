use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::config::Role;

/// Outcome of one measured round.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoundReport {
    pub role: Role,
    /// Transfer size in bytes.
    pub size: usize,
    /// WRITEs issued (client) or expected (server).
    pub runs: u32,
    /// From barrier exit to the last completion.
    pub elapsed_ns: u64,
    /// Completions observed when the wait ended.
    pub observed: u64,
    /// Progress observations emitted while waiting.
    pub progress_reports: u32,
    pub throughput_gbps: f64,
    pub avg_latency_us: f64,
}

impl RoundReport {
    pub fn new(
        role: Role,
        size: usize,
        runs: u32,
        elapsed: Duration,
        observed: u64,
        progress_reports: u32,
    ) -> Self {
        let elapsed_ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        let bits = (size as f64) * (runs as f64) * 8.0;
        let (throughput_gbps, avg_latency_us) = if elapsed_ns == 0 {
            (0.0, 0.0)
        } else {
            (
                bits / elapsed_ns as f64,
                elapsed_ns as f64 / runs as f64 / 1000.0,
            )
        };
        Self {
            role,
            size,
            runs,
            elapsed_ns,
            observed,
            progress_reports,
            throughput_gbps,
            avg_latency_us,
        }
    }
}

impl fmt::Display for RoundReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: {} x {} B in {:?} ({:.3} Gbit/s, {:.3} us/op)",
            self.role,
            self.runs,
            self.size,
            Duration::from_nanos(self.elapsed_ns),
            self.throughput_gbps,
            self.avg_latency_us
        )
    }
}

/// All rounds of one run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub reports: Vec<RoundReport>,
}

impl RunSummary {
    pub fn push(&mut self, report: RoundReport) {
        self.reports.push(report);
    }

    /// Mean throughput over all rounds, or zero if there were none.
    pub fn mean_throughput_gbps(&self) -> f64 {
        if self.reports.is_empty() {
            return 0.0;
        }
        self.reports.iter().map(|r| r.throughput_gbps).sum::<f64>() / self.reports.len() as f64
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Json<'a> {
            reports: &'a [RoundReport],
            mean_throughput_gbps: f64,
        }
        serde_json::to_string_pretty(&Json {
            reports: &self.reports,
            mean_throughput_gbps: self.mean_throughput_gbps(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates() {
        // 1000 x 125 B = 1 Mbit in 1 ms.
        let r = RoundReport::new(
            Role::Client,
            125,
            1000,
            Duration::from_millis(1),
            1000,
            0,
        );
        assert!((r.throughput_gbps - 1.0).abs() < 1e-9);
        assert!((r.avg_latency_us - 1.0).abs() < 1e-9);

        let zero = RoundReport::new(Role::Server, 64, 1, Duration::ZERO, 1, 0);
        assert_eq!(zero.throughput_gbps, 0.0);
    }

    #[test]
    fn test_summary() {
        let mut summary = RunSummary::default();
        assert_eq!(summary.mean_throughput_gbps(), 0.0);
        summary.push(RoundReport::new(Role::Client, 125, 1000, Duration::from_millis(1), 1000, 0));
        summary.push(RoundReport::new(Role::Client, 125, 1000, Duration::from_micros(500), 1000, 0));
        assert!((summary.mean_throughput_gbps() - 1.5).abs() < 1e-9);

        let json: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
        assert_eq!(json["reports"].as_array().unwrap().len(), 2);
        assert_eq!(json["reports"][0]["role"], "client");
    }
}
