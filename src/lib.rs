//! A two-party benchmark of one-sided RDMA WRITEs.
//!
//! One peer (the client) issues bursts of WRITEs into the registered region
//! of the other (the server). Both sides meet at a barrier before every
//! round and once more at the end, and each side learns that a round is over
//! only by counting completions: one-sided WRITEs give the application no
//! other signal.
//!
//! The driver logic in [`bench`] is written against the [`Transport`]
//! capability. Two transports are provided:
//!
//! - [`SoftRdma`] emulates one-sided WRITEs over TCP, with a
//!   [`ctrl::Connecter`] for the control plane;
//! - [`LoopbackTransport`] pairs two endpoints inside one process.
//!
//! # Example
//!
//! ```rust
//! use perf_rdma::prelude::*;
//! use std::net::Ipv4Addr;
//!
//! fn main() -> anyhow::Result<()> {
//!     let (client_side, server_side) = LoopbackTransport::pair(64);
//!
//!     let server = std::thread::spawn(move || {
//!         let mut ctrl = RunController::new();
//!         ctrl.configure(RunConfig { role: Role::Server, ..Default::default() })?;
//!         ctrl.execute(|_| Ok(server_side))
//!     });
//!
//!     let mut ctrl = RunController::new();
//!     ctrl.configure(RunConfig {
//!         server: Some(Ipv4Addr::LOCALHOST),
//!         ..Default::default()
//!     })?;
//!     let summary = ctrl.execute(|_| Ok(client_side))?;
//!     assert_eq!(summary.reports[0].observed, 50);
//!
//!     server.join().unwrap()?;
//!     Ok(())
//! }
//! ```
//!
//! [`Transport`]: transport::Transport
//! [`SoftRdma`]: transport::SoftRdma
//! [`LoopbackTransport`]: transport::LoopbackTransport

pub mod bench;
/// Connection management utilities.
pub mod ctrl;
pub mod mem;
pub mod prelude;
pub mod transport;
