//! The benchmark prelude.
//!
//! The purpose of this module is to alleviate imports of common benchmark
//! functionalities.

pub use crate::bench::{BenchmarkDriver, DriverOptions, Role, RunConfig, RunController};
pub use crate::mem::RegisteredMem;
pub use crate::transport::{
    LoopbackTransport, OpKind, SgDescriptor, SoftRdma, SoftRdmaConfig, Transport, TransportError,
};
