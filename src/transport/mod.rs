//! The transport capability the benchmark driver runs on.
//!
//! A transport owns the connection to the peer, the registered payload
//! region, and the completion accounting. The driver only ever talks to it
//! through the [`Transport`] trait, so the synchronization logic can be run
//! against the in-process [`LoopbackTransport`] as well as the TCP-emulated
//! [`SoftRdma`].

mod counter;
mod loopback;
mod soft;
mod wc;

use std::io::Error as IoError;
use std::ops::DerefMut;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::counter::CompletionCounters;
pub use self::loopback::LoopbackTransport;
pub use self::soft::{SoftRdma, SoftRdmaConfig, SQ_DEPTH_DEFAULT, SQ_STALL_DEFAULT};
pub use self::wc::WcStatus;
use crate::mem::RegisteredMem;

/// Size in bytes of one payload element.
pub const ELEMENT_SIZE: usize = std::mem::size_of::<u32>();

/// Kind of an operation or of a completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    /// One-sided RDMA WRITE into the peer's registered region.
    RemoteWrite,

    /// Initiator-side completion of a WRITE: the peer acknowledged placement.
    LocalWrite,

    /// A WRITE issued by the peer landed in the local region.
    InboundWrite,
}

impl OpKind {
    /// Number of distinct kinds.
    pub const COUNT: usize = 3;

    /// All kinds, in index order.
    pub const ALL: [OpKind; Self::COUNT] =
        [OpKind::RemoteWrite, OpKind::LocalWrite, OpKind::InboundWrite];

    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Scatter-gather descriptor.
///
/// Describes the span of the registered region an operation acts upon. The
/// base is implicit (the transport's registered region); only offsets and
/// length are carried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SgDescriptor {
    pub local_offset: usize,
    pub remote_offset: usize,
    pub len: usize,
}

impl SgDescriptor {
    /// A descriptor of `len` bytes starting at offset zero on both sides.
    pub fn new(len: usize) -> Self {
        Self {
            local_offset: 0,
            remote_offset: 0,
            len,
        }
    }

    /// Number of payload elements covered.
    #[inline]
    pub fn elements(&self) -> usize {
        self.len / ELEMENT_SIZE
    }

    /// Check the descriptor against the local and remote region sizes.
    pub fn validate(&self, local_len: usize, remote_len: usize) -> Result<(), TransportError> {
        if self.len == 0 || self.len % ELEMENT_SIZE != 0 {
            return Err(TransportError::BadLength(self.len));
        }
        let in_bounds = |offset: usize, region: usize| {
            offset
                .checked_add(self.len)
                .map_or(false, |end| end <= region)
        };
        if !in_bounds(self.local_offset, local_len) {
            return Err(TransportError::OutOfBounds {
                offset: self.local_offset,
                len: self.len,
                region: local_len,
            });
        }
        if !in_bounds(self.remote_offset, remote_len) {
            return Err(TransportError::OutOfBounds {
                offset: self.remote_offset,
                len: self.len,
                region: remote_len,
            });
        }
        Ok(())
    }
}

/// Transport-level faults.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error on the wire.
    #[error("I/O error")]
    Io(#[from] IoError),

    /// Control-plane failure (connection setup, region exchange, barrier).
    #[error(transparent)]
    Control(#[from] anyhow::Error),

    /// The operation kind cannot be invoked, only counted.
    #[error("operation {0:?} cannot be invoked")]
    UnsupportedOp(OpKind),

    /// Descriptor length is zero or not a multiple of the element size.
    #[error("descriptor length {0} is not a positive multiple of {elem}", elem = ELEMENT_SIZE)]
    BadLength(usize),

    /// Descriptor span exceeds a registered region.
    #[error("span [{offset}, {offset}+{len}) exceeds region of {region} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        region: usize,
    },

    /// No send-queue slot freed up in time.
    #[error("send queue of depth {depth} stayed full for {waited:?}")]
    SendQueueFull { depth: usize, waited: Duration },

    /// A work completion reported failure.
    #[error("work completion failed: {0}")]
    Completion(#[from] WcStatus),

    /// The peer went away.
    #[error("peer disconnected")]
    Disconnected,
}

/// The capability the benchmark driver consumes.
///
/// Implementations must count completions monotonically per [`OpKind`] and
/// surface asynchronous faults through [`Transport::completed_count`].
pub trait Transport {
    /// Guard over the local registered region.
    type Mem<'a>: DerefMut<Target = RegisteredMem>
    where
        Self: 'a;

    /// Two-party barrier. Returns only after both peers have arrived.
    fn sync(&mut self, is_initiator: bool) -> Result<(), TransportError>;

    /// Reset every completion counter to zero.
    fn clear_completions(&mut self);

    /// Issue one operation without waiting for its completion.
    fn invoke(&mut self, op: OpKind, sg: &SgDescriptor) -> Result<(), TransportError>;

    /// Completions of the given kind since the last clear, or the fault that
    /// stopped the transport.
    fn completed_count(&self, op: OpKind) -> Result<u64, TransportError>;

    /// The local registered region.
    fn local_mem(&mut self) -> Self::Mem<'_>;

    /// Size of the local registered region.
    fn region_len(&self) -> usize;

    /// Size of the peer's registered region.
    fn remote_region_len(&self) -> usize;
}
