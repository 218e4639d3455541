use std::sync::{Arc, Barrier, Mutex, MutexGuard, PoisonError};

use super::*;

/// One side of an in-process transport pair.
///
/// WRITEs are placed into the peer's region synchronously at issue time and
/// complete immediately. Both endpoints share a two-party [`Barrier`], so a
/// pair must be driven from two threads.
pub struct LoopbackTransport {
    mem: Arc<Mutex<RegisteredMem>>,
    counters: Arc<CompletionCounters>,
    peer_mem: Arc<Mutex<RegisteredMem>>,
    peer_counters: Arc<CompletionCounters>,
    barrier: Arc<Barrier>,
    stall: bool,
}

fn lock(mem: &Mutex<RegisteredMem>) -> MutexGuard<'_, RegisteredMem> {
    mem.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoopbackTransport {
    /// Create two connected endpoints, each with a region of `region_len`
    /// bytes.
    pub fn pair(region_len: usize) -> (Self, Self) {
        let mems = [
            Arc::new(Mutex::new(RegisteredMem::new(region_len))),
            Arc::new(Mutex::new(RegisteredMem::new(region_len))),
        ];
        let counters = [
            Arc::new(CompletionCounters::new()),
            Arc::new(CompletionCounters::new()),
        ];
        let barrier = Arc::new(Barrier::new(2));

        let a = Self {
            mem: mems[0].clone(),
            counters: counters[0].clone(),
            peer_mem: mems[1].clone(),
            peer_counters: counters[1].clone(),
            barrier: barrier.clone(),
            stall: false,
        };
        let b = Self {
            mem: mems[1].clone(),
            counters: counters[1].clone(),
            peer_mem: mems[0].clone(),
            peer_counters: counters[0].clone(),
            barrier,
            stall: false,
        };
        (a, b)
    }

    /// Suppress local WRITE completions. Data still lands at the peer.
    pub fn stall_completions(&mut self, stall: bool) {
        self.stall = stall;
    }
}

impl Transport for LoopbackTransport {
    type Mem<'a> = MutexGuard<'a, RegisteredMem>;

    fn sync(&mut self, _is_initiator: bool) -> Result<(), TransportError> {
        self.barrier.wait();
        Ok(())
    }

    fn clear_completions(&mut self) {
        self.counters.clear();
    }

    fn invoke(&mut self, op: OpKind, sg: &SgDescriptor) -> Result<(), TransportError> {
        if op != OpKind::RemoteWrite {
            return Err(TransportError::UnsupportedOp(op));
        }
        sg.validate(self.region_len(), self.remote_region_len())?;

        // Copy out first; never hold both locks.
        let payload = lock(&self.mem)[sg.local_offset..sg.local_offset + sg.len].to_vec();
        lock(&self.peer_mem).write_at(sg.remote_offset, &payload)?;

        self.peer_counters.bump(OpKind::InboundWrite);
        if !self.stall {
            self.counters.bump(OpKind::LocalWrite);
        }
        Ok(())
    }

    fn completed_count(&self, op: OpKind) -> Result<u64, TransportError> {
        Ok(self.counters.load(op))
    }

    fn local_mem(&mut self) -> Self::Mem<'_> {
        lock(&self.mem)
    }

    fn region_len(&self) -> usize {
        lock(&self.mem).len()
    }

    fn remote_region_len(&self) -> usize {
        lock(&self.peer_mem).len()
    }
}
