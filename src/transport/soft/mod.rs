//! One-sided WRITEs emulated over TCP.
//!
//! Two connections link the peers. The control connection (a
//! [`Connecter`]) carries the region exchange and the barriers. The data
//! connection on `port + 1` carries WRITE and ACK frames and is serviced by
//! two threads per side:
//!
//! - the sender drains a queue of outgoing frames, so `invoke` returns as
//!   soon as the payload is copied;
//! - the receiver places inbound WRITEs into the local region, answers each
//!   with an ACK, and turns inbound ACKs into `LocalWrite` completions.
//!
//! At most `sq_depth` WRITEs are outstanding (issued but not yet ACKed) at
//! any time; `invoke` blocks for a free slot. ACKs never take a slot.
//!
//! Either thread records a fault when the wire fails; the fault is reported
//! by every later [`Transport::completed_count`] call. WRITEs still
//! outstanding when the data connection drops fail with
//! [`WcStatus::WrFlushErr`].

mod wire;

use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddrV4, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context as _;
use quanta::Instant;

use self::wire::{Frame, MAX_WRITE_LEN};
use super::*;
use crate::ctrl::{connect_until_success, listen_on, Barrier, Connecter, RemoteRegion};

/// Default number of WRITEs that may be outstanding at once.
pub const SQ_DEPTH_DEFAULT: usize = 128;

/// Default time `invoke` waits for a send-queue slot.
pub const SQ_STALL_DEFAULT: Duration = Duration::from_secs(30);

/// Connection parameters of a [`SoftRdma`] endpoint.
#[derive(Clone, Copy, Debug)]
pub struct SoftRdmaConfig {
    /// The server to connect to. `None` makes this endpoint the server.
    pub peer: Option<Ipv4Addr>,

    /// Control port; the data connection uses `port + 1`.
    pub port: u16,

    /// Size of the local registered region.
    pub region_len: usize,

    /// Send-queue depth. Must be at least 1.
    pub sq_depth: usize,

    /// How long a full send queue may block `invoke`.
    pub sq_stall: Duration,
}

impl SoftRdmaConfig {
    pub fn new(peer: Option<Ipv4Addr>, port: u16, region_len: usize) -> Self {
        Self {
            peer,
            port,
            region_len,
            sq_depth: SQ_DEPTH_DEFAULT,
            sq_stall: SQ_STALL_DEFAULT,
        }
    }
}

/// A fault observed by one of the data-plane threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fault {
    Wc(WcStatus),
    Io(ErrorKind),
    Disconnected,
}

impl Fault {
    /// A peer closing with nothing in flight is how every run ends.
    fn level(self) -> log::Level {
        match self {
            Fault::Disconnected => log::Level::Debug,
            _ => log::Level::Error,
        }
    }
}

impl From<Fault> for TransportError {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::Wc(status) => TransportError::Completion(status),
            Fault::Io(kind) => TransportError::Io(kind.into()),
            Fault::Disconnected => TransportError::Disconnected,
        }
    }
}

/// State shared between the endpoint and its threads.
struct Shared {
    mem: Mutex<RegisteredMem>,
    counters: CompletionCounters,
    fault: Mutex<Option<Fault>>,
    closing: AtomicBool,

    /// WRITEs issued and not yet ACKed.
    outstanding: Mutex<usize>,
    sq_free: Condvar,
}

impl Shared {
    fn new(mem: RegisteredMem) -> Self {
        Self {
            mem: Mutex::new(mem),
            counters: CompletionCounters::new(),
            fault: Mutex::new(None),
            closing: AtomicBool::new(false),
            outstanding: Mutex::new(0),
            sq_free: Condvar::new(),
        }
    }

    fn mem(&self) -> MutexGuard<'_, RegisteredMem> {
        self.mem.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn outstanding(&self) -> MutexGuard<'_, usize> {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn fault(&self) -> Option<Fault> {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the first fault; later ones are consequences of it.
    fn set_fault(&self, fault: Fault) {
        if !self.closing.load(Ordering::Acquire) {
            let mut slot = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                log::log!(fault.level(), "perf_rdma: data plane fault: {:?}", fault);
                *slot = Some(fault);
            }
        }
        self.wake_issuers();
    }

    /// The fault a lost data connection leaves behind.
    fn connection_lost(&self, cause: Fault) -> Fault {
        match *self.outstanding() {
            0 => cause,
            n => {
                log::error!("perf_rdma: {} outstanding WRITE(s) flushed", n);
                Fault::Wc(WcStatus::WrFlushErr)
            }
        }
    }

    /// Retire one outstanding WRITE.
    fn retire(&self) {
        let mut outstanding = self.outstanding();
        *outstanding = outstanding.saturating_sub(1);
        self.sq_free.notify_one();
    }

    fn wake_issuers(&self) {
        let _outstanding = self.outstanding();
        self.sq_free.notify_all();
    }
}

/// TCP-emulated one-sided RDMA endpoint.
pub struct SoftRdma {
    conn: Connecter,
    barrier: Barrier,
    remote: RemoteRegion,
    sq_depth: usize,
    sq_stall: Duration,
    shared: Arc<Shared>,
    data: TcpStream,
    tx: Option<Sender<Frame>>,
    sender: Option<JoinHandle<()>>,
    receiver: Option<JoinHandle<()>>,
}

impl SoftRdma {
    /// Establish both connections with the peer and exchange regions.
    ///
    /// The server binds both ports before accepting, so a client may start
    /// first and keep retrying.
    pub fn connect(config: SoftRdmaConfig) -> Result<Self, TransportError> {
        if config.sq_depth == 0 {
            return Err(anyhow::anyhow!("send queue depth must be at least 1").into());
        }
        let data_port = config
            .port
            .checked_add(1)
            .ok_or_else(|| anyhow::anyhow!("no data port above control port {}", config.port))?;
        let mem = RegisteredMem::new(config.region_len);
        let local = RemoteRegion {
            len: mem.len(),
            rkey: mem.rkey(),
        };

        let (conn, remote, data) = match config.peer {
            Some(addr) => {
                let conn = Connecter::new_on_port(Some(addr), config.port)?;
                let remote = conn.exchange_region(local)?;
                let data = connect_until_success(
                    SocketAddrV4::new(addr, data_port),
                    Duration::from_millis(200),
                    Connecter::CONNECT_DEADLINE,
                )?;
                (conn, remote, data)
            }
            None => {
                let ctrl_listener = listen_on(config.port)?;
                let data_listener = listen_on(data_port)?;
                let conn = Connecter::accept(&ctrl_listener)?;
                let remote = conn.exchange_region(local)?;
                let (data, _) = data_listener
                    .accept()
                    .with_context(|| "failed to accept data connection")?;
                (conn, remote, data)
            }
        };
        data.set_nodelay(true)?;
        log::info!(
            "perf_rdma: connected ({}), local region {} B, remote region {} B",
            if config.peer.is_some() { "client" } else { "server" },
            local.len,
            remote.len
        );

        let shared = Arc::new(Shared::new(mem));
        let (tx, rx) = mpsc::channel();

        let sender = {
            let stream = data.try_clone()?;
            let shared = shared.clone();
            thread::Builder::new()
                .name("perf-rdma-tx".into())
                .spawn(move || run_sender(stream, rx, &shared))?
        };
        let receiver = {
            let stream = data.try_clone()?;
            let shared = shared.clone();
            let tx = tx.clone();
            thread::Builder::new()
                .name("perf-rdma-rx".into())
                .spawn(move || run_receiver(stream, tx, &shared))?
        };

        Ok(Self {
            conn,
            barrier: Barrier::new(),
            remote,
            sq_depth: config.sq_depth,
            sq_stall: config.sq_stall,
            shared,
            data,
            tx: Some(tx),
            sender: Some(sender),
            receiver: Some(receiver),
        })
    }

    /// The peer's region as announced during the exchange.
    #[inline]
    pub fn remote_region(&self) -> RemoteRegion {
        self.remote
    }

    fn check_fault(&self) -> Result<(), TransportError> {
        match self.shared.fault() {
            Some(fault) => Err(fault.into()),
            None => Ok(()),
        }
    }

    /// Take a send-queue slot, waiting up to `sq_stall` for one to free up.
    fn acquire_slot(&self) -> Result<(), TransportError> {
        let started = Instant::now();
        let mut outstanding = self.shared.outstanding();
        while *outstanding >= self.sq_depth {
            if let Some(fault) = self.shared.fault() {
                return Err(fault.into());
            }
            let waited = started.elapsed();
            if waited >= self.sq_stall {
                return Err(TransportError::SendQueueFull {
                    depth: self.sq_depth,
                    waited,
                });
            }
            outstanding = self
                .shared
                .sq_free
                .wait_timeout(outstanding, self.sq_stall - waited)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *outstanding += 1;
        Ok(())
    }
}

impl Transport for SoftRdma {
    type Mem<'a> = MutexGuard<'a, RegisteredMem>;

    fn sync(&mut self, is_initiator: bool) -> Result<(), TransportError> {
        self.check_fault()?;
        self.barrier.wait(&self.conn, is_initiator)?;
        Ok(())
    }

    fn clear_completions(&mut self) {
        self.shared.counters.clear();
    }

    fn invoke(&mut self, op: OpKind, sg: &SgDescriptor) -> Result<(), TransportError> {
        if op != OpKind::RemoteWrite {
            return Err(TransportError::UnsupportedOp(op));
        }
        self.check_fault()?;
        sg.validate(self.region_len(), self.remote.len)?;
        if sg.len > MAX_WRITE_LEN {
            return Err(WcStatus::LocLenErr.into());
        }

        self.acquire_slot()?;
        let payload = self.shared.mem()[sg.local_offset..sg.local_offset + sg.len].to_vec();
        let frame = Frame::Write {
            rkey: self.remote.rkey,
            remote_offset: sg.remote_offset as u64,
            payload,
        };
        let sent = self
            .tx
            .as_ref()
            .ok_or(TransportError::Disconnected)
            .and_then(|tx| tx.send(frame).map_err(|_| TransportError::Disconnected));
        if sent.is_err() {
            self.shared.retire();
        }
        sent
    }

    fn completed_count(&self, op: OpKind) -> Result<u64, TransportError> {
        self.check_fault()?;
        Ok(self.shared.counters.load(op))
    }

    fn local_mem(&mut self) -> Self::Mem<'_> {
        self.shared.mem()
    }

    fn region_len(&self) -> usize {
        self.shared.mem().len()
    }

    fn remote_region_len(&self) -> usize {
        self.remote.len
    }
}

impl Drop for SoftRdma {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::Release);
        self.tx.take();
        let _ = self.data.shutdown(Shutdown::Both);

        // The receiver holds a queue handle, so it must exit before the
        // sender can observe the queue closing.
        if let Some(h) = self.receiver.take() {
            let _ = h.join();
        }
        if let Some(h) = self.sender.take() {
            let _ = h.join();
        }
    }
}

fn run_sender(stream: TcpStream, rx: Receiver<Frame>, shared: &Shared) {
    let mut w = BufWriter::new(stream);
    while let Ok(frame) = rx.recv() {
        let mut ret = frame.write_to(&mut w);

        // Coalesce whatever is already queued into one flush.
        while ret.is_ok() {
            match rx.try_recv() {
                Ok(frame) => ret = frame.write_to(&mut w),
                Err(_) => break,
            }
        }
        if let Err(e) = ret.and_then(|_| w.flush()) {
            shared.set_fault(Fault::Io(e.kind()));
            return;
        }
    }
}

fn run_receiver(stream: TcpStream, tx: Sender<Frame>, shared: &Shared) {
    let max_len = shared.mem().len();
    let mut r = BufReader::new(stream);
    loop {
        let frame = match Frame::read_from(&mut r, max_len) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                shared.set_fault(shared.connection_lost(Fault::Disconnected));
                return;
            }
            Err(e) => {
                shared.set_fault(shared.connection_lost(Fault::Io(e.kind())));
                return;
            }
        };

        match frame {
            Frame::Write {
                rkey,
                remote_offset,
                payload,
            } => {
                let status = place(shared, rkey, remote_offset, &payload);
                if status == WcStatus::Success {
                    shared.counters.bump(OpKind::InboundWrite);
                } else {
                    log::warn!(
                        "perf_rdma: rejected inbound WRITE of {} B at {}: {}",
                        payload.len(),
                        remote_offset,
                        status
                    );
                }
                if tx.send(Frame::Ack { status }).is_err() {
                    return;
                }
            }
            Frame::Ack { status } => {
                shared.retire();
                match status.ok() {
                    Ok(()) => shared.counters.bump(OpKind::LocalWrite),
                    Err(status) => shared.set_fault(Fault::Wc(status)),
                }
            }
        }
    }
}

/// Apply an inbound WRITE to the local region.
fn place(shared: &Shared, rkey: u32, remote_offset: u64, payload: &[u8]) -> WcStatus {
    let mut mem = shared.mem();
    if rkey != mem.rkey() {
        return WcStatus::RemAccessErr;
    }
    let Ok(offset) = usize::try_from(remote_offset) else {
        return WcStatus::RemAccessErr;
    };
    match mem.write_at(offset, payload) {
        Ok(()) => WcStatus::Success,
        Err(_) => WcStatus::RemAccessErr,
    }
}
