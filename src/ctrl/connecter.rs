use std::io::prelude::*;
use std::net::*;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

/// Registered-region information sent to the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRegion {
    pub len: usize,
    pub rkey: u32,
}

pub(crate) fn stream_write(stream: &mut &TcpStream, buf: &[u8]) -> Result<()> {
    stream
        .write_all(&(buf.len() as u64).to_le_bytes())
        .with_context(|| "failed to write message length")?;
    stream
        .write_all(buf)
        .with_context(|| format!("failed when writing {} bytes", buf.len()))?;
    Ok(())
}

pub(crate) fn stream_read(stream: &mut &TcpStream) -> Result<Vec<u8>> {
    let mut buf = [0; std::mem::size_of::<u64>()];
    stream
        .read_exact(&mut buf)
        .with_context(|| "failed to read message length")?;
    let len = u64::from_le_bytes(buf) as usize;

    let mut buf = vec![0; len];
    stream
        .read_exact(&mut buf)
        .with_context(|| "failed when reading bytes")?;
    Ok(buf)
}

/// Keep connecting until the peer accepts or `give_up_after` has passed.
pub(crate) fn connect_until_success(
    server_addr: SocketAddrV4,
    wait_on_failure: Duration,
    give_up_after: Duration,
) -> Result<TcpStream> {
    let start = Instant::now();
    loop {
        match TcpStream::connect(server_addr) {
            Ok(stream) => break Ok(stream),
            Err(e) if start.elapsed() >= give_up_after => {
                break Err(e).with_context(|| {
                    format!("gave up connecting to {} after {:?}", server_addr, give_up_after)
                })
            }
            Err(_) => std::thread::sleep(wait_on_failure),
        }
    }
}

/// Listen on every interface at the given port.
pub(crate) fn listen_on(port: u16) -> Result<TcpListener> {
    let inaddr_any = SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), port);
    TcpListener::bind(inaddr_any).with_context(|| format!("failed to listen on {}", inaddr_any))
}

/// Out-of-band connection with the benchmark peer.
pub struct Connecter {
    /// Remote peer information. If `Some`, this is the client side; otherwise,
    /// this is the server side.
    with: Option<Ipv4Addr>,

    /// The established TCP connection.
    stream: TcpStream,
}

impl Connecter {
    /// The default TCP port to use.
    pub const DEFAULT_PORT: u16 = 18488;

    /// How long a client keeps retrying before reporting the peer unreachable.
    pub const CONNECT_DEADLINE: Duration = Duration::from_secs(30);

    /// Create a new `Connecter` that connects with the specified remote peer
    /// on the given TCP port.
    ///
    /// If the specified remote peer is `None`, this will be the server side.
    /// Otherwise, this will be the client side and will connect to the remote.
    pub fn new_on_port(with: Option<Ipv4Addr>, port: u16) -> Result<Self> {
        let stream = match with {
            Some(addr) => {
                let server_addr = SocketAddrV4::new(addr, port);
                connect_until_success(
                    server_addr,
                    Duration::from_millis(200),
                    Self::CONNECT_DEADLINE,
                )?
            }
            None => Self::accept_one(&listen_on(port)?)?,
        };
        Self::from_stream(with, stream)
    }

    /// Accept exactly one connection on an already-bound listener. This is
    /// the server side.
    pub fn accept(listener: &TcpListener) -> Result<Self> {
        let stream = Self::accept_one(listener)?;
        Self::from_stream(None, stream)
    }

    fn accept_one(listener: &TcpListener) -> Result<TcpStream> {
        let (stream, from) = listener.accept().with_context(|| "failed to accept")?;
        log::debug!("perf_rdma: accepted control connection from {}", from);
        Ok(stream)
    }

    fn from_stream(with: Option<Ipv4Addr>, stream: TcpStream) -> Result<Self> {
        stream
            .set_nodelay(true)
            .with_context(|| "failed to set TCP_NODELAY")?;
        Ok(Self { with, stream })
    }

    /// Whether this is the connecting (client) side.
    #[inline]
    pub fn is_client(&self) -> bool {
        self.with.is_some()
    }

    #[inline]
    pub fn peer(&self) -> Option<Ipv4Addr> {
        self.with
    }

    #[inline]
    pub(crate) fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Exchange registered-region information with the peer.
    ///
    /// The client receives first and then sends; the server does the
    /// opposite, so both sides may call this simultaneously.
    pub fn exchange_region(&self, local: RemoteRegion) -> Result<RemoteRegion> {
        if self.is_client() {
            let peer = self.recv_region()?;
            self.send_region(local)?;
            Ok(peer)
        } else {
            self.send_region(local)?;
            self.recv_region()
        }
    }

    /// Send a local region's information to the remote side.
    pub fn send_region(&self, region: RemoteRegion) -> Result<()> {
        let region =
            serde_json::to_string(&region).with_context(|| "failed to serialize region info")?;
        let mut stream = &self.stream;
        stream_write(&mut stream, region.as_bytes())
            .with_context(|| "failed to send local region info to remote")
    }

    /// Receive sent region information from the opponent's side.
    pub fn recv_region(&self) -> Result<RemoteRegion> {
        let mut stream = &self.stream;
        let buf = stream_read(&mut stream).with_context(|| "failed to receive remote region info")?;
        serde_json::from_slice::<RemoteRegion>(&buf).with_context(|| {
            format!(
                "failed to decode remote region info (from: {})",
                String::from_utf8_lossy(&buf)
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_exchange_region() {
        let listener = listen_on(0).unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let conn = Connecter::accept(&listener).unwrap();
            assert!(!conn.is_client());
            conn.exchange_region(RemoteRegion { len: 4096, rkey: 7 })
                .unwrap()
        });

        let conn = Connecter::new_on_port(Some(Ipv4Addr::LOCALHOST), port).unwrap();
        assert!(conn.is_client());
        let from_server = conn
            .exchange_region(RemoteRegion { len: 64, rkey: 9 })
            .unwrap();
        let from_client = server.join().unwrap();

        assert_eq!(from_server, RemoteRegion { len: 4096, rkey: 7 });
        assert_eq!(from_client, RemoteRegion { len: 64, rkey: 9 });
    }

    #[test]
    fn test_connect_gives_up() {
        // Grab a free port, then close it so nothing listens there.
        let port = listen_on(0).unwrap().local_addr().unwrap().port();
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
        let ret = connect_until_success(addr, Duration::from_millis(10), Duration::from_millis(50));
        assert!(ret.is_err());
    }
}
