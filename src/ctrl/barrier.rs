use std::net::TcpStream;

use anyhow::{Context as _, Result};

use super::connecter::{stream_read, stream_write, Connecter};

/// Two-party barrier over a [`Connecter`].
///
/// Synchronize the two benchmark peers.
#[derive(Debug, Default)]
pub struct Barrier {
    /// Sequence number of the next arrival. Both sides must agree on it.
    seq: u64,
}

impl Barrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of barriers passed so far.
    #[inline]
    pub fn passed(&self) -> u64 {
        self.seq
    }

    /// Wait for the peer to reach this point of the code.
    ///
    /// ## Synchronization scheme
    ///
    /// The initiator sends its arrival (the sequence number) and then blocks
    /// until the peer's arrival comes back. The responder blocks until the
    /// initiator's arrival is received and then replies with its own. Neither
    /// side returns before it has observed the other side's arrival.
    pub fn wait(&mut self, conn: &Connecter, is_initiator: bool) -> Result<()> {
        let seq = self.seq;
        let mut stream = conn.stream();
        log::debug!(
            "perf_rdma: entering barrier #{} as {}",
            seq,
            if is_initiator { "initiator" } else { "responder" }
        );

        let arrive = |stream: &mut &TcpStream| {
            stream_write(stream, &seq.to_le_bytes())
                .with_context(|| format!("failed to announce arrival at barrier #{}", seq))
        };
        let observe = |stream: &mut &TcpStream| -> Result<()> {
            let buf = stream_read(stream)
                .with_context(|| format!("failed to observe peer at barrier #{}", seq))?;
            let peer_seq = <[u8; 8]>::try_from(buf.as_slice())
                .map(u64::from_le_bytes)
                .map_err(|_| anyhow::anyhow!("malformed barrier message ({} bytes)", buf.len()))?;
            if peer_seq != seq {
                return Err(anyhow::anyhow!(
                    "barrier mismatch: local #{} vs remote #{}",
                    seq,
                    peer_seq
                ));
            }
            Ok(())
        };

        if is_initiator {
            arrive(&mut stream)?;
            observe(&mut stream)?;
        } else {
            observe(&mut stream)?;
            arrive(&mut stream)?;
        }

        self.seq += 1;
        log::debug!("perf_rdma: left barrier #{}", seq);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::connecter::listen_on;
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_barrier_blocks_until_peer_arrives() {
        let listener = listen_on(0).unwrap();
        let port = listener.local_addr().unwrap().port();
        let responder_arrived = Arc::new(AtomicBool::new(false));

        let flag = responder_arrived.clone();
        let responder = thread::spawn(move || {
            let conn = Connecter::accept(&listener).unwrap();
            let mut barrier = Barrier::new();
            thread::sleep(Duration::from_millis(100));
            flag.store(true, Ordering::SeqCst);
            barrier.wait(&conn, false).unwrap();
            barrier.wait(&conn, false).unwrap();
            barrier.passed()
        });

        let conn = Connecter::new_on_port(Some(Ipv4Addr::LOCALHOST), port).unwrap();
        let mut barrier = Barrier::new();
        barrier.wait(&conn, true).unwrap();
        assert!(responder_arrived.load(Ordering::SeqCst));
        barrier.wait(&conn, true).unwrap();

        assert_eq!(barrier.passed(), 2);
        assert_eq!(responder.join().unwrap(), 2);
    }

    #[test]
    fn test_barrier_mismatch() {
        let listener = listen_on(0).unwrap();
        let port = listener.local_addr().unwrap().port();

        let responder = thread::spawn(move || {
            let conn = Connecter::accept(&listener).unwrap();
            let mut barrier = Barrier { seq: 5 };
            barrier.wait(&conn, false)
        });

        let conn = Connecter::new_on_port(Some(Ipv4Addr::LOCALHOST), port).unwrap();
        let mut barrier = Barrier::new();
        // The responder bails without replying, so the initiator sees EOF.
        assert!(barrier.wait(&conn, true).is_err());
        assert!(responder.join().unwrap().is_err());
    }
}
