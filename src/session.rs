use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

use crate::error::TransferError;
use crate::packet::TftpPacket;

// Room for oversized datagrams so the codec can reject them instead of
// receiving a silently truncated one.
const RECV_BUF_SIZE: usize = 1024;

/// An ephemeral UDP endpoint dedicated to a single transfer.
///
/// `peer` starts out as a hint: the address the request came from (server)
/// or the well-known server address (client). The source of the first
/// datagram received replaces it and stays fixed for the rest of the
/// session; datagrams from any other address are dropped.
#[derive(Debug)]
pub struct Session {
    socket: UdpSocket,
    peer: SocketAddr,
    bound: bool,
}

impl Session {
    /// Bind a fresh OS-assigned port of the same family as `peer`.
    pub async fn open(peer: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        Ok(Self::from_socket(socket, peer))
    }

    pub fn from_socket(socket: UdpSocket, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer,
            bound: false,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether a reply has fixed the peer address yet.
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub async fn send(&self, pkt: &TftpPacket) -> io::Result<()> {
        trace!(peer = %self.peer, ?pkt, "send");
        self.socket.send_to(&pkt.serialize(), self.peer).await?;
        Ok(())
    }

    /// Wait up to `wait` for the next datagram from the session peer.
    ///
    /// Decode failures (including CRC mismatches) come back as
    /// `TransferError::Packet` so the caller can drop them and call again.
    pub async fn recv(&mut self, wait: Duration) -> Result<TftpPacket, TransferError> {
        let deadline = Instant::now() + wait;
        let mut buf = [0u8; RECV_BUF_SIZE];
        loop {
            let (n, addr) = match timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                Ok(Ok(res)) => res,
                // ICMP port unreachable surfaces here on some platforms
                Ok(Err(e))
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    debug!(peer = %self.peer, error = %e, "peer unreachable");
                    continue;
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(TransferError::Timeout(wait)),
            };

            if !self.bound {
                if addr != self.peer {
                    debug!(hint = %self.peer, peer = %addr, "session peer rebound");
                }
                self.peer = addr;
                self.bound = true;
            } else if addr != self.peer {
                warn!(from = %addr, peer = %self.peer, "Ignoring datagram from foreign address");
                continue;
            }

            let pkt = TftpPacket::deserialize(&buf[..n])?;
            trace!(peer = %self.peer, ?pkt, "recv");
            return Ok(pkt);
        }
    }
}

/// Why [`SessionRegistry::register`] turned a request away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Busy {
    /// The peer already has a transfer running.
    Peer,
    /// Another transfer is reading or writing the same file.
    File,
}

#[derive(Debug, Default)]
struct Active {
    peers: HashSet<SocketAddr>,
    files: HashSet<PathBuf>,
}

/// Peers and files with a transfer in progress.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    active: Arc<Mutex<Active>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `peer` and, when the request names a usable path, `file`.
    /// Nothing is claimed unless both are free.
    pub fn register(
        &self,
        peer: SocketAddr,
        file: Option<PathBuf>,
    ) -> Result<SessionGuard, Busy> {
        let mut active = self.lock();
        if active.peers.contains(&peer) {
            return Err(Busy::Peer);
        }
        if let Some(file) = &file {
            if !active.files.insert(file.clone()) {
                return Err(Busy::File);
            }
        }
        active.peers.insert(peer);
        Ok(SessionGuard {
            peer,
            file,
            active: Arc::clone(&self.active),
        })
    }

    /// Whether a running transfer holds `file`.
    pub fn is_file_busy(&self, file: &Path) -> bool {
        self.lock().files.contains(file)
    }

    pub fn len(&self) -> usize {
        self.lock().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Active> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the peer's and the file's registry slots when the session task
/// ends.
#[derive(Debug)]
pub struct SessionGuard {
    peer: SocketAddr,
    file: Option<PathBuf>,
    active: Arc<Mutex<Active>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.peers.remove(&self.peer);
        if let Some(file) = &self.file {
            active.files.remove(file);
        }
    }
}
