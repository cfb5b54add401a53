//! Stop-and-wait block transfer.
//!
//! Both directions share one engine: whoever holds the file sends DATA and
//! waits for ACKs ([`send_file`]), whoever writes the file accepts DATA in
//! order and acknowledges it ([`receive_file`]). A client download and a
//! server WRQ are the receiving side; a client upload and a server RRQ are
//! the sending side.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::packet::TftpPacket;
use crate::session::Session;
use crate::BLOCK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    AwaitingData(u16),
    Done,
    Failed,
}

/// What the receive loop does with a packet the machine has judged.
#[derive(Debug)]
pub enum Step {
    /// Append `data` to the output, then ACK `block`.
    Accept { block: u16, data: Vec<u8> },
    /// Duplicate or out-of-order block: ACK the last accepted block again.
    Reack(u16),
    /// Not part of the exchange.
    Discard,
    Fail(TransferError),
}

/// Receiving half of a transfer, free of I/O.
#[derive(Debug)]
pub struct DownloadMachine {
    state: DownloadState,
    bytes: u64,
}

impl Default for DownloadMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadMachine {
    pub fn new() -> Self {
        Self {
            state: DownloadState::AwaitingData(1),
            bytes: 0,
        }
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    /// Payload bytes accepted so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn on_packet(&mut self, pkt: TftpPacket) -> Step {
        let DownloadState::AwaitingData(expected) = self.state else {
            return Step::Discard;
        };

        match pkt {
            TftpPacket::DATA { block, data } if block == expected => {
                self.state = if data.len() < usize::from(BLOCK_SIZE) {
                    DownloadState::Done
                } else if let Some(next) = expected.checked_add(1) {
                    DownloadState::AwaitingData(next)
                } else {
                    self.state = DownloadState::Failed;
                    return Step::Fail(TransferError::TooManyBlocks(expected));
                };
                self.bytes += data.len() as u64;
                Step::Accept { block, data }
            }
            // expected starts at 1, so the last good block is at least #0
            TftpPacket::DATA { .. } => Step::Reack(expected - 1),
            pkt => match peer_error(pkt) {
                Ok(err) => {
                    self.state = DownloadState::Failed;
                    Step::Fail(err)
                }
                Err(_) => Step::Discard,
            },
        }
    }

    pub fn on_timeout(&mut self, err: TransferError) -> TransferError {
        self.state = DownloadState::Failed;
        err
    }
}

/// Accept DATA blocks from the session peer into `out` until a short block
/// ends the transfer. Returns the number of payload bytes written.
///
/// The caller has already sent the RRQ (client) or ACK #0 (server).
pub async fn receive_file<W>(
    session: &mut Session,
    out: &mut W,
    config: &TransferConfig,
) -> Result<u64, TransferError>
where
    W: AsyncWrite + Unpin,
{
    let mut machine = DownloadMachine::new();
    loop {
        let pkt = match next_packet(session, config).await {
            Ok(pkt) => pkt,
            Err(e) => return Err(machine.on_timeout(e)),
        };

        match machine.on_packet(pkt) {
            Step::Accept { block, data } => {
                out.write_all(&data).await?;
                let done = machine.state() == DownloadState::Done;
                if done {
                    out.flush().await?;
                }
                session.send(&TftpPacket::ACK(block)).await?;
                if done {
                    return Ok(machine.bytes());
                }
            }
            Step::Reack(block) => {
                debug!(peer = %session.peer(), block, "duplicate or out-of-order DATA, re-ack");
                session.send(&TftpPacket::ACK(block)).await?;
            }
            Step::Discard => {
                debug!(peer = %session.peer(), "discarding unexpected packet");
            }
            Step::Fail(e) => return Err(e),
        }
    }
}

/// Send `src` in 512-byte blocks starting at #1, each retransmitted until
/// its ACK arrives or the retry budget runs out. A source whose length is a
/// multiple of 512 (including empty) ends with a zero-length block.
///
/// Returns the number of payload bytes acknowledged.
pub async fn send_file<R>(
    session: &mut Session,
    src: &mut R,
    config: &TransferConfig,
) -> Result<u64, TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; usize::from(BLOCK_SIZE)];
    let mut block: u16 = 1;
    let mut sent: u64 = 0;
    loop {
        let size = read_block(src, &mut buf).await?;
        let pkt = TftpPacket::DATA {
            block,
            data: buf[..size].to_vec(),
        };
        send_block(session, &pkt, block, config).await?;
        sent += size as u64;

        if size < usize::from(BLOCK_SIZE) {
            return Ok(sent);
        }
        block = block
            .checked_add(1)
            .ok_or(TransferError::TooManyBlocks(block))?;
    }
}

/// Wait for the ACK #0 that accepts a WRQ.
pub async fn await_write_ack(
    session: &mut Session,
    config: &TransferConfig,
) -> Result<(), TransferError> {
    match session.recv(config.data_timeout).await? {
        TftpPacket::ACK(0) => Ok(()),
        pkt => Err(peer_error(pkt).unwrap_or_else(|pkt| {
            TransferError::UnexpectedPacket(format!("expect ACK #0, but {pkt:?}"))
        })),
    }
}

async fn send_block(
    session: &mut Session,
    pkt: &TftpPacket,
    block: u16,
    config: &TransferConfig,
) -> Result<(), TransferError> {
    for attempt in 1..=config.max_retries {
        if attempt > 1 {
            debug!(peer = %session.peer(), block, attempt, "retrans");
        }
        session.send(pkt).await?;

        let deadline = Instant::now() + config.ack_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match session.recv(remaining).await {
                Ok(TftpPacket::ACK(ack)) if ack == block => return Ok(()),
                Ok(TftpPacket::ACK(ack)) => {
                    debug!(block, ack, "stale ACK");
                }
                Ok(other) => match peer_error(other) {
                    Ok(err) => return Err(err),
                    Err(other) => debug!(?other, "expect ACK"),
                },
                Err(TransferError::Packet(e)) => debug!(error = %e, "dropping bad packet"),
                Err(TransferError::Timeout(_)) => break,
                Err(e) => return Err(e),
            }
        }
        warn!(peer = %session.peer(), block, attempt, "timeout");
    }

    Err(TransferError::RetriesExhausted {
        block,
        attempts: config.max_retries,
    })
}

/// Next well-formed packet, re-polling silently after each timeout.
async fn next_packet(
    session: &mut Session,
    config: &TransferConfig,
) -> Result<TftpPacket, TransferError> {
    let polls = config.data_polls.max(1);
    for poll in 0..polls {
        if poll > 0 {
            sleep(config.poll_interval).await;
        }
        loop {
            match session.recv(config.data_timeout).await {
                Ok(pkt) => return Ok(pkt),
                Err(TransferError::Packet(e)) => {
                    warn!(peer = %session.peer(), error = %e, "dropping bad packet");
                }
                Err(TransferError::Timeout(_)) => {
                    debug!(peer = %session.peer(), poll, "no DATA before deadline");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
    }
    Err(TransferError::Timeout(config.data_timeout * u32::from(polls)))
}

/// Fill `buf` unless the source ends first; a short count means EOF.
async fn read_block<R>(src: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = src.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Turn an error-shaped packet into the failure it reports, handing any
/// other packet back untouched.
fn peer_error(pkt: TftpPacket) -> Result<TransferError, TftpPacket> {
    match pkt {
        TftpPacket::ERROR { code, msg } => Ok(TransferError::Peer { code, msg }),
        TftpPacket::Status { msg, .. } => Ok(TransferError::Peer { code: 0, msg }),
        pkt => Err(pkt),
    }
}
