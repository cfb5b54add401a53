use std::time::Duration;
use thiserror::Error;

use crate::packet::PacketError;

/// Why a transfer, delete or ping ended without success.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or corrupt datagram. Engines drop these and keep waiting;
    /// it only surfaces where no retransmission can follow.
    #[error("Bad packet: {0}")]
    Packet(#[from] PacketError),

    #[error("Unexpected packet: {0}")]
    UnexpectedPacket(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("No ACK for block #{block} after {attempts} attempts")]
    RetriesExhausted { block: u16, attempts: u8 },

    #[error("Get error packet: code: {code}, msg: {msg}")]
    Peer { code: u8, msg: String },

    #[error("File too large for TFTP: {0} bytes")]
    FileTooLarge(u64),

    #[error("Block number would wrap past #{0}")]
    TooManyBlocks(u16),
}
