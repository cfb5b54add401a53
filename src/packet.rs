use std::str;
use thiserror::Error;

use crate::crc::crc8;
use crate::BLOCK_SIZE;

const OP_RRQ: u16 = 1;
const OP_WRQ: u16 = 2;
const OP_DATA: u16 = 3;
const OP_ACK: u16 = 4;
const OP_ERROR: u16 = 5;
const OP_DELETE: u16 = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("Packet length too short")]
    TooShort,
    #[error("Invalid opcode: {0}")]
    UnknownOpcode(u16),
    #[error("Missing cstr terminator")]
    MissingTerminator,
    #[error("Invalid cstr encoding")]
    InvalidString,
    #[error("Payload of {0} bytes exceeds block size")]
    PayloadTooLarge(usize),
    #[error("CRC mismatch on block #{block}: computed {expected:#04x}, got {actual:#04x}")]
    Checksum { block: u16, expected: u8, actual: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOp {
    Read,
    Write,
    Delete,
}

impl RequestOp {
    fn opcode(self) -> u16 {
        match self {
            RequestOp::Read => OP_RRQ,
            RequestOp::Write => OP_WRQ,
            RequestOp::Delete => OP_DELETE,
        }
    }
}

/// One datagram of the protocol.
///
/// `ERROR` and `Status` share opcode 5 on the wire. `Status` is the
/// outcome of a DELETE: `ok` maps to code 0, a failure to code 1. Decoding
/// yields `Status { ok: true }` for code 0 and `ERROR` for any other code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TftpPacket {
    Request {
        op: RequestOp,
        filename: String,
        mode: Option<String>,
    },
    DATA {
        block: u16,
        data: Vec<u8>,
    },
    ACK(u16),
    ERROR {
        code: u8,
        msg: String,
    },
    Status {
        ok: bool,
        msg: String,
    },
}

impl TftpPacket {
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = vec![0];

        match self {
            TftpPacket::Request { op, filename, mode } => {
                bytes.push(op.opcode() as u8);
                bytes.extend(filename.as_bytes());
                bytes.push(0);
                if let Some(mode) = mode {
                    bytes.extend(mode.as_bytes());
                    bytes.push(0);
                }
            }
            TftpPacket::DATA { block, data } => {
                bytes.push(OP_DATA as u8);
                bytes.extend_from_slice(&block.to_be_bytes());
                bytes.extend_from_slice(data);
                bytes.push(crc8(data));
            }
            TftpPacket::ACK(block) => {
                bytes.push(OP_ACK as u8);
                bytes.extend_from_slice(&block.to_be_bytes());
            }
            TftpPacket::ERROR { code, msg } => {
                bytes.push(OP_ERROR as u8);
                bytes.push(0);
                bytes.push(*code);
                bytes.extend_from_slice(msg.as_bytes());
                bytes.push(0);
            }
            TftpPacket::Status { ok, msg } => {
                bytes.push(OP_ERROR as u8);
                bytes.push(0);
                bytes.push(if *ok { 0 } else { 1 });
                bytes.extend_from_slice(msg.as_bytes());
                bytes.push(0);
            }
        }
        bytes
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < 4 {
            return Err(PacketError::TooShort);
        }

        // buf[0] is reserved
        let opcode = u16::from(buf[1]);
        let pkt = match opcode {
            OP_RRQ | OP_WRQ | OP_DELETE => {
                let op = match opcode {
                    OP_RRQ => RequestOp::Read,
                    OP_WRQ => RequestOp::Write,
                    _ => RequestOp::Delete,
                };
                let filename = read_cstr(&buf[2..])?;
                let rest = &buf[2 + filename.len() + 1..];
                // an unterminated mode counts as absent
                let mode = match read_cstr(rest) {
                    Ok(mode) => Some(mode).filter(|m| !m.is_empty()),
                    Err(PacketError::MissingTerminator) => None,
                    Err(e) => return Err(e),
                };
                TftpPacket::Request { op, filename, mode }
            }
            OP_DATA => {
                if buf.len() < 5 {
                    return Err(PacketError::TooShort);
                }
                let block = u16::from_be_bytes([buf[2], buf[3]]);
                let (data, crc) = buf[4..].split_at(buf.len() - 5);
                if data.len() > usize::from(BLOCK_SIZE) {
                    return Err(PacketError::PayloadTooLarge(data.len()));
                }
                let expected = crc8(data);
                if expected != crc[0] {
                    return Err(PacketError::Checksum {
                        block,
                        expected,
                        actual: crc[0],
                    });
                }

                TftpPacket::DATA {
                    block,
                    data: data.to_vec(),
                }
            }
            OP_ACK => TftpPacket::ACK(u16::from_be_bytes([buf[2], buf[3]])),
            OP_ERROR => {
                let code = buf[3];
                let msg = read_cstr(&buf[4..])?;

                if code == 0 {
                    TftpPacket::Status { ok: true, msg }
                } else {
                    TftpPacket::ERROR { code, msg }
                }
            }
            _ => {
                return Err(PacketError::UnknownOpcode(opcode));
            }
        };

        Ok(pkt)
    }
}

// 读取以 \0 结尾的 C 风格字符串
fn read_cstr(buf: &[u8]) -> Result<String, PacketError> {
    let pos = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(PacketError::MissingTerminator)?;
    let s = str::from_utf8(&buf[..pos])
        .map_err(|_| PacketError::InvalidString)?
        .to_string();
    Ok(s)
}
