mod cli;
mod client;
mod config;
mod crc;
mod error;
mod packet;
mod server;
mod session;
mod shell;
mod transfer;

pub use crate::cli::{Cli, ClientArgs, Command, ServeArgs};
pub use crate::client::Client;
pub use crate::config::TransferConfig;
pub use crate::crc::crc8;
pub use crate::error::TransferError;
pub use crate::packet::{PacketError, RequestOp, TftpPacket};
pub use crate::server::Server;
pub use crate::session::{Busy, Session, SessionGuard, SessionRegistry};
pub use crate::shell::run_shell;
pub use crate::transfer::{receive_file, send_file, DownloadMachine, DownloadState, Step};

pub const DEF_PORT: u16 = 6969;
pub const BLOCK_SIZE: u16 = 512;
pub const MAX_BLOCKS: u16 = 65535;
pub const MAX_FILE_SIZE: u64 = BLOCK_SIZE as u64 * MAX_BLOCKS as u64;
pub const MAX_RETRY_COUNT: u8 = 3;

pub const DEF_MODE: &str = "octet";
pub const PING_FILENAME: &str = "__ping__";
pub const BACKUP_DIR: &str = "backup";
