use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::packet::{RequestOp, TftpPacket};
use crate::session::Session;
use crate::transfer::{await_write_ack, receive_file, send_file};
use crate::{DEF_MODE, MAX_FILE_SIZE, PING_FILENAME};

/// Caller-facing side of the protocol. Every operation runs on its own
/// ephemeral port and never retries across operations.
#[derive(Debug, Clone)]
pub struct Client {
    server: SocketAddr,
    directory: PathBuf,
    config: TransferConfig,
}

impl Client {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            directory: PathBuf::from("."),
            config: TransferConfig::client(),
        }
    }

    pub fn with_config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    /// Where `download` stores files.
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Fetch `name` into a local file of the same name.
    pub async fn download(&self, name: &str) -> Result<u64, TransferError> {
        let local = Path::new(name).file_name().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("bad file name {name:?}"))
        })?;
        let local = self.directory.join(local);
        self.download_to(name, &local).await
    }

    /// Fetch `name` into `local`. A failed download leaves `local` with
    /// whatever was received so far.
    pub async fn download_to(&self, name: &str, local: &Path) -> Result<u64, TransferError> {
        let start = Instant::now();
        let mut file = File::create(local).await?;
        let mut session = Session::open(self.server).await?;

        session.send(&request(RequestOp::Read, name)).await?;
        let size = receive_file(&mut session, &mut file, &self.config).await?;

        info!(
            file = %local.display(),
            size,
            "Download complete, cost: {:.3}s",
            start.elapsed().as_secs_f64()
        );
        Ok(size)
    }

    /// Send `local` to the server as `remote`.
    pub async fn upload(
        &self,
        local: impl AsRef<Path>,
        remote: &str,
    ) -> Result<u64, TransferError> {
        let start = Instant::now();
        let local = local.as_ref();
        let mut file = File::open(local).await?;
        let filesize = file.metadata().await?.len();
        // a file of exactly MAX_FILE_SIZE would need block #65536 to terminate
        if filesize >= MAX_FILE_SIZE {
            return Err(TransferError::FileTooLarge(filesize));
        }

        let mut session = Session::open(self.server).await?;
        session.send(&request(RequestOp::Write, remote)).await?;
        await_write_ack(&mut session, &self.config).await?;
        let size = send_file(&mut session, &mut file, &self.config).await?;

        info!(
            file = %local.display(),
            remote,
            size,
            "Upload complete, cost: {:.3}s",
            start.elapsed().as_secs_f64()
        );
        Ok(size)
    }

    /// Ask the server to remove `remote`. Returns the server's confirmation
    /// message; a refusal comes back as `TransferError::Peer`.
    pub async fn delete(&self, remote: &str) -> Result<String, TransferError> {
        let mut session = Session::open(self.server).await?;
        session
            .send(&TftpPacket::Request {
                op: RequestOp::Delete,
                filename: remote.to_string(),
                mode: None,
            })
            .await?;

        match session.recv(self.config.data_timeout).await? {
            TftpPacket::Status { ok: true, msg } => Ok(msg),
            TftpPacket::Status { ok: false, msg } => Err(TransferError::Peer { code: 1, msg }),
            TftpPacket::ERROR { code, msg } => Err(TransferError::Peer { code, msg }),
            pkt => Err(TransferError::UnexpectedPacket(format!("{pkt:?}"))),
        }
    }

    /// Liveness check: succeeds with the round-trip time once any DATA
    /// comes back, fails when the deadline passes. Never re-sends.
    pub async fn ping(&self) -> Result<Duration, TransferError> {
        let start = Instant::now();
        let deadline = start + self.config.data_timeout;
        let mut session = Session::open(self.server).await?;
        session
            .send(&TftpPacket::Request {
                op: RequestOp::Read,
                filename: PING_FILENAME.to_string(),
                mode: None,
            })
            .await?;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransferError::Timeout(self.config.data_timeout));
            }
            match session.recv(remaining).await {
                Ok(TftpPacket::DATA { .. }) => return Ok(start.elapsed()),
                Ok(pkt) => debug!(?pkt, "ignoring non-DATA ping reply"),
                Err(TransferError::Packet(e)) => debug!(error = %e, "ignoring bad ping reply"),
                Err(TransferError::Timeout(_)) => {
                    return Err(TransferError::Timeout(self.config.data_timeout))
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn request(op: RequestOp, filename: &str) -> TftpPacket {
    TftpPacket::Request {
        op,
        filename: filename.to_string(),
        mode: Some(DEF_MODE.to_string()),
    }
}
