use anyhow::anyhow;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::net::UdpSocket;
use tokio::task;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TransferConfig;
use crate::packet::{RequestOp, TftpPacket};
use crate::session::{Busy, Session, SessionRegistry};
use crate::transfer::{receive_file, send_file};
use crate::{BACKUP_DIR, DEF_MODE, MAX_FILE_SIZE, PING_FILENAME};

const REQUEST_BUF_SIZE: usize = 1024;

/// Well-known endpoint that accepts requests and hands each transfer to its
/// own task and ephemeral port.
#[derive(Debug)]
pub struct Server {
    socket: UdpSocket,
    root: PathBuf,
    config: TransferConfig,
    registry: SessionRegistry,
}

impl Server {
    pub async fn bind(
        addr: SocketAddr,
        root: impl Into<PathBuf>,
        config: TransferConfig,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            root: root.into(),
            config,
            registry: SessionRegistry::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let mut buf = [0u8; REQUEST_BUF_SIZE];
        info!(
            addr = %self.socket.local_addr()?,
            workdir = %self.root.display(),
            timeout = ?self.config.ack_timeout,
            retry = self.config.max_retries,
            "TFTP server listening"
        );

        loop {
            let (num, addr) = match self.socket.recv_from(&mut buf).await {
                Ok(res) => res,
                Err(e) => {
                    debug!(error = %e, "recv on listening socket failed");
                    continue;
                }
            };
            if num < 4 {
                debug!(peer = %addr, len = num, "runt datagram");
                continue;
            }

            match TftpPacket::deserialize(&buf[..num]) {
                Ok(TftpPacket::Request { op, filename, mode }) => {
                    info!(peer = %addr, ?op, file = %filename, "request");
                    self.dispatch(addr, op, filename, mode).await;
                }
                res => {
                    debug!(peer = %addr, ?res, "not a request");
                    let error = TftpPacket::ERROR {
                        code: 4,
                        msg: "Illegal TFTP operation".to_string(),
                    };
                    if let Err(e) = self.socket.send_to(&error.serialize(), addr).await {
                        warn!(peer = %addr, error = %e, "failed to send error");
                    }
                }
            }
        }
    }

    async fn dispatch(
        &self,
        addr: SocketAddr,
        op: RequestOp,
        filename: String,
        mode: Option<String>,
    ) {
        if op == RequestOp::Read && filename == PING_FILENAME {
            task::spawn(async move {
                if let Err(e) = ping_handler(addr).await {
                    warn!(peer = %addr, error = %e, "ping reply failed");
                }
            });
            return;
        }

        let path = resolve(&self.root, &filename).ok();
        if op == RequestOp::Delete {
            if let Err(e) = self.delete_handler(addr, &filename, path).await {
                warn!(peer = %addr, error = %e, "DELETE reply failed");
            }
            return;
        }

        let guard = match self.registry.register(addr, path.clone()) {
            Ok(guard) => guard,
            Err(Busy::Peer) => {
                warn!(peer = %addr, "session already running, dropping request");
                return;
            }
            Err(Busy::File) => {
                info!(peer = %addr, file = %filename, "file busy, refusing request");
                let error = TftpPacket::ERROR {
                    code: 2,
                    msg: "File is busy".to_string(),
                };
                if let Err(e) = self.socket.send_to(&error.serialize(), addr).await {
                    warn!(peer = %addr, error = %e, "failed to send error");
                }
                return;
            }
        };
        let root = self.root.clone();
        let config = self.config;
        task::spawn(async move {
            let _guard = guard;
            let res = match op {
                RequestOp::Read => rrq_handler(addr, path, mode, &config).await,
                _ => wrq_handler(addr, &root, path, mode, &config).await,
            };
            if let Err(e) = res {
                warn!(peer = %addr, ?op, error = %e, "transfer failed");
            }
        });
    }

    /// Runs inline on the listening socket. Sessions are only registered by
    /// the dispatcher, so a file that is free here stays free until the
    /// reply is sent.
    async fn delete_handler(
        &self,
        addr: SocketAddr,
        filename: &str,
        path: Option<PathBuf>,
    ) -> anyhow::Result<()> {
        let res = match path {
            Some(path) if self.registry.is_file_busy(&path) => Err(anyhow!("file is busy")),
            Some(path) => fs::remove_file(&path).await.map_err(anyhow::Error::from),
            None => Err(anyhow!("{filename:?}")),
        };
        let status = match res {
            Ok(()) => {
                info!(file = %filename, "File deleted successfully");
                TftpPacket::Status {
                    ok: true,
                    msg: "File deleted successfully".to_string(),
                }
            }
            Err(e) => {
                info!(file = %filename, error = %e, "Failed to delete file");
                TftpPacket::Status {
                    ok: false,
                    msg: "Failed to delete file".to_string(),
                }
            }
        };
        self.socket.send_to(&status.serialize(), addr).await?;
        Ok(())
    }
}

async fn rrq_handler(
    addr: SocketAddr,
    path: Option<PathBuf>,
    mode: Option<String>,
    config: &TransferConfig,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut session = Session::open(addr).await?;

    // 仅支持octet模式
    if let Some(mode) = mode.filter(|m| !m.eq_ignore_ascii_case(DEF_MODE)) {
        return send_error(&session, 0, format!("Unsupported '{mode}' mode")).await;
    }

    let Some(path) = path else {
        return send_error(&session, 1, "File not found".to_string()).await;
    };
    let filesize = match fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => metadata.len(),
        _ => return send_error(&session, 1, "File not found".to_string()).await,
    };
    // the terminating block of a file this size would need block #65536
    if filesize >= MAX_FILE_SIZE {
        return send_error(&session, 3, "File too large".to_string()).await;
    }
    let mut file = match File::open(&path).await {
        Ok(file) => file,
        Err(_) => return send_error(&session, 1, "File not found".to_string()).await,
    };

    // 开始传输
    send_file(&mut session, &mut file, config).await?;

    let cost = start.elapsed();
    info!(
        peer = %session.peer(),
        file = %path.display(),
        "Finished sending, cost: {:.3}s, speed: {:.2} MB/s",
        cost.as_secs_f64(),
        filesize as f64 / cost.as_secs_f64() / 1024.0 / 1024.0
    );
    Ok(())
}

async fn wrq_handler(
    addr: SocketAddr,
    root: &Path,
    path: Option<PathBuf>,
    mode: Option<String>,
    config: &TransferConfig,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut session = Session::open(addr).await?;

    if let Some(mode) = mode.filter(|m| !m.eq_ignore_ascii_case(DEF_MODE)) {
        return send_error(&session, 0, format!("Unsupported '{mode}' mode")).await;
    }

    let Some(path) = path else {
        return send_error(&session, 2, "Cannot create file".to_string()).await;
    };
    let mut file = match File::create(&path).await {
        Ok(file) => file,
        Err(_) => return send_error(&session, 2, "Cannot create file".to_string()).await,
    };

    session.send(&TftpPacket::ACK(0)).await?;
    let size = receive_file(&mut session, &mut file, config).await?;
    drop(file);

    match backup_file(root, &path).await {
        Ok(backup) => info!(backup = %backup.display(), "Backup created"),
        Err(e) => warn!(file = %path.display(), error = %e, "backup failed"),
    }

    let cost = start.elapsed();
    info!(
        peer = %session.peer(),
        file = %path.display(),
        "Received and saved, cost: {:.3}s, speed: {:.2} MB/s",
        cost.as_secs_f64(),
        size as f64 / cost.as_secs_f64() / 1024.0 / 1024.0
    );
    Ok(())
}

/// A single empty DATA #1 from a fresh port, no filesystem access.
async fn ping_handler(addr: SocketAddr) -> anyhow::Result<()> {
    let session = Session::open(addr).await?;
    session
        .send(&TftpPacket::DATA {
            block: 1,
            data: Vec::new(),
        })
        .await?;
    Ok(())
}

async fn send_error(session: &Session, code: u8, msg: String) -> anyhow::Result<()> {
    let error = TftpPacket::ERROR {
        code,
        msg: msg.clone(),
    };
    session.send(&error).await?;
    Err(anyhow!(msg))
}

/// Keep only the final path component so requests stay inside the workdir.
fn resolve(root: &Path, filename: &str) -> anyhow::Result<PathBuf> {
    let path = Path::new(filename);
    let name = path.file_name().ok_or(anyhow!("{:?}", path))?;
    Ok(root.join(name))
}

/// Copy an uploaded file into `<root>/backup/`, creating the directory on
/// first use.
async fn backup_file(root: &Path, path: &Path) -> anyhow::Result<PathBuf> {
    let dir = root.join(BACKUP_DIR);
    fs::create_dir_all(&dir).await?;
    let name = path.file_name().ok_or(anyhow!("{:?}", path))?;
    let backup = dir.join(name);
    fs::copy(path, &backup).await?;
    Ok(backup)
}
