//! Client ↔ server exchanges over loopback.
//!
//! Each test starts a real [`Server`] on an OS-chosen port in a background
//! task, rooted in a scratch directory, and drives it with a [`Client`] or a
//! bare `UdpSocket` where exact wire bytes matter.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use tftp_crc::{
    run_shell, Client, RequestOp, Server, TftpPacket, TransferConfig, TransferError, BACKUP_DIR,
};

fn server_config() -> TransferConfig {
    TransferConfig {
        max_retries: 3,
        ack_timeout: Duration::from_millis(200),
        data_timeout: Duration::from_millis(500),
        data_polls: 2,
        poll_interval: Duration::from_millis(20),
    }
}

fn client_config() -> TransferConfig {
    TransferConfig::client().with_timeouts(Duration::from_millis(500))
}

async fn start_server(root: &Path) -> SocketAddr {
    let server = Server::bind("127.0.0.1:0".parse().unwrap(), root, server_config())
        .await
        .expect("bind server");
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

fn client(addr: SocketAddr, dir: &TempDir) -> Client {
    Client::new(addr)
        .with_config(client_config())
        .with_directory(dir.path())
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

async fn recv_raw(socket: &UdpSocket) -> TftpPacket {
    let mut buf = [0u8; 1024];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("no reply")
        .unwrap();
    TftpPacket::deserialize(&buf[..n]).unwrap()
}

#[tokio::test]
async fn upload_then_download_round_trip() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let addr = start_server(server_dir.path()).await;
    let client = client(addr, &client_dir);

    let files = [
        ("empty.bin", 0),
        ("one.bin", 512),
        ("odd.bin", 3000),
        ("two.bin", 1024),
    ];
    for (name, len) in files {
        let payload = pattern(len);
        let local = client_dir.path().join(format!("src-{name}"));
        std::fs::write(&local, &payload).unwrap();

        let sent = client.upload(&local, name).await.expect("upload");
        assert_eq!(sent, len as u64);
        assert_eq!(std::fs::read(server_dir.path().join(name)).unwrap(), payload);

        let received = client.download(name).await.expect("download");
        assert_eq!(received, len as u64);
        assert_eq!(std::fs::read(client_dir.path().join(name)).unwrap(), payload);
    }
}

#[tokio::test]
async fn upload_writes_backup_copy() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let addr = start_server(server_dir.path()).await;

    let local = client_dir.path().join("report.txt");
    std::fs::write(&local, b"quarterly numbers").unwrap();
    client(addr, &client_dir)
        .upload(&local, "report.txt")
        .await
        .unwrap();

    // the backup is written after the final ACK goes out
    let backup = server_dir.path().join(BACKUP_DIR).join("report.txt");
    let deadline = Instant::now() + Duration::from_secs(2);
    while !backup.exists() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(std::fs::read(backup).unwrap(), b"quarterly numbers");
}

#[tokio::test]
async fn download_missing_file_reports_peer_error() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let addr = start_server(server_dir.path()).await;

    let res = client(addr, &client_dir).download("nope.bin").await;
    match res {
        Err(TransferError::Peer { code, msg }) => {
            assert_eq!(code, 1);
            assert_eq!(msg, "File not found");
        }
        other => panic!("expected peer error, got {other:?}"),
    }
}

#[tokio::test]
async fn requests_cannot_escape_workdir() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let addr = start_server(server_dir.path()).await;

    let local = client_dir.path().join("x.bin");
    std::fs::write(&local, b"x").unwrap();
    client(addr, &client_dir)
        .upload(&local, "../../escape.bin")
        .await
        .unwrap();
    assert!(server_dir.path().join("escape.bin").exists());
}

#[tokio::test]
async fn concurrent_sessions_are_independent() {
    let server_dir = tempfile::tempdir().unwrap();
    let addr = start_server(server_dir.path()).await;
    std::fs::write(server_dir.path().join("a.bin"), pattern(5000)).unwrap();
    std::fs::write(server_dir.path().join("b.bin"), pattern(7000)).unwrap();

    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (a, b) = (client(addr, &dir_a), client(addr, &dir_b));
    let (ra, rb) = tokio::join!(a.download("a.bin"), b.download("b.bin"));

    assert_eq!(ra.unwrap(), 5000);
    assert_eq!(rb.unwrap(), 7000);
    assert_eq!(std::fs::read(dir_a.path().join("a.bin")).unwrap(), pattern(5000));
    assert_eq!(std::fs::read(dir_b.path().join("b.bin")).unwrap(), pattern(7000));
}

#[tokio::test]
async fn oversized_upload_rejected_locally() {
    let client_dir = tempfile::tempdir().unwrap();
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let local = client_dir.path().join("huge.bin");
    let file = std::fs::File::create(&local).unwrap();
    file.set_len(tftp_crc::MAX_FILE_SIZE + 1).unwrap();

    let res = client(silent.local_addr().unwrap(), &client_dir)
        .upload(&local, "huge.bin")
        .await;
    assert!(matches!(res, Err(TransferError::FileTooLarge(_))));

    // exactly MAX_FILE_SIZE cannot be terminated either
    let edge = client_dir.path().join("edge.bin");
    std::fs::File::create(&edge)
        .unwrap()
        .set_len(tftp_crc::MAX_FILE_SIZE)
        .unwrap();
    let res = client(silent.local_addr().unwrap(), &client_dir)
        .upload(&edge, "edge.bin")
        .await;
    assert!(matches!(res, Err(TransferError::FileTooLarge(_))));

    // nothing went out on the wire
    let mut buf = [0u8; 16];
    let idle = tokio::time::timeout(Duration::from_millis(100), silent.recv_from(&mut buf)).await;
    assert!(idle.is_err());
}

#[tokio::test]
async fn download_of_max_size_file_refused() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let addr = start_server(server_dir.path()).await;
    std::fs::File::create(server_dir.path().join("edge.bin"))
        .unwrap()
        .set_len(tftp_crc::MAX_FILE_SIZE)
        .unwrap();

    match client(addr, &client_dir).download("edge.bin").await {
        Err(TransferError::Peer { code, .. }) => assert_eq!(code, 3),
        other => panic!("expected refusal, got {other:?}"),
    }
}

#[tokio::test]
async fn download_without_reply_fails_once_after_timeout() {
    let client_dir = tempfile::tempdir().unwrap();
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let start = Instant::now();
    let res = client(silent.local_addr().unwrap(), &client_dir)
        .download("a.bin")
        .await;
    assert!(matches!(res, Err(TransferError::Timeout(_))));
    assert!(start.elapsed() >= client_config().data_timeout);

    // one RRQ, never re-sent
    match recv_raw(&silent).await {
        TftpPacket::Request { op, filename, .. } => {
            assert_eq!(op, RequestOp::Read);
            assert_eq!(filename, "a.bin");
        }
        other => panic!("expected RRQ, got {other:?}"),
    }
    let mut buf = [0u8; 64];
    let again = tokio::time::timeout(Duration::from_millis(100), silent.recv_from(&mut buf)).await;
    assert!(again.is_err());
}

#[tokio::test]
async fn file_in_transfer_is_not_shared() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let addr = start_server(server_dir.path()).await;
    let client = client(addr, &client_dir);
    let local = client_dir.path().join("mine.bin");
    std::fs::write(&local, pattern(3000)).unwrap();

    // a first writer holds shared.bin open without finishing
    let writer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    writer
        .send_to(b"\x00\x02shared.bin\x00octet\x00", addr)
        .await
        .unwrap();
    let mut buf = [0u8; 64];
    let (n, transfer) = tokio::time::timeout(Duration::from_secs(2), writer.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], &[0, 4, 0, 0]);

    match client.upload(&local, "shared.bin").await {
        Err(TransferError::Peer { code, .. }) => assert_ne!(code, 0),
        other => panic!("second writer accepted: {other:?}"),
    }
    match client.download("shared.bin").await {
        Err(TransferError::Peer { code, .. }) => assert_ne!(code, 0),
        other => panic!("reader accepted during write: {other:?}"),
    }
    match client.delete("shared.bin").await {
        Err(TransferError::Peer { code, .. }) => assert_ne!(code, 0),
        other => panic!("delete accepted during write: {other:?}"),
    }

    writer
        .send_to(
            &TftpPacket::DATA {
                block: 1,
                data: b"first".to_vec(),
            }
            .serialize(),
            transfer,
        )
        .await
        .unwrap();
    assert_eq!(recv_raw(&writer).await, TftpPacket::ACK(1));

    // the slot frees once the first session has wrapped up
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        match client.upload(&local, "shared.bin").await {
            Ok(size) => {
                assert_eq!(size, 3000);
                break;
            }
            Err(_) if Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("slot never freed: {e}"),
        }
    }
    assert_eq!(
        std::fs::read(server_dir.path().join("shared.bin")).unwrap(),
        pattern(3000)
    );
}

#[tokio::test]
async fn delete_existing_and_missing() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let addr = start_server(server_dir.path()).await;
    let client = client(addr, &client_dir);
    std::fs::write(server_dir.path().join("old.log"), b"bye").unwrap();

    let msg = client.delete("old.log").await.expect("delete existing");
    assert_eq!(msg, "File deleted successfully");
    assert!(!server_dir.path().join("old.log").exists());

    match client.delete("old.log").await {
        Err(TransferError::Peer { code, .. }) => assert_ne!(code, 0),
        other => panic!("expected refusal, got {other:?}"),
    }

    // still serving
    client.ping().await.expect("server alive after deletes");
}

#[tokio::test]
async fn ping_live_server() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let addr = start_server(server_dir.path()).await;

    let rtt = client(addr, &client_dir).ping().await.expect("ping");
    assert!(rtt < client_config().data_timeout);
}

#[tokio::test]
async fn ping_without_listener_fails_once_after_timeout() {
    let client_dir = tempfile::tempdir().unwrap();
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let start = Instant::now();
    let res = client(silent.local_addr().unwrap(), &client_dir).ping().await;
    assert!(matches!(res, Err(TransferError::Timeout(_))));
    assert!(start.elapsed() >= client_config().data_timeout);

    // exactly one request, no retry
    assert!(matches!(recv_raw(&silent).await, TftpPacket::Request { .. }));
    let mut buf = [0u8; 64];
    let again = tokio::time::timeout(Duration::from_millis(100), silent.recv_from(&mut buf)).await;
    assert!(again.is_err());
}

#[tokio::test]
async fn illegal_opcode_gets_error_and_server_continues() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let addr = start_server(server_dir.path()).await;
    let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    for datagram in [&b"\x00\x09file\x00"[..], &[0, 4, 0, 1][..], &[0, 3, 0, 1, 0][..]] {
        raw.send_to(datagram, addr).await.unwrap();
        assert_eq!(
            recv_raw(&raw).await,
            TftpPacket::ERROR {
                code: 4,
                msg: "Illegal TFTP operation".to_string()
            }
        );
    }

    client(addr, &client_dir).ping().await.expect("still serving");
}

#[tokio::test]
async fn ping_reply_is_empty_block_from_ephemeral_port() {
    let server_dir = tempfile::tempdir().unwrap();
    let addr = start_server(server_dir.path()).await;
    let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    raw.send_to(b"\x00\x01__ping__\x00", addr).await.unwrap();
    let mut buf = [0u8; 64];
    let (n, from) = tokio::time::timeout(Duration::from_secs(2), raw.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], &[0, 3, 0, 1, 0]);
    assert_ne!(from.port(), addr.port());
}

#[tokio::test]
async fn unsupported_mode_rejected() {
    let server_dir = tempfile::tempdir().unwrap();
    let addr = start_server(server_dir.path()).await;
    std::fs::write(server_dir.path().join("f.txt"), b"text").unwrap();
    let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    raw.send_to(b"\x00\x01f.txt\x00netascii\x00", addr).await.unwrap();
    let mut buf = [0u8; 128];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), raw.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..2], &[0, 5]);
    assert!(std::str::from_utf8(&buf[4..n - 1])
        .unwrap()
        .contains("netascii"));
}

#[tokio::test]
async fn shell_runs_scripted_session() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let addr = start_server(server_dir.path()).await;
    std::fs::write(server_dir.path().join("gone.txt"), b"x").unwrap();

    let script: &[u8] = b"3\ngone.txt\n9\n4\n";
    run_shell(&client(addr, &client_dir), script)
        .await
        .expect("shell");
    assert!(!server_dir.path().join("gone.txt").exists());
}
