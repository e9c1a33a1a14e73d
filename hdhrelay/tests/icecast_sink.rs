use hdhrelay::{
    ErrorKind, IcecastProtocol, IcecastSinkClient, MountConfig, RelaySettings, SinkConnector,
    StreamInfo,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Accepts one source connection, answers the handshake with `reply` and
/// returns everything the client sent.
async fn fake_icecast(reply: &'static str) -> (u16, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = read_head(&mut socket).await;
        socket.write_all(reply.as_bytes()).await.unwrap();

        let mut rest = Vec::new();
        let _ = tokio::time::timeout(Duration::from_secs(2), socket.read_to_end(&mut rest)).await;
        received.push_str(&String::from_utf8_lossy(&rest));
        received
    });

    (port, handle)
}

async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 256];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.unwrap();
        assert!(n > 0, "client closed before finishing its request");
        head.extend_from_slice(&buf[..n]);
    }
    String::from_utf8_lossy(&head).into_owned()
}

fn client(port: u16, protocol: IcecastProtocol) -> IcecastSinkClient {
    let mut mount = MountConfig::new("127.0.0.1", port, "/radio")
        .credentials("source", "hackme")
        .protocol(protocol);
    mount.description = "Relayed from the tuner".into();
    let settings = RelaySettings {
        connect_timeout: Duration::from_secs(2),
        ..RelaySettings::default()
    };
    IcecastSinkClient::new(mount, &settings)
}

fn info() -> StreamInfo {
    StreamInfo {
        name: "BBC Radio 4".into(),
        description: String::new(),
        content_type: Some("audio/aac".into()),
    }
}

#[tokio::test]
async fn test_put_handshake_then_stream() {
    let (port, server) = fake_icecast("HTTP/1.1 100 Continue\r\n\r\n").await;

    let mut sink = client(port, IcecastProtocol::Put).open(&info()).await.unwrap();
    sink.write(b"first").await.unwrap();
    sink.write(b"-second").await.unwrap();
    sink.close().await;
    sink.close().await;

    let received = server.await.unwrap();
    assert!(received.starts_with("PUT /radio HTTP/1.1\r\n"));
    assert!(received.contains("Content-Type: audio/aac\r\n"));
    assert!(received.contains("Ice-Name: BBC Radio 4\r\n"));
    assert!(received.contains("Ice-Description: Relayed from the tuner\r\n"));
    assert!(received.ends_with("\r\n\r\nfirst-second"));
}

#[tokio::test]
async fn test_legacy_source_handshake() {
    let (port, server) = fake_icecast("HTTP/1.0 200 OK\r\n\r\n").await;

    let mut sink = client(port, IcecastProtocol::Source).open(&info()).await.unwrap();
    sink.write(b"payload").await.unwrap();
    sink.close().await;

    let received = server.await.unwrap();
    assert!(received.starts_with("SOURCE /radio HTTP/1.0\r\n"));
    assert!(received.ends_with("payload"));
}

#[tokio::test]
async fn test_bad_credentials() {
    let (port, _server) =
        fake_icecast("HTTP/1.0 401 Authentication Required\r\nContent-Length: 0\r\n\r\n").await;

    let err = client(port, IcecastProtocol::Put).open(&info()).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_mount_in_use() {
    let (port, _server) = fake_icecast(
        "HTTP/1.0 403 Forbidden\r\nContent-Type: text/html\r\n\r\nMountpoint in use",
    )
    .await;

    let err = client(port, IcecastProtocol::Source).open(&info()).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::MountBusy);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_connection_refused() {
    // grab a free port and release it so nothing listens there
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let err = client(port, IcecastProtocol::Put).open(&info()).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Connect);
}

#[tokio::test]
async fn test_silent_server_times_out_as_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });

    let err = client(port, IcecastProtocol::Put).open(&info()).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Connect);
}

#[tokio::test]
async fn test_write_after_peer_reset_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_head(&mut socket).await;
        socket.write_all(b"HTTP/1.0 200 OK\r\n\r\n").await.unwrap();
        drop(socket);
    });

    let mut sink = client(port, IcecastProtocol::Source).open(&info()).await.unwrap();
    server.await.unwrap();

    let chunk = vec![0u8; 64 * 1024];
    let mut failure = None;
    for _ in 0..64 {
        if let Err(err) = sink.write(&chunk).await {
            failure = Some(err);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(failure.map(|e| e.kind()), Some(ErrorKind::SinkWrite));
}
