//! Icecast side of a relay: an authenticated source connection to one mount.
//!
//! Both handshakes Icecast understands are supported: HTTP `PUT` with
//! `Expect: 100-continue` (Icecast 2.4 and later) and the legacy `SOURCE`
//! method. Once the server accepts, the socket carries raw stream bytes
//! until either side closes it.

use crate::constants::{self, DEFAULT_CONTENT_TYPE, DEFAULT_USER_AGENT, MAX_RESPONSE_HEAD_BYTES};
use crate::error::{RelayError, Result};
use crate::settings::RelaySettings;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Opens source connections to the configured mount.
#[async_trait]
pub trait SinkConnector: Send + Sync {
    async fn open(&self, info: &StreamInfo) -> Result<Box<dyn StreamSink>>;
}

/// An accepted source connection.
#[async_trait]
pub trait StreamSink: Send {
    /// Writes the whole buffer.
    ///
    /// Fails with [`RelayError::SinkWrite`] on a broken connection and with
    /// [`RelayError::Timeout`] when the write stalls.
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Disconnects cleanly. Idempotent.
    async fn close(&mut self);
}

/// Description announced to Icecast for the relayed station
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub name: String,
    pub description: String,
    /// MIME type reported by the tuner; the mount default applies when absent
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IcecastProtocol {
    /// `PUT` with `Expect: 100-continue`
    #[default]
    Put,
    /// Legacy `SOURCE` request
    Source,
}

impl std::str::FromStr for IcecastProtocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "put" | "http" => Ok(Self::Put),
            "source" | "legacy" => Ok(Self::Source),
            other => Err(format!("unknown Icecast protocol '{other}'")),
        }
    }
}

/// Where and how to push the stream
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    pub host: String,
    pub port: u16,
    /// Mount path, always starting with `/`
    pub mount: String,
    pub username: String,
    pub password: String,
    pub protocol: IcecastProtocol,
    /// Used when the tuner does not announce a content type
    pub content_type: String,
    pub public: bool,
    /// Used when a stream carries no description of its own
    pub description: String,
}

impl MountConfig {
    pub fn new(host: impl Into<String>, port: u16, mount: impl AsRef<str>) -> Self {
        Self {
            host: host.into(),
            port,
            mount: normalize_mount(mount.as_ref()),
            username: "source".to_string(),
            password: String::new(),
            protocol: IcecastProtocol::default(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            public: false,
            description: String::new(),
        }
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn protocol(mut self, protocol: IcecastProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// `host:port/mount`, for logs
    pub fn target(&self) -> String {
        format!("{}:{}{}", self.host, self.port, self.mount)
    }

    fn authorization(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }
}

impl fmt::Debug for MountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("mount", &self.mount)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("protocol", &self.protocol)
            .field("content_type", &self.content_type)
            .field("public", &self.public)
            .finish()
    }
}

pub fn normalize_mount(mount: &str) -> String {
    let trimmed = mount.trim().trim_start_matches('/');
    format!("/{trimmed}")
}

/// Raw TCP [`SinkConnector`] speaking the Icecast source protocol
#[derive(Debug, Clone)]
pub struct IcecastSinkClient {
    mount: MountConfig,
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl IcecastSinkClient {
    pub fn new(mount: MountConfig, settings: &RelaySettings) -> Self {
        Self {
            mount,
            connect_timeout: settings.connect_timeout,
            write_timeout: settings.write_timeout,
        }
    }

    pub fn mount(&self) -> &MountConfig {
        &self.mount
    }

    fn request(&self, info: &StreamInfo) -> String {
        let m = &self.mount;
        let content_type = info
            .content_type
            .as_deref()
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or(&m.content_type);
        let description = if info.description.is_empty() {
            &m.description
        } else {
            &info.description
        };

        let mut request = match m.protocol {
            IcecastProtocol::Put => format!("PUT {} HTTP/1.1\r\n", m.mount),
            IcecastProtocol::Source => format!("SOURCE {} HTTP/1.0\r\n", m.mount),
        };
        let mut header = |name: &str, value: &str| {
            request.push_str(name);
            request.push_str(": ");
            request.push_str(&sanitize(value));
            request.push_str("\r\n");
        };
        header("Host", &format!("{}:{}", m.host, m.port));
        header("Authorization", &m.authorization());
        header("User-Agent", DEFAULT_USER_AGENT);
        header("Content-Type", content_type);
        header("Ice-Name", &info.name);
        header("Ice-Description", description);
        header("Ice-Public", if m.public { "1" } else { "0" });
        if m.protocol == IcecastProtocol::Put {
            header("Expect", "100-continue");
        }
        request.push_str("\r\n");
        request
    }

    async fn handshake(&self, stream: &mut TcpStream, info: &StreamInfo) -> Result<()> {
        let request = self.request(info);
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| RelayError::connect(format!("{}: {e}", self.mount.target())))?;

        let response = read_response_head(stream).await?;
        let status = parse_status_line(&response).ok_or_else(|| {
            RelayError::connect(format!(
                "{}: unexpected response {:?}",
                self.mount.target(),
                response.lines().next().unwrap_or_default()
            ))
        })?;

        if is_accepted(status) {
            return Ok(());
        }

        // The reason is often only in the body, e.g. "Mountpoint in use".
        let mut text = response;
        let mut extra = [0u8; 512];
        if let Ok(Ok(n)) = timeout(Duration::from_millis(500), stream.read(&mut extra)).await {
            text.push_str(&String::from_utf8_lossy(&extra[..n]));
        }
        Err(classify_rejection(status, &text, &self.mount.target()))
    }
}

#[async_trait]
impl SinkConnector for IcecastSinkClient {
    async fn open(&self, info: &StreamInfo) -> Result<Box<dyn StreamSink>> {
        let target = self.mount.target();
        debug!(target = %target, protocol = ?self.mount.protocol, "Connecting to Icecast");

        let setup = async {
            let mut stream = TcpStream::connect((self.mount.host.as_str(), self.mount.port))
                .await
                .map_err(|e| RelayError::connect(format!("{target}: {e}")))?;
            stream.set_nodelay(true).ok();
            self.handshake(&mut stream, info).await?;
            Ok::<_, RelayError>(stream)
        };

        let stream = timeout(self.connect_timeout, setup).await.map_err(|_| {
            RelayError::connect(format!(
                "{target}: no answer within {:?}",
                self.connect_timeout
            ))
        })??;

        info!(target = %target, name = %info.name, "Icecast accepted source connection");
        Ok(Box::new(IcecastConnection {
            target,
            stream: Some(stream),
            write_timeout: self.write_timeout,
        }))
    }
}

/// An accepted Icecast source socket
pub struct IcecastConnection {
    target: String,
    stream: Option<TcpStream>,
    write_timeout: Duration,
}

#[async_trait]
impl StreamSink for IcecastConnection {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| RelayError::sink_write(format!("{} is closed", self.target)))?;

        match timeout(self.write_timeout, stream.write_all(bytes)).await {
            Err(_) => Err(RelayError::timeout(format!(
                "write to {} stalled for {:?}",
                self.target, self.write_timeout
            ))),
            Ok(Err(e)) => Err(RelayError::sink_write(format!("{}: {e}", self.target))),
            Ok(Ok(())) => Ok(()),
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            match timeout(constants::sink_close_timeout(), stream.shutdown()).await {
                Ok(Ok(())) => debug!(target = %self.target, "Icecast connection closed"),
                Ok(Err(e)) => debug!(target = %self.target, "Icecast shutdown error: {e}"),
                Err(_) => warn!(target = %self.target, "Icecast shutdown timed out, dropping socket"),
            }
        }
    }
}

async fn read_response_head(stream: &mut TcpStream) -> Result<String> {
    let mut head = Vec::with_capacity(256);
    let mut buf = [0u8; 512];
    loop {
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| RelayError::connect(format!("reading Icecast response: {e}")))?;
        if n == 0 {
            if head.is_empty() {
                return Err(RelayError::connect("Icecast closed the connection without answering"));
            }
            break;
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") || head.len() >= MAX_RESPONSE_HEAD_BYTES {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

/// Status code of an `HTTP/1.x NNN reason` line
fn parse_status_line(response: &str) -> Option<u16> {
    let line = response.lines().next()?;
    let mut parts = line.split_whitespace();
    let protocol = parts.next()?;
    if !protocol.starts_with("HTTP/") && protocol != "ICY" {
        return None;
    }
    parts.next()?.parse().ok()
}

fn is_accepted(status: u16) -> bool {
    status == 100 || (200..300).contains(&status)
}

fn classify_rejection(status: u16, text: &str, target: &str) -> RelayError {
    let lowered = text.to_lowercase();
    match status {
        401 => RelayError::Auth(format!("{target}: credentials rejected")),
        409 => RelayError::MountBusy(format!("{target}: mount already has a source")),
        403 if lowered.contains("in use") => {
            RelayError::MountBusy(format!("{target}: mountpoint in use"))
        }
        _ => {
            let reason = text.lines().next().unwrap_or_default().trim().to_string();
            RelayError::connect(format!("{target}: rejected with {reason}"))
        }
    }
}

/// Header values must not break the request framing
fn sanitize(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}
