//! Line-oriented transports for the decode feed.
//!
//! A [`Transport`] opens a connection to an [`Endpoint`] and hands back a
//! [`LineSource`] that yields one raw decode line at a time. Two transports
//! are provided:
//!
//! - [`TcpTransport`]: a plain socket carrying newline-terminated lines.
//! - [`SseTransport`]: `GET /decodes` as a server-sent event stream, where
//!   each `data: {"decode": "..."}` line carries one decode.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::api::{ApiError, FeedApi, base_url};
use crate::decode::Band;

/// Default feed host.
pub const DEFAULT_HOST: &str = "192.168.1.100";

/// Default feed port.
pub const DEFAULT_PORT: u16 = 8080;

/// Prefix of SSE lines that carry a payload.
const SSE_DATA_PREFIX: &str = "data: ";

/// Host and port of a decode feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Errors raised while connecting to or reading from a feed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection timeout")]
    ConnectTimeout,

    #[error("Read timeout, connection may be stale")]
    ReadTimeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response status: {0}")]
    Status(StatusCode),
}

/// A connected feed yielding raw decode lines.
pub trait LineSource: Send {
    /// The next line without its terminator, or `None` at end of stream.
    fn next_line(&mut self) -> impl Future<Output = Result<Option<String>, TransportError>> + Send;
}

/// Opens connections to a decode feed.
pub trait Transport: Send + Sync + 'static {
    type Lines: LineSource + 'static;

    /// Open a new connection to `endpoint`.
    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Self::Lines, TransportError>> + Send;

    /// Announce the operator's band on the feed's side channel.
    fn announce_band(
        &self,
        endpoint: &Endpoint,
        band: Band,
    ) -> impl Future<Output = Result<(), ApiError>> + Send {
        async move {
            FeedApi::new(&endpoint.host, endpoint.port)?
                .announce_band(band)
                .await
        }
    }
}

/// Which transport to use for the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Newline-delimited decodes on a plain TCP socket.
    Tcp,
    /// Server-sent events from `GET /decodes`.
    #[default]
    Sse,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Sse => write!(f, "sse"),
        }
    }
}

/// Timeouts shared by the built-in transports.
#[derive(Debug, Clone, Copy)]
pub struct TransportTimeouts {
    /// Limit on establishing the connection.
    pub connect: Duration,
    /// Limit on waiting for the next line or chunk.
    pub read: Duration,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            read: Duration::from_secs(120),
        }
    }
}

/// Plain TCP transport.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    timeouts: TransportTimeouts,
}

impl TcpTransport {
    pub fn new(timeouts: TransportTimeouts) -> Self {
        Self { timeouts }
    }
}

/// Lines read from a TCP socket.
pub struct TcpLines {
    reader: BufReader<TcpStream>,
    buf: Vec<u8>,
    read_timeout: Duration,
}

impl Transport for TcpTransport {
    type Lines = TcpLines;

    async fn connect(&self, endpoint: &Endpoint) -> Result<TcpLines, TransportError> {
        let addr = endpoint.to_string();
        let stream = timeout(self.timeouts.connect, TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout)??;

        Ok(TcpLines {
            reader: BufReader::new(stream),
            buf: Vec::with_capacity(256),
            read_timeout: self.timeouts.read,
        })
    }
}

impl LineSource for TcpLines {
    async fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        self.buf.clear();

        match timeout(self.read_timeout, self.reader.read_until(b'\n', &mut self.buf)).await {
            Ok(Ok(0)) => Ok(None),
            Ok(Ok(_)) => {
                let line = String::from_utf8_lossy(&self.buf);
                Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(TransportError::ReadTimeout),
        }
    }
}

/// Server-sent events transport over HTTP.
#[derive(Debug, Clone)]
pub struct SseTransport {
    http: reqwest::Client,
    timeouts: TransportTimeouts,
}

impl SseTransport {
    pub fn new(timeouts: TransportTimeouts) -> Result<Self, TransportError> {
        // No overall request timeout: the response body never ends.
        let http = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .build()?;
        Ok(Self { http, timeouts })
    }
}

/// Decode lines extracted from an SSE response body.
pub struct SseLines {
    response: reqwest::Response,
    buf: Vec<u8>,
    read_timeout: Duration,
}

impl Transport for SseTransport {
    type Lines = SseLines;

    async fn connect(&self, endpoint: &Endpoint) -> Result<SseLines, TransportError> {
        let url = format!("{}/decodes", base_url(&endpoint.host, endpoint.port));
        debug!("Opening event stream {}", url);

        let request = self
            .http
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .send();
        let response = timeout(self.timeouts.connect, request)
            .await
            .map_err(|_| TransportError::ConnectTimeout)??;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status()));
        }

        Ok(SseLines {
            response,
            buf: Vec::with_capacity(1024),
            read_timeout: self.timeouts.read,
        })
    }
}

impl LineSource for SseLines {
    async fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw);
                if let Some(decode) = decode_sse_line(line.trim_end_matches(['\r', '\n'])) {
                    return Ok(Some(decode));
                }
            }

            match timeout(self.read_timeout, self.response.chunk()).await {
                Ok(Ok(Some(chunk))) => self.buf.extend_from_slice(&chunk),
                // A trailing partial line is not a complete event.
                Ok(Ok(None)) => return Ok(None),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(TransportError::ReadTimeout),
            }
        }
    }
}

#[derive(Deserialize)]
struct SsePayload {
    decode: String,
}

/// Extract the decode line carried by one SSE line.
///
/// Returns `None` for keepalives, comments, blank lines and payloads that
/// are not `{"decode": "..."}`.
///
/// ```
/// use ft8_feed::transport::decode_sse_line;
///
/// assert_eq!(
///     decode_sse_line(r#"data: {"decode": "K1ABC FN42 -5"}"#).as_deref(),
///     Some("K1ABC FN42 -5")
/// );
/// assert_eq!(decode_sse_line(": keepalive"), None);
/// ```
pub fn decode_sse_line(line: &str) -> Option<String> {
    let payload = line.strip_prefix(SSE_DATA_PREFIX)?;
    match serde_json::from_str::<SsePayload>(payload) {
        Ok(p) => Some(p.decode),
        Err(e) => {
            debug!("Ignoring malformed event payload '{}': {}", payload, e);
            None
        }
    }
}

/// Either built-in transport, chosen at runtime.
#[derive(Debug, Clone)]
pub enum FeedTransport {
    Tcp(TcpTransport),
    Sse(SseTransport),
}

impl FeedTransport {
    pub fn new(kind: TransportKind, timeouts: TransportTimeouts) -> Result<Self, TransportError> {
        Ok(match kind {
            TransportKind::Tcp => FeedTransport::Tcp(TcpTransport::new(timeouts)),
            TransportKind::Sse => FeedTransport::Sse(SseTransport::new(timeouts)?),
        })
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            FeedTransport::Tcp(_) => TransportKind::Tcp,
            FeedTransport::Sse(_) => TransportKind::Sse,
        }
    }
}

/// Lines from either built-in transport.
pub enum FeedLines {
    Tcp(TcpLines),
    Sse(SseLines),
}

impl Transport for FeedTransport {
    type Lines = FeedLines;

    async fn connect(&self, endpoint: &Endpoint) -> Result<FeedLines, TransportError> {
        match self {
            FeedTransport::Tcp(t) => t.connect(endpoint).await.map(FeedLines::Tcp),
            FeedTransport::Sse(t) => t.connect(endpoint).await.map(FeedLines::Sse),
        }
    }
}

impl LineSource for FeedLines {
    async fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        match self {
            FeedLines::Tcp(lines) => lines.next_line().await,
            FeedLines::Sse(lines) => lines.next_line().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Consume an HTTP request head so closing the socket does not reset it.
    async fn read_request_head(socket: &mut TcpStream) {
        let mut head = Vec::new();
        let mut buf = [0u8; 512];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            head.extend_from_slice(&buf[..n]);
        }
    }

    fn short_timeouts() -> TransportTimeouts {
        TransportTimeouts {
            connect: Duration::from_secs(5),
            read: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::new("localhost", 8080).to_string(), "localhost:8080");
        assert_eq!(Endpoint::default().to_string(), "192.168.1.100:8080");
    }

    #[test]
    fn test_decode_sse_line() {
        assert_eq!(
            decode_sse_line(r#"data: {"decode": "134500 -12 0.3 1234 ~ CQ K1ABC FN42"}"#),
            Some("134500 -12 0.3 1234 ~ CQ K1ABC FN42".to_string())
        );
        assert_eq!(decode_sse_line(""), None);
        assert_eq!(decode_sse_line(": keepalive"), None);
        assert_eq!(decode_sse_line("event: decode"), None);
        assert_eq!(decode_sse_line("data:{\"decode\":\"x\"}"), None);
        assert_eq!(decode_sse_line("data: not json"), None);
        assert_eq!(decode_sse_line(r#"data: {"other": "x"}"#), None);
    }

    #[tokio::test]
    async fn test_tcp_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"K1ABC FN42 -5\r\n\n134500 -12 0.3 1234 ~ CQ K1ABC FN42\n")
                .await
                .unwrap();
        });

        let transport = TcpTransport::new(short_timeouts());
        let mut lines = transport
            .connect(&Endpoint::new("127.0.0.1", port))
            .await
            .unwrap();

        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("K1ABC FN42 -5"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("134500 -12 0.3 1234 ~ CQ K1ABC FN42")
        );
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = TcpTransport::new(short_timeouts());
        let result = transport.connect(&Endpoint::new("127.0.0.1", port)).await;
        assert!(matches!(result, Err(TransportError::Io(_))));
    }

    #[tokio::test]
    async fn test_sse_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request_head(&mut socket).await;
            let body = concat!(
                ": keepalive\n\n",
                "data: {\"decode\": \"K1ABC FN42 -5\"}\n\n",
                "data: {\"decode\": \"W1AW EN82 +3\"}\r\n\r\n",
            );
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let transport = SseTransport::new(short_timeouts()).unwrap();
        let mut lines = transport
            .connect(&Endpoint::new("127.0.0.1", port))
            .await
            .unwrap();

        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("K1ABC FN42 -5"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("W1AW EN82 +3"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sse_rejects_error_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request_head(&mut socket).await;
            socket
                .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
        });

        let transport = SseTransport::new(short_timeouts()).unwrap();
        let result = transport.connect(&Endpoint::new("127.0.0.1", port)).await;
        assert!(matches!(
            result,
            Err(TransportError::Status(StatusCode::NOT_FOUND))
        ));
    }
}
