//! Test HTTP endpoint that accepts anything
//!
//! Answers every request with `200 OK` and logs what it received, so the
//! uplink can be exercised without a real backend.

use anyhow::{Context, Result};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;

const READ_CHUNK: usize = 4096;
const MAX_HEAD: usize = 16 * 1024;

/// One received HTTP request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Request {
    /// Header value, name matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            201 => "Created",
            400 => "Bad Request",
            401 => "Unauthorized",
            404 => "Not Found",
            500 => "Internal Server Error",
            _ => "Unknown",
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Read one request: the head, then as much body as `Content-Length` announces.
/// `None` when the peer closed without sending anything.
pub async fn read_request<R: AsyncRead + Unpin>(stream: &mut R) -> io::Result<Option<Request>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    let head_end = loop {
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEAD {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "request head too large"));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let want = (content_length - body.len()).min(READ_CHUNK);
        let n = stream.read(&mut chunk[..want]).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(Some(Request {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    }))
}

pub async fn write_response<W: AsyncWrite + Unpin>(
    stream: &mut W,
    response: &Response,
) -> io::Result<()> {
    let text = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.status,
        response.reason(),
        response.body.len(),
        response.body
    );
    stream.write_all(text.as_bytes()).await?;
    stream.flush().await
}

/// Accept connections until `shutdown` flips, answering each with `respond`
pub async fn serve_with<F>(listener: TcpListener, mut shutdown: watch::Receiver<bool>, respond: F)
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    let respond = Arc::new(respond);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((mut stream, peer)) => {
                    let respond = respond.clone();
                    tokio::spawn(async move {
                        match read_request(&mut stream).await {
                            Ok(Some(request)) => {
                                let response = respond(&request);
                                if let Err(e) = write_response(&mut stream, &response).await {
                                    tracing::warn!("Failed to answer {}: {}", peer, e);
                                }
                            }
                            Ok(None) => {}
                            Err(e) => tracing::warn!("Bad request from {}: {}", peer, e),
                        }
                    });
                }
                Err(e) => tracing::warn!("Accept failed: {}", e),
            }
        }
    }
}

fn log_request(request: &Request) -> Response {
    tracing::info!(
        "{} {} ({} bytes)\n{}",
        request.method,
        request.path,
        request.body.len(),
        request.body
    );
    Response::ok()
}

/// Echo every request on `port` until `shutdown` flips
pub async fn run(port: u16, shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    tracing::info!("Server listening on port {}", port);
    serve_with(listener, shutdown, log_request).await;
    tracing::info!("Server stopped");
    Ok(())
}

/// Serve `respond` on an ephemeral local port, forwarding every request
#[cfg(test)]
pub(crate) async fn spawn_scripted<F>(
    respond: F,
) -> (
    std::net::SocketAddr,
    tokio::sync::mpsc::UnboundedReceiver<Request>,
)
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        // keep the server alive for the whole test
        let _shutdown_tx = shutdown_tx;
        serve_with(listener, shutdown_rx, move |request| {
            let _ = tx.send(request.clone());
            respond(request)
        })
        .await;
    });
    (addr, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_read_request_with_split_body() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            client
                .write_all(b"POST /data HTTP/1.1\r\nHost: x\r\ncontent-length: 11\r\n\r\nhello")
                .await
                .unwrap();
            client.write_all(b" world").await.unwrap();
        });

        let request = read_request(&mut server).await.unwrap().unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/data");
        assert_eq!(request.header("Content-Length"), Some("11"));
        assert_eq!(request.body, "hello world");
    }

    #[tokio::test]
    async fn test_read_request_closed_early() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_request(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_echo_answers_ok() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(serve_with(listener, shutdown_rx, log_request));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\n{}")
            .await
            .unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.contains("Content-Length: 2\r\n"));
        assert!(reply.ends_with("\r\n\r\nOK"));

        shutdown_tx.send(true).unwrap();
        server.await.unwrap();
    }
}
