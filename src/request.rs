//! The HTTP surface of the handshake: request construction for the client, request/response
//! parsing for both sides, built with `httparse` plus hand-built strings for the parts httparse
//! doesn't render for you (no general HTTP server lives here).

use crate::error::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};
use url::Url;

const MAX_HEADER_BYTES: usize = 16 << 10;

pub(crate) struct ParsedUrl {
    pub host_header: String,
    pub connect_addr: String,
    pub host: String,
    pub path: String,
    pub use_tls: bool,
}

pub(crate) fn parse_ws_url(ws_url: &str) -> Result<ParsedUrl, Error> {
    let parsed = Url::parse(ws_url)?;
    let use_tls = match parsed.scheme() {
        "ws" => false,
        "wss" => true,
        _ => return Err(Error::InvalidSchemeURL),
    };
    let default_port = if use_tls { 443 } else { 80 };
    let host = parsed.host_str().ok_or(Error::URLNoHost)?.to_string();
    let port = parsed.port().unwrap_or(default_port);
    let host_header = match parsed.port() {
        Some(p) => format!("{host}:{p}"),
        None => host.clone(),
    };
    let connect_addr = format!("{host}:{port}");
    let path = match parsed.query() {
        Some(q) => format!("{}?{}", parsed.path(), q),
        None => parsed.path().to_string(),
    };
    Ok(ParsedUrl {
        host_header,
        connect_addr,
        host,
        path,
        use_tls,
    })
}

pub(crate) fn build_request(
    parsed: &ParsedUrl,
    key: &str,
    subprotocols: &[String],
    extra_headers: &[(String, String)],
) -> String {
    let mut request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n",
        parsed.path, parsed.host_header, key,
    );
    if !subprotocols.is_empty() {
        request.push_str(&format!(
            "Sec-WebSocket-Protocol: {}\r\n",
            subprotocols.join(", ")
        ));
    }
    for (name, value) in extra_headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");
    request
}

/// An HTTP request or response with owned, lowercased-nowhere header names (callers compare
/// case-insensitively via `header`/`eq_ignore_ascii_case`).
pub(crate) struct ParsedRequest {
    pub method: String,
    pub path: String,
    pub version: u8,
    headers: Vec<(String, String)>,
}

impl ParsedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

async fn read_until_headers_end<R: AsyncRead + Unpin>(
    reader: &mut R,
    deadline: Duration,
) -> Result<(Vec<u8>, usize), Error> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 512];
    let header_end = timeout(deadline, async {
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::IncompleteHTTPRequest);
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = find_header_end(&buf) {
                return Ok(pos);
            }
            if buf.len() > MAX_HEADER_BYTES {
                return Err(Error::InvalidHTTPHandshake);
            }
        }
    })
    .await
    .map_err(Error::from)??;
    Ok((buf, header_end))
}

/// Reads and parses an HTTP request off `reader`, returning it alongside any bytes already read
/// past the header terminator (the start of the first WebSocket frame, if the client pipelined
/// it right behind the handshake).
pub(crate) async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
    deadline: Duration,
) -> Result<(ParsedRequest, Vec<u8>), Error> {
    let (buf, header_end) = read_until_headers_end(reader, deadline).await?;

    let mut raw_headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut raw_headers);
    let status = req.parse(&buf[..header_end])?;
    if status.is_partial() {
        return Err(Error::IncompleteHTTPRequest);
    }

    let method = req.method.ok_or(Error::InvalidHTTPHandshake)?.to_string();
    let path = req.path.ok_or(Error::InvalidHTTPHandshake)?.to_string();
    let version = req.version.ok_or(Error::InvalidHTTPHandshake)?;
    let headers = req
        .headers
        .iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).to_string()))
        .collect();

    let prefix = buf[header_end..].to_vec();
    Ok((
        ParsedRequest {
            method,
            path,
            version,
            headers,
        },
        prefix,
    ))
}

/// Reads and parses an HTTP response off `reader` (the client side of the handshake), returning
/// status, headers, and any bytes already read past the terminator.
pub(crate) async fn read_response<R: AsyncRead + Unpin>(
    reader: &mut R,
    deadline: Duration,
) -> Result<(u16, Vec<(String, String)>, Vec<u8>), Error> {
    let (buf, header_end) = read_until_headers_end(reader, deadline).await?;

    let mut raw_headers = [httparse::EMPTY_HEADER; 32];
    let mut res = httparse::Response::new(&mut raw_headers);
    let status = res.parse(&buf[..header_end])?;
    if status.is_partial() {
        return Err(Error::IncompleteHTTPRequest);
    }

    let code = res.code.ok_or(Error::NoUpgrade)?;
    let headers = res
        .headers
        .iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).to_string()))
        .collect();

    let prefix = buf[header_end..].to_vec();
    Ok((code, headers, prefix))
}

pub(crate) async fn write_all<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &str) -> Result<(), Error> {
    writer.write_all(bytes.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ws_url_defaults_port_and_path() {
        let parsed = parse_ws_url("ws://localhost").unwrap();
        assert_eq!(parsed.host_header, "localhost");
        assert_eq!(parsed.connect_addr, "localhost:80");
        assert_eq!(parsed.path, "/");
        assert!(!parsed.use_tls);
    }

    #[test]
    fn parse_ws_url_keeps_explicit_port_and_query() {
        let parsed = parse_ws_url("wss://example.com:9443/chat?room=1").unwrap();
        assert_eq!(parsed.host_header, "example.com:9443");
        assert_eq!(parsed.connect_addr, "example.com:9443");
        assert_eq!(parsed.path, "/chat?room=1");
        assert!(parsed.use_tls);
    }

    #[test]
    fn parse_ws_url_rejects_non_ws_scheme() {
        assert!(parse_ws_url("http://localhost").is_err());
    }

    #[test]
    fn build_request_includes_upgrade_headers_and_subprotocols() {
        let parsed = parse_ws_url("ws://localhost:8080/").unwrap();
        let request = build_request(
            &parsed,
            "dGhlIHNhbXBsZSBub25jZQ==",
            &["chat".to_string()],
            &[("X-Custom".to_string(), "1".to_string())],
        );
        assert!(request.starts_with("GET / HTTP/1.1"));
        assert!(request.contains("Host: localhost:8080"));
        assert!(request.contains("Upgrade: websocket"));
        assert!(request.contains("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ=="));
        assert!(request.contains("Sec-WebSocket-Protocol: chat"));
        assert!(request.contains("X-Custom: 1"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn read_request_splits_headers_from_pipelined_bytes() {
        let mut raw = b"GET /chat HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\r\n".to_vec();
        raw.extend_from_slice(b"leftover-frame-bytes");
        let mut cursor = std::io::Cursor::new(raw);

        let (req, prefix) = read_request(&mut cursor, Duration::from_secs(1)).await.unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/chat");
        assert_eq!(req.header("host"), Some("localhost"));
        assert_eq!(prefix, b"leftover-frame-bytes");
    }

    #[tokio::test]
    async fn read_request_times_out_on_incomplete_headers() {
        let mut cursor = std::io::Cursor::new(b"GET / HTTP/1.1\r\n".to_vec());
        let result = read_request(&mut cursor, Duration::from_millis(20)).await;
        assert!(result.is_err());
    }
}
