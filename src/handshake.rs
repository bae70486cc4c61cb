//! The RFC 6455 opening handshake: client `connect_async`, server `accept_async`.

use crate::config::{AcceptOptions, DialOptions};
use crate::connection::Connection;
use crate::error::Error;
use crate::request::{self, ParsedRequest};
use crate::stream::WebSocketStream;
use crate::utils::{generate_websocket_accept_value, generate_websocket_key};
use pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::Duration;
use tokio_rustls::TlsConnector;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Dials `url` (`ws://` or `wss://`) and performs the client opening handshake.
pub async fn connect_async(url: &str) -> Result<Arc<Connection>, Error> {
    connect_async_with_config(url, DialOptions::default()).await
}

pub async fn connect_async_with_config(url: &str, opts: DialOptions) -> Result<Arc<Connection>, Error> {
    let parsed = request::parse_ws_url(url)?;
    let tcp = TcpStream::connect(&parsed.connect_addr).await?;

    let mut stream = if parsed.use_tls {
        let connector = match &opts.tls_connector {
            Some(c) => TlsConnector::from(c.clone()),
            None => TlsConnector::from(Arc::new(default_client_tls_config())),
        };
        let server_name = ServerName::try_from(parsed.host.clone()).map_err(|_| Error::URLNoHost)?;
        let tls = connector.connect(server_name, tcp).await?;
        WebSocketStream::ClientTls(Box::new(tls))
    } else {
        WebSocketStream::Plain(tcp)
    };

    let key = generate_websocket_key();
    let request = request::build_request(&parsed, &key, &opts.subprotocols, &opts.headers);
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let (status, headers, prefix) = request::read_response(&mut stream, HANDSHAKE_TIMEOUT).await?;
    if status != 101 {
        return Err(Error::NoUpgrade);
    }

    let upgrade = find_header(&headers, "upgrade").ok_or(Error::NoUpgrade)?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::NoUpgrade);
    }
    let connection_hdr = find_header(&headers, "connection").ok_or(Error::NoUpgrade)?;
    if !header_contains_token(&connection_hdr, "upgrade") {
        return Err(Error::NoUpgrade);
    }
    let accept = find_header(&headers, "sec-websocket-accept").ok_or(Error::InvalidAcceptKey)?;
    if accept != generate_websocket_accept_value(key) {
        return Err(Error::InvalidAcceptKey);
    }

    let negotiated = match find_header(&headers, "sec-websocket-protocol") {
        Some(p) => {
            if !opts.subprotocols.iter().any(|s| s.eq_ignore_ascii_case(&p)) {
                return Err(Error::InvalidSubprotocol);
            }
            p
        }
        None => String::new(),
    };

    Ok(Connection::new(stream, true, opts.config, negotiated, prefix))
}

/// Performs the server opening handshake over an already-accepted stream.
pub async fn accept_async(stream: WebSocketStream) -> Result<Arc<Connection>, Error> {
    accept_async_with_config(stream, AcceptOptions::default()).await
}

pub async fn accept_async_with_config(
    mut stream: WebSocketStream,
    opts: AcceptOptions,
) -> Result<Arc<Connection>, Error> {
    match accept_inner(&mut stream, &opts).await {
        Ok((subprotocol, prefix)) => Ok(Connection::new(stream, false, opts.config, subprotocol, prefix)),
        Err(e) => {
            let _ = write_error_response(&mut stream, &e).await;
            Err(e)
        }
    }
}

async fn accept_inner(
    stream: &mut WebSocketStream,
    opts: &AcceptOptions,
) -> Result<(String, Vec<u8>), Error> {
    let (req, prefix) = request::read_request(stream, HANDSHAKE_TIMEOUT).await?;
    validate_request(&req)?;

    let key = req
        .header("sec-websocket-key")
        .ok_or(Error::NoSecWebsocketKey)?
        .to_string();
    let host = req.header("host").ok_or(Error::NoHostHeaderPresent)?.to_string();

    if !opts.insecure_skip_verify {
        check_origin(&req, &host, &opts.origin_patterns)?;
    }

    let requested: Vec<String> = req
        .header("sec-websocket-protocol")
        .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();
    let negotiated = opts
        .subprotocols
        .iter()
        .find(|p| requested.iter().any(|r| r.eq_ignore_ascii_case(p)))
        .cloned()
        .unwrap_or_default();

    let accept_value = generate_websocket_accept_value(key);
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept_value}\r\n"
    );
    if !negotiated.is_empty() {
        response.push_str(&format!("Sec-WebSocket-Protocol: {negotiated}\r\n"));
    }
    response.push_str("\r\n");
    request::write_all(stream, &response).await?;

    Ok((negotiated, prefix))
}

fn validate_request(req: &ParsedRequest) -> Result<(), Error> {
    if !req.method.eq_ignore_ascii_case("GET") {
        return Err(Error::InvalidHTTPHandshake);
    }
    if req.version < 1 {
        return Err(Error::InvalidHTTPHandshake);
    }
    let upgrade = req.header("upgrade").ok_or(Error::NoUpgradeHeaderPresent)?;
    if !header_contains_token(upgrade, "websocket") {
        return Err(Error::NoUpgradeHeaderPresent);
    }
    let connection_hdr = req.header("connection").ok_or(Error::NoConnectionHeaderPresent)?;
    if !header_contains_token(connection_hdr, "upgrade") {
        return Err(Error::NoConnectionHeaderPresent);
    }
    let version = req
        .header("sec-websocket-version")
        .ok_or(Error::UnsupportedVersion)?;
    if version.trim() != "13" {
        return Err(Error::UnsupportedVersion);
    }
    Ok(())
}

fn check_origin(req: &ParsedRequest, host: &str, origin_patterns: &[String]) -> Result<(), Error> {
    let Some(origin) = req.header("origin") else {
        return Ok(());
    };
    let Ok(origin_url) = url::Url::parse(origin) else {
        return Ok(());
    };
    let Some(origin_host) = origin_url.host_str() else {
        return Ok(());
    };
    let request_host = host.split(':').next().unwrap_or(host);
    let same_origin = origin_host.eq_ignore_ascii_case(request_host);
    let allowed = origin_patterns.iter().any(|p| p.eq_ignore_ascii_case(origin_host));
    if same_origin || allowed {
        Ok(())
    } else {
        Err(Error::OriginNotAllowed)
    }
}

async fn write_error_response(stream: &mut WebSocketStream, err: &Error) -> Result<(), Error> {
    let (status, reason) = match err {
        Error::OriginNotAllowed => (403, "Forbidden"),
        Error::InvalidHTTPHandshake
        | Error::NoUpgradeHeaderPresent
        | Error::NoConnectionHeaderPresent
        | Error::NoHostHeaderPresent
        | Error::NoSecWebsocketKey
        | Error::UnsupportedVersion => (400, "Bad Request"),
        _ => (500, "Internal Server Error"),
    };
    let body = format!("{reason}\n");
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    request::write_all(stream, &response).await
}

fn find_header(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
}

fn header_contains_token(value: &str, token: &str) -> bool {
    value.split(',').any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn default_client_tls_config() -> ClientConfig {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> ParsedRequest {
        ParsedRequest {
            method: "GET".to_string(),
            path: "/".to_string(),
            version: 1,
            headers: vec![
                ("Upgrade".to_string(), "websocket".to_string()),
                ("Connection".to_string(), "Upgrade".to_string()),
                ("Sec-WebSocket-Version".to_string(), "13".to_string()),
                ("Sec-WebSocket-Key".to_string(), "dGhlIHNhbXBsZSBub25jZQ==".to_string()),
                ("Host".to_string(), "localhost".to_string()),
            ],
        }
    }

    #[test]
    fn validate_request_accepts_well_formed_upgrade() {
        assert!(validate_request(&valid_request()).is_ok());
    }

    #[test]
    fn validate_request_rejects_non_get() {
        let mut req = valid_request();
        req.method = "POST".to_string();
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn validate_request_rejects_wrong_version() {
        let mut req = valid_request();
        req.headers.retain(|(k, _)| !k.eq_ignore_ascii_case("sec-websocket-version"));
        req.headers.push(("Sec-WebSocket-Version".to_string(), "8".to_string()));
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn validate_request_rejects_missing_upgrade_token() {
        let mut req = valid_request();
        req.headers.retain(|(k, _)| !k.eq_ignore_ascii_case("connection"));
        req.headers.push(("Connection".to_string(), "keep-alive".to_string()));
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn header_contains_token_is_case_insensitive_and_comma_separated() {
        assert!(header_contains_token("Keep-Alive, Upgrade", "upgrade"));
        assert!(!header_contains_token("keep-alive", "upgrade"));
    }

    #[test]
    fn check_origin_allows_same_origin_and_listed_patterns() {
        let mut req = valid_request();
        req.headers.push(("Origin".to_string(), "http://localhost".to_string()));
        assert!(check_origin(&req, "localhost", &[]).is_ok());

        let mut req = valid_request();
        req.headers.push(("Origin".to_string(), "http://evil.example".to_string()));
        assert!(check_origin(&req, "localhost", &[]).is_err());
        assert!(check_origin(&req, "localhost", &["evil.example".to_string()]).is_ok());
    }
}
