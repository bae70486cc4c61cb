//! Tunables for a single connection, split into options specific to accepting vs. dialing,
//! plus the `WebSocketConfig` shared by both sides of the wire.

use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_READ_LIMIT: usize = 32 << 10;
pub const DEFAULT_CONTROL_FRAME_DEADLINE: Duration = Duration::from_secs(5);
pub const DEFAULT_CLOSE_WAIT_DEADLINE: Duration = Duration::from_secs(5);

/// Frame/message size caps shared by both the server and the client side.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Caps a single frame's payload_length. `None` disables the check.
    pub max_frame_size: Option<usize>,
    /// Caps a reassembled message's total size. `None` disables the check.
    pub max_message_size: Option<usize>,
    /// The per-`reader()` message budget (see [`crate::connection::Connection::set_read_limit`]).
    pub read_limit: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_frame_size: Some(crate::frame::DEFAULT_MAX_FRAME_SIZE),
            max_message_size: Some(64 << 20),
            read_limit: DEFAULT_READ_LIMIT,
        }
    }
}

/// Options passed to [`crate::handshake::accept_async_with_config`].
#[derive(Debug, Clone, Default)]
pub struct AcceptOptions {
    /// Subprotocols this server supports, in preference order.
    pub subprotocols: Vec<String>,
    /// Disables the `Origin` check entirely. Off by default.
    pub insecure_skip_verify: bool,
    /// Case-insensitive host patterns the `Origin` header is allowed to match. Ignored when
    /// `insecure_skip_verify` is set.
    pub origin_patterns: Vec<String>,
    pub config: WebSocketConfig,
}

/// Options passed to [`crate::handshake::connect_async_with_config`].
#[derive(Clone, Default)]
pub struct DialOptions {
    /// Subprotocols this client offers, in preference order.
    pub subprotocols: Vec<String>,
    /// Extra headers sent on the upgrade request.
    pub headers: Vec<(String, String)>,
    pub config: WebSocketConfig,
    /// TLS client config used for `wss://` URLs. Defaults to a `webpki-roots`-backed config
    /// when left unset.
    pub tls_connector: Option<Arc<rustls::ClientConfig>>,
}

impl std::fmt::Debug for DialOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialOptions")
            .field("subprotocols", &self.subprotocols)
            .field("headers", &self.headers)
            .field("config", &self.config)
            .field("tls_connector", &self.tls_connector.is_some())
            .finish()
    }
}
