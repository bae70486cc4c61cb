//! wsforge: an async WebSocket (RFC 6455) endpoint library for the Tokio stack.
//!
//! Performs the opening handshake, reads and writes frames, applies masking, and runs the close
//! handshake over a `tokio::net::TcpStream` or a `tokio-rustls` TLS stream. A thin `server`/
//! `event` layer on top turns accepted connections into a single stream of events for callers
//! who don't want to manage the listener loop themselves.

pub mod close;
pub mod config;
mod connection;
pub mod error;
pub mod event;
pub mod frame;
pub mod handshake;
mod mask;
pub mod message;
mod read;
mod request;
pub mod server;
pub mod split;
mod stream;
mod utils;
mod write;

pub use connection::Connection;
pub use message::{Message, MessageType};
pub use read::MessageReader;
pub use stream::WebSocketStream;
pub use write::MessageWriter;
