use crate::close::CloseError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::time::error::Elapsed;
use url::ParseError;

/// The single error type returned from every public operation in this crate.
///
/// The first error to terminate a [`crate::connection::Connection`] is stored as the terminal
/// cause and returned, cloned, from every later call on that connection.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{source}")]
    IO {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    #[error("{source}")]
    UrlParseError {
        #[from]
        source: ParseError,
    },

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: httparse::Error,
    },

    /// Peer sent (or we sent) a close frame; carries the parsed close payload.
    #[error("connection closed: {0}")]
    Close(#[from] CloseError),

    // Handshake errors
    #[error("invalid HTTP handshake request line")]
    InvalidHTTPHandshake,

    #[error("incomplete HTTP request")]
    IncompleteHTTPRequest,

    #[error("Connection: Upgrade header missing in the request")]
    NoConnectionHeaderPresent,

    #[error("Upgrade: websocket header missing in the request")]
    NoUpgradeHeaderPresent,

    #[error("Host header missing in the request")]
    NoHostHeaderPresent,

    #[error("Sec-WebSocket-Version: 13 header missing or mismatched")]
    UnsupportedVersion,

    #[error("Sec-WebSocket-Key header missing in the request")]
    NoSecWebsocketKey,

    #[error("server didn't respond with HTTP 101 Switching Protocols")]
    NoUpgrade,

    #[error("server didn't send a valid Sec-WebSocket-Accept value")]
    InvalidAcceptKey,

    #[error("server selected a subprotocol the client never offered")]
    InvalidSubprotocol,

    #[error("request Origin is not allowed to connect")]
    OriginNotAllowed,

    #[error("invalid scheme in WebSocket URL, expected ws:// or wss://")]
    InvalidSchemeURL,

    #[error("URL has no host")]
    URLNoHost,

    // Framing errors
    #[error("reserved bit set without a negotiated extension")]
    RSVNotZero,

    #[error("invalid opcode")]
    InvalidOpcode,

    #[error("control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("control frame payload can't be greater than 125 bytes")]
    ControlFramePayloadSize,

    #[error("payload length's most significant bit must be zero")]
    InvalidPayloadLength,

    #[error("server received a masked frame, or client received an unmasked frame")]
    InvalidMaskDirection,

    #[error("max frame size reached")]
    MaxFrameSize,

    #[error("max message size reached")]
    MaxMessageSize,

    #[error("close reason can't be greater than 123 bytes")]
    CloseReasonTooLong,

    #[error("invalid close status code: {0}")]
    InvalidCloseCode(u16),

    // Fragmentation errors
    #[error("incoming fragmented message but there is one already in progress")]
    FragmentedInProgress,

    #[error("invalid continuation frame: no fragmented message to continue")]
    InvalidContinuationFrame,

    // Misuse
    #[error("a reader is already active for this connection")]
    ConcurrentReader,

    #[error("a writer is already active for this connection")]
    ConcurrentWriter,

    #[error("connection already closed")]
    AlreadyClosed,

    #[error("channel communication error")]
    CommunicationError,
}

impl Clone for Error {
    /// Terminal causes get handed back out to every later caller on a connection; most variants
    /// carry data that isn't `Clone` (`io::Error`, `httparse::Error`, ...), so those collapse to
    /// an `IO` variant built from their `Display` text, while the structured variants callers
    /// actually match on (`Close`, limit and misuse kinds) round-trip exactly.
    fn clone(&self) -> Self {
        match self {
            Error::Close(e) => Error::Close(e.clone()),
            Error::InvalidHTTPHandshake => Error::InvalidHTTPHandshake,
            Error::IncompleteHTTPRequest => Error::IncompleteHTTPRequest,
            Error::NoConnectionHeaderPresent => Error::NoConnectionHeaderPresent,
            Error::NoUpgradeHeaderPresent => Error::NoUpgradeHeaderPresent,
            Error::NoHostHeaderPresent => Error::NoHostHeaderPresent,
            Error::UnsupportedVersion => Error::UnsupportedVersion,
            Error::NoSecWebsocketKey => Error::NoSecWebsocketKey,
            Error::NoUpgrade => Error::NoUpgrade,
            Error::InvalidAcceptKey => Error::InvalidAcceptKey,
            Error::InvalidSubprotocol => Error::InvalidSubprotocol,
            Error::OriginNotAllowed => Error::OriginNotAllowed,
            Error::InvalidSchemeURL => Error::InvalidSchemeURL,
            Error::URLNoHost => Error::URLNoHost,
            Error::RSVNotZero => Error::RSVNotZero,
            Error::InvalidOpcode => Error::InvalidOpcode,
            Error::ControlFramesFragmented => Error::ControlFramesFragmented,
            Error::ControlFramePayloadSize => Error::ControlFramePayloadSize,
            Error::InvalidPayloadLength => Error::InvalidPayloadLength,
            Error::InvalidMaskDirection => Error::InvalidMaskDirection,
            Error::MaxFrameSize => Error::MaxFrameSize,
            Error::MaxMessageSize => Error::MaxMessageSize,
            Error::CloseReasonTooLong => Error::CloseReasonTooLong,
            Error::InvalidCloseCode(c) => Error::InvalidCloseCode(*c),
            Error::FragmentedInProgress => Error::FragmentedInProgress,
            Error::InvalidContinuationFrame => Error::InvalidContinuationFrame,
            Error::ConcurrentReader => Error::ConcurrentReader,
            Error::ConcurrentWriter => Error::ConcurrentWriter,
            Error::AlreadyClosed => Error::AlreadyClosed,
            Error::CommunicationError => Error::CommunicationError,
            other => Error::IO {
                source: io::Error::new(io::ErrorKind::Other, other.to_string()),
            },
        }
    }
}

/// Extracts the close status code from a terminal cause, or `None` if the connection didn't end
/// with a close frame.
pub fn close_status(err: &Error) -> Option<crate::close::StatusCode> {
    match err {
        Error::Close(CloseError { code, .. }) => Some(*code),
        _ => None,
    }
}

/// Lossily downgrades a crate [`Error`] to an [`io::Error`], for the boundary crossed by
/// [`crate::read::MessageReader`]'s `AsyncRead` impl. Callers that need the structured error
/// back should prefer [`crate::read::MessageReader::take_error`] over inspecting this.
pub(crate) fn to_io_error(err: Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}
