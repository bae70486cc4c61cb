//! Close status codes and the close-frame payload codec.
//!
//! RFC 6455 §7.4 defines the code ranges; the three-way split across the original project's own
//! files (handshake layer, connection layer, fuzz corpus) disagreed on which of 1004/1005/1006/1015
//! are "valid". We take the intersection — the most restrictive table — as normative, and use it
//! everywhere a close code is validated.

use crate::error::Error;
use std::fmt;

/// A 16-bit WebSocket close status code.
///
/// Some values (`NoStatusRcvd`, `AbnormalClosure`, `TLSHandshake`) never appear on the wire; they
/// exist so the engine can report "why the connection ended" uniformly even when no close frame
/// carrying a real code was ever exchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const NORMAL_CLOSURE: StatusCode = StatusCode(1000);
    pub const GOING_AWAY: StatusCode = StatusCode(1001);
    pub const PROTOCOL_ERROR: StatusCode = StatusCode(1002);
    pub const UNSUPPORTED_DATA: StatusCode = StatusCode(1003);
    pub const NO_STATUS_RCVD: StatusCode = StatusCode(1005);
    pub const ABNORMAL_CLOSURE: StatusCode = StatusCode(1006);
    pub const INVALID_FRAME_PAYLOAD_DATA: StatusCode = StatusCode(1007);
    pub const POLICY_VIOLATION: StatusCode = StatusCode(1008);
    pub const MESSAGE_TOO_BIG: StatusCode = StatusCode(1009);
    pub const MANDATORY_EXTENSION: StatusCode = StatusCode(1010);
    pub const INTERNAL_ERROR: StatusCode = StatusCode(1011);
    pub const SERVICE_RESTART: StatusCode = StatusCode(1012);
    pub const TRY_AGAIN_LATER: StatusCode = StatusCode(1013);
    pub const BAD_GATEWAY: StatusCode = StatusCode(1014);
    pub const TLS_HANDSHAKE: StatusCode = StatusCode(1015);

    /// True for codes RFC 6455 and IANA allow to actually appear on the wire in a close frame.
    ///
    /// Normative table: `[1000,1011] ∪ [1012,1014] ∪ [3000,4999]`, minus `{1004, 1005, 1006,
    /// 1015}` — those four are reserved for internal signaling (`NoStatusRcvd`,
    /// `AbnormalClosure`, `TLSHandshake`) or simply undefined (1004) and must never be sent or
    /// accepted as received.
    pub fn valid_wire(code: u16) -> bool {
        match code {
            1004 | 1005 | 1006 | 1015 => false,
            1000..=1011 => true,
            1012..=1014 => true,
            3000..=4999 => true,
            _ => false,
        }
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The error surfaced to a caller when a connection ends via the close handshake.
#[derive(Debug, Clone, thiserror::Error)]
#[error("close {code}: {reason}")]
pub struct CloseError {
    pub code: StatusCode,
    pub reason: String,
}

impl CloseError {
    pub fn new(code: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// The distinguished "peer closed without a payload at all" case.
    pub fn no_status_rcvd() -> Self {
        Self {
            code: StatusCode::NO_STATUS_RCVD,
            reason: String::new(),
        }
    }
}

/// Encodes a close code + reason into the frame payload: 2-byte big-endian code, then the raw
/// reason bytes. `reason` must already be at most 123 bytes (125 − 2, the control-frame cap);
/// callers that can't guarantee this should fall back to an empty-reason `InternalError` payload
/// instead of calling this, per the close handshake's documented fallback.
pub fn encode_close_payload(code: StatusCode, reason: &str) -> Result<Vec<u8>, Error> {
    if reason.len() > 123 {
        return Err(Error::CloseReasonTooLong);
    }
    if !StatusCode::valid_wire(code.as_u16()) {
        return Err(Error::InvalidCloseCode(code.as_u16()));
    }
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.as_u16().to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    Ok(payload)
}

/// Decodes a close-frame payload. An empty payload is the `NoStatusRcvd` sentinel, matching the
/// base spec's rule that peers aren't required to send a code at all.
pub fn decode_close_payload(payload: &[u8]) -> Result<CloseError, Error> {
    if payload.is_empty() {
        return Ok(CloseError::no_status_rcvd());
    }
    if payload.len() < 2 {
        return Err(Error::InvalidCloseCode(0));
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    if !StatusCode::valid_wire(code) {
        return Err(Error::InvalidCloseCode(code));
    }
    let reason = String::from_utf8(payload[2..].to_vec())?;
    Ok(CloseError::new(StatusCode(code), reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_wire_matches_normative_table() {
        for code in 1000u16..=1011 {
            assert!(StatusCode::valid_wire(code), "{code} should be valid");
        }
        for code in 1012u16..=1014 {
            assert!(StatusCode::valid_wire(code), "{code} should be valid");
        }
        for code in 3000u16..=4999 {
            assert!(StatusCode::valid_wire(code), "{code} should be valid");
        }
        for code in [1004u16, 1005, 1006, 1015] {
            assert!(!StatusCode::valid_wire(code), "{code} should be invalid");
        }
        for code in [999u16, 1016, 2999, 5000] {
            assert!(!StatusCode::valid_wire(code), "{code} should be invalid");
        }
    }

    #[test]
    fn close_payload_round_trips() {
        let payload = encode_close_payload(StatusCode::NORMAL_CLOSURE, "bye").unwrap();
        let decoded = decode_close_payload(&payload).unwrap();
        assert_eq!(decoded.code, StatusCode::NORMAL_CLOSURE);
        assert_eq!(decoded.reason, "bye");
    }

    #[test]
    fn empty_payload_is_no_status_rcvd() {
        let decoded = decode_close_payload(&[]).unwrap();
        assert_eq!(decoded.code, StatusCode::NO_STATUS_RCVD);
        assert_eq!(decoded.reason, "");
    }

    #[test]
    fn reason_too_long_is_rejected() {
        let reason = "a".repeat(124);
        assert!(encode_close_payload(StatusCode::NORMAL_CLOSURE, &reason).is_err());
    }

    #[test]
    fn invalid_code_is_rejected_both_ways() {
        assert!(encode_close_payload(StatusCode::NO_STATUS_RCVD, "").is_err());
        let mut payload = vec![];
        payload.extend_from_slice(&1005u16.to_be_bytes());
        assert!(decode_close_payload(&payload).is_err());
    }
}
