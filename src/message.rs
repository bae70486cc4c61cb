use crate::error::Error;
use crate::frame::OpCode;

/// The caller-visible payload of a complete (possibly reassembled) message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

/// The subset of [`crate::frame::OpCode`] a streaming [`crate::write::MessageWriter`] can be
/// opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Text,
    Binary,
}

impl MessageType {
    pub(crate) fn opcode(self) -> OpCode {
        match self {
            MessageType::Text => OpCode::Text,
            MessageType::Binary => OpCode::Binary,
        }
    }
}

impl Message {
    pub(crate) fn from_parts(message_type: MessageType, payload: Vec<u8>) -> Result<Self, Error> {
        match message_type {
            MessageType::Text => Ok(Message::Text(String::from_utf8_lossy(&payload).into_owned())),
            MessageType::Binary => Ok(Message::Binary(payload)),
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Text(_) => MessageType::Text,
            Message::Binary(_) => MessageType::Binary,
        }
    }

    pub fn as_binary(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) => data,
        }
    }

    pub fn as_text(&self) -> Result<std::borrow::Cow<'_, str>, Error> {
        match self {
            Message::Text(text) => Ok(std::borrow::Cow::Borrowed(text)),
            Message::Binary(data) => {
                let text = std::str::from_utf8(data).map_err(|e| e.to_string());
                match text {
                    Ok(text) => Ok(std::borrow::Cow::Borrowed(text)),
                    Err(_) => Err(Error::FromUtf8Error {
                        source: String::from_utf8(data.clone()).unwrap_err(),
                    }),
                }
            }
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(data) => data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_parts_lossily_decodes_invalid_utf8_for_text() {
        let invalid = vec![0xff, 0xfe];
        let message = Message::from_parts(MessageType::Text, invalid).unwrap();
        assert_eq!(message, Message::Text("\u{fffd}\u{fffd}".to_string()));
    }

    #[test]
    fn as_binary_matches_variant_payload() {
        let m = Message::Text("hi".to_string());
        assert_eq!(m.as_binary(), b"hi");
        let m = Message::Binary(vec![1, 2, 3]);
        assert_eq!(m.as_binary(), &[1, 2, 3]);
    }
}
