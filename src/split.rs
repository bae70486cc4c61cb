//! Splits a [`Connection`] into a `Stream<Item = Result<Message, Error>>` half and a writer
//! half, each owning an `Arc<Connection>` so they can move into independent tasks — this is
//! what the `server` porcelain hands callers through [`crate::event::Event`].

use crate::close::StatusCode;
use crate::connection::Connection;
use crate::error::Error;
use crate::message::Message;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

type ReadFuture = Pin<Box<dyn Future<Output = Result<(crate::message::MessageType, Vec<u8>), Error>> + Send>>;

impl Connection {
    /// Splits a shared connection into an independent reader [`Stream`] and writer handle.
    pub fn split(self: Arc<Self>) -> (WSReader, WSWriter) {
        (
            WSReader {
                connection: self.clone(),
                pending: None,
            },
            WSWriter { connection: self },
        )
    }
}

/// Yields each complete message as it arrives; ends the stream on `Error::Close` and any other
/// terminal error.
pub struct WSReader {
    connection: Arc<Connection>,
    pending: Option<ReadFuture>,
}

impl Stream for WSReader {
    type Item = Result<Message, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.pending.is_none() {
            let connection = this.connection.clone();
            this.pending = Some(Box::pin(async move { connection.read().await }));
        }

        let fut = this.pending.as_mut().unwrap();
        match fut.as_mut().poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                this.pending = None;
                match result {
                    Ok((message_type, bytes)) => match Message::from_parts(message_type, bytes) {
                        Ok(message) => Poll::Ready(Some(Ok(message))),
                        Err(e) => Poll::Ready(Some(Err(e))),
                    },
                    Err(Error::Close(_)) => Poll::Ready(None),
                    Err(e) => Poll::Ready(Some(Err(e))),
                }
            }
        }
    }
}

/// The writer half of a split connection.
#[derive(Clone)]
pub struct WSWriter {
    connection: Arc<Connection>,
}

impl WSWriter {
    pub async fn send(&self, message: Message) -> Result<(), Error> {
        self.connection
            .write(message.message_type(), message.as_binary())
            .await
    }

    pub async fn ping(&self) -> Result<(), Error> {
        self.connection.ping().await
    }

    pub async fn close(&self, code: StatusCode, reason: &str) -> Result<(), Error> {
        self.connection.close(code, reason).await
    }

    pub fn subprotocol(&self) -> &str {
        self.connection.subprotocol()
    }
}
