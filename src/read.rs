//! The per-message streaming reader handed back by [`crate::connection::Connection::reader`].

use crate::connection::{Connection, CurrentFrame};
use crate::error::{to_io_error, Error};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::OwnedSemaphorePermit;

type ChunkFuture<'a> =
    Pin<Box<dyn Future<Output = Result<(Option<Vec<u8>>, CurrentFrame), Error>> + Send + 'a>>;

/// Reads one message's payload as a byte stream, transparently advancing through continuation
/// frames (and any control frames interleaved between them) and unmasking on the fly. Held
/// across at most one message: dropping it before reaching end-of-message leaves the connection
/// mid-frame, so callers that bail out early should prefer `Connection::close` over reuse.
pub struct MessageReader<'a> {
    connection: &'a Connection,
    _permit: OwnedSemaphorePermit,
    current: Option<CurrentFrame>,
    total_read: usize,
    scratch: Vec<u8>,
    scratch_pos: usize,
    pending: Option<ChunkFuture<'a>>,
    last_error: Option<Error>,
}

impl<'a> MessageReader<'a> {
    pub(crate) fn new(
        connection: &'a Connection,
        permit: OwnedSemaphorePermit,
        current: CurrentFrame,
    ) -> Self {
        Self {
            connection,
            _permit: permit,
            current: Some(current),
            total_read: 0,
            scratch: Vec::new(),
            scratch_pos: 0,
            pending: None,
            last_error: None,
        }
    }

    /// The structured error behind the last `io::Error` this reader returned, if any. The
    /// `AsyncRead` impl can only hand back an `io::Error`; this recovers the real cause (a
    /// `Close`, a limit, a protocol violation) for callers that want to match on it.
    pub fn take_error(&mut self) -> Option<Error> {
        self.last_error.take()
    }
}

impl<'a> AsyncRead for MessageReader<'a> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.scratch_pos < this.scratch.len() {
                let remaining = this.scratch.len() - this.scratch_pos;
                let n = remaining.min(buf.remaining());
                buf.put_slice(&this.scratch[this.scratch_pos..this.scratch_pos + n]);
                this.scratch_pos += n;
                return Poll::Ready(Ok(()));
            }

            if let Some(fut) = this.pending.as_mut() {
                match fut.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Err(e)) => {
                        this.pending = None;
                        this.current = None;
                        let io_err = to_io_error(e.clone());
                        this.last_error = Some(e);
                        return Poll::Ready(Err(io_err));
                    }
                    Poll::Ready(Ok((chunk, current))) => {
                        this.pending = None;
                        match chunk {
                            Some(bytes) => {
                                this.total_read += bytes.len();
                                this.current = Some(current);
                                this.scratch = bytes;
                                this.scratch_pos = 0;
                                continue;
                            }
                            None => {
                                this.current = None;
                                return Poll::Ready(Ok(()));
                            }
                        }
                    }
                }
            }

            match this.current.take() {
                None => return Poll::Ready(Ok(())),
                Some(current) => {
                    let connection = this.connection;
                    let limit = buf.remaining().max(4096);
                    let total_read = this.total_read;
                    this.pending = Some(Box::pin(async move {
                        let mut current = current;
                        let chunk = connection
                            .read_message_chunk(&mut current, limit, total_read)
                            .await?;
                        Ok((chunk, current))
                    }));
                }
            }
        }
    }
}
