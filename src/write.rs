//! The per-message streaming writer handed back by [`crate::connection::Connection::writer`].

use crate::connection::Connection;
use crate::error::{to_io_error, Error};
use crate::frame::OpCode;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tokio::sync::OwnedSemaphorePermit;

type WriteFuture<'a> = Pin<Box<dyn Future<Output = Result<usize, Error>> + Send + 'a>>;

/// Writes one message as a byte stream. The first `poll_write` call emits a data frame with
/// `fin=false`; later calls emit `Continuation` frames. Each call emits at most one frame, sized
/// to the connection's `max_frame_size`, so a caller writing more than that in one call simply
/// gets a short write back (standard `AsyncWrite` behavior) and is expected to call again.
///
/// Call `shutdown()` to emit the final `fin=true` frame and release the writer lock; there is no
/// way to do this from `Drop` since it would require blocking I/O.
pub struct MessageWriter<'a> {
    connection: &'a Connection,
    _permit: OwnedSemaphorePermit,
    opcode: OpCode,
    started: bool,
    finished: bool,
    pending: Option<WriteFuture<'a>>,
}

impl<'a> MessageWriter<'a> {
    pub(crate) fn new(connection: &'a Connection, permit: OwnedSemaphorePermit, opcode: OpCode) -> Self {
        Self {
            connection,
            _permit: permit,
            opcode,
            started: false,
            finished: false,
            pending: None,
        }
    }
}

impl<'a> AsyncWrite for MessageWriter<'a> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if let Some(fut) = this.pending.as_mut() {
            return match fut.as_mut().poll(cx) {
                Poll::Ready(Ok(n)) => {
                    this.pending = None;
                    Poll::Ready(Ok(n))
                }
                Poll::Ready(Err(e)) => {
                    this.pending = None;
                    Poll::Ready(Err(to_io_error(e)))
                }
                Poll::Pending => Poll::Pending,
            };
        }

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let max = this.connection.max_frame_size().unwrap_or(buf.len());
        let n = buf.len().min(max.max(1));
        let chunk = buf[..n].to_vec();
        let connection = this.connection;
        let opcode = if this.started { OpCode::Continuation } else { this.opcode };
        this.started = true;

        this.pending = Some(Box::pin(async move {
            connection.write_data_frame(opcode, false, chunk).await?;
            Ok(n)
        }));

        match this.pending.as_mut().unwrap().as_mut().poll(cx) {
            Poll::Ready(Ok(n)) => {
                this.pending = None;
                Poll::Ready(Ok(n))
            }
            Poll::Ready(Err(e)) => {
                this.pending = None;
                Poll::Ready(Err(to_io_error(e)))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(fut) = this.pending.as_mut() {
            match fut.as_mut().poll(cx) {
                Poll::Ready(Ok(_)) => {
                    this.pending = None;
                    Poll::Ready(Ok(()))
                }
                Poll::Ready(Err(e)) => {
                    this.pending = None;
                    Poll::Ready(Err(to_io_error(e)))
                }
                Poll::Pending => Poll::Pending,
            }
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if let Some(fut) = this.pending.as_mut() {
                match fut.as_mut().poll(cx) {
                    Poll::Ready(Ok(_)) => {
                        this.pending = None;
                        continue;
                    }
                    Poll::Ready(Err(e)) => {
                        this.pending = None;
                        return Poll::Ready(Err(to_io_error(e)));
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }
            if this.finished {
                return Poll::Ready(Ok(()));
            }
            this.finished = true;
            let connection = this.connection;
            let opcode = if this.started { OpCode::Continuation } else { this.opcode };
            this.pending = Some(Box::pin(async move {
                connection.write_data_frame(opcode, true, Vec::new()).await?;
                Ok(0)
            }));
        }
    }
}

impl<'a> Drop for MessageWriter<'a> {
    fn drop(&mut self) {
        if !self.finished {
            log::debug!("MessageWriter dropped without shutdown(); final frame was never sent");
        }
    }
}
