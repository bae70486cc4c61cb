//! The core per-connection engine.
//!
//! Owns the buffered stream halves, the three capacity-1 semaphores that realize the
//! single-reader/single-writer invariants, the outstanding-ping table, and the terminal close
//! cause every operation on a dead connection returns once set.

use crate::close::{self, CloseError, StatusCode};
use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::frame::{self, FrameHeader, OpCode};
use crate::mask;
use crate::message::MessageType;
use crate::read::MessageReader;
use crate::stream::WebSocketStream;
use crate::write::MessageWriter;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter, ReadBuf, ReadHalf, WriteHalf,
};
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify, Semaphore};
use tokio::time::timeout;

const DEFAULT_CONTROL_FRAME_DEADLINE: Duration = crate::config::DEFAULT_CONTROL_FRAME_DEADLINE;
const DEFAULT_CLOSE_WAIT_DEADLINE: Duration = crate::config::DEFAULT_CLOSE_WAIT_DEADLINE;

/// Prepends bytes already pulled off the wire (past the HTTP header terminator during the
/// handshake) to whatever the underlying stream yields next.
struct PrefixedReader<R> {
    prefix: Vec<u8>,
    prefix_pos: usize,
    inner: R,
}

impl<R> PrefixedReader<R> {
    fn new(prefix: Vec<u8>, inner: R) -> Self {
        Self {
            prefix,
            prefix_pos: 0,
            inner,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for PrefixedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.prefix_pos < this.prefix.len() {
            let remaining = &this.prefix[this.prefix_pos..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            this.prefix_pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

type PrefixedHalf = PrefixedReader<ReadHalf<WebSocketStream>>;

pub(crate) struct ReadState {
    reader: BufReader<PrefixedHalf>,
    fragmented_opcode: Option<OpCode>,
}

pub(crate) struct WriteState {
    writer: BufWriter<WriteHalf<WebSocketStream>>,
}

/// A frame header that has cleared protocol validation and turned out to carry (or continue) a
/// data message, handed back from [`Connection::next_frame_header`] once any interleaved control
/// frames have been drained and answered.
pub(crate) struct FrameEvent {
    pub header: FrameHeader,
    pub message_opcode: OpCode,
}

/// Per-message read cursor threaded through [`MessageReader`] across frame boundaries.
#[derive(Clone, Copy)]
pub(crate) struct CurrentFrame {
    pub remaining: u64,
    pub fin: bool,
    pub masked: bool,
    pub mask_key: [u8; 4],
    pub rotation: usize,
}

/// One established WebSocket connection, client or server side.
///
/// Obtained from [`crate::handshake::connect_async`] or [`crate::handshake::accept_async`].
/// Always held behind an `Arc` so [`Connection::split`] and the `server` porcelain can move
/// reader/writer halves into independent tasks.
pub struct Connection {
    is_client: bool,
    config: WebSocketConfig,
    subprotocol: String,

    read_state: AsyncMutex<ReadState>,
    write_state: AsyncMutex<WriteState>,

    read_lock: Arc<Semaphore>,
    write_msg_lock: Arc<Semaphore>,
    write_frame_lock: Arc<Semaphore>,

    ping_table: AsyncMutex<HashMap<String, oneshot::Sender<()>>>,
    ping_id: AtomicU64,

    read_limit: AtomicUsize,
    read_deadline: AsyncMutex<Option<Duration>>,
    write_deadline: AsyncMutex<Option<Duration>>,

    wrote_close: AtomicBool,
    terminal_cause: OnceLock<Error>,
    closed: Notify,
}

impl Connection {
    pub(crate) fn new(
        stream: WebSocketStream,
        is_client: bool,
        config: WebSocketConfig,
        subprotocol: String,
        prefix: Vec<u8>,
    ) -> Arc<Self> {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = BufReader::new(PrefixedReader::new(prefix, read_half));
        let writer = BufWriter::new(write_half);
        let read_limit = AtomicUsize::new(config.read_limit);

        Arc::new(Self {
            is_client,
            config,
            subprotocol,
            read_state: AsyncMutex::new(ReadState {
                reader,
                fragmented_opcode: None,
            }),
            write_state: AsyncMutex::new(WriteState { writer }),
            read_lock: Arc::new(Semaphore::new(1)),
            write_msg_lock: Arc::new(Semaphore::new(1)),
            write_frame_lock: Arc::new(Semaphore::new(1)),
            ping_table: AsyncMutex::new(HashMap::new()),
            ping_id: AtomicU64::new(0),
            read_limit,
            read_deadline: AsyncMutex::new(None),
            write_deadline: AsyncMutex::new(None),
            wrote_close: AtomicBool::new(false),
            terminal_cause: OnceLock::new(),
            closed: Notify::new(),
        })
    }

    pub fn subprotocol(&self) -> &str {
        &self.subprotocol
    }

    pub(crate) fn max_frame_size(&self) -> Option<usize> {
        self.config.max_frame_size
    }

    pub fn set_read_limit(&self, n: usize) {
        self.read_limit.store(n, Ordering::Relaxed);
    }

    pub async fn set_read_deadline(&self, deadline: Duration) {
        *self.read_deadline.lock().await = Some(deadline);
    }

    pub async fn set_write_deadline(&self, deadline: Duration) {
        *self.write_deadline.lock().await = Some(deadline);
    }

    /// Resolves once the connection has a terminal cause (ends, for any reason).
    pub async fn close_read(&self) {
        let notified = self.closed.notified();
        if self.terminal_cause.get().is_some() {
            return;
        }
        notified.await;
    }

    pub(crate) fn check_terminal(&self) -> Result<(), Error> {
        match self.terminal_cause.get() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Records `err` as the terminal cause if none is set yet (first writer wins), and returns
    /// whichever error actually became terminal.
    fn record_terminal(&self, err: Error) -> Error {
        if self.terminal_cause.set(err.clone()).is_ok() {
            self.closed.notify_waiters();
            err
        } else {
            self.terminal_cause.get().unwrap().clone()
        }
    }

    async fn fail_protocol(&self, err: Error, code: StatusCode) -> Error {
        let err = self.record_terminal(err);
        self.force_close(code, "").await;
        err
    }

    fn client_mask_key(&self) -> Option<[u8; 4]> {
        if !self.is_client {
            return None;
        }
        let mut rng = rand::rngs::StdRng::from_rng(rand::thread_rng());
        Some(rng.random::<[u8; 4]>())
    }

    fn effective_read_limit(&self) -> usize {
        let limit = self.read_limit.load(Ordering::Relaxed);
        match self.config.max_message_size {
            Some(max) => limit.min(max),
            None => limit,
        }
    }

    /// Emits a close frame once (governed by `wrote_close`), swallowing write errors — this is
    /// always a best-effort reaction to a protocol violation or a limit breach, never the
    /// primary path (see [`Connection::close`] for that).
    async fn force_close(&self, code: StatusCode, reason: &str) {
        if self.wrote_close.swap(true, Ordering::SeqCst) {
            return;
        }
        let payload = close::encode_close_payload(code, reason)
            .unwrap_or_else(|_| close::encode_close_payload(StatusCode::INTERNAL_ERROR, "").unwrap());
        let permit = match Arc::clone(&self.write_frame_lock).acquire_owned().await {
            Ok(p) => p,
            Err(_) => return,
        };
        let mut state = self.write_state.lock().await;
        let mask_key = self.client_mask_key();
        let _ = frame::write_control_frame(&mut state.writer, OpCode::Close, payload, mask_key).await;
        let _ = state.writer.flush().await;
        drop(permit);
    }

    async fn write_control(&self, opcode: OpCode, payload: Vec<u8>) -> Result<(), Error> {
        let permit = Arc::clone(&self.write_frame_lock)
            .acquire_owned()
            .await
            .map_err(|_| Error::AlreadyClosed)?;
        let mut state = self.write_state.lock().await;
        let mask_key = self.client_mask_key();
        frame::write_control_frame(&mut state.writer, opcode, payload, mask_key).await?;
        state.writer.flush().await?;
        drop(permit);
        Ok(())
    }

    async fn handle_pong(&self, payload: Vec<u8>) {
        if let Ok(id) = String::from_utf8(payload) {
            let mut table = self.ping_table.lock().await;
            if let Some(tx) = table.remove(&id) {
                log::trace!("pong matched ping id {id}");
                let _ = tx.send(());
            } else {
                log::trace!("unsolicited pong id {id}, ignoring");
            }
        }
    }

    /// Reads and validates the next frame header, transparently handling any inline control
    /// frames (ping/pong/close) and fragmentation bookkeeping, until a data or continuation
    /// frame is ready for its payload to be consumed. Never returns a control opcode.
    pub(crate) async fn next_frame_header(&self) -> Result<FrameEvent, Error> {
        loop {
            let header = {
                let mut state = self.read_state.lock().await;
                match frame::read_header(&mut state.reader).await {
                    Ok(h) => h,
                    Err(e @ (Error::InvalidOpcode | Error::InvalidPayloadLength)) => {
                        return Err(self.fail_protocol(e, StatusCode::PROTOCOL_ERROR).await)
                    }
                    Err(e) => return Err(self.record_terminal(e)),
                }
            };

            if header.rsv1 || header.rsv2 || header.rsv3 {
                return Err(self.fail_protocol(Error::RSVNotZero, StatusCode::PROTOCOL_ERROR).await);
            }
            let expected_masked = !self.is_client;
            if header.masked != expected_masked {
                return Err(self
                    .fail_protocol(Error::InvalidMaskDirection, StatusCode::PROTOCOL_ERROR)
                    .await);
            }
            if let Some(max) = self.config.max_frame_size {
                if header.payload_length as usize > max {
                    return Err(self
                        .fail_protocol(Error::MaxFrameSize, StatusCode::MESSAGE_TOO_BIG)
                        .await);
                }
            }

            if header.opcode.is_control() {
                if !header.fin {
                    return Err(self
                        .fail_protocol(Error::ControlFramesFragmented, StatusCode::PROTOCOL_ERROR)
                        .await);
                }
                if header.payload_length > 125 {
                    return Err(self
                        .fail_protocol(Error::ControlFramePayloadSize, StatusCode::PROTOCOL_ERROR)
                        .await);
                }
                let payload = {
                    let mut state = self.read_state.lock().await;
                    frame::read_control_payload(&mut state.reader, &header).await?
                };
                match header.opcode {
                    OpCode::Ping => {
                        log::trace!("replying to ping");
                        self.write_control(OpCode::Pong, payload).await?;
                    }
                    OpCode::Pong => self.handle_pong(payload).await,
                    OpCode::Close => {
                        let close_err = close::decode_close_payload(&payload).unwrap_or_else(|_| {
                            CloseError::new(StatusCode::PROTOCOL_ERROR, "invalid close payload")
                        });
                        log::debug!("peer closed: {close_err}");
                        let code = close_err.code;
                        let err = self.record_terminal(Error::Close(close_err));
                        self.force_close(code, "").await;
                        return Err(err);
                    }
                    _ => unreachable!("non-control opcode handled in the control branch"),
                }
                continue;
            }

            let mut state = self.read_state.lock().await;
            let message_opcode = match (header.opcode, state.fragmented_opcode) {
                (OpCode::Continuation, Some(op)) => {
                    if header.fin {
                        state.fragmented_opcode = None;
                    }
                    op
                }
                (OpCode::Continuation, None) => {
                    drop(state);
                    return Err(self
                        .fail_protocol(Error::InvalidContinuationFrame, StatusCode::PROTOCOL_ERROR)
                        .await);
                }
                (op, None) => {
                    if !header.fin {
                        state.fragmented_opcode = Some(op);
                    }
                    op
                }
                (_, Some(_)) => {
                    drop(state);
                    return Err(self
                        .fail_protocol(Error::FragmentedInProgress, StatusCode::PROTOCOL_ERROR)
                        .await);
                }
            };
            drop(state);

            return Ok(FrameEvent { header, message_opcode });
        }
    }

    /// Pulls the next chunk of the current message's payload into an owned buffer, advancing to
    /// the next physical frame (possibly answering interleaved control frames along the way)
    /// when the current one is exhausted. `Ok(None)` means the message is complete.
    pub(crate) async fn read_message_chunk(
        &self,
        current: &mut CurrentFrame,
        limit: usize,
        total_read: usize,
    ) -> Result<Option<Vec<u8>>, Error> {
        if current.remaining == 0 {
            if current.fin {
                return Ok(None);
            }
            let event = self.next_frame_header().await?;
            current.remaining = event.header.payload_length;
            current.fin = event.header.fin;
            current.masked = event.header.masked;
            current.mask_key = event.header.mask_key;
            current.rotation = 0;
            if current.remaining == 0 {
                return Ok(Some(Vec::new()));
            }
        }

        let effective_limit = self.effective_read_limit();
        if total_read >= effective_limit {
            let err = self.record_terminal(Error::MaxMessageSize);
            self.force_close(StatusCode::MESSAGE_TOO_BIG, "").await;
            return Err(err);
        }
        let allowed = effective_limit - total_read;
        let want = (current.remaining as usize).min(limit).min(allowed);

        let mut chunk = vec![0u8; want];
        {
            let mut state = self.read_state.lock().await;
            state
                .reader
                .read_exact(&mut chunk)
                .await
                .map_err(|e| self.record_terminal(Error::from(e)))?;
        }
        if current.masked {
            current.rotation = mask::mask(&mut chunk, current.mask_key, current.rotation);
        }
        current.remaining -= want as u64;
        Ok(Some(chunk))
    }

    pub async fn reader(&self) -> Result<(MessageType, MessageReader<'_>), Error> {
        self.check_terminal()?;
        let permit = Arc::clone(&self.read_lock)
            .try_acquire_owned()
            .map_err(|_| Error::ConcurrentReader)?;

        let deadline = *self.read_deadline.lock().await;
        let event = match deadline {
            Some(d) => timeout(d, self.next_frame_header())
                .await
                .map_err(Error::from)??,
            None => self.next_frame_header().await?,
        };

        let message_type = match event.message_opcode {
            OpCode::Text => MessageType::Text,
            OpCode::Binary => MessageType::Binary,
            _ => {
                return Err(self
                    .fail_protocol(Error::InvalidOpcode, StatusCode::PROTOCOL_ERROR)
                    .await)
            }
        };

        let current = CurrentFrame {
            remaining: event.header.payload_length,
            fin: event.header.fin,
            masked: event.header.masked,
            mask_key: event.header.mask_key,
            rotation: 0,
        };

        Ok((message_type, MessageReader::new(self, permit, current)))
    }

    pub async fn read(&self) -> Result<(MessageType, Vec<u8>), Error> {
        let (message_type, mut reader) = self.reader().await?;
        let mut buf = Vec::new();
        if let Err(e) = reader.read_to_end(&mut buf).await {
            return Err(reader.take_error().unwrap_or_else(|| Error::IO { source: e }));
        }
        Ok((message_type, buf))
    }

    pub async fn writer(&self, message_type: MessageType) -> Result<MessageWriter<'_>, Error> {
        self.check_terminal()?;
        let permit = Arc::clone(&self.write_msg_lock)
            .try_acquire_owned()
            .map_err(|_| Error::ConcurrentWriter)?;
        Ok(MessageWriter::new(self, permit, message_type.opcode()))
    }

    pub async fn write(&self, message_type: MessageType, bytes: &[u8]) -> Result<(), Error> {
        self.check_terminal()?;
        let _permit = Arc::clone(&self.write_msg_lock)
            .try_acquire_owned()
            .map_err(|_| Error::ConcurrentWriter)?;

        let max = self.config.max_frame_size.unwrap_or(bytes.len().max(1));
        if bytes.is_empty() {
            return self
                .write_data_frame(message_type.opcode(), true, Vec::new())
                .await;
        }

        let mut opcode = message_type.opcode();
        let mut offset = 0;
        while offset < bytes.len() {
            let end = (offset + max).min(bytes.len());
            let fin = end == bytes.len();
            self.write_data_frame(opcode, fin, bytes[offset..end].to_vec())
                .await?;
            opcode = OpCode::Continuation;
            offset = end;
        }
        Ok(())
    }

    pub(crate) async fn write_data_frame(
        &self,
        opcode: OpCode,
        fin: bool,
        payload: Vec<u8>,
    ) -> Result<(), Error> {
        let deadline = *self.write_deadline.lock().await;
        let fut = self.write_data_frame_inner(opcode, fin, payload);
        match deadline {
            Some(d) => timeout(d, fut).await.map_err(Error::from)?,
            None => fut.await,
        }
    }

    async fn write_data_frame_inner(
        &self,
        opcode: OpCode,
        fin: bool,
        mut payload: Vec<u8>,
    ) -> Result<(), Error> {
        self.check_terminal()?;
        let permit = Arc::clone(&self.write_frame_lock)
            .acquire_owned()
            .await
            .map_err(|_| Error::AlreadyClosed)?;
        let mask_key = self.client_mask_key();
        let header = FrameHeader::data(fin, opcode, payload.len() as u64, mask_key);
        let mut state = self.write_state.lock().await;
        frame::write_header(&mut state.writer, &header).await?;
        if let Some(key) = mask_key {
            mask::mask(&mut payload, key, 0);
        }
        state.writer.write_all(&payload).await?;
        state.writer.flush().await?;
        drop(permit);
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), Error> {
        self.check_terminal()?;
        let id = self.ping_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.ping_table.lock().await;
            table.insert(id.clone(), tx);
        }
        let send_result = self.write_control(OpCode::Ping, id.clone().into_bytes()).await;
        if let Err(e) = send_result {
            self.ping_table.lock().await.remove(&id);
            return Err(e);
        }

        let deadline = self
            .write_deadline
            .lock()
            .await
            .unwrap_or(DEFAULT_CONTROL_FRAME_DEADLINE);
        let outcome = timeout(deadline, rx).await;
        self.ping_table.lock().await.remove(&id);
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::CommunicationError),
            Err(elapsed) => Err(Error::from(elapsed)),
        }
    }

    /// Runs the close handshake: emits a close frame (at most once across concurrent callers),
    /// drains frames until the peer's close is observed or a deadline elapses, then shuts down
    /// the write half.
    pub async fn close(&self, code: StatusCode, reason: &str) -> Result<(), Error> {
        let payload = match close::encode_close_payload(code, reason) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("close({code}, {reason:?}) invalid, falling back to InternalError: {e}");
                close::encode_close_payload(StatusCode::INTERNAL_ERROR, "").unwrap()
            }
        };

        if self.wrote_close.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        {
            let permit = Arc::clone(&self.write_frame_lock)
                .acquire_owned()
                .await
                .map_err(|_| Error::AlreadyClosed)?;
            let mut state = self.write_state.lock().await;
            let mask_key = self.client_mask_key();
            let write = frame::write_control_frame(&mut state.writer, OpCode::Close, payload, mask_key);
            timeout(DEFAULT_CONTROL_FRAME_DEADLINE, write)
                .await
                .map_err(Error::from)??;
            state.writer.flush().await?;
            drop(permit);
        }

        if let Ok(permit) = Arc::clone(&self.read_lock).try_acquire_owned() {
            let drain = async {
                loop {
                    if self.next_frame_header().await.is_err() {
                        break;
                    }
                }
            };
            let _ = timeout(DEFAULT_CLOSE_WAIT_DEADLINE, drain).await;
            drop(permit);
        }

        {
            let mut state = self.write_state.lock().await;
            let _ = state.writer.get_mut().shutdown().await;
        }

        self.record_terminal(Error::Close(CloseError::new(code, reason)));
        Ok(())
    }
}

impl Drop for Connection {
    /// The OS closes the underlying socket once the last handle to it is dropped regardless;
    /// this just logs when that happens without a close handshake having run, since such a
    /// closure looks like `AbnormalClosure` (1006) to the peer.
    fn drop(&mut self) {
        if self.terminal_cause.get().is_none() {
            log::debug!("connection dropped without a close handshake");
        }
    }
}
