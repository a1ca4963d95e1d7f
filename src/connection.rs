//! Per-connection framing actor
//!
//! Wire format: `u16 length` (big-endian) followed by `length` payload bytes
//! holding one or more messages. Zero-length frames are never sent and are
//! rejected on receipt.
//!
//! The outbound side is a two-phase builder. `begin_message` takes the
//! connection's write lock and writes the kind; `commit` verifies that the
//! message is the one under construction on this connection, optionally
//! flushes, and releases the lock. At most one message is ever under
//! construction, so messages reach the peer whole and in commit order.
//! A `PendingMessage` dropped without being committed is rolled back.
//!
//! The inbound side is a `FrameReader` that reassembles frames from partial
//! reads and hands out one decoded message at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::codec::FrameBuffer;
use crate::error::{FramingError, ProtocolError, SessionError};
use crate::message::{Decode, Encode, Message, MessageKind};
use crate::types::{BUFFER_LENGTH, PEEK_LENGTH};

/// Size of the frame length prefix
const LENGTH_PREFIX: usize = 2;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Shared open/closed flag for one connection
///
/// Closing wakes every task waiting in `closed()`. Cloned into the server's
/// user record so presence checks and disconnects never need the socket.
#[derive(Debug)]
pub struct ConnectionStatus {
    closed: watch::Sender<bool>,
}

impl ConnectionStatus {
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self { closed }
    }

    pub fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }

    /// Mark the connection closed; idempotent
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Resolves once the connection has been closed
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // Err only if the sender is gone, which means we are being torn down anyway
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound state guarded by the write lock
#[derive(Debug)]
pub struct Outbound<W> {
    writer: W,
    buffer: FrameBuffer,
    peek: FrameBuffer,
    constructing: Option<u64>,
}

impl<W> Outbound<W>
where
    W: AsyncWrite + Unpin,
{
    /// Send the accumulated payload as one frame
    ///
    /// An empty buffer is a no-op, so a zero-length frame is never produced.
    async fn flush(&mut self) -> Result<(), SessionError> {
        let declared = self.buffer.len();
        if declared == 0 {
            return Ok(());
        }
        let prefix = u16::try_from(declared).map_err(|_| FramingError::FrameTooLarge {
            len: declared,
            capacity: usize::from(u16::MAX),
        })?;
        self.peek.reset_write();
        self.peek.put_u16(prefix).map_err(FramingError::from)?;

        write_fully(&mut self.writer, self.peek.as_written()).await?;
        write_fully(&mut self.writer, self.buffer.as_written()).await?;
        self.writer.flush().await?;
        trace!("Flushed frame of {} bytes", declared);

        self.peek.reset_write();
        self.buffer.reset_write();
        Ok(())
    }
}

/// Write every byte, looping on partial writes
async fn write_fully<W>(writer: &mut W, bytes: &[u8]) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let declared = bytes.len();
    let mut sent = 0;
    while sent < declared {
        let n = writer.write(&bytes[sent..]).await?;
        if n == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
        }
        sent += n;
    }
    if sent > declared {
        return Err(FramingError::Oversend { sent, declared }.into());
    }
    Ok(())
}

/// The outbound half of a connection
#[derive(Debug)]
pub struct Connection<W> {
    outbound: Arc<Mutex<Outbound<W>>>,
    status: Arc<ConnectionStatus>,
}

impl<W> Connection<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(writer: W) -> Self {
        Self::with_status(writer, Arc::new(ConnectionStatus::new()))
    }

    pub fn with_status(writer: W, status: Arc<ConnectionStatus>) -> Self {
        Self {
            outbound: Arc::new(Mutex::new(Outbound {
                writer,
                buffer: FrameBuffer::new(BUFFER_LENGTH),
                peek: FrameBuffer::new(PEEK_LENGTH),
                constructing: None,
            })),
            status,
        }
    }

    pub fn status(&self) -> &Arc<ConnectionStatus> {
        &self.status
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Mark closed and wake every loop of this connection
    pub fn close(&self) {
        self.status.close();
    }

    /// Take the write lock and start a message of `kind`
    ///
    /// Queued bytes are flushed first if the kind itself would not fit.
    pub async fn begin_message(&self, kind: MessageKind) -> Result<PendingMessage<W>, SessionError> {
        if !self.is_open() {
            return Err(SessionError::Closed);
        }
        let mut guard = self.outbound.clone().lock_owned().await;
        let start = guard.buffer.len();
        let start = match guard.buffer.put_i32(kind.id()) {
            Ok(()) => start,
            Err(_) if start > 0 => {
                self.flush_locked(&mut guard).await?;
                guard.buffer.put_i32(kind.id()).map_err(FramingError::from)?;
                0
            }
            Err(e) => return Err(FramingError::from(e).into()),
        };
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        guard.constructing = Some(token);
        Ok(PendingMessage {
            guard,
            owner: Arc::clone(&self.outbound),
            token,
            start,
            committed: false,
        })
    }

    /// Complete a message started with `begin_message` on this connection
    ///
    /// Fails with `CommitMismatch` if `message` is not the one currently under
    /// construction here; the message is then rolled back.
    pub async fn commit(&self, mut message: PendingMessage<W>, flush: bool) -> Result<(), SessionError> {
        if !Arc::ptr_eq(&message.owner, &self.outbound)
            || message.guard.constructing != Some(message.token)
        {
            return Err(ProtocolError::CommitMismatch.into());
        }
        message.guard.constructing = None;
        message.committed = true;
        if flush {
            self.flush_locked(&mut message.guard).await?;
        }
        Ok(())
    }

    /// Build and commit a whole message
    ///
    /// If the message does not fit behind what is already queued, the queue
    /// is flushed and the message rebuilt in the empty buffer.
    pub async fn send<M: Encode>(&self, message: &M, flush: bool) -> Result<(), SessionError> {
        let mut pending = self.begin_message(message.kind()).await?;
        if message.encode_fields(&mut pending.fields()).is_err() {
            if pending.start == 0 {
                return Err(FramingError::MessageTooLarge {
                    kind: message.kind().id(),
                }
                .into());
            }
            let start = pending.start;
            pending.guard.buffer.truncate(start).map_err(FramingError::from)?;
            self.flush_locked(&mut pending.guard).await?;
            pending.guard.buffer.put_i32(message.kind().id()).map_err(FramingError::from)?;
            pending.start = 0;
            message
                .encode_fields(&mut pending.fields())
                .map_err(|_| FramingError::MessageTooLarge {
                    kind: message.kind().id(),
                })?;
        }
        self.commit(pending, flush).await
    }

    /// Flush whatever is queued
    pub async fn flush(&self) -> Result<(), SessionError> {
        let mut guard = self.outbound.lock().await;
        debug_assert!(guard.constructing.is_none());
        self.flush_locked(&mut guard).await
    }

    async fn flush_locked(&self, outbound: &mut Outbound<W>) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::Closed);
        }
        if let Err(e) = outbound.flush().await {
            debug!("Flush failed, closing connection: {}", e);
            self.close();
            return Err(e);
        }
        Ok(())
    }

    /// Periodically flush coalesced messages until the connection closes
    pub async fn run_write_loop(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.status.closed() => break,
            }
            let mut guard = self.outbound.lock().await;
            if guard.buffer.is_empty() {
                continue;
            }
            if self.flush_locked(&mut guard).await.is_err() {
                break;
            }
        }
        trace!("Write loop ended");
    }

    /// Close and shut the socket's write side down
    pub async fn shutdown(&self) {
        self.close();
        let mut guard = self.outbound.lock().await;
        let _ = guard.writer.shutdown().await;
    }
}

/// A message under construction; holds the connection's write lock
#[derive(Debug)]
pub struct PendingMessage<W> {
    guard: OwnedMutexGuard<Outbound<W>>,
    owner: Arc<Mutex<Outbound<W>>>,
    token: u64,
    start: usize,
    committed: bool,
}

impl<W> PendingMessage<W> {
    /// Field writer for this message
    pub fn fields(&mut self) -> Message<'_> {
        Message::resume(&mut self.guard.buffer)
    }
}

impl<W> Drop for PendingMessage<W> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Abandoned message: remove its bytes so the peer never sees a partial unit
        let start = self.start;
        let _ = self.guard.buffer.truncate(start);
        if self.guard.constructing == Some(self.token) {
            self.guard.constructing = None;
        }
    }
}

/// Reassembles inbound frames and yields one decoded message at a time
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    inbound: FrameBuffer,
    peek: FrameBuffer,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            inbound: FrameBuffer::new(BUFFER_LENGTH),
            peek: FrameBuffer::new(PEEK_LENGTH),
        }
    }

    /// Next message, reading a new frame once the current one is consumed
    pub async fn next_message<M: Decode>(&mut self) -> Result<M, SessionError> {
        if !self.inbound.has_remaining() {
            self.read_frame().await?;
        }
        Ok(M::decode(&mut self.inbound)?)
    }

    /// Read one complete frame into the inbound buffer
    async fn read_frame(&mut self) -> Result<(), SessionError> {
        self.inbound.reset();
        self.peek.reset();

        self.fill_peek().await?;
        let declared = usize::from(self.peek.get_u16()?);
        if declared == 0 {
            return Err(FramingError::EmptyFrame(declared).into());
        }
        if declared >= self.inbound.capacity() {
            return Err(FramingError::FrameTooLarge {
                len: declared,
                capacity: self.inbound.capacity(),
            }
            .into());
        }

        while self.inbound.len() < declared {
            let wanted = declared - self.inbound.len();
            let space = self.inbound.unfilled_mut(wanted).map_err(FramingError::from)?;
            let n = self.reader.read(space).await?;
            if n == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            self.inbound.advance_filled(n).map_err(FramingError::from)?;
        }
        trace!("Received frame of {} bytes", declared);
        Ok(())
    }

    /// Block until the two length bytes have arrived
    async fn fill_peek(&mut self) -> Result<(), SessionError> {
        while self.peek.len() < LENGTH_PREFIX {
            let wanted = LENGTH_PREFIX - self.peek.len();
            let space = self.peek.unfilled_mut(wanted).map_err(FramingError::from)?;
            let n = self.reader.read(space).await?;
            if n == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            self.peek.advance_filled(n).map_err(FramingError::from)?;
        }
        Ok(())
    }
}
