//! # Connection
//!
//! Framed, ordered, bidirectional transport to exactly one remote end.
//!
//! A [`Connection`] is a cheap-to-clone handle. The stream is split on open: the read
//! half is claimed once by [`Connection::read_loop`], and concurrent [`Connection::send`]
//! calls take turns on the write half so frames never interleave.
//!
//! ## Lifecycle
//! `Open → Closed`, terminal. Closed is reached by a local [`Connection::close`], by the
//! remote end closing the stream, by an I/O error, or by a [`ProtocolError`] while
//! decoding.
//!
//! ## Writer hand-off
//! A sender takes the write half out of its slot for the duration of one frame and puts it
//! back afterwards. Putting it back and [`Connection::close`] taking it both happen under
//! the slot lock, after the closed flag is set, so whichever side comes second drops it:
//! the stream is always released on close, even with a send in flight.
//!
//! ## Limitations
//! There is no backpressure: a remote end that stops reading eventually makes `send` wait
//! on a full transport buffer. `close()` releases such a writer.
//!
//! [`ProtocolError`]: crate::error::ProtocolError

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::core::codec::{EncodedFrame, PacketCodec};
use crate::core::packet::Packet;
use crate::error::{ConnectionError, Result};

type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;
type FrameWriter = FramedWrite<BoxedWriter, PacketCodec>;

/// Why a read loop stopped.
#[derive(Debug)]
pub enum CloseReason {
    /// The remote end closed the stream on a frame boundary
    Remote,
    /// [`Connection::close`] was called on this side
    Local,
    /// The stream failed or carried undecodable bytes
    Error(ConnectionError),
}

struct Inner {
    codec: PacketCodec,
    peer_addr: Option<SocketAddr>,
    reader: Mutex<Option<FramedRead<BoxedReader, PacketCodec>>>,
    reader_claimed: AtomicBool,
    /// Present while no send is in flight and the connection is open
    writer: Mutex<Option<FrameWriter>>,
    /// One sender at a time, so frames never interleave
    write_turn: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl Inner {
    /// Returns `false` if the connection was already closed.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        // Taken under the slot lock after the flag is set; a sender returning the writer
        // later sees the flag and drops it instead.
        let writer = self.writer_slot().take();
        self.shutdown.cancel();

        // A reader that was never claimed is dropped here; a running loop drops its own.
        drop(self.take_reader());
        drop(writer);
        true
    }

    fn take_reader(&self) -> Option<FramedRead<BoxedReader, PacketCodec>> {
        self.reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn writer_slot(&self) -> MutexGuard<'_, Option<FrameWriter>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The write half, checked out of its slot for one frame.
struct CheckedOutWriter<'a> {
    inner: &'a Inner,
    framed: Option<FrameWriter>,
    finished: bool,
}

impl<'a> CheckedOutWriter<'a> {
    fn take(inner: &'a Inner) -> Option<Self> {
        let mut slot = inner.writer_slot();
        if inner.closed.load(Ordering::SeqCst) {
            return None;
        }
        let framed = slot.take()?;
        Some(Self {
            inner,
            framed: Some(framed),
            finished: false,
        })
    }
}

impl Drop for CheckedOutWriter<'_> {
    fn drop(&mut self) {
        let Some(framed) = self.framed.take() else {
            return;
        };
        if !self.finished {
            // The send was abandoned mid-frame; the stream can no longer be trusted
            drop(framed);
            self.inner.close();
            return;
        }
        let mut slot = self.inner.writer_slot();
        if self.inner.closed.load(Ordering::SeqCst) {
            drop(slot);
            drop(framed);
        } else {
            *slot = Some(framed);
        }
    }
}

#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.inner.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Wrap `stream` with the default codec. Starts no background work.
    pub fn open<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::open_with_codec(stream, PacketCodec::default(), None)
    }

    /// Wrap `stream` with an explicit codec and an optional remote address for logging.
    pub fn open_with_codec<S>(stream: S, codec: PacketCodec, peer_addr: Option<SocketAddr>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader: BoxedReader = Box::pin(read_half);
        let writer: BoxedWriter = Box::pin(write_half);

        Self {
            inner: Arc::new(Inner {
                codec,
                peer_addr,
                reader: Mutex::new(Some(FramedRead::new(reader, codec))),
                reader_claimed: AtomicBool::new(false),
                writer: Mutex::new(Some(FramedWrite::new(writer, codec))),
                write_turn: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Wrap a TCP stream, applying socket options first.
    pub fn from_tcp(stream: TcpStream, codec: PacketCodec, nodelay: bool) -> Result<Self> {
        if nodelay {
            stream.set_nodelay(true)?;
        }
        let peer_addr = stream.peer_addr().ok();
        Ok(Self::open_with_codec(stream, codec, peer_addr))
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Resolves once the connection is closed, from either side.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await
    }

    /// Run the read loop until the stream ends, fails, or the connection is closed.
    ///
    /// `on_packet` runs on the loop's own task and is awaited before the next frame is
    /// read, so a slow callback delays this connection only. `on_close` fires exactly once,
    /// after the connection has been closed. Only one read loop may ever run per
    /// connection; later calls return [`ConnectionError::ReaderTaken`] and leave their
    /// callbacks untouched.
    pub async fn read_loop<F, Fut, C>(&self, mut on_packet: F, on_close: C) -> Result<CloseReason>
    where
        F: FnMut(Packet) -> Fut,
        Fut: Future<Output = ()>,
        C: FnOnce(),
    {
        if self.inner.reader_claimed.swap(true, Ordering::AcqRel) {
            return Err(ConnectionError::ReaderTaken);
        }

        let reason = match self.inner.take_reader() {
            // Closed before the loop ever started
            None => CloseReason::Local,
            Some(mut reader) => loop {
                tokio::select! {
                    biased;
                    _ = self.inner.shutdown.cancelled() => break CloseReason::Local,
                    frame = reader.next() => match frame {
                        Some(Ok(packet)) => {
                            trace!(peer = ?self.inner.peer_addr, tag = packet.type_tag(), "Frame received");
                            on_packet(packet).await;
                        }
                        Some(Err(e)) => break CloseReason::Error(e),
                        None => break CloseReason::Remote,
                    }
                }
            },
        };

        match &reason {
            CloseReason::Error(ConnectionError::Protocol(e)) => {
                warn!(peer = ?self.inner.peer_addr, error = %e, "Protocol error, dropping connection")
            }
            CloseReason::Error(e) => {
                debug!(peer = ?self.inner.peer_addr, error = %e, "Read failed, dropping connection")
            }
            CloseReason::Remote => debug!(peer = ?self.inner.peer_addr, "Remote end closed"),
            CloseReason::Local => debug!(peer = ?self.inner.peer_addr, "Closed locally"),
        }

        self.close();
        on_close();
        Ok(reason)
    }

    /// Spawn [`Connection::read_loop`] on its own task.
    pub fn spawn_read_loop<F, Fut, C>(&self, on_packet: F, on_close: C) -> JoinHandle<Result<CloseReason>>
    where
        F: FnMut(Packet) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let connection = self.clone();
        tokio::spawn(async move { connection.read_loop(on_packet, on_close).await })
    }

    /// Encode and write one packet. Fails with the I/O error, never retries.
    pub async fn send(&self, packet: &Packet) -> Result<()> {
        let frame = self.inner.codec.encode_frame(packet)?;
        self.send_frame(frame).await
    }

    /// Write an already-encoded frame; used for encode-once fan-out.
    ///
    /// Dropping the returned future part-way through a frame closes the connection.
    pub async fn send_frame(&self, frame: EncodedFrame) -> Result<()> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }

        let _turn = tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => return Err(ConnectionError::Closed),
            turn = self.inner.write_turn.lock() => turn,
        };
        let Some(mut writer) = CheckedOutWriter::take(&self.inner) else {
            return Err(ConnectionError::Closed);
        };
        let Some(framed) = writer.framed.as_mut() else {
            return Err(ConnectionError::Closed);
        };

        let outcome = tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => Err(ConnectionError::Closed),
            written = framed.send(frame) => written,
        };
        writer.finished = true;
        outcome
    }

    /// Close the connection. Idempotent and safe from any context, `on_close` included.
    pub fn close(&self) {
        if self.inner.close() {
            debug!(peer = ?self.inner.peer_addr, "Connection closed");
        }
    }
}
