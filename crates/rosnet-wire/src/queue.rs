//! Transport queues between application code and sockets.
//!
//! [`OutgoingQueue`] feeds one sender loop that writes every enqueued
//! message to all attached streams. [`IncomingQueue`] runs one receiver loop
//! over a single stream and hands decoded messages to one consumer.

use crate::error::WireError;
use crate::frame::{encode_frame, read_frame};
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Frames buffered for one attached stream. Beyond this, new frames are
/// dropped for that stream until its peer catches up.
pub const STREAM_BUFFER: usize = 1024;

/// Decoded messages buffered between a receiver loop and its consumer.
pub const INCOMING_BUFFER: usize = 128;

/// Upper bound on closing a stream once its writer stops.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Resolves once `rx` reads true or its sender is gone.
pub async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|cancelled| *cancelled).await;
}

struct AttachedStream {
    id: u64,
    peer: String,
    tx: mpsc::Sender<Bytes>,
    writer: JoinHandle<()>,
    dropped: u64,
}

#[derive(Default)]
struct OutgoingState {
    streams: Vec<AttachedStream>,
    /// Frame most recently sent, kept in latch mode.
    latched: Option<Bytes>,
}

fn lock_state(state: &Mutex<OutgoingState>) -> MutexGuard<'_, OutgoingState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Fan-out queue with one writer task per attached stream.
///
/// Messages reach every attached stream in enqueue order. A stream whose
/// write fails is detached and never retried. A stream that falls
/// [`STREAM_BUFFER`] frames behind misses messages instead of holding up
/// the others.
pub struct OutgoingQueue {
    name: String,
    state: Arc<Mutex<OutgoingState>>,
    latch: bool,
    next_id: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

impl OutgoingQueue {
    pub fn start(name: impl Into<String>, latch: bool) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(OutgoingState::default())),
            latch,
            next_id: AtomicU64::new(1),
            shutdown_tx: watch::channel(false).0,
        }
    }

    /// Enqueue a serialized message for every attached stream. Never blocks.
    pub fn send(&self, payload: Bytes) -> Result<(), WireError> {
        let frame = encode_frame(&payload);
        let mut state = lock_state(&self.state);
        if self.is_cancelled() {
            return Err(WireError::Cancelled);
        }
        for stream in state.streams.iter_mut() {
            match stream.tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    if stream.dropped == 0 {
                        warn!(queue = %self.name, peer = %stream.peer, "Outgoing stream fell behind, dropping messages");
                    }
                    stream.dropped += 1;
                }
                // the writer has stopped and is detaching itself
                Err(TrySendError::Closed(_)) => {}
            }
        }
        if self.latch {
            state.latched = Some(frame);
        }
        Ok(())
    }

    /// Attach a stream and start its writer task. In latch mode the last
    /// sent message is queued to it first. Must be called inside a tokio
    /// runtime.
    pub fn attach<W>(&self, peer: impl Into<String>, writer: W) -> Result<u64, WireError>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let peer = peer.into();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let mut state = lock_state(&self.state);
        if self.is_cancelled() {
            return Err(WireError::Cancelled);
        }
        if self.latch {
            if let Some(frame) = &state.latched {
                let _ = tx.try_send(frame.clone());
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(write_loop(
            self.name.clone(),
            id,
            peer.clone(),
            writer,
            rx,
            Arc::downgrade(&self.state),
            self.shutdown_tx.subscribe(),
        ));
        debug!(queue = %self.name, peer = %peer, id, "Attached outgoing stream");
        state.streams.push(AttachedStream {
            id,
            peer,
            tx,
            writer: task,
            dropped: 0,
        });
        Ok(id)
    }

    /// `(id, peer)` of every attached stream.
    pub fn peers(&self) -> Vec<(u64, String)> {
        lock_state(&self.state)
            .streams
            .iter()
            .map(|s| (s.id, s.peer.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        lock_state(&self.state).streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Stop every writer, close every stream and drop unsent messages.
    /// Writes in progress are abandoned, so a peer that stopped reading
    /// cannot hold this up.
    pub async fn cancel(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        let streams: Vec<AttachedStream> = {
            let mut state = lock_state(&self.state);
            state.latched = None;
            state.streams.drain(..).collect()
        };
        for stream in streams {
            drop(stream.tx);
            let _ = stream.writer.await;
        }
        debug!(queue = %self.name, "Outgoing queue cancelled");
    }
}

impl Drop for OutgoingQueue {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

async fn write_loop<W>(
    name: String,
    id: u64,
    peer: String,
    mut writer: W,
    mut rx: mpsc::Receiver<Bytes>,
    state: Weak<Mutex<OutgoingState>>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = wait_cancelled(&mut shutdown_rx) => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let written = tokio::select! {
            biased;
            _ = wait_cancelled(&mut shutdown_rx) => break,
            written = write_all_flush(&mut writer, &frame) => written,
        };
        if let Err(e) = written {
            warn!(queue = %name, peer = %peer, error = %e, "Detaching outgoing stream");
            if let Some(state) = state.upgrade() {
                lock_state(&state).streams.retain(|s| s.id != id);
            }
            break;
        }
    }
    if tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown())
        .await
        .is_err()
    {
        debug!(queue = %name, peer = %peer, "Outgoing stream did not close in time");
    }
}

async fn write_all_flush<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}

/// Receiver loop over one stream with a single consumer.
///
/// At most [`INCOMING_BUFFER`] decoded messages wait for the consumer;
/// beyond that the loop stops reading and the peer is held back by TCP.
pub struct IncomingQueue<T> {
    rx: mpsc::Receiver<Result<T, WireError>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> IncomingQueue<T> {
    /// Start reading frames from `reader`, decoding each with `decode`.
    ///
    /// A frame that fails to decode is logged and skipped. The loop ends at
    /// EOF, on a read error, or on [`cancel`](Self::cancel), dropping the
    /// reader.
    pub fn start<R, F>(name: impl Into<String>, reader: R, decode: F) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        F: Fn(Bytes) -> Result<T, WireError> + Send + 'static,
    {
        let name = name.into();
        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(receive_loop(name, reader, decode, tx, shutdown_rx.clone()));
        Self {
            rx,
            shutdown_tx,
            shutdown_rx,
            task,
        }
    }

    /// Wait for the next message.
    ///
    /// Fails with [`WireError::Cancelled`] once cancelled, with the loop's
    /// terminating error, or with [`WireError::ConnectionClosed`] after a
    /// clean EOF.
    pub async fn take(&mut self) -> Result<T, WireError> {
        if *self.shutdown_rx.borrow() {
            return Err(WireError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = wait_cancelled(&mut self.shutdown_rx) => Err(WireError::Cancelled),
            msg = self.rx.recv() => match msg {
                Some(result) => result,
                None => Err(WireError::ConnectionClosed),
            },
        }
    }

    pub fn cancel(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}

impl<T> Drop for IncomingQueue<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn receive_loop<T, R, F>(
    name: String,
    mut reader: R,
    decode: F,
    tx: mpsc::Sender<Result<T, WireError>>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
    F: Fn(Bytes) -> Result<T, WireError>,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = wait_cancelled(&mut shutdown_rx) => break,
            frame = read_frame(&mut reader) => frame,
        };
        let item = match frame {
            Ok(bytes) => match decode(bytes) {
                Ok(msg) => Ok(msg),
                Err(e) => {
                    warn!(queue = %name, error = %e, "Dropping undecodable message");
                    continue;
                }
            },
            Err(WireError::ConnectionClosed) => {
                debug!(queue = %name, "Incoming stream closed");
                break;
            }
            Err(e) => {
                debug!(queue = %name, error = %e, "Incoming stream failed");
                Err(e)
            }
        };
        let failed = item.is_err();
        let delivered = tokio::select! {
            biased;
            _ = wait_cancelled(&mut shutdown_rx) => false,
            sent = tx.send(item) => sent.is_ok(),
        };
        if failed || !delivered {
            break;
        }
    }
}
