//! Bounded byte pipe between the solve and the image loader.
//!
//! ```text
//!   PipeWriter ──▶ [VecDeque<u8> ring buffer] ──▶ PipeReader
//!   PipeCloser ─┘  ├── writer blocks when full (backpressure)
//!                  ├── reader blocks when empty
//!                  ├── shutdown()/close()       → reader sees EOF
//!                  ├── close_with_error(err)    → reader sees err after draining
//!                  ├── all write handles dropped without close → UnexpectedEof
//!                  └── reader dropped/closed    → writer gets BrokenPipe
//! ```
//!
//! A [`PipeCloser`] lets the orchestrator close the write side after the
//! writer itself has been handed to the solve. The first close wins.
//!
//! Locking uses `std::sync::Mutex`: critical sections are VecDeque
//! operations and waker registration only. Wakers are stored under the lock
//! to prevent lost wakeups.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::error::BuildError;

/// Default pipe buffer capacity (matches the Linux kernel pipe default).
pub const PIPE_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
enum WriteState {
    Open,
    Closed,
    Failed(BuildError),
    /// Every write handle was dropped without closing.
    Released,
}

struct PipeBuffer {
    buffer: VecDeque<u8>,
    capacity: usize,
    state: WriteState,
    reader_waker: Option<Waker>,
    writer_waker: Option<Waker>,
}

struct PipeShared {
    buf: Mutex<PipeBuffer>,
    /// Live writer + closer handles.
    write_handles: AtomicUsize,
    reader_closed: AtomicBool,
}

impl PipeShared {
    fn lock(&self) -> MutexGuard<'_, PipeBuffer> {
        self.buf.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Transition out of `Open`; returns false if the pipe was already closed.
    fn close_with(&self, state: WriteState) -> bool {
        let mut inner = self.lock();
        if !matches!(inner.state, WriteState::Open) {
            return false;
        }
        inner.state = state;
        if let Some(waker) = inner.reader_waker.take() {
            waker.wake();
        }
        true
    }

    fn release_handle(&self) {
        if self.write_handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.close_with(WriteState::Released);
        }
    }

    fn close_reader(&self) {
        self.reader_closed.store(true, Ordering::Release);
        let mut inner = self.lock();
        inner.buffer.clear();
        if let Some(waker) = inner.writer_waker.take() {
            waker.wake();
        }
    }
}

/// Writing end of the pipe (handed to the solve as its exporter output)
pub struct PipeWriter {
    shared: Arc<PipeShared>,
}

/// Close-only handle on the writing end
pub struct PipeCloser {
    shared: Arc<PipeShared>,
}

/// Reading end of the pipe (handed to the export consumer)
pub struct PipeReader {
    shared: Arc<PipeShared>,
}

/// Create a pipe with the given buffer capacity.
pub fn pipe_with_capacity(capacity: usize) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(PipeShared {
        buf: Mutex::new(PipeBuffer {
            buffer: VecDeque::with_capacity(capacity.min(8192)),
            capacity: capacity.max(1),
            state: WriteState::Open,
            reader_waker: None,
            writer_waker: None,
        }),
        write_handles: AtomicUsize::new(1),
        reader_closed: AtomicBool::new(false),
    });

    (
        PipeWriter {
            shared: shared.clone(),
        },
        PipeReader { shared },
    )
}

/// Create a pipe with the default capacity (64KB).
pub fn pipe() -> (PipeWriter, PipeReader) {
    pipe_with_capacity(PIPE_BUFFER_SIZE)
}

impl PipeWriter {
    /// Handle that can close this pipe after the writer has been moved away
    pub fn closer(&self) -> PipeCloser {
        self.shared.write_handles.fetch_add(1, Ordering::AcqRel);
        PipeCloser {
            shared: self.shared.clone(),
        }
    }

    /// Close cleanly; the reader sees EOF once the buffer is drained
    pub fn close(&self) -> bool {
        self.shared.close_with(WriteState::Closed)
    }

    /// Close carrying `err`; the reader sees it once the buffer is drained
    pub fn close_with_error(&self, err: BuildError) -> bool {
        self.shared.close_with(WriteState::Failed(err))
    }

    /// Write data, waiting while the buffer is full.
    pub async fn write_bytes(&self, data: &[u8]) -> io::Result<usize> {
        use std::future::poll_fn;

        if data.is_empty() {
            return Ok(0);
        }

        poll_fn(|cx| self.poll_write_impl(cx, data)).await
    }

    fn poll_write_impl(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        if self.shared.reader_closed.load(Ordering::Acquire) {
            return Poll::Ready(Err(broken_pipe()));
        }

        let mut inner = self.shared.lock();

        // Re-check under lock (reader may have closed concurrently)
        if self.shared.reader_closed.load(Ordering::Acquire) {
            return Poll::Ready(Err(broken_pipe()));
        }
        if !matches!(inner.state, WriteState::Open) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write on closed pipe",
            )));
        }

        let available = inner.capacity.saturating_sub(inner.buffer.len());
        if available > 0 {
            let to_write = buf.len().min(available);
            inner.buffer.extend(&buf[..to_write]);
            if let Some(waker) = inner.reader_waker.take() {
                waker.wake();
            }
            Poll::Ready(Ok(to_write))
        } else {
            inner.writer_waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

impl PipeCloser {
    pub fn close(&self) -> bool {
        self.shared.close_with(WriteState::Closed)
    }

    pub fn close_with_error(&self, err: BuildError) -> bool {
        self.shared.close_with(WriteState::Failed(err))
    }
}

impl PipeReader {
    /// Release the reading end; further writes fail with `BrokenPipe`
    pub fn close(&mut self) {
        self.shared.close_reader();
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed")
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.poll_write_impl(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.close();
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut inner = self.shared.lock();

        if !inner.buffer.is_empty() {
            let to_read = buf.remaining().min(inner.buffer.len());
            let (front, back) = inner.buffer.as_slices();

            if to_read <= front.len() {
                buf.put_slice(&front[..to_read]);
            } else {
                buf.put_slice(front);
                let remaining = to_read - front.len();
                buf.put_slice(&back[..remaining]);
            }

            inner.buffer.drain(..to_read);
            if let Some(waker) = inner.writer_waker.take() {
                waker.wake();
            }
            return Poll::Ready(Ok(()));
        }

        let state = inner.state.clone();
        match state {
            WriteState::Open => {
                inner.reader_waker = Some(cx.waker().clone());
                Poll::Pending
            }
            WriteState::Closed => Poll::Ready(Ok(())),
            WriteState::Failed(err) => Poll::Ready(Err(err.clone().into_io())),
            WriteState::Released => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "pipe writer released without close",
            ))),
        }
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.shared.release_handle();
    }
}

impl Drop for PipeCloser {
    fn drop(&mut self) {
        self.shared.release_handle();
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.shared.close_reader();
    }
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeWriter").finish()
    }
}

impl std::fmt::Debug for PipeCloser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeCloser").finish()
    }
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeReader").finish()
    }
}
