//! Flow-controlled byte pipe
//!
//! One writer (the wire parser) and one reader (application code) share a
//! FIFO of chunks. Writes wait while the buffered byte count is at capacity.
//! Reads take up to the requested number of bytes, slicing the front chunk
//! and keeping the remainder buffered.
//!
//! End of input is reported only after the writer called
//! [`PipeWriter::close`] and every buffered byte was read. A writer that is
//! dropped without closing, or calls [`PipeWriter::abort`], makes the reader
//! observe [`PipeError::Aborted`] once the buffered bytes are drained, so a
//! truncated stream is never mistaken for a complete one.

use std::collections::VecDeque;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use schema_rpc_protocol::ByteStream;
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::PipeError;

/// Default number of buffered bytes before writes wait
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Largest chunk yielded when the pipe is read as a stream
const STREAM_READ_SIZE: usize = 16 * 1024;

const WRITER_DROPPED: &str = "writer dropped before end of stream";

#[derive(Debug)]
struct PipeState {
    chunks: VecDeque<Bytes>,
    buffered: usize,
    capacity: usize,
    write_closed: bool,
    aborted: Option<String>,
    reader_dropped: bool,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

impl PipeState {
    fn wake_reader(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }

    fn set_aborted(&mut self, reason: String) {
        if self.aborted.is_none() && !self.write_closed {
            self.aborted = Some(reason);
        }
        self.wake_reader();
    }

    fn wake_writer(&mut self) {
        if let Some(waker) = self.write_waker.take() {
            waker.wake();
        }
    }

    /// Take up to `max` bytes from the front of the FIFO
    fn take(&mut self, max: usize) -> Bytes {
        let first_len = self.chunks.front().map_or(0, Bytes::len);
        let taken = if first_len >= max {
            let Some(front) = self.chunks.front_mut() else {
                return Bytes::new();
            };
            let taken = front.split_to(max);
            if front.is_empty() {
                self.chunks.pop_front();
            }
            taken
        } else {
            let mut joined = BytesMut::with_capacity(max.min(self.buffered));
            while joined.len() < max {
                let Some(mut chunk) = self.chunks.pop_front() else {
                    break;
                };
                let wanted = max - joined.len();
                if chunk.len() > wanted {
                    joined.extend_from_slice(&chunk.split_to(wanted));
                    self.chunks.push_front(chunk);
                } else {
                    joined.extend_from_slice(&chunk);
                }
            }
            joined.freeze()
        };
        self.buffered -= taken.len();
        taken
    }
}

/// Create a pipe buffering at most `capacity` bytes ahead of the reader
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Mutex::new(PipeState {
        chunks: VecDeque::new(),
        buffered: 0,
        capacity: capacity.max(1),
        write_closed: false,
        aborted: None,
        reader_dropped: false,
        read_waker: None,
        write_waker: None,
    }));
    (
        PipeWriter {
            shared: shared.clone(),
            finished: false,
        },
        PipeReader { shared },
    )
}

/// A pipe whose writes never wait
pub fn unbounded_pipe() -> (PipeWriter, PipeReader) {
    pipe(usize::MAX)
}

/// Write half of a pipe
#[derive(Debug)]
pub struct PipeWriter {
    shared: Arc<Mutex<PipeState>>,
    finished: bool,
}

impl PipeWriter {
    fn poll_write(&mut self, cx: &mut Context<'_>, data: &mut Option<Bytes>) -> Poll<Result<(), PipeError>> {
        let mut state = self.shared.lock();
        if state.reader_dropped {
            return Poll::Ready(Err(PipeError::ReaderGone));
        }
        if let Some(reason) = &state.aborted {
            return Poll::Ready(Err(PipeError::Aborted(reason.clone())));
        }
        if state.write_closed {
            return Poll::Ready(Err(PipeError::Closed));
        }
        if state.buffered >= state.capacity {
            state.write_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        if let Some(chunk) = data.take().filter(|c| !c.is_empty()) {
            state.buffered += chunk.len();
            state.chunks.push_back(chunk);
            state.wake_reader();
        }
        Poll::Ready(Ok(()))
    }

    /// Append a chunk, waiting while the pipe is at capacity
    pub async fn write(&mut self, chunk: Bytes) -> Result<(), PipeError> {
        let mut data = Some(chunk);
        poll_fn(|cx| self.poll_write(cx, &mut data)).await
    }

    /// Signal end of input; buffered bytes stay readable
    pub fn close(mut self) {
        self.finished = true;
        let mut state = self.shared.lock();
        state.write_closed = true;
        state.wake_reader();
    }

    /// Terminate the stream with an error visible to the reader
    pub fn abort(mut self, reason: impl Into<String>) {
        self.finished = true;
        self.shared.lock().set_aborted(reason.into());
    }

    /// Whether the reader has been dropped
    pub fn is_reader_gone(&self) -> bool {
        self.shared.lock().reader_dropped
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.shared.lock().set_aborted(WRITER_DROPPED.to_string());
        }
    }
}

/// Read half of a pipe
#[derive(Debug)]
pub struct PipeReader {
    shared: Arc<Mutex<PipeState>>,
}

impl PipeReader {
    /// Poll for up to `max` bytes. `None` is a clean end of input.
    pub fn poll_read_chunk(&mut self, cx: &mut Context<'_>, max: usize) -> Poll<Option<Result<Bytes, PipeError>>> {
        let mut state = self.shared.lock();
        if state.buffered > 0 {
            let chunk = state.take(max.max(1));
            state.wake_writer();
            return Poll::Ready(Some(Ok(chunk)));
        }
        if let Some(reason) = &state.aborted {
            return Poll::Ready(Some(Err(PipeError::Aborted(reason.clone()))));
        }
        if state.write_closed {
            return Poll::Ready(None);
        }
        state.read_waker = Some(cx.waker().clone());
        Poll::Pending
    }

    /// Read up to `max` bytes
    pub async fn read(&mut self, max: usize) -> Option<Result<Bytes, PipeError>> {
        poll_fn(|cx| self.poll_read_chunk(cx, max)).await
    }

    /// Bytes currently buffered
    pub fn buffered_len(&self) -> usize {
        self.shared.lock().buffered
    }

    pub fn into_byte_stream(self) -> ByteStream {
        ByteStream::new(self.map(|chunk| chunk.map_err(Into::into)))
    }
}

impl Stream for PipeReader {
    type Item = Result<Bytes, PipeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.poll_read_chunk(cx, STREAM_READ_SIZE)
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        match self.poll_read_chunk(cx, buf.remaining()) {
            Poll::Ready(Some(Ok(chunk))) => {
                buf.put_slice(&chunk);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Some(Err(err))) => Poll::Ready(Err(io::Error::other(err))),
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.reader_dropped = true;
        state.chunks.clear();
        state.buffered = 0;
        state.wake_writer();
    }
}
