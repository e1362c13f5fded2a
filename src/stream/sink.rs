//! Chunk sinks and the channel-backed HTTP body.
//!
//! # Responsibilities
//! - Accept chunks from a writer and hand them to hyper as body frames
//! - Report backpressure once the buffered bytes reach the high-water mark
//! - Notify drain listeners when the reader has consumed the buffer
//!
//! # Design Decisions
//! - Writes never block and never reject for being full; the caller is told
//!   to pause instead (`SuccessDrain`)
//! - A dropped reader means the peer is gone: writes fail from then on and
//!   pending drain listeners fire so paused producers observe the failure

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use bytes::Bytes;
use http_body::{Body, Frame};

use crate::stream::outcome::{DrainOutcome, EndOutcome, WriteOutcome};

/// Buffered bytes at which writers are asked to wait for drain.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;

/// One-shot callback fired when a full sink has room again.
pub type DrainListener = Box<dyn FnOnce() + Send>;

/// A destination for body chunks with write/end/drain flow control.
pub trait ChunkSink: Send + Sync {
    fn write(&self, chunk: Bytes) -> WriteOutcome;
    fn end(&self) -> EndOutcome;
    fn once_drain(&self, listener: DrainListener) -> DrainOutcome;
}

/// The writer was dropped before it ended the body.
#[derive(Debug, thiserror::Error)]
#[error("body writer dropped before the body was finished")]
pub struct BodyAbandoned;

struct ChannelState {
    queue: VecDeque<Bytes>,
    buffered: usize,
    need_drain: bool,
    ended: bool,
    abandoned: bool,
    closed: bool,
    drain: Vec<DrainListener>,
    reader: Option<Waker>,
}

struct Channel {
    state: Mutex<ChannelState>,
    high_water_mark: usize,
}

impl Channel {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Create a connected writer/body pair.
pub fn body_channel(high_water_mark: usize) -> (BodyWriter, ChannelBody) {
    let channel = Arc::new(Channel {
        state: Mutex::new(ChannelState {
            queue: VecDeque::new(),
            buffered: 0,
            need_drain: false,
            ended: false,
            abandoned: false,
            closed: false,
            drain: Vec::new(),
            reader: None,
        }),
        high_water_mark,
    });
    (
        BodyWriter {
            channel: Arc::clone(&channel),
        },
        ChannelBody { channel },
    )
}

/// Writing half of a [`body_channel`].
pub struct BodyWriter {
    channel: Arc<Channel>,
}

impl std::fmt::Debug for BodyWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.channel.lock();
        f.debug_struct("BodyWriter")
            .field("buffered", &state.buffered)
            .field("ended", &state.ended)
            .field("closed", &state.closed)
            .finish()
    }
}

impl BodyWriter {
    /// True once the body was finalized or the reader went away.
    pub fn is_ended(&self) -> bool {
        let state = self.channel.lock();
        state.ended || state.closed
    }

    /// True if the reader side was dropped.
    pub fn is_closed(&self) -> bool {
        self.channel.lock().closed
    }

    /// Bytes written but not yet consumed by the reader.
    pub fn buffered(&self) -> usize {
        self.channel.lock().buffered
    }
}

impl ChunkSink for BodyWriter {
    fn write(&self, chunk: Bytes) -> WriteOutcome {
        let mut state = self.channel.lock();
        if state.ended || state.closed {
            return WriteOutcome::FailedWritableEnded;
        }
        state.buffered += chunk.len();
        state.queue.push_back(chunk);
        if let Some(reader) = state.reader.take() {
            reader.wake();
        }
        if state.buffered >= self.channel.high_water_mark {
            state.need_drain = true;
            WriteOutcome::SuccessDrain
        } else {
            WriteOutcome::Success
        }
    }

    fn end(&self) -> EndOutcome {
        let mut state = self.channel.lock();
        if state.ended || state.closed {
            return EndOutcome::FailedWritableEnded;
        }
        state.ended = true;
        if let Some(reader) = state.reader.take() {
            reader.wake();
        }
        EndOutcome::Success
    }

    fn once_drain(&self, listener: DrainListener) -> DrainOutcome {
        let mut state = self.channel.lock();
        if state.ended || state.closed {
            return DrainOutcome::FailedWritableEnded;
        }
        if state.need_drain {
            state.drain.push(listener);
            return DrainOutcome::Success;
        }
        // the reader already caught up
        drop(state);
        listener();
        DrainOutcome::Success
    }
}

impl Drop for BodyWriter {
    fn drop(&mut self) {
        let mut state = self.channel.lock();
        if !state.ended {
            state.abandoned = true;
            if let Some(reader) = state.reader.take() {
                reader.wake();
            }
        }
    }
}

/// Reading half of a [`body_channel`], handed to hyper as a request or
/// response body.
pub struct ChannelBody {
    channel: Arc<Channel>,
}

impl std::fmt::Debug for ChannelBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBody").finish_non_exhaustive()
    }
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = BodyAbandoned;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut state = self.channel.lock();

        if let Some(chunk) = state.queue.pop_front() {
            state.buffered -= chunk.len();
            let drained = if state.need_drain && state.buffered == 0 {
                state.need_drain = false;
                std::mem::take(&mut state.drain)
            } else {
                Vec::new()
            };
            drop(state);
            for listener in drained {
                listener();
            }
            return Poll::Ready(Some(Ok(Frame::data(chunk))));
        }

        if state.ended {
            return Poll::Ready(None);
        }
        if state.abandoned {
            return Poll::Ready(Some(Err(BodyAbandoned)));
        }

        state.reader = Some(cx.waker().clone());
        Poll::Pending
    }

    fn is_end_stream(&self) -> bool {
        let state = self.channel.lock();
        state.ended && state.queue.is_empty()
    }
}

impl Drop for ChannelBody {
    fn drop(&mut self) {
        let drained = {
            let mut state = self.channel.lock();
            state.closed = true;
            state.queue.clear();
            state.buffered = 0;
            state.need_drain = false;
            std::mem::take(&mut state.drain)
        };
        for listener in drained {
            listener();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn reports_drain_at_high_water_mark() {
        let (writer, mut body) = body_channel(4);
        assert_eq!(writer.write(Bytes::from_static(b"ab")), WriteOutcome::Success);
        assert_eq!(writer.write(Bytes::from_static(b"cd")), WriteOutcome::SuccessDrain);

        let drained = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&drained);
        assert_eq!(
            writer.once_drain(Box::new(move || flag.store(true, Ordering::SeqCst))),
            DrainOutcome::Success
        );
        assert!(!drained.load(Ordering::SeqCst));

        let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert_eq!(first, "ab");
        assert!(!drained.load(Ordering::SeqCst));
        let second = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert_eq!(second, "cd");
        assert!(drained.load(Ordering::SeqCst));
        assert_eq!(writer.buffered(), 0);
    }

    #[test]
    fn drain_fires_immediately_when_not_full() {
        let (writer, _body) = body_channel(1024);
        let drained = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&drained);
        let _ = writer.once_drain(Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(drained.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn end_finishes_the_body() {
        let (writer, body) = body_channel(1024);
        let _ = writer.write(Bytes::from_static(b"hello "));
        let _ = writer.write(Bytes::from_static(b"world"));
        assert_eq!(writer.end(), EndOutcome::Success);
        assert_eq!(writer.end(), EndOutcome::FailedWritableEnded);
        assert_eq!(writer.write(Bytes::from_static(b"!")), WriteOutcome::FailedWritableEnded);

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected, "hello world");
    }

    #[test]
    fn dropped_reader_fails_writes_and_fires_drain() {
        let (writer, body) = body_channel(1);
        assert_eq!(writer.write(Bytes::from_static(b"xy")), WriteOutcome::SuccessDrain);
        let drained = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&drained);
        let _ = writer.once_drain(Box::new(move || flag.store(true, Ordering::SeqCst)));

        drop(body);
        assert!(drained.load(Ordering::SeqCst));
        assert!(writer.is_closed());
        assert_eq!(writer.write(Bytes::from_static(b"z")), WriteOutcome::FailedWritableEnded);
    }

    #[tokio::test]
    async fn dropped_writer_fails_the_body() {
        let (writer, body) = body_channel(1024);
        let _ = writer.write(Bytes::from_static(b"partial"));
        drop(writer);
        assert!(body.collect().await.is_err());
    }
}
