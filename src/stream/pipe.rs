//! Backpressure-aware relay from a [`ChunkSource`] to a [`ChunkSink`].
//!
//! # Data Flow
//! ```text
//! source chunk → sink.write
//!     Success       → keep flowing
//!     SuccessDrain  → source.pause, sink.once_drain(source.resume)
//!     Failed*       → resolve failed, destroy source
//! source end   → sink.end → resolve
//! source error → resolve failed
//! ```

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::stream::outcome::{
    DrainOutcome, EndOutcome, ListenOutcome, PauseOutcome, PipeOutcome, WriteOutcome,
};
use crate::stream::sink::ChunkSink;
use crate::stream::source::ChunkSource;

/// Settles a relay once; later attempts are ignored.
struct Resolver(Mutex<Option<oneshot::Sender<PipeOutcome>>>);

impl Resolver {
    fn resolve(&self, outcome: PipeOutcome) -> bool {
        let sender = self
            .0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match sender {
            Some(sender) => {
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }

    fn is_resolved(&self) -> bool {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

/// Relay every chunk of `source` into `sink`, then end the sink.
pub async fn pipe<S, K>(source: Arc<S>, sink: Arc<K>) -> PipeOutcome
where
    S: ChunkSource + 'static,
    K: ChunkSink + 'static,
{
    let (tx, rx) = oneshot::channel();
    let resolver = Arc::new(Resolver(Mutex::new(Some(tx))));

    // end and error listeners go first: the source starts flowing as soon as
    // a data listener exists
    let on_end = {
        let sink = Arc::clone(&sink);
        let resolver = Arc::clone(&resolver);
        Box::new(move || {
            if resolver.is_resolved() {
                return;
            }
            let outcome = match sink.end() {
                EndOutcome::Success => PipeOutcome::Success,
                EndOutcome::FailedWritableEnded => PipeOutcome::FailedWritableEnded,
                EndOutcome::FailedHeadersNotSent => PipeOutcome::FailedHeadersNotSent,
            };
            resolver.resolve(outcome);
        })
    };
    if source.on_end(on_end) == ListenOutcome::FailedReadableEnded {
        return PipeOutcome::FailedReadableEnded;
    }

    let on_error = {
        let resolver = Arc::clone(&resolver);
        Box::new(move |message: &str| {
            resolver.resolve(PipeOutcome::FailedSource(message.to_owned()));
        })
    };
    if source.on_error(on_error) == ListenOutcome::FailedReadableEnded {
        return PipeOutcome::FailedReadableEnded;
    }

    let on_data = {
        let source = Arc::clone(&source);
        let resolver = Arc::clone(&resolver);
        Box::new(move |chunk: Bytes| {
            if resolver.is_resolved() {
                return;
            }
            let failed = match sink.write(chunk) {
                WriteOutcome::Success => return,
                WriteOutcome::SuccessDrain => {
                    if source.pause() == PauseOutcome::FailedReadableEnded {
                        PipeOutcome::FailedReadableEnded
                    } else {
                        let paused = Arc::clone(&source);
                        match sink.once_drain(Box::new(move || {
                            let _ = paused.resume();
                        })) {
                            DrainOutcome::Success => return,
                            DrainOutcome::FailedWritableEnded => PipeOutcome::FailedWritableEnded,
                            DrainOutcome::FailedHeadersNotSent => PipeOutcome::FailedHeadersNotSent,
                        }
                    }
                }
                WriteOutcome::FailedWritableEnded => PipeOutcome::FailedWritableEnded,
                WriteOutcome::FailedHeadersNotSent => PipeOutcome::FailedHeadersNotSent,
            };
            if resolver.resolve(failed) {
                source.destroy();
            }
        })
    };
    if source.on_data(on_data) == ListenOutcome::FailedReadableEnded {
        return PipeOutcome::FailedReadableEnded;
    }

    // a destroyed source drops its listeners along with the sender
    drop(resolver);
    rx.await.unwrap_or(PipeOutcome::FailedReadableEnded)
}
