//! Pausable chunk sources.
//!
//! # Responsibilities
//! - Hold the listener registry and pause state shared by every source
//! - Drive an underlying byte stream only while someone is listening
//! - Deliver chunks in arrival order, end exactly once
//!
//! # Design Decisions
//! - The producer runs in its own task and only holds a weak reference, so a
//!   source nobody listens to is released with its owner
//! - Listeners are invoked without the state lock held; they may call back
//!   into the source (pause from inside a data listener is the common case)
//! - End is only delivered while flowing, so a paused source that hit EOF
//!   waits for `resume` before reporting end

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::watch;

use crate::stream::outcome::{EncodingOutcome, ListenOutcome, PauseOutcome, ResumeOutcome};

/// Callback receiving body chunks.
pub type DataListener = Box<dyn FnMut(Bytes) + Send>;
/// Callback fired once when the source reaches its end.
pub type EndListener = Box<dyn FnOnce() + Send>;
/// Callback fired once when the producer fails.
pub type ErrorListener = Box<dyn FnOnce(&str) + Send>;

/// Text encoding applied to chunks before delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
}

/// A source of body chunks with cooperative pause/resume flow control.
pub trait ChunkSource: Send + Sync {
    fn pause(&self) -> PauseOutcome;
    fn resume(&self) -> ResumeOutcome;
    fn on_data(&self, listener: DataListener) -> ListenOutcome;
    fn on_end(&self, listener: EndListener) -> ListenOutcome;
    fn on_error(&self, listener: ErrorListener) -> ListenOutcome;
    /// Abandon the source: listeners are dropped and nothing more is read.
    fn destroy(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Waiting,
    Flowing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Paused,
    Ended,
}

struct SourceState {
    phase: Phase,
    listening: bool,
    encoding: Option<Encoding>,
    partial: Vec<u8>,
    data: Vec<DataListener>,
    end: Vec<EndListener>,
    error: Vec<ErrorListener>,
}

/// Shared state behind every [`ChunkSource`] implementation.
pub(crate) struct SourceCore {
    state: Mutex<SourceState>,
    flow: watch::Sender<Flow>,
}

impl std::fmt::Debug for SourceCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SourceCore")
            .field("phase", &state.phase)
            .field("listening", &state.listening)
            .field("encoding", &state.encoding)
            .finish()
    }
}

impl SourceCore {
    pub(crate) fn new() -> Arc<Self> {
        let (flow, _) = watch::channel(Flow::Waiting);
        Arc::new(Self {
            state: Mutex::new(SourceState {
                phase: Phase::Active,
                listening: false,
                encoding: None,
                partial: Vec::new(),
                data: Vec::new(),
                end: Vec::new(),
                error: Vec::new(),
            }),
            flow,
        })
    }

    fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn refresh(&self, state: &SourceState) {
        let next = match state.phase {
            Phase::Ended => Flow::Closed,
            Phase::Active if state.listening => Flow::Flowing,
            _ => Flow::Waiting,
        };
        self.flow.send_if_modified(|flow| {
            if *flow == next {
                false
            } else {
                *flow = next;
                true
            }
        });
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.lock().phase == Phase::Ended
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.lock().phase == Phase::Paused
    }

    pub(crate) fn set_encoding(&self, encoding: Encoding) -> EncodingOutcome {
        let mut state = self.lock();
        if state.phase == Phase::Ended {
            return EncodingOutcome::FailedReadableEnded;
        }
        state.encoding = Some(encoding);
        EncodingOutcome::Success
    }

    pub(crate) fn pause(&self) -> PauseOutcome {
        let mut state = self.lock();
        match state.phase {
            Phase::Ended => PauseOutcome::FailedReadableEnded,
            Phase::Paused => PauseOutcome::FailedPaused,
            Phase::Active => {
                state.phase = Phase::Paused;
                self.refresh(&state);
                PauseOutcome::Success
            }
        }
    }

    pub(crate) fn resume(&self) -> ResumeOutcome {
        let mut state = self.lock();
        match state.phase {
            Phase::Ended => ResumeOutcome::FailedReadableEnded,
            Phase::Active => ResumeOutcome::FailedNotPaused,
            Phase::Paused => {
                state.phase = Phase::Active;
                self.refresh(&state);
                ResumeOutcome::Success
            }
        }
    }

    pub(crate) fn on_data(&self, listener: DataListener) -> ListenOutcome {
        let mut state = self.lock();
        if state.phase == Phase::Ended {
            return ListenOutcome::FailedReadableEnded;
        }
        state.data.push(listener);
        state.listening = true;
        self.refresh(&state);
        ListenOutcome::Success
    }

    pub(crate) fn on_end(&self, listener: EndListener) -> ListenOutcome {
        let mut state = self.lock();
        if state.phase == Phase::Ended {
            return ListenOutcome::FailedReadableEnded;
        }
        state.end.push(listener);
        ListenOutcome::Success
    }

    pub(crate) fn on_error(&self, listener: ErrorListener) -> ListenOutcome {
        let mut state = self.lock();
        if state.phase == Phase::Ended {
            return ListenOutcome::FailedReadableEnded;
        }
        state.error.push(listener);
        ListenOutcome::Success
    }

    pub(crate) fn destroy(&self) {
        let mut state = self.lock();
        if state.phase == Phase::Ended {
            return;
        }
        state.phase = Phase::Ended;
        let listeners = (
            std::mem::take(&mut state.data),
            std::mem::take(&mut state.end),
            std::mem::take(&mut state.error),
        );
        self.refresh(&state);
        drop(state);
        // listeners may own the last handle to other resources
        drop(listeners);
    }

    fn emit_data(&self, chunk: Bytes) {
        let (chunk, mut listeners) = {
            let mut state = self.lock();
            if state.phase == Phase::Ended {
                return;
            }
            let chunk = match state.encoding {
                Some(Encoding::Utf8) => Bytes::from(decode_utf8(&mut state.partial, &chunk)),
                None => chunk,
            };
            (chunk, std::mem::take(&mut state.data))
        };

        if !chunk.is_empty() {
            for listener in &mut listeners {
                listener(chunk.clone());
            }
        }

        let mut state = self.lock();
        if state.phase == Phase::Ended {
            return;
        }
        listeners.append(&mut state.data);
        state.data = listeners;
    }

    fn emit_end(&self) {
        let (tail, mut data, end) = {
            let mut state = self.lock();
            if state.phase == Phase::Ended {
                return;
            }
            state.phase = Phase::Ended;
            let tail = (!state.partial.is_empty()).then(|| {
                state.partial.clear();
                Bytes::from_static("\u{FFFD}".as_bytes())
            });
            let listeners = (
                tail,
                std::mem::take(&mut state.data),
                std::mem::take(&mut state.end),
            );
            state.error.clear();
            self.refresh(&state);
            listeners
        };

        if let Some(tail) = tail {
            for listener in &mut data {
                listener(tail.clone());
            }
        }
        drop(data);
        for listener in end {
            listener();
        }
    }

    fn emit_error(&self, message: &str) {
        let error = {
            let mut state = self.lock();
            if state.phase == Phase::Ended {
                return;
            }
            state.phase = Phase::Ended;
            state.data.clear();
            state.end.clear();
            let error = std::mem::take(&mut state.error);
            self.refresh(&state);
            error
        };

        for listener in error {
            listener(message);
        }
    }
}

/// Wait until the source flows. Returns false once it is closed or released.
async fn until_flowing(flow: &mut watch::Receiver<Flow>) -> bool {
    match flow.wait_for(|flow| *flow != Flow::Waiting).await {
        Ok(flow) => *flow == Flow::Flowing,
        Err(_) => false,
    }
}

/// Drive `stream` into the listeners of `core`.
///
/// The stream is polled only while the source is flowing; each chunk is
/// delivered before the next one is requested.
pub(crate) async fn pump<S, E>(core: Weak<SourceCore>, stream: S)
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::error::Error,
{
    let mut flow = match core.upgrade() {
        Some(core) => core.flow.subscribe(),
        None => return,
    };
    futures_util::pin_mut!(stream);

    loop {
        if !until_flowing(&mut flow).await {
            return;
        }

        let item = stream.next().await;

        match item {
            Some(Ok(chunk)) => {
                if !until_flowing(&mut flow).await {
                    return;
                }
                let Some(core) = core.upgrade() else { return };
                core.emit_data(chunk);
            }
            Some(Err(error)) => {
                tracing::debug!(error = %error, "Chunk source failed");
                if let Some(core) = core.upgrade() {
                    core.emit_error(&error_chain(&error));
                }
                return;
            }
            None => {
                if !until_flowing(&mut flow).await {
                    return;
                }
                if let Some(core) = core.upgrade() {
                    core.emit_end();
                }
                return;
            }
        }
    }
}

/// Render `error` followed by each of its sources, separated by `: `.
pub(crate) fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut cause = error.source();
    while let Some(inner) = cause {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        cause = inner.source();
    }
    message
}

/// Decode `chunk` after any carried-over bytes, keeping an incomplete trailing
/// code point in `partial` for the next chunk.
fn decode_utf8(partial: &mut Vec<u8>, chunk: &[u8]) -> String {
    let mut buffered = std::mem::take(partial);
    buffered.extend_from_slice(chunk);

    let mut decoded = String::with_capacity(buffered.len());
    let mut rest = buffered.as_slice();
    loop {
        match std::str::from_utf8(rest) {
            Ok(text) => {
                decoded.push_str(text);
                rest = &[];
                break;
            }
            Err(error) => {
                let (valid, tail) = rest.split_at(error.valid_up_to());
                decoded.push_str(std::str::from_utf8(valid).unwrap_or_default());
                match error.error_len() {
                    Some(invalid) => {
                        decoded.push('\u{FFFD}');
                        rest = &tail[invalid..];
                    }
                    None => {
                        rest = tail;
                        break;
                    }
                }
            }
        }
    }

    *partial = rest.to_vec();
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        futures_util::stream::iter(
            parts
                .iter()
                .map(|part| Ok(Bytes::from_static(part)))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn pause_and_resume_are_not_repeatable() {
        let core = SourceCore::new();
        assert_eq!(core.pause(), PauseOutcome::Success);
        assert_eq!(core.pause(), PauseOutcome::FailedPaused);
        assert_eq!(core.resume(), ResumeOutcome::Success);
        assert_eq!(core.resume(), ResumeOutcome::FailedNotPaused);
    }

    #[test]
    fn ended_source_rejects_everything() {
        let core = SourceCore::new();
        core.destroy();
        assert_eq!(core.pause(), PauseOutcome::FailedReadableEnded);
        assert_eq!(core.resume(), ResumeOutcome::FailedReadableEnded);
        assert_eq!(core.set_encoding(Encoding::Utf8), EncodingOutcome::FailedReadableEnded);
        assert_eq!(core.on_data(Box::new(|_| {})), ListenOutcome::FailedReadableEnded);
        assert_eq!(core.on_end(Box::new(|| {})), ListenOutcome::FailedReadableEnded);
    }

    #[tokio::test]
    async fn delivers_chunks_in_order_to_every_listener() {
        let core = SourceCore::new();
        tokio::spawn(pump(Arc::downgrade(&core), chunks(&[b"a", b"b", b"c"])));

        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        assert_eq!(core.on_end(Box::new(move || { let _ = done_tx.send(()); })), ListenOutcome::Success);
        let sink = Arc::clone(&first);
        assert_eq!(core.on_data(Box::new(move |chunk| sink.lock().unwrap().push(chunk))), ListenOutcome::Success);
        let sink = Arc::clone(&second);
        assert_eq!(core.on_data(Box::new(move |chunk| sink.lock().unwrap().push(chunk))), ListenOutcome::Success);

        done_rx.await.unwrap();
        assert_eq!(first.lock().unwrap().concat(), b"abc");
        assert!(core.is_ended());
        // the second listener may have joined after the first chunk
        assert!(second.lock().unwrap().concat().ends_with(b"c"));
    }

    #[tokio::test]
    async fn paused_source_emits_nothing_until_resumed() {
        let core = SourceCore::new();
        tokio::spawn(pump(Arc::downgrade(&core), chunks(&[b"one", b"two"])));

        let seen = Arc::new(AtomicUsize::new(0));
        let pauser = Arc::clone(&core);
        let counter = Arc::clone(&seen);
        let (end_tx, end_rx) = tokio::sync::oneshot::channel();
        let _ = core.on_end(Box::new(move || { let _ = end_tx.send(()); }));
        let _ = core.on_data(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = pauser.pause();
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(core.is_paused());

        assert_eq!(core.resume(), ResumeOutcome::Success);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(!core.is_ended(), "end waits for the next resume");

        assert_eq!(core.resume(), ResumeOutcome::Success);
        end_rx.await.unwrap();
    }

    #[tokio::test]
    async fn producer_errors_reach_error_listeners() {
        let core = SourceCore::new();
        let failing = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"x")),
            Err(std::io::Error::other("disk gone")),
        ]);
        tokio::spawn(pump(Arc::downgrade(&core), failing));

        let (tx, rx) = tokio::sync::oneshot::channel();
        let _ = core.on_error(Box::new(move |message| { let _ = tx.send(message.to_owned()); }));
        let _ = core.on_data(Box::new(|_| {}));

        assert_eq!(rx.await.unwrap(), "disk gone");
        assert!(core.is_ended());
    }

    #[derive(Debug, thiserror::Error)]
    #[error("error reading a body from connection")]
    struct BodyReadError(#[source] std::io::Error);

    #[tokio::test]
    async fn producer_errors_keep_their_causes() {
        let core = SourceCore::new();
        let cause = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "stream error received");
        let failing = futures_util::stream::iter(vec![Err::<Bytes, _>(BodyReadError(cause))]);
        tokio::spawn(pump(Arc::downgrade(&core), failing));

        let (tx, rx) = tokio::sync::oneshot::channel();
        let _ = core.on_error(Box::new(move |message| { let _ = tx.send(message.to_owned()); }));
        let _ = core.on_data(Box::new(|_| {}));

        assert_eq!(
            rx.await.unwrap(),
            "error reading a body from connection: stream error received"
        );
    }

    #[test]
    fn utf8_decoding_carries_split_code_points() {
        let mut partial = Vec::new();
        let euro = "€".as_bytes();
        assert_eq!(decode_utf8(&mut partial, &euro[..1]), "");
        assert_eq!(partial.len(), 1);
        assert_eq!(decode_utf8(&mut partial, &euro[1..]), "€");
        assert!(partial.is_empty());
        assert_eq!(decode_utf8(&mut partial, b"a\xffb"), "a\u{FFFD}b");
    }
}
