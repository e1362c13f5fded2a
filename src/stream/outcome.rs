//! Outcome tags returned by the flow-control primitives.
//!
//! Every operation on a source, sink or exchange reports what happened
//! instead of failing through a shared error channel. Each operation has its
//! own enum so callers match exactly the states that operation can reach.

/// Result of switching a source to decoded text chunks.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingOutcome {
    Success,
    FailedReadableEnded,
}

/// Result of pausing a source.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    Success,
    FailedReadableEnded,
    FailedPaused,
}

/// Result of resuming a source.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Success,
    FailedReadableEnded,
    FailedNotPaused,
}

/// Result of registering a data, end or error listener.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenOutcome {
    Success,
    FailedReadableEnded,
}

/// Result of writing the response status line and headers.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadOutcome {
    Success,
    FailedWritableEnded,
    FailedHeadersSent,
}

/// Result of writing one body chunk.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The chunk was buffered below the high-water mark.
    Success,
    /// The chunk was buffered but the sink is full: pause and wait for drain.
    SuccessDrain,
    FailedWritableEnded,
    FailedHeadersNotSent,
}

/// Result of finalizing a sink.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    Success,
    FailedWritableEnded,
    FailedHeadersNotSent,
}

/// Result of registering a one-shot drain listener.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Success,
    FailedWritableEnded,
    FailedHeadersNotSent,
}

/// Terminal state of a source-to-sink relay.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeOutcome {
    /// Every chunk was written and the sink finalized.
    Success,
    /// The source had already ended (or was destroyed) before the relay finished.
    FailedReadableEnded,
    FailedWritableEnded,
    FailedHeadersNotSent,
    /// The source reported an I/O error.
    FailedSource(String),
}
