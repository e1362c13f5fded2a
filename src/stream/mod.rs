//! Flow-control subsystem shared by file serving and proxying.
//!
//! # Data Flow
//! ```text
//! producer (inbound body | file | upstream body)
//!     → source.rs (listener registry, pause/resume, pump task)
//!     → pipe.rs (write, pause on drain, resume on drain notification)
//!     → sink.rs (buffered body channel polled by hyper)
//!     → socket
//! ```
//!
//! # Design Decisions
//! - Two-party protocol: sources pause/resume/emit, sinks write/end/drain
//! - No unbounded buffering: a full sink pauses its source until drained
//! - Every operation returns an outcome tag (see outcome.rs)

pub mod file;
pub mod outcome;
pub mod pipe;
pub mod sink;
pub mod source;

pub use file::{ByteRange, RangeFileReader};
pub use outcome::{
    DrainOutcome, EncodingOutcome, EndOutcome, HeadOutcome, ListenOutcome, PauseOutcome,
    PipeOutcome, ResumeOutcome, WriteOutcome,
};
pub use pipe::pipe;
pub use sink::{body_channel, BodyWriter, ChannelBody, ChunkSink, DEFAULT_HIGH_WATER_MARK};
pub use source::{ChunkSource, Encoding};
