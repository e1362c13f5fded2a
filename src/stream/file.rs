//! Byte-range file reader.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::{stream, StreamExt, TryStreamExt};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, Take};
use tokio_util::io::ReaderStream;

use crate::stream::outcome::{EncodingOutcome, ListenOutcome, PauseOutcome, ResumeOutcome};
use crate::stream::source::{
    pump, ChunkSource, DataListener, Encoding, EndListener, ErrorListener, SourceCore,
};

/// Read size for file chunks.
pub const FILE_CHUNK_SIZE: usize = 64 * 1024;

/// Inclusive byte bounds within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered, both bounds included.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// A file exposed as a pausable chunk source, optionally bounded to a range.
///
/// The file is not opened until the first data listener is registered.
#[derive(Debug)]
pub struct RangeFileReader {
    core: Arc<SourceCore>,
}

impl RangeFileReader {
    pub fn open(path: impl Into<PathBuf>, range: Option<ByteRange>) -> Arc<Self> {
        let path = path.into();
        let core = SourceCore::new();

        let chunks = stream::once(async move { open_bounded(&path, range).await })
            .map_ok(|reader| ReaderStream::with_capacity(reader, FILE_CHUNK_SIZE))
            .try_flatten()
            .boxed();
        tokio::spawn(pump(Arc::downgrade(&core), chunks));

        Arc::new(Self { core })
    }

    pub fn set_encoding(&self, encoding: Encoding) -> EncodingOutcome {
        self.core.set_encoding(encoding)
    }
}

async fn open_bounded(path: &Path, range: Option<ByteRange>) -> std::io::Result<Take<File>> {
    let mut file = File::open(path).await?;
    match range {
        Some(range) => {
            file.seek(SeekFrom::Start(range.start)).await?;
            Ok(file.take(range.len()))
        }
        None => Ok(file.take(u64::MAX)),
    }
}

impl ChunkSource for RangeFileReader {
    fn pause(&self) -> PauseOutcome {
        self.core.pause()
    }

    fn resume(&self) -> ResumeOutcome {
        self.core.resume()
    }

    fn on_data(&self, listener: DataListener) -> ListenOutcome {
        self.core.on_data(listener)
    }

    fn on_end(&self, listener: EndListener) -> ListenOutcome {
        self.core.on_end(listener)
    }

    fn on_error(&self, listener: ErrorListener) -> ListenOutcome {
        self.core.on_error(listener)
    }

    fn destroy(&self) {
        self.core.destroy();
    }
}
