//! In-memory growable buffer used to stream a nested archive's bytes into
//! RAM before it is spilled to a temporary file for recursive processing.
//!
//! Grounded on `examples/original_source/src/recursion.h`'s
//! `extract_buffer`/`write_buffer_to_tempfile`, and on the growable
//! `Buffer` wrapper style of `examples/RMamonts-nfs-mamont/src/allocator/buffer.rs`.

use std::io::Write;

use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Per-extraction hard cap (spec.md §4.4): "the buffer is capped at 1 GiB
/// per extraction, over which the extraction aborts with an error flag
/// set."
pub const MAX_EXTRACT_SIZE: usize = 1024 * 1024 * 1024;

const INITIAL_CAPACITY: usize = 4096;

/// Outcome a [`ExtractBuffer::write_chunk`] sink reports back to the
/// decoder's streaming callback, per spec.md §9 Design Notes
/// ("a streaming sink trait/interface with `write_chunk(bytes) ->
/// Continue|Abort`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Continue,
    Abort,
}

/// Growable byte buffer that doubles capacity on demand and refuses to
/// grow past [`MAX_EXTRACT_SIZE`].
#[derive(Debug, Default)]
pub struct ExtractBuffer {
    data: Vec<u8>,
    aborted: bool,
}

impl ExtractBuffer {
    pub fn new() -> Self {
        Self { data: Vec::with_capacity(INITIAL_CAPACITY), aborted: false }
    }

    /// Appends `chunk`, doubling the backing allocation as needed. Once
    /// the total would exceed [`MAX_EXTRACT_SIZE`] the buffer aborts and
    /// further chunks are ignored.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> SinkOutcome {
        if self.aborted {
            return SinkOutcome::Abort;
        }
        if self.data.len() + chunk.len() > MAX_EXTRACT_SIZE {
            self.aborted = true;
            tracing::warn!(size = self.data.len(), "nested archive extraction exceeded 1 GiB cap");
            return SinkOutcome::Abort;
        }
        if self.data.len() + chunk.len() > self.data.capacity() {
            self.data.reserve(self.data.capacity().max(INITIAL_CAPACITY));
        }
        self.data.extend_from_slice(chunk);
        SinkOutcome::Continue
    }

    pub fn aborted(&self) -> bool {
        self.aborted
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Writes the buffer to a freshly created, owner-only, unpredictably
    /// named file under the system temp directory, and returns its path.
    /// The temp file is kept open for the caller to manage; on any write
    /// error the partially written file is removed.
    pub fn spill_to_tempfile(&self) -> Result<NamedTempFile> {
        let mut file = NamedTempFile::new().map_err(Error::from)?;
        if let Err(err) = file.write_all(&self.data).and_then(|_| file.flush()) {
            return Err(Error::from(err));
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_chunk_accumulates() {
        let mut buf = ExtractBuffer::new();
        assert_eq!(buf.write_chunk(b"abc"), SinkOutcome::Continue);
        assert_eq!(buf.write_chunk(b"def"), SinkOutcome::Continue);
        assert_eq!(buf.as_slice(), b"abcdef");
    }

    #[test]
    fn write_chunk_aborts_past_cap() {
        let mut buf = ExtractBuffer::new();
        buf.data = vec![0u8; MAX_EXTRACT_SIZE - 1];
        assert_eq!(buf.write_chunk(&[0u8; 4]), SinkOutcome::Abort);
        assert!(buf.aborted());
    }

    #[test]
    fn spill_round_trips_contents() {
        let mut buf = ExtractBuffer::new();
        buf.write_chunk(b"nested archive bytes");
        let file = buf.spill_to_tempfile().unwrap();
        let contents = std::fs::read(file.path()).unwrap();
        assert_eq!(contents, b"nested archive bytes");
    }
}
