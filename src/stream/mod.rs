//! Chunked reading of media byte sources
//!
//! A [`ChunkReader`] turns any async byte source into a lazy, finite sequence
//! of fixed-size [`Chunk`]s. Sequence numbers start at 0 and increase by one
//! per chunk. End of input ends the sequence quietly; a read failure ends it
//! with one chunk carrying the error.

use bytes::Bytes;
use futures::Stream;
use std::io::{self, SeekFrom};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

/// Chunk size used when none (or zero) is configured: 1 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Largest chunk a frame header can describe
pub const MAX_CHUNK_SIZE: usize = u32::MAX as usize;

/// A read failure captured in a terminal chunk
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("chunk read failed: {message}")]
pub struct ChunkError {
    pub kind: io::ErrorKind,
    pub message: String,
}

impl From<io::Error> for ChunkError {
    fn from(e: io::Error) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// One slice of a byte source
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position of this chunk in its stream, starting at 0
    pub seq: u64,
    /// Number of valid bytes in `data`
    pub len: usize,
    pub data: Bytes,
    /// Set on the last chunk of a stream that failed
    pub error: Option<ChunkError>,
}

impl Chunk {
    fn failed(seq: u64, error: io::Error) -> Self {
        Self {
            seq,
            len: 0,
            data: Bytes::new(),
            error: Some(error.into()),
        }
    }

    /// The valid bytes of this chunk
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Lazily reads a byte source as a sequence of chunks
///
/// Owned by a single consumer; not meant for concurrent iteration.
pub struct ChunkReader<R> {
    reader: R,
    chunk_size: usize,
    next_seq: u64,
    done: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    /// Wrap `reader`; a `chunk_size` of 0 selects [`DEFAULT_CHUNK_SIZE`]
    /// and anything above [`MAX_CHUNK_SIZE`] is clamped to it
    pub fn new(reader: R, chunk_size: usize) -> Self {
        let chunk_size = match chunk_size {
            0 => DEFAULT_CHUNK_SIZE,
            n => n.min(MAX_CHUNK_SIZE),
        };

        Self {
            reader,
            chunk_size,
            next_seq: 0,
            done: false,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Read the next chunk, or `None` once the sequence has ended
    ///
    /// Reads until the chunk is full or the source is exhausted, so every
    /// chunk except the last is exactly `chunk_size` bytes.
    pub async fn next_chunk(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }

        let seq = self.next_seq;
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;

        while filled < self.chunk_size {
            match self.reader.read(&mut buf[filled..]).await {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    self.next_seq += 1;
                    return Some(Chunk::failed(seq, e));
                }
            }
        }

        if filled == 0 {
            return None;
        }

        buf.truncate(filled);
        self.next_seq += 1;

        Some(Chunk {
            seq,
            len: filled,
            data: Bytes::from(buf),
            error: None,
        })
    }

    /// The remaining chunks as a stream
    pub fn into_stream(self) -> impl Stream<Item = Chunk> {
        futures::stream::unfold(self, |mut reader| async move {
            reader.next_chunk().await.map(|chunk| (chunk, reader))
        })
    }
}

impl<R: AsyncRead + AsyncSeek + Unpin> ChunkReader<R> {
    /// Seek the source back to its start and restart the sequence at 0
    pub async fn rewind(&mut self) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(0)).await?;
        self.next_seq = 0;
        self.done = false;
        Ok(())
    }
}
