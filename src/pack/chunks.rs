use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Reads a byte source as a sequence of non-empty chunks of at most
/// `chunk_size` bytes, ending at end-of-stream. Holds at most one chunk.
/// Read errors are passed through untouched.
#[derive(Debug)]
pub struct ChunkReader<R> {
    inner: ReaderStream<R>,
}

impl<R: AsyncRead> ChunkReader<R> {
    pub fn new(source: R, chunk_size: usize) -> Self {
        ChunkReader {
            inner: ReaderStream::with_capacity(source, chunk_size.max(1)),
        }
    }
}

impl<R: AsyncRead + Unpin> Stream for ChunkReader<R> {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
