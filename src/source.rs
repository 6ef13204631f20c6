//! Byte Source Adapter (spec.md §4.1): turns any `AsyncRead` into a bounded
//! `tokio::sync::mpsc` channel of chunks, so the decoder and the I/O loop
//! run on independent tasks with a single, well-understood suspension
//! point at the channel boundary. Grounded on the `wholesym`/`samply`
//! dependency on `tokio::sync::mpsc` for cross-task byte handoff.

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::error::{NettraceError, Result};

/// Chunks are read in pieces of at least this size (spec.md §4.1), so a
/// slow upstream producing single bytes doesn't thrash the channel.
pub const MIN_CHUNK_SIZE: usize = 64 * 1024;

/// How many chunks may be in flight before the producer blocks — the
/// pipeline's one backpressure point (spec.md §5 "Concurrency & Resource
/// Model").
const CHANNEL_CAPACITY: usize = 4;

/// One step of progress through the source: either a chunk of bytes, or the
/// end of the stream (including an I/O error encountered while reading).
pub enum Chunk {
    Data(Bytes),
    End(Result<()>),
}

/// A receiver-side handle over the byte source's channel.
pub struct ByteSource {
    rx: mpsc::Receiver<Chunk>,
}

impl ByteSource {
    /// Spawns a task that reads `reader` in >= [`MIN_CHUNK_SIZE`] chunks and
    /// feeds them to the returned [`ByteSource`]. The task's own errors are
    /// delivered as the final `Chunk::End`, not by panicking or being
    /// silently dropped.
    pub fn spawn<R>(mut reader: R) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut buf = vec![0u8; MIN_CHUNK_SIZE];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        let _ = tx.send(Chunk::End(Ok(()))).await;
                        return;
                    }
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        if tx.send(Chunk::Data(chunk)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Chunk::End(Err(NettraceError::Io(e)))).await;
                        return;
                    }
                }
            }
        });
        ByteSource { rx }
    }

    /// Awaits the next chunk. Returns `None` once the source has reported
    /// its end (successful EOF or I/O error, already folded into the final
    /// `Chunk::End` by [`ByteSource::spawn`]'s producer task).
    pub async fn next_chunk(&mut self) -> Option<Chunk> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn yields_all_bytes_then_a_clean_end() {
        let data = vec![7u8; MIN_CHUNK_SIZE + 10];
        let (mut writer, reader) = tokio::io::duplex(MIN_CHUNK_SIZE * 2);
        let to_write = data.clone();
        tokio::spawn(async move {
            writer.write_all(&to_write).await.unwrap();
            writer.shutdown().await.unwrap();
        });

        let mut source = ByteSource::spawn(reader);
        let mut collected = Vec::new();
        loop {
            match source.next_chunk().await {
                Some(Chunk::Data(bytes)) => collected.extend_from_slice(&bytes),
                Some(Chunk::End(Ok(()))) => break,
                Some(Chunk::End(Err(e))) => panic!("unexpected error: {e}"),
                None => panic!("channel closed before End"),
            }
        }
        assert_eq!(collected, data);
    }

    #[tokio::test]
    async fn empty_reader_yields_only_a_clean_end() {
        let (mut writer, reader) = tokio::io::duplex(64);
        writer.shutdown().await.unwrap();
        let mut source = ByteSource::spawn(reader);
        match source.next_chunk().await {
            Some(Chunk::End(Ok(()))) => {}
            other => panic!("expected immediate clean End, got a Data chunk or Err: {}", other.is_some()),
        }
    }
}
