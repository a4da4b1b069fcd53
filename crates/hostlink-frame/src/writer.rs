use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec::{encode_prefix, FrameConfig};
use crate::error::{FrameError, Result};

/// Writes complete length-prefixed frames to any `AsyncWrite` stream.
///
/// The payload goes out in slices of at most `chunk_size` bytes. Callers that
/// share a writer between tasks must serialize `send` themselves.
pub struct FrameWriter<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: AsyncWrite + Unpin> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Write one frame: prefix, payload chunks, flush.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        if let Some(max) = self.config.max_frame_len {
            if payload.len() > max {
                return Err(FrameError::PayloadTooLarge {
                    size: payload.len(),
                    max,
                });
            }
        }

        self.inner.write_all(&encode_prefix(payload.len())).await?;
        for chunk in payload.chunks(self.config.chunk_size.max(1)) {
            self.inner.write_all(chunk).await?;
        }
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write half of the underlying stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await.map_err(FrameError::Io)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use bytes::BytesMut;
    use tokio_util::codec::Decoder;

    use super::*;
    use crate::codec::{StreamCodec, PREFIX_SIZE};

    #[tokio::test]
    async fn write_single_frame() {
        let mut writer = FrameWriter::new(Vec::<u8>::new());
        writer.send(b"hello").await.unwrap();

        let mut wire = BytesMut::from(writer.into_inner().as_slice());
        let frame = StreamCodec::default().decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn payload_is_written_in_bounded_slices() {
        let sink = RecordingWriter::default();
        let mut writer = FrameWriter::with_config(sink, FrameConfig::with_chunk_size(4));
        writer.send(b"abcdefghij").await.unwrap();

        let sink = writer.into_inner();
        assert_eq!(sink.writes[0], PREFIX_SIZE);
        assert!(sink.writes[1..].iter().all(|len| *len <= 4));
        assert_eq!(sink.writes[1..].iter().sum::<usize>(), 10);
        assert!(sink.flushed);
    }

    #[tokio::test]
    async fn empty_payload_writes_prefix_only() {
        let mut writer = FrameWriter::new(Vec::<u8>::new());
        writer.send(b"").await.unwrap();
        assert_eq!(writer.into_inner(), 0u64.to_le_bytes().to_vec());
    }

    #[tokio::test]
    async fn payload_over_limit_rejected() {
        let cfg = FrameConfig {
            max_frame_len: Some(4),
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(Vec::<u8>::new(), cfg);

        let err = writer.send(b"oversized").await.unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 4 }));
        assert!(writer.get_ref().is_empty());
    }

    #[tokio::test]
    async fn write_error_propagates() {
        let mut writer = FrameWriter::new(BrokenWriter);
        let err = writer.send(b"x").await.unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[derive(Default)]
    struct RecordingWriter {
        writes: Vec<usize>,
        flushed: bool,
    }

    impl AsyncWrite for RecordingWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.writes.push(buf.len());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.flushed = true;
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct BrokenWriter;

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }
}
