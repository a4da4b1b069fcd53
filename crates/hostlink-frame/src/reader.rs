use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::codec::{FrameConfig, StreamCodec};
use crate::error::Result;

/// Reads complete length-prefixed frames from any `AsyncRead` stream.
///
/// Handles partial reads internally; callers always get complete payloads.
/// `read_frame` is cancel safe: a frame interrupted mid-payload resumes on
/// the next call.
pub struct FrameReader<T> {
    inner: FramedRead<T, StreamCodec>,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        let capacity = config.chunk_size;
        Self {
            inner: FramedRead::with_capacity(inner, StreamCodec::new(config), capacity),
        }
    }

    /// Read the next complete frame.
    ///
    /// Returns `Ok(None)` on a clean end of stream at a frame boundary and
    /// `Err(FrameError::ConnectionClosed)` when the stream ends mid-frame.
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        self.inner.next().await.transpose()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use bytes::BytesMut;
    use tokio::io::{AsyncWriteExt, ReadBuf};

    use super::*;
    use crate::codec::encode_frame;
    use crate::error::FrameError;

    #[tokio::test]
    async fn read_single_frame() {
        let mut wire = BytesMut::new();
        encode_frame(b"hello", &mut wire);

        let mut reader = FrameReader::new(io::Cursor::new(wire.to_vec()));
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.as_ref(), b"hello");
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_multiple_frames() {
        let mut wire = BytesMut::new();
        encode_frame(b"one", &mut wire);
        encode_frame(b"two", &mut wire);
        encode_frame(b"three", &mut wire);

        let mut reader = FrameReader::new(io::Cursor::new(wire.to_vec()));
        let f1 = reader.read_frame().await.unwrap().unwrap();
        let f2 = reader.read_frame().await.unwrap().unwrap();
        let f3 = reader.read_frame().await.unwrap().unwrap();

        assert_eq!(f1.as_ref(), b"one");
        assert_eq!(f2.as_ref(), b"two");
        assert_eq!(f3.as_ref(), b"three");
    }

    #[tokio::test]
    async fn handles_byte_by_byte_stream() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        let mut wire = BytesMut::new();
        encode_frame(&payload, &mut wire);

        let mut reader = FrameReader::with_config(
            ByteByByteReader {
                data: wire.to_vec(),
                pos: 0,
            },
            FrameConfig::with_chunk_size(128),
        );
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.as_ref(), payload.as_slice());
    }

    #[tokio::test]
    async fn payload_larger_than_chunk_size_over_duplex() {
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let (mut tx, rx) = tokio::io::duplex(1024);
        let expected = payload.clone();

        let writer = tokio::spawn(async move {
            let mut wire = BytesMut::new();
            encode_frame(&payload, &mut wire);
            tx.write_all(&wire).await.unwrap();
        });

        let mut reader = FrameReader::with_config(rx, FrameConfig::with_chunk_size(4096));
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.len(), expected.len());
        assert_eq!(frame.as_ref(), expected.as_slice());
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn eof_mid_frame_is_connection_closed() {
        let mut wire = BytesMut::new();
        encode_frame(b"hello world", &mut wire);
        wire.truncate(wire.len() - 4);

        let mut reader = FrameReader::new(io::Cursor::new(wire.to_vec()));
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    struct ByteByByteReader {
        data: Vec<u8>,
        pos: usize,
    }

    impl AsyncRead for ByteByByteReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.pos < self.data.len() && buf.remaining() > 0 {
                let byte = self.data[self.pos];
                buf.put_slice(&[byte]);
                self.pos += 1;
            }
            Poll::Ready(Ok(()))
        }
    }
}
