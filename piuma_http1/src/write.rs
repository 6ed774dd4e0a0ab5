// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::{
    future::Future,
    io::{self, Write},
    mem,
    time::Duration,
};

use flate2::{write::GzEncoder, Compression};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::timeout,
};

use piuma_http::{HeaderField, Headers, StatusCode};

/// The size of the reads from a body source when the output buffer is
/// smaller than this.
const MINIMUM_READ_SIZE: usize = 4096;

/// A buffered writer of HTTP/1.1 responses around an [`AsyncWrite`] sink.
///
/// Writes that don't fit in the remainder of the buffer flush it first, and
/// writes at least as large as the buffer bypass it entirely.
///
/// With a stall timeout, every operation on the sink must make progress
/// within that time, or it fails with [`io::ErrorKind::TimedOut`]. A slow
/// peer that keeps reading is never cut off.
pub struct OutputWrapper<W> {
    sink: W,
    buffer: Vec<u8>,
    capacity: usize,
    stall_timeout: Option<Duration>,
}

impl<W> OutputWrapper<W>
        where W: AsyncWrite + Unpin {
    pub fn new(sink: W, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sink,
            buffer: Vec::with_capacity(capacity),
            capacity,
            stall_timeout: None,
        }
    }

    pub fn with_stall_timeout(mut self, period: Duration) -> Self {
        self.stall_timeout = Some(period);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub async fn write_u8(&mut self, byte: u8) -> io::Result<()> {
        if self.buffer.len() == self.capacity {
            self.flush_buffer().await?;
        }
        self.buffer.push(byte);
        Ok(())
    }

    pub async fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.buffer.len() + bytes.len() > self.capacity {
            self.flush_buffer().await?;
        }

        if bytes.len() >= self.capacity {
            return write_to_sink(&mut self.sink, bytes, self.stall_timeout).await;
        }

        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    pub async fn write_str(&mut self, string: &str) -> io::Result<()> {
        self.write_bytes(string.as_bytes()).await
    }

    /// ```text
    /// status-line = HTTP-version SP status-code SP [ reason-phrase ]
    /// ```
    pub async fn write_status_line(&mut self, status: StatusCode) -> io::Result<()> {
        self.write_str(&format!("HTTP/1.1 {status}\r\n")).await
    }

    pub async fn write_header(&mut self, field: &HeaderField, value: &str) -> io::Result<()> {
        self.write_str(field.as_str()).await?;
        self.write_bytes(b": ").await?;
        self.write_str(value).await?;
        self.write_bytes(b"\r\n").await
    }

    pub async fn write_headers(&mut self, headers: &Headers) -> io::Result<()> {
        for (field, value) in headers.iter() {
            self.write_header(field, value).await?;
        }
        Ok(())
    }

    /// Writes the empty line that ends the head of the message.
    pub async fn end_head(&mut self) -> io::Result<()> {
        self.write_bytes(b"\r\n").await
    }

    fn read_size(&self) -> usize {
        self.capacity.max(MINIMUM_READ_SIZE)
    }

    /// Copies the source to the sink without any framing. With a `limit`,
    /// exactly that many octets are copied, and a shorter source is an
    /// [`io::ErrorKind::UnexpectedEof`] error.
    pub async fn transfer_from<R>(&mut self, source: &mut R, limit: Option<u64>) -> io::Result<u64>
            where R: AsyncRead + Unpin + ?Sized {
        let mut scratch = vec![0u8; self.read_size()];
        let mut transferred = 0u64;

        loop {
            let wanted = match limit {
                Some(limit) => usize::try_from(limit - transferred).map_or(scratch.len(), |left| left.min(scratch.len())),
                None => scratch.len(),
            };

            if wanted == 0 {
                return Ok(transferred);
            }

            let read = source.read(&mut scratch[..wanted]).await?;
            if read == 0 {
                if limit.is_some() {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "body source ended before its declared length"));
                }
                return Ok(transferred);
            }

            self.write_bytes(&scratch[..read]).await?;
            transferred += read as u64;
        }
    }

    /// Writes a single chunk of the `chunked` transfer coding. Empty payloads
    /// are skipped, as an empty chunk terminates the body.
    pub async fn write_chunk(&mut self, payload: &[u8]) -> io::Result<()> {
        if payload.is_empty() {
            return Ok(());
        }

        self.write_str(&format!("{:X}\r\n", payload.len())).await?;
        self.write_bytes(payload).await?;
        self.write_bytes(b"\r\n").await
    }

    /// Writes the payload as chunks no larger than the buffer.
    async fn write_chunks(&mut self, payload: &[u8]) -> io::Result<()> {
        for chunk in payload.chunks(self.capacity) {
            self.write_chunk(chunk).await?;
        }
        Ok(())
    }

    /// Writes the last chunk and the empty trailer section.
    pub async fn finish_chunked(&mut self) -> io::Result<()> {
        self.write_bytes(b"0\r\n\r\n").await
    }

    /// Transfers the source using the `chunked` transfer coding, including
    /// the last chunk. Returns the number of payload octets.
    pub async fn transfer_chunked_from<R>(&mut self, source: &mut R) -> io::Result<u64>
            where R: AsyncRead + Unpin + ?Sized {
        let mut scratch = vec![0u8; self.capacity];
        let mut transferred = 0u64;

        loop {
            let read = source.read(&mut scratch).await?;
            if read == 0 {
                break;
            }

            self.write_chunk(&scratch[..read]).await?;
            transferred += read as u64;
        }

        self.finish_chunked().await?;
        Ok(transferred)
    }

    /// Transfers the source gzip-compressed, inside the `chunked` transfer
    /// coding.
    pub async fn transfer_gzip_from<R>(&mut self, source: &mut R) -> io::Result<u64>
            where R: AsyncRead + Unpin + ?Sized {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut scratch = vec![0u8; self.read_size()];
        let mut transferred = 0u64;

        loop {
            let read = source.read(&mut scratch).await?;
            if read == 0 {
                break;
            }

            encoder.write_all(&scratch[..read])?;
            transferred += read as u64;

            let compressed = mem::take(encoder.get_mut());
            self.write_chunks(&compressed).await?;
        }

        let compressed = encoder.finish()?;
        self.write_chunks(&compressed).await?;
        self.finish_chunked().await?;
        Ok(transferred)
    }

    pub async fn transfer_gzip_from_bytes(&mut self, bytes: &[u8]) -> io::Result<u64> {
        let mut source = bytes;
        self.transfer_gzip_from(&mut source).await
    }

    async fn flush_buffer(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            write_to_sink(&mut self.sink, &self.buffer, self.stall_timeout).await?;
            self.buffer.clear();
        }
        Ok(())
    }

    /// Writes the buffer to the sink and flushes the sink.
    pub async fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer().await?;
        within(self.stall_timeout, self.sink.flush()).await
    }

    /// Flushes and shuts down the sink. The shutdown is attempted even when
    /// flushing failed; the first error is returned.
    pub async fn close(mut self) -> io::Result<()> {
        let flushed = self.flush().await;
        let shutdown = within(self.stall_timeout, self.sink.shutdown()).await;
        flushed.and(shutdown)
    }
}

/// Runs a single operation on the sink, which fails when the peer doesn't
/// accept anything for `stall_timeout`.
async fn within<T, F>(stall_timeout: Option<Duration>, operation: F) -> io::Result<T>
        where F: Future<Output = io::Result<T>> {
    let Some(period) = stall_timeout else {
        return operation.await;
    };

    timeout(period, operation).await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "the peer stopped accepting the response"))?
}

/// Like [`AsyncWriteExt::write_all`], with the stall timeout applied to each
/// partial write instead of to the whole.
async fn write_to_sink<W>(sink: &mut W, mut bytes: &[u8], stall_timeout: Option<Duration>) -> io::Result<()>
        where W: AsyncWrite + Unpin {
    while !bytes.is_empty() {
        let written = within(stall_timeout, sink.write(bytes)).await?;
        if written == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        bytes = &bytes[written..];
    }
    Ok(())
}

/// Compresses an in-memory body, for bodies small enough to be sent with a
/// `Content-Length`.
pub fn gzip_bytes(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2 + 32), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use std::{
        io::Read,
        pin::Pin,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        task::{Context, Poll},
    };

    use flate2::read::GzDecoder;
    use rstest::rstest;

    use super::*;

    /// Decodes a chunked body without any help of this crate, returning the
    /// payload and the sizes of the chunks.
    fn decode_chunked(mut data: &[u8]) -> (Vec<u8>, Vec<usize>) {
        let mut payload = Vec::new();
        let mut sizes = Vec::new();

        loop {
            let line_end = data.windows(2).position(|window| window == b"\r\n").expect("chunk size line");
            let size = usize::from_str_radix(std::str::from_utf8(&data[..line_end]).unwrap(), 16).unwrap();
            data = &data[line_end + 2..];

            if size == 0 {
                assert_eq!(data, b"\r\n", "trailing data after the last chunk");
                return (payload, sizes);
            }

            sizes.push(size);
            payload.extend_from_slice(&data[..size]);
            assert_eq!(&data[size..size + 2], b"\r\n");
            data = &data[size + 2..];
        }
    }

    fn payload_of(length: usize) -> Vec<u8> {
        // Repetitive enough to compress, irregular enough not to vanish.
        (0..length).map(|index| b"the quick brown fox jumps over the lazy dog"[index % 43] ^ (index / 97) as u8).collect()
    }

    #[rstest]
    #[tokio::test]
    async fn chunked_round_trip(#[values(0, 1, 511, 512, 513, 100000)] length: usize,
                                #[values(1, 4, 512)] capacity: usize) {
        let payload = payload_of(length);
        let mut output = OutputWrapper::new(Vec::new(), capacity);
        let transferred = output.transfer_chunked_from(&mut payload.as_slice()).await.unwrap();
        output.flush().await.unwrap();

        assert_eq!(transferred, length as u64);
        let (decoded, sizes) = decode_chunked(output.get_ref());
        assert_eq!(decoded, payload);
        assert!(sizes.iter().all(|size| *size > 0 && *size <= capacity));
    }

    #[rstest]
    #[tokio::test]
    async fn gzip_round_trip(#[values(0, 1, 511, 512, 513, 100000)] length: usize,
                             #[values(1, 4, 512)] capacity: usize) {
        let payload = payload_of(length);
        let mut output = OutputWrapper::new(Vec::new(), capacity);
        output.transfer_gzip_from_bytes(&payload).await.unwrap();
        output.flush().await.unwrap();

        let (compressed, sizes) = decode_chunked(output.get_ref());
        assert!(sizes.iter().all(|size| *size > 0 && *size <= capacity));

        let mut decoded = Vec::new();
        GzDecoder::new(compressed.as_slice()).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn gzip_in_memory() {
        let payload = payload_of(4000);
        let compressed = gzip_bytes(&payload).unwrap();
        assert!(compressed.len() < payload.len());

        let mut decoded = Vec::new();
        GzDecoder::new(compressed.as_slice()).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn head_serialization() {
        let mut headers = Headers::new();
        headers.put_direct(HeaderField::CONTENT_TYPE, "text/plain");
        headers.add_direct(HeaderField::SET_COOKIE, "a=1");
        headers.add_direct(HeaderField::SET_COOKIE, "b=2");

        let mut output = OutputWrapper::new(Vec::new(), 16);
        output.write_status_line(StatusCode::NotFound).await.unwrap();
        output.write_headers(&headers).await.unwrap();
        output.end_head().await.unwrap();
        output.write_u8(b'!').await.unwrap();
        output.flush().await.unwrap();

        assert_eq!(
            String::from_utf8_lossy(output.get_ref()),
            "HTTP/1.1 404 Not Found\r\ncontent-type: text/plain\r\nset-cookie: a=1\r\nset-cookie: b=2\r\n\r\n!"
        );
    }

    /// Records every write reaching the sink.
    #[derive(Default)]
    struct RecordingSink {
        writes: Vec<Vec<u8>>,
        shut_down: Arc<AtomicBool>,
        fail_writes: bool,
    }

    impl AsyncWrite for RecordingSink {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            let this = self.get_mut();
            if this.fail_writes {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed")));
            }
            this.writes.push(buf.to_vec());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.shut_down.store(true, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn buffering_and_bypass() {
        let mut output = OutputWrapper::new(RecordingSink::default(), 8);
        output.write_bytes(b"abc").await.unwrap();
        output.write_bytes(b"def").await.unwrap();
        assert!(output.get_ref().writes.is_empty());

        // Doesn't fit: flushes "abcdef" first and then buffers.
        output.write_bytes(b"ghi").await.unwrap();
        assert_eq!(output.get_ref().writes, [b"abcdef".to_vec()]);

        // At least the size of the buffer: flushed buffer, then written as is.
        output.write_bytes(b"0123456789").await.unwrap();
        assert_eq!(output.get_ref().writes, [b"abcdef".to_vec(), b"ghi".to_vec(), b"0123456789".to_vec()]);

        output.write_u8(b'x').await.unwrap();
        output.flush().await.unwrap();
        assert_eq!(output.get_ref().writes.last().unwrap(), b"x");
    }

    #[tokio::test]
    async fn close_shuts_down_after_failed_flush() {
        let shut_down = Arc::new(AtomicBool::new(false));
        let sink = RecordingSink {
            shut_down: Arc::clone(&shut_down),
            fail_writes: true,
            ..RecordingSink::default()
        };

        let mut output = OutputWrapper::new(sink, 8);
        output.write_bytes(b"pending").await.unwrap();

        let error = output.close().await.unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
        assert!(shut_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn close_flushes_buffer() {
        let shut_down = Arc::new(AtomicBool::new(false));
        let sink = RecordingSink {
            shut_down: Arc::clone(&shut_down),
            ..RecordingSink::default()
        };

        let mut output = OutputWrapper::new(sink, 8);
        output.write_str("bye").await.unwrap();
        output.close().await.unwrap();
        assert!(shut_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stalled_peer_times_out() {
        let (client, server) = tokio::io::duplex(16);
        let mut output = OutputWrapper::new(server, 8).with_stall_timeout(Duration::from_millis(50));

        let error = tokio::time::timeout(Duration::from_secs(2), output.write_bytes(&[b'x'; 64])).await
            .expect("the stall timeout fires")
            .unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::TimedOut);
        drop(client);
    }

    #[tokio::test]
    async fn slow_reader_is_not_cut_off() {
        let (mut client, server) = tokio::io::duplex(64);
        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            let mut piece = [0u8; 64];
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                match client.read(&mut piece).await.unwrap() {
                    0 => return received,
                    read => received.extend_from_slice(&piece[..read]),
                }
            }
        });

        // Takes about 320 ms in total, while no single write waits 100 ms.
        let payload = payload_of(2048);
        let mut output = OutputWrapper::new(server, 16).with_stall_timeout(Duration::from_millis(100));
        output.transfer_from(&mut payload.as_slice(), Some(2048)).await.unwrap();
        output.close().await.unwrap();

        assert_eq!(reader.await.unwrap(), payload);
    }

    #[rstest]
    #[tokio::test]
    async fn transfer_with_limit(#[values(1, 8, 1024)] capacity: usize) {
        let payload = payload_of(3000);

        let mut output = OutputWrapper::new(Vec::new(), capacity);
        assert_eq!(output.transfer_from(&mut payload.as_slice(), Some(1000)).await.unwrap(), 1000);
        assert_eq!(output.transfer_from(&mut &payload[1000..], None).await.unwrap(), 2000);
        output.flush().await.unwrap();
        assert_eq!(output.get_ref(), &payload);

        let mut output = OutputWrapper::new(Vec::new(), capacity);
        let error = output.transfer_from(&mut &payload[..10], Some(11)).await.unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
    }
}
