// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::{
    cmp::min,
    fmt,
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, ReadBuf},
    time::{sleep, Instant, Sleep},
};

use piuma_http::HttpParseError;

use crate::{ByteSource, MaximumLength};

/// The largest buffer [`BoundedInput::read_to_vec`] will ever allocate.
pub const MAXIMUM_BUFFER_LENGTH: usize = i32::MAX as usize - 8;

/// The first allocation of [`BoundedInput::read_to_vec`] for bodies of
/// unknown length.
const INITIAL_BUFFER_LENGTH: usize = 1024;

/// A view over the body of a request, which never reads beyond the end of
/// that body, so the next request on the connection can be read from the
/// same source.
///
/// Errors in the chunked framing are reported as [`io::Error`]s of kind
/// [`io::ErrorKind::InvalidData`] wrapping the [`HttpParseError`], which can
/// be recovered using [`piuma_http::parse_error_of`]. A client that stops
/// sending for longer than the stall timeout makes reads fail with an
/// [`io::ErrorKind::TimedOut`] error wrapping [`BodyStalled`].
pub struct BoundedInput<'a> {
    source: &'a mut dyn ByteSource,
    declared_length: Option<u64>,

    /// The remaining octets of the body, or of the current chunk.
    remaining: u64,
    decoder: Option<ChunkDecoder>,
    stall: Option<StallTimer>,
}

/// The client stopped transmitting the body of the request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BodyStalled;

impl fmt::Display for BodyStalled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the client stopped sending the request body")
    }
}

impl std::error::Error for BodyStalled {}

impl From<BodyStalled> for io::Error {
    fn from(error: BodyStalled) -> Self {
        io::Error::new(io::ErrorKind::TimedOut, error)
    }
}

/// Whether the error is a [`BodyStalled`] raised by a [`BoundedInput`].
pub fn is_body_stall(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::TimedOut
        && error.get_ref().is_some_and(|inner| inner.is::<BodyStalled>())
}

/// The deadline of a read that is waiting for the client. It is armed when a
/// read has to wait, and disarmed as soon as octets arrive.
struct StallTimer {
    period: Duration,
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}

impl StallTimer {
    fn new(period: Duration) -> Self {
        Self {
            period,
            sleep: Box::pin(sleep(period)),
            armed: false,
        }
    }

    fn poll_expired(&mut self, cx: &mut Context<'_>) -> bool {
        if !self.armed {
            self.sleep.as_mut().reset(Instant::now() + self.period);
            self.armed = true;
        }
        self.sleep.as_mut().poll(cx).is_ready()
    }
}

impl<'a> BoundedInput<'a> {
    /// A body of exactly `length` octets, as declared by `Content-Length`.
    pub fn with_length(source: &'a mut dyn ByteSource, length: u64) -> Self {
        Self {
            source,
            declared_length: Some(length),
            remaining: length,
            decoder: None,
            stall: None,
        }
    }

    /// A body using the `chunked` transfer coding.
    pub fn chunked(source: &'a mut dyn ByteSource) -> Self {
        Self {
            source,
            declared_length: None,
            remaining: 0,
            decoder: Some(ChunkDecoder::default()),
            stall: None,
        }
    }

    /// Fails reads that wait longer than `period` for the client to send
    /// more of the body.
    pub fn with_stall_timeout(mut self, period: Duration) -> Self {
        self.stall = Some(StallTimer::new(period));
        self
    }

    /// The value of `Content-Length`, or `None` for chunked bodies.
    #[must_use]
    pub fn declared_length(&self) -> Option<u64> {
        self.declared_length
    }

    /// Whether the whole body, including the trailer section of a chunked
    /// body, has been consumed from the source.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        match &self.decoder {
            None => self.remaining == 0,
            Some(decoder) => decoder.state == ChunkState::Done,
        }
    }

    /// Reads the rest of the body into memory, failing with
    /// [`HttpParseError::PayloadTooLarge`] when it is longer than `limit`.
    pub async fn read_to_vec(&mut self, limit: usize) -> io::Result<Vec<u8>> {
        let limit = min(limit, MAXIMUM_BUFFER_LENGTH);

        let initial = match self.decoder {
            None if self.remaining > limit as u64 => return Err(HttpParseError::PayloadTooLarge.into()),
            None => self.remaining as usize,
            Some(_) => min(INITIAL_BUFFER_LENGTH, limit),
        };

        let mut buffer = Vec::with_capacity(initial);
        loop {
            let mut ceiling = min(buffer.capacity(), limit);
            if buffer.len() == ceiling {
                if ceiling == limit {
                    let mut probe = [0u8; 1];
                    if self.read(&mut probe).await? == 0 {
                        return Ok(buffer);
                    }
                    return Err(HttpParseError::PayloadTooLarge.into());
                }

                let grown = min(buffer.capacity().saturating_mul(2).max(INITIAL_BUFFER_LENGTH), limit);
                buffer.reserve_exact(grown - buffer.len());
                ceiling = min(buffer.capacity(), limit);
            }

            let length = buffer.len();
            buffer.resize(ceiling, 0);
            let read = self.read(&mut buffer[length..]).await?;
            buffer.truncate(length + read);

            if read == 0 {
                return Ok(buffer);
            }
        }
    }

    /// Like [`Self::read_to_vec`], requiring the body to be UTF-8.
    pub async fn read_to_string(&mut self, limit: usize) -> io::Result<String> {
        let bytes = self.read_to_vec(limit).await?;
        String::from_utf8(bytes)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error.utf8_error()))
    }

    /// Discards the unread part of the body, returning the number of body
    /// octets that were skipped.
    pub async fn close(&mut self) -> io::Result<u64> {
        tokio::io::copy(self, &mut tokio::io::sink()).await
    }
}

impl AsyncRead for BoundedInput<'_> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            let in_data = match &mut this.decoder {
                None => {
                    if this.remaining == 0 {
                        return Poll::Ready(Ok(()));
                    }
                    true
                }
                Some(decoder) => match decoder.state {
                    ChunkState::Done => return Poll::Ready(Ok(())),
                    ChunkState::Data if this.remaining == 0 => {
                        decoder.state = ChunkState::DataCr;
                        false
                    }
                    ChunkState::Data => true,
                    _ => false,
                },
            };

            let available = match Pin::new(&mut *this.source).poll_fill_buf(cx) {
                Poll::Ready(result) => result?,
                Poll::Pending => {
                    if this.stall.as_mut().is_some_and(|stall| stall.poll_expired(cx)) {
                        return Poll::Ready(Err(BodyStalled.into()));
                    }
                    return Poll::Pending;
                }
            };
            if let Some(stall) = &mut this.stall {
                stall.armed = false;
            }

            if available.is_empty() {
                return Poll::Ready(Err(HttpParseError::UnexpectedEndOfBody.into()));
            }

            if in_data {
                let count = min(available.len(), buf.remaining());
                let count = usize::try_from(this.remaining).map_or(count, |remaining| min(count, remaining));
                buf.put_slice(&available[..count]);
                Pin::new(&mut *this.source).consume(count);
                this.remaining -= count as u64;
                return Poll::Ready(Ok(()));
            }

            let Some(decoder) = &mut this.decoder else {
                continue;
            };

            let mut consumed = 0;
            for byte in available {
                consumed += 1;
                decoder.step(*byte, &mut this.remaining)?;
                if matches!(decoder.state, ChunkState::Data | ChunkState::Done) {
                    break;
                }
            }
            Pin::new(&mut *this.source).consume(consumed);
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
enum ChunkState {
    /// The hexadecimal chunk size.
    #[default]
    Size,

    /// The chunk extensions after the size, which are ignored.
    Extension,

    /// The `LF` after the `CR` ending the chunk size line.
    SizeLf,

    Data,

    /// The `CRLF` after the chunk data.
    DataCr,
    DataLf,

    /// The start of a trailer field line, or of the final empty line.
    TrailerStart,
    TrailerLine,

    /// The `LF` of the final empty line.
    TrailerLf,

    Done,
}

/// Decodes the framing of the `chunked` transfer coding, one octet at a time.
///
/// ```text
/// chunked-body   = *chunk
///                  last-chunk
///                  trailer-section
///                  CRLF
///
/// chunk          = chunk-size [ chunk-ext ] CRLF
///                  chunk-data CRLF
/// chunk-size     = 1*HEXDIG
/// last-chunk     = 1*("0") [ chunk-ext ] CRLF
/// ```
///
/// ### References
/// * [RFC 9112, Section 7.1. Chunked Transfer Coding](https://www.rfc-editor.org/rfc/rfc9112.html#name-chunked-transfer-coding)
#[derive(Debug, Default)]
struct ChunkDecoder {
    state: ChunkState,
    size: u64,
    digits: usize,
    extension_length: usize,
    trailer_length: usize,
}

impl ChunkDecoder {
    fn step(&mut self, byte: u8, remaining: &mut u64) -> Result<(), HttpParseError> {
        match self.state {
            ChunkState::Size => match byte {
                b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F' => {
                    if self.digits == MaximumLength::CHUNK_SIZE_DIGITS.0 {
                        return Err(HttpParseError::ChunkSizeTooLarge);
                    }

                    // Infallible, as the byte is a hexadecimal digit.
                    let digit = (byte as char).to_digit(16).unwrap_or_default();
                    self.size = (self.size << 4) | u64::from(digit);
                    self.digits += 1;
                }
                _ if self.digits == 0 => return Err(HttpParseError::InvalidChunkSize),
                b';' | b' ' | b'\t' => self.state = ChunkState::Extension,
                b'\r' => self.state = ChunkState::SizeLf,
                b'\n' => self.end_size_line(remaining),
                _ => return Err(HttpParseError::InvalidChunkSize),
            },

            ChunkState::Extension => match byte {
                b'\r' => self.state = ChunkState::SizeLf,
                b'\n' => self.end_size_line(remaining),
                _ => {
                    self.extension_length += 1;
                    if self.extension_length > MaximumLength::CHUNK_EXTENSION.0 {
                        return Err(HttpParseError::ChunkExtensionTooLong);
                    }
                }
            },

            ChunkState::SizeLf => {
                if byte != b'\n' {
                    return Err(HttpParseError::InvalidCRLF);
                }
                self.end_size_line(remaining);
            }

            ChunkState::DataCr => match byte {
                b'\r' => self.state = ChunkState::DataLf,
                b'\n' => self.state = ChunkState::Size,
                _ => return Err(HttpParseError::InvalidChunkTerminator),
            },

            ChunkState::DataLf => {
                if byte != b'\n' {
                    return Err(HttpParseError::InvalidChunkTerminator);
                }
                self.state = ChunkState::Size;
            }

            ChunkState::TrailerStart => match byte {
                b'\r' => self.state = ChunkState::TrailerLf,
                b'\n' => self.state = ChunkState::Done,
                _ => {
                    self.state = ChunkState::TrailerLine;
                    self.count_trailer_octet()?;
                }
            },

            ChunkState::TrailerLine => {
                if byte == b'\n' {
                    self.state = ChunkState::TrailerStart;
                } else {
                    self.count_trailer_octet()?;
                }
            }

            ChunkState::TrailerLf => {
                if byte != b'\n' {
                    return Err(HttpParseError::InvalidChunkTerminator);
                }
                self.state = ChunkState::Done;
            }

            ChunkState::Data | ChunkState::Done => (),
        }

        Ok(())
    }

    fn end_size_line(&mut self, remaining: &mut u64) {
        self.state = if self.size == 0 {
            ChunkState::TrailerStart
        } else {
            *remaining = self.size;
            ChunkState::Data
        };

        self.size = 0;
        self.digits = 0;
        self.extension_length = 0;
    }

    fn count_trailer_octet(&mut self) -> Result<(), HttpParseError> {
        self.trailer_length += 1;
        if self.trailer_length > MaximumLength::TRAILER_SECTION.0 {
            return Err(HttpParseError::TrailerTooLarge);
        }
        Ok(())
    }
}
