// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! `multipart/byteranges` responses and the selection of byte ranges.
//!
//! ### References
//! * [RFC 9110, Section 14.6. Media Type multipart/byteranges](https://www.rfc-editor.org/rfc/rfc9110.html#name-media-type-multipart-byteran)

use std::{
    cmp::min,
    io::{self, SeekFrom},
    pin::Pin,
    task::{ready, Context, Poll},
};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, ReadBuf, Take};

use piuma_http::{
    ContentRange,
    ContentRangeHeaderValue,
    HeaderField,
    ResolvedRange,
    Response,
    StatusCode,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    /// Writing the header of the current part.
    Header { offset: usize },

    /// Moving the resource to the start of the current range.
    Seek { started: bool },

    Payload,

    /// Writing the closing delimiter.
    Closing { offset: usize },
    Done,
}

/// Produces the body of a `multipart/byteranges` response, reading the parts
/// from a seekable resource as the body is consumed.
pub struct MultipartRangeStream<R> {
    resource: Take<R>,
    ranges: Vec<ResolvedRange>,
    part_headers: Vec<Vec<u8>>,
    closing: Vec<u8>,
    boundary: String,
    content_length: u64,
    index: usize,
    state: State,
}

impl<R> MultipartRangeStream<R>
        where R: AsyncRead + AsyncSeek + Unpin {
    /// Expects at least two ranges, resolved against `complete_length`.
    pub fn new(resource: R, ranges: Vec<ResolvedRange>, complete_length: u64, content_type: Option<&str>) -> Self {
        let boundary = format!("piuma_{}", uuid::Uuid::new_v4().simple());
        Self::with_boundary(resource, ranges, complete_length, content_type, boundary)
    }

    pub fn with_boundary(resource: R, ranges: Vec<ResolvedRange>, complete_length: u64, content_type: Option<&str>,
                         boundary: String) -> Self {
        debug_assert!(ranges.len() >= 2, "a single range isn't sent as multipart");

        let part_headers: Vec<Vec<u8>> = ranges.iter()
            .enumerate()
            .map(|(index, range)| {
                let mut header = String::new();
                if index != 0 {
                    header.push_str("\r\n");
                }
                header.push_str("--");
                header.push_str(&boundary);
                header.push_str("\r\n");
                if let Some(content_type) = content_type {
                    header.push_str("content-type: ");
                    header.push_str(content_type);
                    header.push_str("\r\n");
                }
                header.push_str("content-range: ");
                header.push_str(&ContentRangeHeaderValue::Range { range: *range, complete_length }.to_string());
                header.push_str("\r\n\r\n");
                header.into_bytes()
            })
            .collect();

        let closing = format!("\r\n--{boundary}--\r\n").into_bytes();

        let content_length = part_headers.iter().map(|header| header.len() as u64).sum::<u64>()
            + ranges.iter().map(ResolvedRange::len).sum::<u64>()
            + closing.len() as u64;

        let state = if ranges.is_empty() {
            State::Closing { offset: 0 }
        } else {
            State::Header { offset: 0 }
        };

        Self {
            resource: resource.take(0),
            ranges,
            part_headers,
            closing,
            boundary,
            content_length,
            index: 0,
            state,
        }
    }

    /// The exact number of octets this stream yields.
    #[must_use]
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// The value of the `Content-Type` header of the response.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/byteranges; boundary={}", self.boundary)
    }

    pub fn into_inner(self) -> R {
        self.resource.into_inner()
    }
}

/// Copies as much of `source[offset..]` as fits, returning the new offset.
fn put_from(source: &[u8], offset: usize, buf: &mut ReadBuf<'_>) -> usize {
    let count = min(source.len() - offset, buf.remaining());
    buf.put_slice(&source[offset..offset + count]);
    offset + count
}

impl<R> AsyncRead for MultipartRangeStream<R>
        where R: AsyncRead + AsyncSeek + Unpin {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            match this.state {
                State::Header { offset } => {
                    let header = &this.part_headers[this.index];
                    let offset = put_from(header, offset, buf);
                    this.state = if offset == header.len() {
                        State::Seek { started: false }
                    } else {
                        State::Header { offset }
                    };
                    return Poll::Ready(Ok(()));
                }

                State::Seek { started } => {
                    let range = this.ranges[this.index];
                    if !started {
                        Pin::new(this.resource.get_mut()).start_seek(SeekFrom::Start(range.start))?;
                        this.state = State::Seek { started: true };
                    }

                    ready!(Pin::new(this.resource.get_mut()).poll_complete(cx))?;
                    this.resource.set_limit(range.len());
                    this.state = State::Payload;
                }

                State::Payload => {
                    if this.resource.limit() == 0 {
                        this.index += 1;
                        this.state = if this.index < this.ranges.len() {
                            State::Header { offset: 0 }
                        } else {
                            State::Closing { offset: 0 }
                        };
                        continue;
                    }

                    let filled = buf.filled().len();
                    ready!(Pin::new(&mut this.resource).poll_read(cx, buf))?;
                    if buf.filled().len() == filled {
                        return Poll::Ready(Err(io::Error::new(io::ErrorKind::UnexpectedEof,
                            "resource is shorter than the requested range")));
                    }
                    return Poll::Ready(Ok(()));
                }

                State::Closing { offset } => {
                    let offset = put_from(&this.closing, offset, buf);
                    this.state = if offset == this.closing.len() {
                        State::Done
                    } else {
                        State::Closing { offset }
                    };
                    return Poll::Ready(Ok(()));
                }

                State::Done => return Poll::Ready(Ok(())),
            }
        }
    }
}

/// Answers a request carrying a `Range` header for a seekable resource of
/// `complete_length` octets.
///
/// Returns `None` when the header can't be parsed, in which case the full
/// representation should be served. Otherwise the response is either
/// `416 Range Not Satisfiable` or `206 Partial Content`, the latter being a
/// `multipart/byteranges` body when multiple ranges were requested.
pub async fn serve_ranges<R>(mut resource: R, complete_length: u64, range_header: &str, content_type: Option<&str>)
        -> io::Result<Option<Response>>
        where R: AsyncRead + AsyncSeek + Send + Unpin + 'static {
    let Some(ranges) = ContentRange::parse_ranges(range_header) else {
        return Ok(None);
    };

    let Some(resolved) = ranges.iter().map(|range| range.resolve(complete_length)).collect::<Option<Vec<_>>>() else {
        let mut response = Response::with_status(StatusCode::RangeNotSatisfiable);
        response.headers.put_direct(HeaderField::CONTENT_RANGE,
            ContentRangeHeaderValue::Unsatisfied { complete_length }.to_string());
        return Ok(Some(response));
    };

    if let [range] = resolved.as_slice() {
        resource.seek(SeekFrom::Start(range.start)).await?;

        let mut response = Response::with_sized_body(StatusCode::PartialContent, resource.take(range.len()), range.len());
        response.headers.put_direct(HeaderField::CONTENT_RANGE,
            ContentRangeHeaderValue::Range { range: *range, complete_length }.to_string());
        if let Some(content_type) = content_type {
            response.headers.put_direct(HeaderField::CONTENT_TYPE, content_type);
        }
        return Ok(Some(response));
    }

    let stream = MultipartRangeStream::new(resource, resolved, complete_length, content_type);
    let content_type = stream.content_type();
    let content_length = stream.content_length();

    let mut response = Response::with_sized_body(StatusCode::PartialContent, stream, content_length);
    response.headers.put_direct(HeaderField::CONTENT_TYPE, content_type);
    Ok(Some(response))
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use rstest::rstest;

    use super::*;
    use piuma_http::BodyKind;

    const RESOURCE: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    fn range(start: u64, end: u64) -> ResolvedRange {
        ResolvedRange { start, end }
    }

    async fn drain<R: AsyncRead + Unpin>(mut stream: R) -> io::Result<Vec<u8>> {
        let mut output = Vec::new();
        stream.read_to_end(&mut output).await?;
        Ok(output)
    }

    #[tokio::test]
    async fn two_ranges_exact_bytes() {
        let stream = MultipartRangeStream::with_boundary(Cursor::new(RESOURCE), vec![range(0, 3), range(10, 12)],
            RESOURCE.len() as u64, Some("text/plain"), "BOUNDARY".to_string());
        let expected_length = stream.content_length();

        let output = drain(stream).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&output), concat!(
            "--BOUNDARY\r\n",
            "content-type: text/plain\r\n",
            "content-range: bytes 0-3/36\r\n",
            "\r\n",
            "0123",
            "\r\n--BOUNDARY\r\n",
            "content-type: text/plain\r\n",
            "content-range: bytes 10-12/36\r\n",
            "\r\n",
            "abc",
            "\r\n--BOUNDARY--\r\n",
        ));
        assert_eq!(output.len() as u64, expected_length);
    }

    #[rstest]
    #[tokio::test]
    async fn content_length_matches_output(#[values(None, Some("application/octet-stream"))] content_type: Option<&str>) {
        let ranges = vec![range(30, 35), range(0, 0), range(5, 20)];
        let stream = MultipartRangeStream::new(Cursor::new(RESOURCE), ranges, RESOURCE.len() as u64, content_type);
        assert!(stream.boundary().starts_with("piuma_"));
        let expected_length = stream.content_length();

        let output = drain(stream).await.unwrap();
        assert_eq!(output.len() as u64, expected_length);
    }

    #[tokio::test]
    async fn file_backed_resource() {
        let mut file = tempfile::tempfile().unwrap();
        let contents: Vec<u8> = (0..10_000u32).map(|index| (index % 251) as u8).collect();
        file.write_all(&contents).unwrap();

        let ranges = vec![range(9000, 9999), range(1, 4000)];
        let stream = MultipartRangeStream::new(tokio::fs::File::from_std(file), ranges, 10_000, None);
        let expected_length = stream.content_length();
        let boundary = stream.boundary().to_string();

        let output = drain(stream).await.unwrap();
        assert_eq!(output.len() as u64, expected_length);

        let first_header = format!("--{boundary}\r\ncontent-range: bytes 9000-9999/10000\r\n\r\n");
        assert!(output.starts_with(first_header.as_bytes()));
        let first_payload = &output[first_header.len()..first_header.len() + 1000];
        assert_eq!(first_payload, &contents[9000..]);
        assert!(output.ends_with(format!("\r\n--{boundary}--\r\n").as_bytes()));
    }

    #[tokio::test]
    async fn short_resource_fails() {
        let stream = MultipartRangeStream::new(Cursor::new(&RESOURCE[..20]), vec![range(0, 1), range(10, 30)], 36, None);
        let error = drain(stream).await.unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn into_inner_returns_resource() {
        let stream = MultipartRangeStream::new(Cursor::new(RESOURCE), vec![range(0, 1), range(2, 3)], 36, None);
        assert_eq!(stream.into_inner().into_inner(), RESOURCE);
    }

    async fn body_of(response: Response) -> Vec<u8> {
        match response.body {
            Some(BodyKind::Sized { source, length }) => {
                let output = drain(source).await.unwrap();
                assert_eq!(output.len() as u64, length);
                output
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[tokio::test]
    async fn serve_single_range() {
        let response = serve_ranges(Cursor::new(RESOURCE), 36, "bytes=-6", Some("text/plain")).await.unwrap().unwrap();
        assert_eq!(response.status, StatusCode::PartialContent);
        assert_eq!(response.headers.get_first(&HeaderField::CONTENT_RANGE), Some("bytes 30-35/36"));
        assert_eq!(response.headers.get_first(&HeaderField::CONTENT_TYPE), Some("text/plain"));
        assert_eq!(body_of(response).await, b"uvwxyz");
    }

    #[tokio::test]
    async fn serve_multiple_ranges() {
        let response = serve_ranges(Cursor::new(RESOURCE), 36, "bytes=0-0,35-", None).await.unwrap().unwrap();
        assert_eq!(response.status, StatusCode::PartialContent);
        let content_type = response.headers.get_first(&HeaderField::CONTENT_TYPE).unwrap().to_string();
        let boundary = content_type.strip_prefix("multipart/byteranges; boundary=").unwrap().to_string();

        let body = String::from_utf8(body_of(response).await).unwrap();
        assert_eq!(body, format!(
            "--{boundary}\r\ncontent-range: bytes 0-0/36\r\n\r\n0\r\n--{boundary}\r\ncontent-range: bytes 35-35/36\r\n\r\nz\r\n--{boundary}--\r\n"
        ));
    }

    #[tokio::test]
    async fn serve_unsatisfiable() {
        let response = serve_ranges(Cursor::new(RESOURCE), 36, "bytes=0-1,40-50", None).await.unwrap().unwrap();
        assert_eq!(response.status, StatusCode::RangeNotSatisfiable);
        assert_eq!(response.headers.get_first(&HeaderField::CONTENT_RANGE), Some("bytes */36"));
        assert!(response.body.is_none());
    }

    #[rstest]
    #[case("bytes=abc")]
    #[case("lines=1-2")]
    #[case("")]
    #[tokio::test]
    async fn serve_unparseable(#[case] header: &str) {
        assert!(serve_ranges(Cursor::new(RESOURCE), 36, header, None).await.unwrap().is_none());
    }
}
