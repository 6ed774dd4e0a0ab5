// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use piuma_http::{
    Error,
    HeaderField,
    Headers,
    HttpParseError,
    HttpVersion,
    Method,
    syntax,
};

use tokio::io::{
    AsyncBufRead,
    AsyncBufReadExt,
};

use crate::{
    MaximumLength,
    Settings,
};

use std::io;

/// The source of request bytes. Every reader in this crate is written against
/// this trait, so a socket behind a `BufReader` and an in-memory buffer behave
/// identically.
pub trait ByteSource: AsyncBufRead + Unpin + Send {}

impl<T> ByteSource for T
        where T: AsyncBufRead + Unpin + Send + ?Sized {}

/// The request line and header block of a request, before the body is read.
#[derive(Clone, Debug)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: HttpVersion,
    pub headers: Headers,
}

/// How the length of the request body is determined.
///
/// ### References
/// * [RFC 9112, Section 6.3. Message Body Length](https://www.rfc-editor.org/rfc/rfc9112.html#name-message-body-length)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BodyFraming {
    Length(u64),
    Chunked,
}

/// Reads a line up to `LF`, without the line terminator. A `CR` before the
/// `LF` is stripped, but a `CR` anywhere else is rejected.
pub(crate) async fn read_crlf_line<R>(stream: &mut R, maximum_length: usize, length_error: HttpParseError) -> Result<Vec<u8>, Error>
        where R: ByteSource + ?Sized {
    let mut line = Vec::new();

    loop {
        let available = stream.fill_buf().await?;
        if available.is_empty() {
            return Err(Error::Other(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed within a line")));
        }

        if let Some(position) = available.iter().position(|byte| *byte == b'\n') {
            line.extend_from_slice(&available[..position]);
            stream.consume(position + 1);
            break;
        }

        let length = available.len();
        line.extend_from_slice(available);
        stream.consume(length);

        // One extra octet for the CR that might precede the LF.
        if line.len() > maximum_length + 1 {
            return Err(Error::ParseError(length_error));
        }
    }

    if line.last() == Some(&b'\r') {
        line.pop();
    }

    if line.len() > maximum_length {
        return Err(Error::ParseError(length_error));
    }

    if line.contains(&b'\r') {
        return Err(Error::ParseError(HttpParseError::InvalidCRLF));
    }

    Ok(line)
}

/// Reads the request line and the header block. Returns `None` when the peer
/// closed the connection before sending a request.
pub async fn read_request_head<R>(stream: &mut R, settings: &Settings) -> Result<Option<RequestHead>, Error>
        where R: ByteSource + ?Sized {
    // RFC 9112 Section 2.2: a server SHOULD ignore at least one empty line
    // received prior to the request-line.
    let line = loop {
        if stream.fill_buf().await?.is_empty() {
            return Ok(None);
        }

        let line = read_crlf_line(stream, settings.maximum_line_length, HttpParseError::RequestLineTooLong).await?;
        if !line.is_empty() {
            break line;
        }
    };

    let (method, target, version) = parse_request_line(&line)?;
    let headers = read_headers(stream, settings).await?;

    Ok(Some(RequestHead {
        method,
        target,
        version,
        headers,
    }))
}

/// ```text
/// request-line   = method SP request-target SP HTTP-version
/// ```
fn parse_request_line(line: &[u8]) -> Result<(Method, String, HttpVersion), HttpParseError> {
    let mut parts = line.split(|byte| *byte == b' ');
    let (Some(method), Some(target), Some(version), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
        return Err(HttpParseError::InvalidRequestLine);
    };

    if method.is_empty() {
        return Err(HttpParseError::InvalidRequestLine);
    }

    if method.len() > MaximumLength::METHOD.0 {
        return Err(HttpParseError::MethodTooLarge);
    }

    if !method.iter().all(|byte| syntax::is_token_character(*byte)) {
        return Err(HttpParseError::InvalidOctetInMethod);
    }

    if target.is_empty() {
        return Err(HttpParseError::InvalidRequestTarget);
    }

    if !target.iter().all(|byte| syntax::is_request_target_character(*byte)) {
        return Err(HttpParseError::InvalidOctetInRequestTarget);
    }

    let version = parse_http_version(version)?;

    // Both were validated to be US-ASCII above.
    let method = Method::from(&*String::from_utf8_lossy(method));
    let target = String::from_utf8_lossy(target).into_owned();
    Ok((method, target, version))
}

fn parse_http_version(version: &[u8]) -> Result<HttpVersion, HttpParseError> {
    match version {
        b"HTTP/1.1" => Ok(HttpVersion::Http11),
        b"HTTP/1.0" => Ok(HttpVersion::Http10),
        [b'H', b'T', b'T', b'P', b'/', major, b'.', minor]
                if major.is_ascii_digit() && minor.is_ascii_digit() => Err(HttpParseError::UnsupportedHttpVersion),
        _ => Err(HttpParseError::InvalidHttpVersion),
    }
}

/// Reads the header block, up to and including the empty line.
async fn read_headers<R>(stream: &mut R, settings: &Settings) -> Result<Headers, Error>
        where R: ByteSource + ?Sized {
    let mut headers = Headers::new();
    let mut block_length = 0;

    loop {
        let line = read_crlf_line(stream, settings.maximum_line_length, HttpParseError::HeaderLineTooLong).await?;
        if line.is_empty() {
            return Ok(headers);
        }

        block_length += line.len() + 2;
        if block_length > settings.maximum_header_block_length {
            return Err(Error::ParseError(HttpParseError::HeaderBlockTooLarge));
        }

        let (field, value) = parse_header_line(&line)?;
        headers.add_direct(field, value);
    }
}

/// ```text
/// field-line   = field-name ":" OWS field-value OWS
/// ```
fn parse_header_line(line: &[u8]) -> Result<(HeaderField, String), HttpParseError> {
    if line.first().is_some_and(|byte| syntax::is_whitespace(*byte)) {
        return Err(HttpParseError::ObsoleteLineFolding);
    }

    let colon = line.iter()
        .position(|byte| *byte == b':')
        .ok_or(HttpParseError::HeaderDoesNotContainColon)?;

    // No whitespace is allowed between the field name and colon, see
    // RFC 9112 Section 5.1.
    let name = &line[..colon];
    if syntax::validate_token(name).is_err() {
        return Err(HttpParseError::InvalidFieldName);
    }

    let value = syntax::trim_whitespace(&line[colon + 1..]);
    syntax::validate_field_content(value)?;

    let field = HeaderField::of(&String::from_utf8_lossy(name))
        .map_err(|_| HttpParseError::InvalidFieldName)?;
    Ok((field, String::from_utf8_lossy(value).into_owned()))
}

/// Determines the framing of the request body from the header block.
pub fn body_framing(headers: &Headers) -> Result<BodyFraming, HttpParseError> {
    if let Some(codings) = headers.get(&HeaderField::TRANSFER_ENCODING) {
        if headers.contains_key(&HeaderField::CONTENT_LENGTH) {
            return Err(HttpParseError::ContentLengthWithTransferEncoding);
        }

        let mut codings = codings.iter()
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|coding| !coding.is_empty());

        // Only `chunked` itself can be decoded.
        return match (codings.next(), codings.next()) {
            (Some(coding), None) if coding.eq_ignore_ascii_case("chunked") => Ok(BodyFraming::Chunked),
            _ => Err(HttpParseError::UnsupportedTransferCoding),
        };
    }

    let Some(values) = headers.get(&HeaderField::CONTENT_LENGTH) else {
        return Ok(BodyFraming::Length(0));
    };

    let mut length = None;
    for value in values.iter().flat_map(|value| value.split(',')) {
        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(HttpParseError::InvalidContentLength);
        }

        let parsed: u64 = value.parse().map_err(|_| HttpParseError::InvalidContentLength)?;
        if length.is_some_and(|length| length != parsed) {
            return Err(HttpParseError::InvalidContentLength);
        }
        length = Some(parsed);
    }

    length.map(BodyFraming::Length).ok_or(HttpParseError::InvalidContentLength)
}
