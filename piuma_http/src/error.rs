// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use strum_macros::AsRefStr;

use std::{fmt, io};

use crate::StatusCode;

#[derive(Debug)]
pub enum Error {
    InvalidArgument(InvalidArgument),
    ParseError(HttpParseError),
    Other(io::Error),
}

impl From<InvalidArgument> for Error {
    fn from(error: InvalidArgument) -> Self {
        Error::InvalidArgument(error)
    }
}

impl From<HttpParseError> for Error {
    fn from(error: HttpParseError) -> Self {
        Error::ParseError(error)
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Other(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(error) => write!(f, "invalid argument: {error}"),
            Error::ParseError(error) => write!(f, "malformed request: {error}"),
            Error::Other(error) => write!(f, "i/o failure: {error}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::InvalidArgument(error) => Some(error),
            Error::ParseError(error) => Some(error),
            Error::Other(error) => Some(error),
        }
    }
}

/// A header name or value that was supplied programmatically, but doesn't
/// satisfy the syntax of HTTP.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, AsRefStr)]
pub enum InvalidArgument {
    /// A field name must contain at least one character.
    EmptyFieldName,

    /// The field name exceeds [`crate::HeaderField::MAXIMUM_LENGTH`].
    FieldNameTooLong,

    /// The field name contains whitespace, a delimiter, a control character
    /// or an octet outside of US-ASCII.
    FieldNameContainsInvalidCharacter,

    /// The field value contains a control character, such as CR or LF, which
    /// would allow a caller to smuggle additional fields into a message.
    FieldValueContainsInvalidCharacters,
}

impl fmt::Display for InvalidArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl std::error::Error for InvalidArgument {}

/// An error that can occur while parsing an HTTP request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, AsRefStr)]
pub enum HttpParseError {
    /// The header line didn't contain a colon, it's only the name.
    ///
    /// ## Example:
    /// ```text
    /// Content-Type
    /// ```
    HeaderDoesNotContainColon,

    /// A single header line was longer than the line limit.
    HeaderLineTooLong,

    /// The cumulative size of the header section exceeded the configured
    /// maximum.
    HeaderBlockTooLarge,

    /// The field name was empty, contained invalid characters or was followed
    /// by whitespace before the colon.
    ///
    /// ## Example:
    /// ```text
    /// Content-Type : text/html
    /// ```
    InvalidFieldName,

    /// A header line started with whitespace, which is the obsolete
    /// line-folding syntax.
    ///
    /// ### References
    /// * [RFC 9112, Section 5.2](https://www.rfc-editor.org/rfc/rfc9112.html#name-obsolete-line-folding)
    ObsoleteLineFolding,

    FieldValueContainsInvalidCharacters,

    /// A CR character that wasn't followed by an LF.
    ///
    /// ## Example:
    /// ```text
    /// Content-Length: 123\r
    /// ```
    InvalidCRLF,

    /// The request-line doesn't consist of exactly three parts separated by a
    /// single space.
    InvalidRequestLine,

    /// The request-line exceeded the line limit.
    RequestLineTooLong,

    /// The HTTP version was invalid.
    ///
    /// ## Sytax
    /// The HTTP version must be in the format `HTTP/<digit>.<digit>`.
    ///
    /// ## Examples:
    /// ```text
    /// HTTP/1.
    /// REST/1.1
    /// HTTP/1.1.1
    /// ```
    InvalidHttpVersion,

    /// The HTTP version was syntactically valid, but isn't HTTP/1.0 or
    /// HTTP/1.1.
    UnsupportedHttpVersion,

    /// The method was too large.
    ///
    /// ## Example:
    /// ```text
    /// THIS-IS-A-VERY-LONG-METHOD-CONTAINING-MANY-CHARACTERS / HTTP/1.1
    /// ```
    MethodTooLarge,

    InvalidOctetInMethod,
    InvalidOctetInRequestTarget,

    /// The request-target was empty.
    InvalidRequestTarget,

    /// The `Content-Length` field was malformed, meaning it contained non-numeric
    /// characters, was too large, was the empty string, or multiple values
    /// disagreed.
    ///
    /// ## Example:
    /// ```text
    /// Content-Length: 123abc
    /// ```
    InvalidContentLength,

    /// Both `Content-Length` and `Transfer-Encoding` were supplied, which is
    /// a well-known request smuggling vector.
    ContentLengthWithTransferEncoding,

    /// The final transfer coding isn't `chunked`, or a coding other than
    /// `chunked` was applied.
    UnsupportedTransferCoding,

    /// The chunk-size line didn't start with a hexadecimal number.
    InvalidChunkSize,

    /// The chunk-size has more hexadecimal digits than fit in 64 bits.
    ChunkSizeTooLarge,

    /// The chunk extensions on a single chunk-size line were too long.
    ChunkExtensionTooLong,

    /// The chunk data wasn't followed by a CRLF.
    InvalidChunkTerminator,

    /// The trailer section of a chunked body was too large.
    TrailerTooLarge,

    /// The connection ended before the body was complete.
    UnexpectedEndOfBody,

    /// The body is larger than the buffer the consumer is willing to allocate.
    PayloadTooLarge,

    TokenContainsDelimiter,
    TokenContainsNonVisibleAscii,
    TokenContainsWhitespace,
    TokenEmpty,
}

impl HttpParseError {
    /// The status code of the response that is sent when a request fails with
    /// this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            HttpParseError::HeaderLineTooLong
                | HttpParseError::HeaderBlockTooLarge
                | HttpParseError::TrailerTooLarge => StatusCode::RequestHeaderFieldsTooLarge,
            HttpParseError::RequestLineTooLong => StatusCode::URITooLong,
            HttpParseError::UnsupportedHttpVersion => StatusCode::HTTPVersionNotSupported,
            HttpParseError::UnsupportedTransferCoding => StatusCode::NotImplemented,
            HttpParseError::PayloadTooLarge => StatusCode::ContentTooLarge,
            _ => StatusCode::BadRequest,
        }
    }
}

impl fmt::Display for HttpParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl std::error::Error for HttpParseError {}

impl From<HttpParseError> for io::Error {
    fn from(error: HttpParseError) -> Self {
        let kind = match error {
            HttpParseError::UnexpectedEndOfBody => io::ErrorKind::UnexpectedEof,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, error)
    }
}

/// Finds the [`HttpParseError`] that an [`io::Error`] was created from, if
/// any. Body readers report framing errors through `io::Error`, since they
/// implement [`tokio::io::AsyncRead`].
#[must_use]
pub fn parse_error_of(error: &io::Error) -> Option<HttpParseError> {
    error.get_ref()
        .and_then(|inner| inner.downcast_ref::<HttpParseError>())
        .copied()
}
