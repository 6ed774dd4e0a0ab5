// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::borrow::Cow;

use tokio::io::AsyncRead;

use crate::{
    BodyKind,
    HeaderField,
    Headers,
    StatusCode,
};

/// The media type of the plain text bodies created by this module.
pub const PLAIN_TEXT: &str = "text/plain;charset=utf-8";

#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Option<BodyKind>,
}

impl Response {
    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn with_status_and_string_body(status: StatusCode, body: impl Into<Cow<'static, str>>) -> Self {
        let mut headers = Headers::new();
        headers.put_direct(HeaderField::CONTENT_TYPE, PLAIN_TEXT);
        Self {
            status,
            headers,
            body: match body.into() {
                Cow::Owned(body) => Some(BodyKind::String(body)),
                Cow::Borrowed(body) => Some(BodyKind::StaticString(body)),
            },
        }
    }

    /// A body of which the length is known up front, e.g. a file, so it can
    /// be sent with `Content-Length`.
    pub fn with_sized_body<R>(status: StatusCode, source: R, length: u64) -> Self
            where R: AsyncRead + Send + Unpin + 'static {
        let mut response = Self::with_status(status);
        response.body = Some(BodyKind::Sized { source: Box::new(source), length });
        response
    }

    /// A body of unknown length, sent using chunked transfer coding.
    pub fn with_stream<R>(status: StatusCode, source: R) -> Self
            where R: AsyncRead + Send + Unpin + 'static {
        let mut response = Self::with_status(status);
        response.body = Some(BodyKind::Stream(Box::new(source)));
        response
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::with_status_and_string_body(StatusCode::NotFound, message)
    }
}
