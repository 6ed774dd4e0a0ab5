// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::io::Cursor;

use async_trait::async_trait;
use tracing::debug;

use piuma_http::{BodyKind, HeaderField, Method, Response, StatusCode};
use piuma_http1::{serve_ranges, Handler, Request};

const WELCOME: &str = "Welcome to piuma!\n\nTry `curl -r 0-6 http://localhost:8080/` \
    or `curl -d hello http://localhost:8080/echo`.\n";

/// A small demonstration application.
pub struct ExampleHandler {
    /// The largest body `/echo` accepts.
    pub body_limit: usize,
}

#[async_trait]
impl Handler for ExampleHandler {
    async fn handle(&self, request: &mut Request<'_>) -> anyhow::Result<Response> {
        debug!(method = %request.method, request_target = %request.target, "example request");

        match (&request.method, request.path()) {
            (Method::Get | Method::Head, "/") => welcome(request).await,
            (Method::Post, "/echo") => echo(request, self.body_limit).await,
            (_, "/" | "/echo") => Ok(Response::with_status_and_string_body(StatusCode::MethodNotAllowed,
                                                                           StatusCode::MethodNotAllowed.reason_phrase())),
            _ => Ok(Response::not_found("Not Found")),
        }
    }
}

async fn welcome(request: &mut Request<'_>) -> anyhow::Result<Response> {
    if let Some(range) = request.headers.get_first(&HeaderField::RANGE) {
        let resource = Cursor::new(WELCOME.as_bytes());
        if let Some(response) = serve_ranges(resource, WELCOME.len() as u64, range, Some(piuma_http::PLAIN_TEXT)).await? {
            return Ok(response);
        }
    }

    let mut response = Response::with_status_and_string_body(StatusCode::Ok, WELCOME);
    response.headers.put_direct(HeaderField::ACCEPT_RANGES, "bytes");
    Ok(response)
}

async fn echo(request: &mut Request<'_>, limit: usize) -> anyhow::Result<Response> {
    let body = request.body.read_to_vec(limit).await?;
    let mut response = Response::with_status(StatusCode::Ok);
    if let Some(content_type) = request.headers.get_first(&HeaderField::CONTENT_TYPE) {
        response.headers.put_direct(HeaderField::CONTENT_TYPE, content_type);
    }
    response.body = Some(BodyKind::Bytes(body));
    Ok(response)
}
