// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use async_trait::async_trait;

use piuma_http::Response;

use crate::Request;

/// Produces the response to a request.
///
/// An error becomes a `500 Internal Server Error`, except when it was caused
/// by malformed body framing, which is answered with the matching client
/// error after which the connection is closed.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: &mut Request<'_>) -> anyhow::Result<Response>;
}
