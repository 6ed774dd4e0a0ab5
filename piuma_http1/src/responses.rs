// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! This module creates complete responses for handling common cases.

use piuma_http::{HttpParseError, Response, StatusCode};

/// Create a response for a request that couldn't be parsed.
pub fn for_parse_error(error: HttpParseError) -> Response {
    let status = error.status_code();
    Response::with_status_and_string_body(status, status.reason_phrase())
}

/// Create a response for when the request times out.
pub fn request_timeout() -> Response {
    Response::with_status_and_string_body(StatusCode::RequestTimeout, "Request Timed Out")
}

pub fn internal_server_error() -> Response {
    Response::with_status_and_string_body(StatusCode::InternalServerError, "Internal Server Error")
}

/// Create a response for an `Expect` header other than `100-continue`.
pub fn expectation_failed() -> Response {
    Response::with_status_and_string_body(StatusCode::ExpectationFailed, "Expectation Failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use piuma_http::BodyKind;

    #[test]
    fn parse_error_response() {
        let response = for_parse_error(HttpParseError::UnsupportedHttpVersion);
        assert_eq!(response.status, StatusCode::HTTPVersionNotSupported);
        assert!(matches!(response.body, Some(BodyKind::StaticString("HTTP Version Not Supported"))));
    }
}
