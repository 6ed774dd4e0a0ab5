// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::{sync::Arc, time::Duration};

use crate::Handler;

/// The configuration shared by every connection of a server.
#[derive(Clone)]
pub struct ServerConfig {
    pub settings: Settings,
    pub handler: Arc<dyn Handler>,
}

impl ServerConfig {
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self {
            settings: Settings::default(),
            handler,
        }
    }

    pub fn with_settings(settings: Settings, handler: Arc<dyn Handler>) -> Self {
        Self {
            settings,
            handler,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    /// If the client doesn't transmit the full request-line and headers within
    /// this time, the request is terminated.
    pub read_headers_timeout: Duration,

    /// The longest the client may pause while transmitting the body. A read
    /// of the body waiting longer fails, the client is sent a
    /// `408 Request Timeout` and the connection is closed. This applies both
    /// to the handler reading the body and to discarding what it didn't read.
    pub read_body_timeout: Duration,

    /// How long a persistent connection may wait for the next request.
    pub idle_timeout: Duration,

    /// The longest a single write of a response may wait for the client to
    /// accept more data, after which the connection is dropped. A response
    /// taking longer as a whole is fine, as long as it keeps progressing.
    pub write_timeout: Duration,

    /// The maximum length of the request line and of a single header line,
    /// excluding the line terminator.
    pub maximum_line_length: usize,

    /// The maximum length of all header lines of a request combined.
    pub maximum_header_block_length: usize,

    /// The default limit for handlers reading the body into memory.
    pub maximum_body_buffer: usize,

    /// The size of the buffer of the response writer.
    pub output_buffer_size: usize,

    /// Whether textual responses may be compressed with gzip.
    pub compression: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            read_headers_timeout: Duration::from_secs(10),
            read_body_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            maximum_line_length: 8192,
            maximum_header_block_length: 64 * 1024,
            maximum_body_buffer: 8 * 1024 * 1024,
            output_buffer_size: 1024,
            compression: true,
        }
    }
}
