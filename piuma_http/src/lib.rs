// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! This crate contains the HTTP logic that isn't tied to the wire format of
//! HTTP/1.x: header fields and collections, parameters, ranges, methods,
//! status codes and responses.

pub mod error;
pub mod header_field;
pub mod headers;
pub mod method;
pub mod parameters;
pub mod range;
pub mod response;
pub mod status;
pub mod syntax;
pub mod version;

use std::fmt;

use tokio::io::AsyncRead;

pub use error::*;
pub use header_field::*;
pub use headers::*;
pub use method::*;
pub use parameters::*;
pub use range::*;
pub use response::*;
pub use status::*;
pub use version::*;

pub enum BodyKind {
    Bytes(Vec<u8>),
    StaticString(&'static str),
    String(String),

    /// A streaming source of which the length is known up front.
    Sized {
        source: Box<dyn AsyncRead + Send + Unpin>,
        length: u64,
    },

    /// A streaming source of unknown length.
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl BodyKind {
    #[must_use]
    pub fn known_length(&self) -> Option<u64> {
        match self {
            BodyKind::Bytes(bytes) => Some(bytes.len() as u64),
            BodyKind::StaticString(string) => Some(string.len() as u64),
            BodyKind::String(string) => Some(string.len() as u64),
            BodyKind::Sized { length, .. } => Some(*length),
            BodyKind::Stream(_) => None,
        }
    }
}

impl fmt::Debug for BodyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyKind::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            BodyKind::StaticString(string) => f.debug_tuple("StaticString").field(string).finish(),
            BodyKind::String(string) => f.debug_tuple("String").field(string).finish(),
            BodyKind::Sized { length, .. } => f.debug_struct("Sized").field("length", length).finish_non_exhaustive(),
            BodyKind::Stream(_) => f.debug_tuple("Stream").finish_non_exhaustive(),
        }
    }
}

impl From<&'static str> for BodyKind {
    fn from(value: &'static str) -> Self {
        Self::StaticString(value)
    }
}

impl From<String> for BodyKind {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<u8>> for BodyKind {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}
