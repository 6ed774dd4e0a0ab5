// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::{borrow::Cow, fmt};

use phf::phf_map;
use unicase::UniCase;

use crate::{
    syntax,
    InvalidArgument,
};

/// The name of a header field, normalized to lowercase.
///
/// Field names are case-insensitive, so the normalized form is the only form
/// that is retained: it is used for comparison, hashing and serialization.
///
/// ### References
/// * [RFC 9110, Section 5.1. Field Names](https://www.rfc-editor.org/rfc/rfc9110.html#name-field-names)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeaderField(Cow<'static, str>);

impl HeaderField {
    /// Field names longer than this are refused.
    pub const MAXIMUM_LENGTH: usize = 80;

    pub const ACCEPT: HeaderField = HeaderField::from_static("accept");
    pub const ACCEPT_ENCODING: HeaderField = HeaderField::from_static("accept-encoding");
    pub const ACCEPT_RANGES: HeaderField = HeaderField::from_static("accept-ranges");
    pub const AUTHORIZATION: HeaderField = HeaderField::from_static("authorization");
    pub const CACHE_CONTROL: HeaderField = HeaderField::from_static("cache-control");
    pub const CONNECTION: HeaderField = HeaderField::from_static("connection");
    pub const CONTENT_ENCODING: HeaderField = HeaderField::from_static("content-encoding");
    pub const CONTENT_LENGTH: HeaderField = HeaderField::from_static("content-length");
    pub const CONTENT_RANGE: HeaderField = HeaderField::from_static("content-range");
    pub const CONTENT_TYPE: HeaderField = HeaderField::from_static("content-type");
    pub const COOKIE: HeaderField = HeaderField::from_static("cookie");
    pub const DATE: HeaderField = HeaderField::from_static("date");
    pub const ETAG: HeaderField = HeaderField::from_static("etag");
    pub const EXPECT: HeaderField = HeaderField::from_static("expect");
    pub const HOST: HeaderField = HeaderField::from_static("host");
    pub const IF_MODIFIED_SINCE: HeaderField = HeaderField::from_static("if-modified-since");
    pub const IF_RANGE: HeaderField = HeaderField::from_static("if-range");
    pub const KEEP_ALIVE: HeaderField = HeaderField::from_static("keep-alive");
    pub const LAST_MODIFIED: HeaderField = HeaderField::from_static("last-modified");
    pub const LOCATION: HeaderField = HeaderField::from_static("location");
    pub const RANGE: HeaderField = HeaderField::from_static("range");
    pub const SERVER: HeaderField = HeaderField::from_static("server");
    pub const SET_COOKIE: HeaderField = HeaderField::from_static("set-cookie");
    pub const TE: HeaderField = HeaderField::from_static("te");
    pub const TRAILER: HeaderField = HeaderField::from_static("trailer");
    pub const TRANSFER_ENCODING: HeaderField = HeaderField::from_static("transfer-encoding");
    pub const UPGRADE: HeaderField = HeaderField::from_static("upgrade");
    pub const USER_AGENT: HeaderField = HeaderField::from_static("user-agent");
    pub const VARY: HeaderField = HeaderField::from_static("vary");

    /// Only for names that are already lowercase tokens.
    const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Validates and normalizes the given field name.
    ///
    /// Well-known names are looked up without allocating.
    pub fn of(name: &str) -> Result<Self, InvalidArgument> {
        if let Some(field) = WELL_KNOWN_FIELDS.get(&UniCase::ascii(name)) {
            return Ok(field.clone());
        }

        if name.is_empty() {
            return Err(InvalidArgument::EmptyFieldName);
        }

        if name.len() > Self::MAXIMUM_LENGTH {
            return Err(InvalidArgument::FieldNameTooLong);
        }

        if !name.bytes().all(syntax::is_token_character) {
            return Err(InvalidArgument::FieldNameContainsInvalidCharacter);
        }

        Ok(Self(Cow::Owned(name.to_ascii_lowercase())))
    }

    /// Get the normalized (lowercase) name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

static WELL_KNOWN_FIELDS: phf::Map<UniCase<&'static str>, HeaderField> = phf_map!(
    UniCase::ascii("accept") => HeaderField::ACCEPT,
    UniCase::ascii("accept-encoding") => HeaderField::ACCEPT_ENCODING,
    UniCase::ascii("accept-ranges") => HeaderField::ACCEPT_RANGES,
    UniCase::ascii("authorization") => HeaderField::AUTHORIZATION,
    UniCase::ascii("cache-control") => HeaderField::CACHE_CONTROL,
    UniCase::ascii("connection") => HeaderField::CONNECTION,
    UniCase::ascii("content-encoding") => HeaderField::CONTENT_ENCODING,
    UniCase::ascii("content-length") => HeaderField::CONTENT_LENGTH,
    UniCase::ascii("content-range") => HeaderField::CONTENT_RANGE,
    UniCase::ascii("content-type") => HeaderField::CONTENT_TYPE,
    UniCase::ascii("cookie") => HeaderField::COOKIE,
    UniCase::ascii("date") => HeaderField::DATE,
    UniCase::ascii("etag") => HeaderField::ETAG,
    UniCase::ascii("expect") => HeaderField::EXPECT,
    UniCase::ascii("host") => HeaderField::HOST,
    UniCase::ascii("if-modified-since") => HeaderField::IF_MODIFIED_SINCE,
    UniCase::ascii("if-range") => HeaderField::IF_RANGE,
    UniCase::ascii("keep-alive") => HeaderField::KEEP_ALIVE,
    UniCase::ascii("last-modified") => HeaderField::LAST_MODIFIED,
    UniCase::ascii("location") => HeaderField::LOCATION,
    UniCase::ascii("range") => HeaderField::RANGE,
    UniCase::ascii("server") => HeaderField::SERVER,
    UniCase::ascii("set-cookie") => HeaderField::SET_COOKIE,
    UniCase::ascii("te") => HeaderField::TE,
    UniCase::ascii("trailer") => HeaderField::TRAILER,
    UniCase::ascii("transfer-encoding") => HeaderField::TRANSFER_ENCODING,
    UniCase::ascii("upgrade") => HeaderField::UPGRADE,
    UniCase::ascii("user-agent") => HeaderField::USER_AGENT,
    UniCase::ascii("vary") => HeaderField::VARY,
);

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for HeaderField {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for HeaderField {
    type Error = InvalidArgument;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::of(value)
    }
}
