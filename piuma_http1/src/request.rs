// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::borrow::Cow;

use piuma_http::{
    HeaderField,
    Headers,
    HttpVersion,
    Method,
    Parameter,
    ParameterParser,
    Separator,
};

use crate::{BoundedInput, RequestHead};

/// A request as handed to a [`crate::Handler`]. The body borrows the
/// connection, so it can only be read while the exchange is in progress.
pub struct Request<'a> {
    pub method: Method,

    /// The request-target exactly as it was sent, e.g. `/search?q=piuma`.
    pub target: String,
    pub version: HttpVersion,
    pub headers: Headers,
    pub body: BoundedInput<'a>,
}

impl<'a> Request<'a> {
    pub fn new(head: RequestHead, body: BoundedInput<'a>) -> Self {
        Self {
            method: head.method,
            target: head.target,
            version: head.version,
            headers: head.headers,
            body,
        }
    }

    /// The target without the query component.
    #[must_use]
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }

    /// The query component, without the `?`.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    /// The `name=value` pairs of the query component. Values are not
    /// percent-decoded.
    pub fn query_parameters(&self) -> ParameterParser<'_> {
        ParameterParser::new(self.query().unwrap_or_default(), Separator::Ampersand)
    }

    /// The cookies of all `Cookie` header fields, in order.
    pub fn cookies(&self) -> impl Iterator<Item = Parameter<'_>> + '_ {
        self.headers.get(&HeaderField::COOKIE)
            .unwrap_or_default()
            .iter()
            .flat_map(|value| ParameterParser::new(value, Separator::Semicolon))
    }

    /// The value of the first cookie with the given name.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<Cow<'_, str>> {
        self.cookies()
            .find(|cookie| cookie.name == name)
            .map(|cookie| cookie.value.unwrap_or_default())
    }
}
