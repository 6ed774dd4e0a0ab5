// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::fmt;

use phf::phf_map;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Method {
    Other(String),
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    Trace,
}

impl Method {
    /// Get the method in string form.
    ///
    /// # Notes
    /// Methods are case-sensitive, as per
    /// [RFC 9110 - Section 9.1](https://www.rfc-editor.org/rfc/rfc9110.html#section-9.1-5):
    /// > The method token is case-sensitive because it might be used as a
    /// > gateway to object-based systems with case-sensitive method names.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Other(str) => str,
            Self::Connect => "CONNECT",
            Self::Delete => "DELETE",
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Trace => "TRACE",
        }
    }
}

static METHOD_MAP: phf::Map<&'static str, Method> = phf_map! {
    "CONNECT" => Method::Connect,
    "DELETE" => Method::Delete,
    "GET" => Method::Get,
    "HEAD" => Method::Head,
    "OPTIONS" => Method::Options,
    "PATCH" => Method::Patch,
    "POST" => Method::Post,
    "PUT" => Method::Put,
    "TRACE" => Method::Trace,
};

impl From<&str> for Method {
    fn from(value: &str) -> Self {
        match METHOD_MAP.get(value) {
            Some(method) => method.clone(),
            None => Method::Other(value.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("GET", Method::Get)]
    #[case("HEAD", Method::Head)]
    #[case("get", Method::Other("get".to_string()))]
    #[case("PROPFIND", Method::Other("PROPFIND".to_string()))]
    fn from_str(#[case] input: &str, #[case] expected: Method) {
        let method = Method::from(input);
        assert_eq!(method, expected);
        assert_eq!(method.as_str(), input);
    }
}
