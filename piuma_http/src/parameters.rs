// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! Tokenizer for `key=value` lists, as found in `Cookie`, `Connection`,
//! media type parameters and query strings.

use std::borrow::Cow;

use crate::syntax;

/// The character that separates two parameters.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Separator {
    /// `Connection`, `Accept-Encoding`, `Transfer-Encoding`, ...
    Comma,

    /// `Cookie` and media type parameters.
    Semicolon,

    /// The query component of a request-target.
    Ampersand,
}

impl Separator {
    const fn as_byte(self) -> u8 {
        match self {
            Separator::Comma => b',',
            Separator::Semicolon => b';',
            Separator::Ampersand => b'&',
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameter<'a> {
    pub name: &'a str,

    /// `None` when the name wasn't followed by `=`, e.g. `HttpOnly`. Quoted
    /// values are unescaped.
    pub value: Option<Cow<'a, str>>,
}

#[derive(Clone, Debug)]
pub struct ParameterParser<'a> {
    input: &'a str,
    position: usize,
    separator: u8,
}

impl<'a> ParameterParser<'a> {
    pub fn new(input: &'a str, separator: Separator) -> Self {
        Self {
            input,
            position: 0,
            separator: separator.as_byte(),
        }
    }

    /// Returns the next parameter, or `None` when the input is exhausted.
    pub fn next_parameter(&mut self) -> Option<Parameter<'a>> {
        let input = self.input;
        let bytes = input.as_bytes();

        loop {
            while self.position < bytes.len()
                    && (bytes[self.position] == self.separator || syntax::is_whitespace(bytes[self.position])) {
                self.position += 1;
            }

            if self.position == bytes.len() {
                return None;
            }

            let start = self.position;
            while self.position < bytes.len() && self.is_name_character(bytes[self.position]) {
                self.position += 1;
            }
            let name = &input[start..self.position];
            self.skip_whitespace();

            if name.is_empty() {
                self.skip_segment();
                continue;
            }

            match bytes.get(self.position) {
                None => return Some(Parameter { name, value: None }),
                Some(&byte) if byte == self.separator => {
                    self.position += 1;
                    return Some(Parameter { name, value: None });
                }
                Some(b'=') => self.position += 1,
                Some(_) => {
                    self.skip_segment();
                    continue;
                }
            }

            self.skip_whitespace();
            if bytes.get(self.position) == Some(&b'"') {
                let value = self.read_quoted_value()?;
                self.skip_segment();
                return Some(Parameter { name, value: Some(value) });
            }

            let start = self.position;
            while self.position < bytes.len() && bytes[self.position] != self.separator {
                self.position += 1;
            }
            let value = &input[start..self.position];
            if self.position < bytes.len() {
                self.position += 1;
            }

            return Some(Parameter {
                name,
                value: Some(Cow::Borrowed(value.trim_end_matches([' ', '\t']))),
            });
        }
    }

    /// Query strings carry almost any character in their names, so only the
    /// structural characters end a name there.
    fn is_name_character(&self, byte: u8) -> bool {
        if self.separator == b'&' {
            byte != b'=' && byte != b'&' && !syntax::is_whitespace(byte)
        } else {
            syntax::is_token_character(byte)
        }
    }

    /// Reads a `quoted-string`, the cursor being on the opening quote. An
    /// unterminated string ends the parameter list.
    fn read_quoted_value(&mut self) -> Option<Cow<'a, str>> {
        let input = self.input;
        let bytes = input.as_bytes();
        let start = self.position + 1;
        let mut unescaped: Option<Vec<u8>> = None;
        let mut index = start;

        while index < bytes.len() {
            match bytes[index] {
                b'"' => {
                    self.position = index + 1;
                    return Some(match unescaped {
                        Some(unescaped) => Cow::Owned(String::from_utf8_lossy(&unescaped).into_owned()),
                        None => Cow::Borrowed(&input[start..index]),
                    });
                }
                b'\\' if index + 1 < bytes.len() => {
                    unescaped.get_or_insert_with(|| bytes[start..index].to_vec())
                        .push(bytes[index + 1]);
                    index += 2;
                }
                byte => {
                    if let Some(unescaped) = &mut unescaped {
                        unescaped.push(byte);
                    }
                    index += 1;
                }
            }
        }

        self.position = bytes.len();
        None
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.input.as_bytes();
        while self.position < bytes.len() && syntax::is_whitespace(bytes[self.position]) {
            self.position += 1;
        }
    }

    /// Advances past the next separator.
    fn skip_segment(&mut self) {
        let bytes = self.input.as_bytes();
        while self.position < bytes.len() && bytes[self.position] != self.separator {
            self.position += 1;
        }
        if self.position < bytes.len() {
            self.position += 1;
        }
    }
}

impl<'a> Iterator for ParameterParser<'a> {
    type Item = Parameter<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_parameter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn collect(input: &str, separator: Separator) -> Vec<(String, Option<String>)> {
        ParameterParser::new(input, separator)
            .map(|parameter| (parameter.name.to_string(), parameter.value.map(Cow::into_owned)))
            .collect()
    }

    fn pair(name: &str, value: Option<&str>) -> (String, Option<String>) {
        (name.to_string(), value.map(str::to_string))
    }

    #[test]
    fn cookies() {
        assert_eq!(collect("session=abc123; theme=dark", Separator::Semicolon), vec![
            pair("session", Some("abc123")),
            pair("theme", Some("dark")),
        ]);
    }

    #[test]
    fn bare_token_has_no_value() {
        assert_eq!(collect("keep-alive, Upgrade", Separator::Comma), vec![
            pair("keep-alive", None),
            pair("Upgrade", None),
        ]);
    }

    #[test]
    fn quoted_values_are_unescaped() {
        assert_eq!(collect(r#"a="hello \"world\"", b="plain""#, Separator::Comma), vec![
            pair("a", Some(r#"hello "world""#)),
            pair("b", Some("plain")),
        ]);
    }

    #[test]
    fn quoted_value_without_escapes_is_borrowed() {
        let mut parser = ParameterParser::new(r#"charset="utf-8""#, Separator::Semicolon);
        let parameter = parser.next_parameter().unwrap();
        assert!(matches!(parameter.value, Some(Cow::Borrowed("utf-8"))));
        assert_eq!(parser.next_parameter(), None);
    }

    #[test]
    fn unterminated_quote_ends_parsing() {
        assert_eq!(collect(r#"a=1; b="open; c=3"#, Separator::Semicolon), vec![
            pair("a", Some("1")),
        ]);
    }

    #[rstest]
    #[case(",,a=1,,  ,b", vec![pair("a", Some("1")), pair("b", None)])]
    #[case("", vec![])]
    #[case("   ", vec![])]
    #[case("key=", vec![pair("key", Some(""))])]
    #[case("key = value , other=x", vec![pair("key", Some("value")), pair("other", Some("x"))])]
    #[case("@bad=1, good=2", vec![pair("good", Some("2"))])]
    #[case("name junk, next", vec![pair("next", None)])]
    fn edge_cases(#[case] input: &str, #[case] expected: Vec<(String, Option<String>)>) {
        assert_eq!(collect(input, Separator::Comma), expected);
    }

    #[test]
    fn query_strings() {
        assert_eq!(collect("q=rust%20lang&page=2&flag", Separator::Ampersand), vec![
            pair("q", Some("rust%20lang")),
            pair("page", Some("2")),
            pair("flag", None),
        ]);
    }
}
