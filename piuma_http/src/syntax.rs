// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! Character classes of the HTTP/1.1 message syntax.
//!
//! # References
//! * [RFC 9110](https://www.rfc-editor.org/rfc/rfc9110.html)
//! * [RFC 9112](https://www.rfc-editor.org/rfc/rfc9112.html)

use crate::HttpParseError;

/// ```text
/// VCHAR          = %x21-7E
/// ```
#[inline]
pub fn is_visible_character(byte: u8) -> bool {
    matches!(byte, 0x21..=0x7E)
}

/// ```text
/// field-vchar    = VCHAR / obs-text
/// obs-text       = %x80-FF
/// ```
#[inline]
fn is_field_value_character(byte: u8) -> bool {
    is_visible_character(byte) || byte >= 0x80
}

/// Is the given octet allowed in a request-target? Control characters are
/// rejected; the structure of the target is left to the handler.
///
/// # [HTTP/1.1 (RFC 9112) Definitions](https://www.rfc-editor.org/rfc/rfc9112.html#name-request-target)
/// ```text
/// request-target = origin-form
///                / absolute-form
///                / authority-form
///                / asterisk-form
/// ```
#[inline]
pub fn is_request_target_character(byte: u8) -> bool {
    !matches!(byte, 0x00..=0x20 | 0x7F..=0xFF)
}

#[inline]
pub fn is_token_character(byte: u8) -> bool {
    validate_token_character(byte).is_ok()
}

/// `U+0020 SPACE` and `U+0009 CHARACTER TABULATION`, the characters of `OWS`,
/// `RWS` and `BWS`.
///
/// # References
/// * [RFC 9110 Section 5.6.3](https://www.rfc-editor.org/rfc/rfc9110.html#name-whitespace)
#[inline]
pub fn is_whitespace(byte: u8) -> bool {
    byte == b' ' || byte == b'\t'
}

/// Strips optional whitespace from both ends.
pub fn trim_whitespace(value: &[u8]) -> &[u8] {
    let start = value.iter().position(|byte| !is_whitespace(*byte)).unwrap_or(value.len());
    let end = value.iter().rposition(|byte| !is_whitespace(*byte)).map_or(start, |index| index + 1);
    &value[start..end]
}

/// Validate a field value. Note that in HTTP, UTF-8 is optional (US-ASCII),
/// and isn't used before validating the content.
///
/// ```text
/// field-value    = *field-content
/// field-content  = field-vchar
///                  [ 1*( SP / HTAB / field-vchar ) field-vchar ]
/// ```
pub fn validate_field_content(value: &[u8]) -> Result<(), HttpParseError> {
    if value.iter().all(|byte| is_field_value_character(*byte) || is_whitespace(*byte)) {
        Ok(())
    } else {
        Err(HttpParseError::FieldValueContainsInvalidCharacters)
    }
}

pub fn validate_token(value: &[u8]) -> Result<(), HttpParseError> {
    if value.is_empty() {
        return Err(HttpParseError::TokenEmpty);
    }

    value.iter().try_for_each(|byte| validate_token_character(*byte))
}

/// Validate a token character.
///
/// ```text
/// tchar          = "!" / "#" / "$" / "%" / "&" / "'" / "*"
///                / "+" / "-" / "." / "^" / "_" / "`" / "|" / "~"
///                / DIGIT / ALPHA
///                ; any VCHAR, except delimiters
/// ```
pub fn validate_token_character(character: u8) -> Result<(), HttpParseError> {
    match character {
        b' ' | b'\t' => Err(HttpParseError::TokenContainsWhitespace),

        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'|' | b'~' => Ok(()),

        b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z' => Ok(()),

        b'"' | b'(' | b')' | b',' | b'/' | b':' | b';' | b'<' | b'=' | b'>' |
        b'?' | b'@' | b'[' | b'\\' | b']' | b'{' | b'}' => Err(HttpParseError::TokenContainsDelimiter),

        _ => Err(HttpParseError::TokenContainsNonVisibleAscii),
    }
}
