// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::fmt;

/// A single range of a `Range` request header, in the `bytes` unit. At least
/// one of the two sides is present.
///
/// * `start-end`: both present, inclusive.
/// * `start-`: no end, meaning "up to the end of the representation".
/// * `-suffix`: no start, the `end` being the length of the suffix.
///
/// ### References
/// * [RFC 9110, Section 14.1.2. Byte Ranges](https://www.rfc-editor.org/rfc/rfc9110.html#name-byte-ranges)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

/// A range resolved against the length of the representation. Both bounds are
/// inclusive and lie within the representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResolvedRange {
    pub start: u64,
    pub end: u64,
}

impl ResolvedRange {
    /// The number of bytes in this range, never zero.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl ContentRange {
    /// Parses the value of the `Range` header. Only the `bytes` unit is
    /// understood, and a single malformed range rejects the whole header.
    #[must_use]
    pub fn parse_ranges(value: &str) -> Option<Vec<ContentRange>> {
        let (unit, ranges) = value.split_once('=')?;
        if !unit.trim().eq_ignore_ascii_case("bytes") {
            return None;
        }

        ranges.split(',')
            .map(|range| Self::parse(range.trim()))
            .collect::<Option<Vec<_>>>()
            .filter(|ranges| !ranges.is_empty())
    }

    /// Parses a single `first-last`, `first-` or `-suffix` range.
    #[must_use]
    pub fn parse(range: &str) -> Option<ContentRange> {
        if range.len() < 2 {
            return None;
        }

        let (start, end) = range.split_once('-')?;
        let start = parse_position(start.trim())?;
        let end = parse_position(end.trim())?;
        if start.is_none() && end.is_none() {
            return None;
        }

        Some(ContentRange { start, end })
    }

    /// Resolves this range against a representation of `complete_length`
    /// bytes. Returns `None` when the range is unsatisfiable.
    #[must_use]
    pub fn resolve(&self, complete_length: u64) -> Option<ResolvedRange> {
        let last = complete_length.checked_sub(1)?;
        match (self.start, self.end) {
            (None, Some(suffix)) => {
                if suffix == 0 || suffix > complete_length {
                    return None;
                }
                Some(ResolvedRange { start: complete_length - suffix, end: last })
            }
            (Some(start), None) => {
                (start <= last).then_some(ResolvedRange { start, end: last })
            }
            (Some(start), Some(end)) => {
                (start <= end && end <= last).then_some(ResolvedRange { start, end })
            }
            (None, None) => None,
        }
    }
}

/// `Some(None)` for an absent position, `None` when it isn't a plain decimal.
fn parse_position(value: &str) -> Option<Option<u64>> {
    if value.is_empty() {
        return Some(None);
    }

    if !value.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }

    value.parse().ok().map(Some)
}

/// The `Content-Range` header field indicates where in a full body a partial
/// message belongs.
///
/// ### References
/// * [RFC 9110](https://httpwg.org/specs/rfc9110.html#field.content-range)
/// * [MDN `Content-Range` header](https://developer.mozilla.org/en-US/docs/Web/HTTP/Headers/Content-Range)
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContentRangeHeaderValue {
    Range {
        range: ResolvedRange,

        /// Complete length of the **resource**, not the body.
        complete_length: u64,
    },

    /// Used for 416 Range Not Satisfiable.
    ///
    /// ### RFC 9110, section 14.4:
    /// > A server generating a 416 (Range Not Satisfiable) response to a
    /// > byte-range request SHOULD send a Content-Range header field with an
    /// > unsatisfied-range value.
    Unsatisfied {
        /// The complete length of the resource.
        complete_length: u64,
    },
}

impl fmt::Display for ContentRangeHeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentRangeHeaderValue::Range { range, complete_length } => {
                write!(f, "bytes {}-{}/{}", range.start, range.end, complete_length)
            }
            ContentRangeHeaderValue::Unsatisfied { complete_length } => {
                write!(f, "bytes */{}", complete_length)
            }
        }
    }
}
