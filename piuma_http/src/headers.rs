// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::{
    collections::hash_map::RandomState,
    hash::BuildHasher,
    mem,
    slice,
};

use hashbrown::HashTable;

use crate::{
    syntax,
    HeaderField,
    InvalidArgument,
    ParameterParser,
    Separator,
};

/// An ordered multimap of header fields.
///
/// The entries are kept in the order in which their field was first seen,
/// and the values of a field in the order they were added. Lookups go through
/// an open-addressing table of positions into the entries. The table is
/// hashed with a randomly keyed hasher, so a client can't craft field names
/// that collide on purpose.
#[derive(Clone, Debug, Default)]
pub struct Headers {
    entries: Vec<Entry>,
    indices: HashTable<usize>,
    hasher: RandomState,
    value_count: usize,
}

#[derive(Clone, Debug)]
struct Entry {
    field: HeaderField,
    values: Values,
}

/// Most fields only carry a single value, so that case doesn't allocate a
/// list.
#[derive(Clone, Debug)]
enum Values {
    One(String),
    Many(Vec<String>),
}

impl Values {
    fn as_slice(&self) -> &[String] {
        match self {
            Values::One(value) => slice::from_ref(value),
            Values::Many(values) => values,
        }
    }

    fn len(&self) -> usize {
        match self {
            Values::One(_) => 1,
            Values::Many(values) => values.len(),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            Values::Many(values) => values.push(value),
            Values::One(first) => {
                let first = mem::take(first);
                *self = Values::Many(vec![first, value]);
            }
        }
    }

    fn into_vec(self) -> Vec<String> {
        match self {
            Values::One(value) => vec![value],
            Values::Many(values) => values,
        }
    }
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            indices: HashTable::with_capacity(capacity),
            hasher: RandomState::new(),
            value_count: 0,
        }
    }

    /// The number of values, counting every value of a multi-valued field.
    #[must_use]
    pub fn len(&self) -> usize {
        self.value_count
    }

    /// The number of distinct fields.
    #[must_use]
    pub fn fields_len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position_of(&self, field: &HeaderField) -> Option<usize> {
        let hash = self.hasher.hash_one(field);
        self.indices.find(hash, |&index| self.entries[index].field == *field).copied()
    }

    #[must_use]
    pub fn contains_key(&self, field: &HeaderField) -> bool {
        self.position_of(field).is_some()
    }

    /// Get all values of the field, in the order they were added.
    #[must_use]
    pub fn get(&self, field: &HeaderField) -> Option<&[String]> {
        self.position_of(field).map(|index| self.entries[index].values.as_slice())
    }

    #[must_use]
    pub fn get_first(&self, field: &HeaderField) -> Option<&str> {
        self.get(field).and_then(|values| values.first()).map(String::as_str)
    }

    /// Replaces all values of the field with the given value.
    pub fn put(&mut self, name: &str, value: impl Into<String>) -> Result<(), InvalidArgument> {
        let field = HeaderField::of(name)?;
        let value = validate_value(value.into())?;
        self.put_direct(field, value);
        Ok(())
    }

    /// Adds a value to the field, keeping the existing values.
    pub fn add(&mut self, name: &str, value: impl Into<String>) -> Result<(), InvalidArgument> {
        let field = HeaderField::of(name)?;
        let value = validate_value(value.into())?;
        self.add_direct(field, value);
        Ok(())
    }

    /// Like [`Headers::put`], for a field that is already validated. The
    /// value isn't validated either: the caller must make sure it doesn't
    /// contain CR, LF or other control characters.
    pub fn put_direct(&mut self, field: HeaderField, value: impl Into<String>) {
        let value = value.into();
        match self.position_of(&field) {
            Some(index) => {
                let entry = &mut self.entries[index];
                self.value_count -= entry.values.len();
                entry.values = Values::One(value);
            }
            None => self.insert_entry(field, value),
        }
        self.value_count += 1;
    }

    /// Like [`Headers::add`], for a field that is already validated.
    pub fn add_direct(&mut self, field: HeaderField, value: impl Into<String>) {
        let value = value.into();
        match self.position_of(&field) {
            Some(index) => self.entries[index].values.push(value),
            None => self.insert_entry(field, value),
        }
        self.value_count += 1;
    }

    fn insert_entry(&mut self, field: HeaderField, value: String) {
        let Self { entries, indices, hasher, .. } = self;
        let hash = hasher.hash_one(&field);
        indices.insert_unique(hash, entries.len(), |&index| hasher.hash_one(&entries[index].field));
        entries.push(Entry { field, values: Values::One(value) });
    }

    /// Removes the field, returning its values.
    pub fn remove(&mut self, field: &HeaderField) -> Option<Vec<String>> {
        let removed = self.position_of(field)?;
        self.indices.retain(|index| {
            if *index == removed {
                return false;
            }
            if *index > removed {
                *index -= 1;
            }
            true
        });

        let entry = self.entries.remove(removed);
        self.value_count -= entry.values.len();
        Some(entry.values.into_vec())
    }

    /// Checks whether one of the comma-separated elements of the field is the
    /// given token, ignoring case, e.g. `close` in `Connection: Upgrade, close`.
    #[must_use]
    pub fn contains_token(&self, field: &HeaderField, token: &str) -> bool {
        self.get(field)
            .into_iter()
            .flatten()
            .flat_map(|value| ParameterParser::new(value, Separator::Comma))
            .any(|parameter| parameter.name.eq_ignore_ascii_case(token))
    }

    /// Visits every value, with the fields in the order they were first seen.
    pub fn for_each<F>(&self, mut visitor: F)
            where F: FnMut(&HeaderField, &str) {
        for entry in &self.entries {
            for value in entry.values.as_slice() {
                visitor(&entry.field, value);
            }
        }
    }

    /// Iterates over every (field, value) pair, in the same order as
    /// [`Headers::for_each`].
    pub fn iter(&self) -> impl Iterator<Item = (&HeaderField, &str)> + '_ {
        self.entries.iter().flat_map(|entry| {
            entry.values.as_slice().iter().map(move |value| (&entry.field, value.as_str()))
        })
    }

    /// Iterates over the fields, each with all of its values.
    pub fn fields(&self) -> impl Iterator<Item = (&HeaderField, &[String])> + '_ {
        self.entries.iter().map(|entry| (&entry.field, entry.values.as_slice()))
    }
}

fn validate_value(value: String) -> Result<String, InvalidArgument> {
    match syntax::validate_field_content(value.as_bytes()) {
        Ok(()) => Ok(value),
        Err(_) => Err(InvalidArgument::FieldValueContainsInvalidCharacters),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn field(name: &str) -> HeaderField {
        HeaderField::of(name).unwrap()
    }

    /// Field names generated by xorshift, so every run uses the same set.
    fn generated_names(count: usize) -> Vec<String> {
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789-_";
        let mut state = 0x2545_F491_4F6C_DD1D_u64;
        let mut names = Vec::with_capacity(count);
        let mut seen = std::collections::HashSet::new();
        while names.len() < count {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;

            let length = 1 + (state % 24) as usize;
            let mut seed = state;
            let name: String = (0..length)
                .map(|_| {
                    let character = ALPHABET[(seed % ALPHABET.len() as u64) as usize];
                    seed = seed.rotate_right(5) ^ 0x9E37_79B9_7F4A_7C15;
                    character as char
                })
                .collect();

            if seen.insert(name.clone()) {
                names.push(name);
            }
        }
        names
    }

    #[test]
    fn direct_scenario() {
        let mut headers = Headers::new();
        headers.put_direct(HeaderField::CONTENT_TYPE, "text/html");
        headers.add_direct(HeaderField::SET_COOKIE, "a=1");
        headers.add_direct(HeaderField::SET_COOKIE, "b=2");

        assert_eq!(headers.len(), 3);
        assert_eq!(headers.fields_len(), 2);
        assert_eq!(headers.get(&HeaderField::SET_COOKIE), Some(&["a=1".to_string(), "b=2".to_string()][..]));
        assert_eq!(headers.get_first(&HeaderField::CONTENT_TYPE), Some("text/html"));
    }

    #[test]
    fn put_replaces_in_place() {
        let mut headers = Headers::new();
        headers.put("A", "1").unwrap();
        headers.add("B", "2").unwrap();
        headers.add("b", "3").unwrap();
        headers.put("C", "4").unwrap();
        headers.put("b", "5").unwrap();

        let pairs: Vec<_> = headers.iter().map(|(field, value)| (field.as_str(), value)).collect();
        assert_eq!(pairs, vec![("a", "1"), ("b", "5"), ("c", "4")]);
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn for_each_visits_every_value_in_order() {
        let mut headers = Headers::new();
        headers.add("Via", "first").unwrap();
        headers.add("Host", "example.org").unwrap();
        headers.add("via", "second").unwrap();

        let mut visited = Vec::new();
        headers.for_each(|field, value| visited.push(format!("{field}={value}")));
        assert_eq!(visited, vec!["via=first", "via=second", "host=example.org"]);
    }

    #[test]
    fn distinct_keys_iterate_in_insertion_order() {
        let names = generated_names(50);
        let mut headers = Headers::new();
        for (index, name) in names.iter().enumerate() {
            headers.put(name, index.to_string()).unwrap();
        }

        assert_eq!(headers.fields_len(), names.len());
        let fields: Vec<_> = headers.fields().map(|(field, _)| field.as_str().to_string()).collect();
        assert_eq!(fields, names);
    }

    #[test]
    fn clone_is_independent() {
        let mut original = Headers::new();
        original.add("X-List", "1").unwrap();

        let mut copy = original.clone();
        copy.add("X-List", "2").unwrap();
        copy.put("X-Other", "3").unwrap();

        assert_eq!(original.get(&field("x-list")), Some(&["1".to_string()][..]));
        assert!(!original.contains_key(&field("x-other")));
        assert_eq!(copy.len(), 3);
    }

    #[test]
    fn remove_keeps_remaining_lookups_valid() {
        let mut headers = Headers::new();
        headers.add("A", "1").unwrap();
        headers.add("B", "2").unwrap();
        headers.add("B", "3").unwrap();
        headers.add("C", "4").unwrap();

        assert_eq!(headers.remove(&field("b")), Some(vec!["2".to_string(), "3".to_string()]));
        assert_eq!(headers.remove(&field("b")), None);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get_first(&field("a")), Some("1"));
        assert_eq!(headers.get_first(&field("c")), Some("4"));

        headers.add("D", "5").unwrap();
        let fields: Vec<_> = headers.fields().map(|(field, _)| field.as_str()).collect();
        assert_eq!(fields, vec!["a", "c", "d"]);
    }

    #[rstest]
    #[case("", "value", InvalidArgument::EmptyFieldName)]
    #[case("bad name", "value", InvalidArgument::FieldNameContainsInvalidCharacter)]
    #[case("name", "line\r\nInjected: yes", InvalidArgument::FieldValueContainsInvalidCharacters)]
    fn invalid_arguments(#[case] name: &str, #[case] value: &str, #[case] expected: InvalidArgument) {
        let mut headers = Headers::new();
        assert_eq!(headers.put(name, value), Err(expected));
        assert_eq!(headers.add(name, value), Err(expected));
        assert!(headers.is_empty());
    }

    #[rstest]
    #[case("close", "close", true)]
    #[case("Upgrade, Close", "close", true)]
    #[case("keep-alive", "close", false)]
    #[case("closed", "close", false)]
    fn contains_token(#[case] value: &str, #[case] token: &str, #[case] expected: bool) {
        let mut headers = Headers::new();
        headers.put_direct(HeaderField::CONNECTION, value);
        assert_eq!(headers.contains_token(&HeaderField::CONNECTION, token), expected);
    }

    fn check_consistency(headers: &Headers, names: &[String], stored: usize) {
        assert_eq!(headers.len(), stored);
        for (index, name) in names.iter().enumerate() {
            let field = field(name);
            if index < stored {
                assert!(headers.contains_key(&field), "missing {name}");
                assert_eq!(headers.get_first(&field), Some(index.to_string().as_str()));
                assert_eq!(headers.get(&field).map(<[String]>::len), Some(1));
            } else {
                assert!(!headers.contains_key(&field), "unexpected {name}");
                assert_eq!(headers.get(&field), None);
            }
        }
    }

    #[test]
    fn many_generated_names() {
        let names = generated_names(20000);
        let mut headers = Headers::new();

        check_consistency(&headers, &names[..100], 0);
        for (index, name) in names.iter().enumerate() {
            headers.put_direct(field(name), index.to_string());
        }
        check_consistency(&headers, &names, names.len());
    }

    #[test]
    fn many_generated_names_in_fragments() {
        let names = generated_names(20000);
        for fragment in names.chunks(10) {
            let mut headers = Headers::with_capacity(2);
            check_consistency(&headers, fragment, 0);
            for (index, name) in fragment.iter().enumerate() {
                headers.put_direct(field(name), index.to_string());
                check_consistency(&headers, fragment, index + 1);
            }
        }
    }
}
