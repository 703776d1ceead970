// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use indexmap::IndexMap;
use smol_str::SmolStr;

/// Ordered `key -> optional value` mapping used for URI parameters, URI
/// headers, Via parameters, and address header parameters.
///
/// Insertion order is preserved for wire emission. Values are stored
/// unquoted; quoting is a wire-format concern handled by the parser.
/// Keys that are case-insensitive on the wire (URI and Via parameters) are
/// lowercased before insertion by their parsers, so lookups here are exact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    inner: IndexMap<SmolStr, Option<SmolStr>>,
}

impl Params {
    /// Creates an empty parameter map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a parameter. `None` denotes a valueless key.
    pub fn insert(&mut self, key: impl Into<SmolStr>, value: Option<SmolStr>) {
        self.inner.insert(key.into(), value);
    }

    /// Returns the stored value for `key`, if the key is present.
    ///
    /// The outer `Option` distinguishes "absent" from "present without a
    /// value" (the inner `None`).
    pub fn get(&self, key: &str) -> Option<&Option<SmolStr>> {
        self.inner.get(key)
    }

    /// Returns the value of `key` when it is present with a value.
    pub fn value_of(&self, key: &str) -> Option<&SmolStr> {
        self.inner.get(key).and_then(|v| v.as_ref())
    }

    /// Returns `true` if `key` is present, with or without a value.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Removes a parameter, returning whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.inner.shift_remove(key).is_some()
    }

    /// Number of parameters stored.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` when no parameters are stored.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates over parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&SmolStr, &Option<SmolStr>)> {
        self.inner.iter()
    }

    /// Serializes the map as `key[=value]` pairs joined by `sep`, with no
    /// leading separator.
    pub fn serialize_with(&self, sep: char) -> String {
        let mut out = String::new();
        for (idx, (key, value)) in self.inner.iter().enumerate() {
            if idx > 0 {
                out.push(sep);
            }
            out.push_str(key);
            if let Some(value) = value {
                out.push('=');
                out.push_str(value);
            }
        }
        out
    }
}

impl fmt::Display for Params {
    /// Semicolon-joined form, the separator used everywhere except URI
    /// headers.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize_with(';'))
    }
}

impl FromIterator<(SmolStr, Option<SmolStr>)> for Params {
    fn from_iter<T: IntoIterator<Item = (SmolStr, Option<SmolStr>)>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_insertion_order() {
        let mut params = Params::new();
        params.insert("branch", Some(SmolStr::new("z9hG4bK-1")));
        params.insert("lr", None);
        params.insert("ttl", Some(SmolStr::new("70")));

        assert_eq!(params.serialize_with(';'), "branch=z9hG4bK-1;lr;ttl=70");
    }

    #[test]
    fn distinguishes_absent_from_valueless() {
        let mut params = Params::new();
        params.insert("lr", None);

        assert!(params.contains_key("lr"));
        assert_eq!(params.get("lr"), Some(&None));
        assert_eq!(params.get("missing"), None);
        assert_eq!(params.value_of("lr"), None);
    }

    #[test]
    fn equality_ignores_order() {
        let a: Params = [
            (SmolStr::new("a"), Some(SmolStr::new("1"))),
            (SmolStr::new("b"), None),
        ]
        .into_iter()
        .collect();
        let b: Params = [
            (SmolStr::new("b"), None),
            (SmolStr::new("a"), Some(SmolStr::new("1"))),
        ]
        .into_iter()
        .collect();

        assert_eq!(a, b);
    }

    #[test]
    fn uri_header_separator() {
        let mut params = Params::new();
        params.insert("subject", Some(SmolStr::new("project")));
        params.insert("priority", Some(SmolStr::new("urgent")));

        assert_eq!(
            params.serialize_with('&'),
            "subject=project&priority=urgent"
        );
    }
}
