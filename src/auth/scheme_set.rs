// src/auth/scheme_set.rs

use std::collections::BTreeSet;

use super::challenge::normalize_scheme;

/// A set of normalized (lowercase token) scheme names.
///
/// Used by controllers for the schemes disabled in the current transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemeSet {
    schemes: BTreeSet<String>,
}

impl SchemeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a scheme. Returns `false` if it was already present.
    pub fn insert(&mut self, scheme: &str) -> bool {
        debug_assert_eq!(
            normalize_scheme(scheme).as_deref(),
            Some(scheme),
            "scheme names must be normalized before insertion"
        );
        self.schemes.insert(scheme.to_owned())
    }

    pub fn contains(&self, scheme: &str) -> bool {
        self.schemes.contains(scheme)
    }

    pub fn remove(&mut self, scheme: &str) -> bool {
        self.schemes.remove(scheme)
    }

    pub fn len(&self) -> usize {
        self.schemes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemes.is_empty()
    }

    pub fn clear(&mut self) {
        self.schemes.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.schemes.iter().map(String::as_str)
    }
}

impl<'a> FromIterator<&'a str> for SchemeSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut set = SchemeSet::new();
        for scheme in iter {
            set.insert(scheme);
        }
        set
    }
}
