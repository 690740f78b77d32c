//! Equality filters for bucket queries.

use crate::value::{Record, Value};

/// A conjunction of field equality terms.
///
/// Terms keep insertion order: the first term whose field carries a secondary
/// index selects the candidate set, the remaining terms are applied as
/// post-filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    terms: Vec<(String, Value)>,
}

impl Filter {
    /// Create an empty filter (matches every record).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality term.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.push((field.into(), value.into()));
        self
    }

    /// Whether the filter has no terms.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// The terms in insertion order.
    pub fn terms(&self) -> &[(String, Value)] {
        &self.terms
    }

    /// Check a record against every term. Equality is strict: the stored
    /// value must exist and match in both type and value; an absent field
    /// never matches, not even against null.
    pub fn matches(&self, record: &Record) -> bool {
        self.terms
            .iter()
            .all(|(field, expected)| record.get(field) == Some(expected))
    }

    /// Check a record against every term except the one at `skip`.
    pub(crate) fn matches_excluding(&self, record: &Record, skip: usize) -> bool {
        self.terms
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != skip)
            .all(|(_, (field, expected))| record.get(field) == Some(expected))
    }
}

impl<S: Into<String>, V: Into<Value>> FromIterator<(S, V)> for Filter {
    fn from_iter<T: IntoIterator<Item = (S, V)>>(iter: T) -> Self {
        Self {
            terms: iter
                .into_iter()
                .map(|(field, value)| (field.into(), value.into()))
                .collect(),
        }
    }
}
