//! Filter contexts: the conjunction of brushes applied to an aggregate

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::dimension::Interval;

/// Mapping from dimension name to a half-open interval.
///
/// A dimension without an entry is unfiltered. Entries are kept ordered so
/// two contexts with the same brushes compare equal and render identical SQL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterContext {
    brushes: BTreeMap<String, Interval>,
}

impl FilterContext {
    /// Unfiltered context
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with<S: Into<String>>(mut self, dimension: S, interval: Interval) -> Self {
        self.brushes.insert(dimension.into(), interval);
        self
    }

    pub fn insert<S: Into<String>>(
        &mut self,
        dimension: S,
        interval: Interval,
    ) -> Option<Interval> {
        self.brushes.insert(dimension.into(), interval)
    }

    pub fn remove(&mut self, dimension: &str) -> Option<Interval> {
        self.brushes.remove(dimension)
    }

    pub fn get(&self, dimension: &str) -> Option<&Interval> {
        self.brushes.get(dimension)
    }

    pub fn constrains(&self, dimension: &str) -> bool {
        self.brushes.contains_key(dimension)
    }

    pub fn is_empty(&self) -> bool {
        self.brushes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.brushes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Interval)> {
        self.brushes.iter().map(|(name, interval)| (name.as_str(), interval))
    }

    /// Copy of this context with the given dimensions removed
    pub fn without<'a, I>(&self, dimensions: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut context = self.clone();
        for dimension in dimensions {
            context.brushes.remove(dimension);
        }
        context
    }
}

impl fmt::Display for FilterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.brushes.is_empty() {
            return write!(f, "{{}}");
        }
        let parts: Vec<String> = self
            .brushes
            .iter()
            .map(|(name, interval)| format!("{}: {}", name, interval))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}
