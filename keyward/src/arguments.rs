use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// An ordered set of request arguments, such as scopes, audiences or grant types
///
/// Values are kept in insertion order and duplicates are dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
#[must_use]
pub struct Arguments(Vec<String>);

impl Arguments {
    /// An empty set of arguments
    #[inline]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Parses a space-delimited parameter value, such as `scope`
    pub fn from_space_delimited(value: &str) -> Self {
        value.split_whitespace().collect()
    }

    /// Adds a value, ignoring it if already present
    pub fn push(&mut self, value: impl Into<String>) {
        let value = value.into();
        if !self.0.contains(&value) {
            self.0.push(value);
        }
    }

    /// Whether every one of `items` is present
    #[must_use]
    pub fn has_all(&self, items: &[&str]) -> bool {
        items.iter().all(|i| self.has(i))
    }

    /// Whether `item` is present
    #[must_use]
    pub fn has(&self, item: &str) -> bool {
        self.0.iter().any(|v| v == item)
    }

    /// Whether at least one of `items` is present
    #[must_use]
    pub fn has_one_of(&self, items: &[&str]) -> bool {
        items.iter().any(|i| self.has(i))
    }

    /// Whether `item` is the one and only value
    #[must_use]
    pub fn exact_one(&self, item: &str) -> bool {
        self.0.len() == 1 && self.0[0] == item
    }

    /// Whether this set holds exactly `items`, irrespective of order
    #[must_use]
    pub fn matches(&self, items: &[&str]) -> bool {
        self.0.len() == items.len() && self.has_all(items)
    }

    /// Whether the set is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of values held
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the values in insertion order
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for v in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(v)?;
            first = false;
        }
        Ok(())
    }
}

impl<S: Into<String>> FromIterator<S> for Arguments {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut args = Self::new();
        args.extend(iter);
        args
    }
}

impl<S: Into<String>> Extend<S> for Arguments {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for v in iter {
            self.push(v);
        }
    }
}

impl From<Vec<String>> for Arguments {
    #[inline]
    fn from(values: Vec<String>) -> Self {
        values.into_iter().collect()
    }
}

impl From<Arguments> for Vec<String> {
    #[inline]
    fn from(args: Arguments) -> Self {
        args.0
    }
}

impl<'a> IntoIterator for &'a Arguments {
    type Item = &'a str;
    type IntoIter = std::iter::Map<std::slice::Iter<'a, String>, fn(&String) -> &str>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        let as_str: fn(&String) -> &str = String::as_str;
        self.0.iter().map(as_str)
    }
}

/// Serializes arguments as a single space-delimited string
pub(crate) fn serialize_space_delimited<S: Serializer>(
    args: &Arguments,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(args)
}
