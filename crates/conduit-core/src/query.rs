//! Multi-valued query parameters.

use indexmap::IndexMap;

use crate::error::{ConduitError, ConduitResult};

/// Query parameters, preserving insertion order of values per name.
///
/// Names are compared exactly (query names are case-sensitive).
///
/// # Example
///
/// ```
/// use conduit_core::QueryParams;
///
/// let mut query = QueryParams::new();
/// query.add("tag", "a").add("tag", "b").set("page", "2");
///
/// assert_eq!(query.all("tag"), ["a", "b"]);
/// assert_eq!(query.get("page"), Some("2"));
/// assert_eq!(query.encode(), "tag=a&tag=b&page=2");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    entries: IndexMap<String, Vec<String>>,
}

impl QueryParams {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an `application/x-www-form-urlencoded` query string.
    pub fn parse(raw: &str) -> ConduitResult<Self> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(raw).map_err(|e| {
            ConduitError::invalid_request(format!("malformed query string '{raw}': {e}"))
        })?;
        let mut query = Self::new();
        for (name, value) in pairs {
            query.add(name, value);
        }
        Ok(query)
    }

    /// Appends a value for `name`.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.entry(name.into()).or_default().push(value.into());
        self
    }

    /// Replaces all values for `name` with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(name.into(), vec![value.into()]);
        self
    }

    /// Removes all values for `name`, returning them.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.entries.shift_remove(name)
    }

    /// Returns the first value for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns all values for `name` in insertion order.
    #[must_use]
    pub fn all(&self, name: &str) -> &[String] {
        self.entries.get(name).map_or(&[], Vec::as_slice)
    }

    /// Returns `true` if `name` has at least one value.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Returns `true` if there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of distinct names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterates over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    /// Encodes the parameters as a query string without the leading `?`.
    #[must_use]
    pub fn encode(&self) -> String {
        let pairs: Vec<(&str, &str)> = self.iter().collect();
        serde_urlencoded::to_string(pairs).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_multi_valued() {
        let query = QueryParams::parse("a=1&b=2&a=3").unwrap();
        assert_eq!(query.all("a"), ["1", "3"]);
        assert_eq!(query.get("b"), Some("2"));
        assert_eq!(query.len(), 2);
    }

    #[test]
    fn test_parse_decodes_escapes() {
        let query = QueryParams::parse("q=hello+world&x=%2F").unwrap();
        assert_eq!(query.get("q"), Some("hello world"));
        assert_eq!(query.get("x"), Some("/"));
    }

    #[test]
    fn test_set_replaces() {
        let mut query = QueryParams::new();
        query.add("a", "1").add("a", "2").set("a", "3");
        assert_eq!(query.all("a"), ["3"]);
    }

    #[test]
    fn test_remove() {
        let mut query = QueryParams::new();
        query.add("a", "1");
        assert_eq!(query.remove("a"), Some(vec!["1".to_string()]));
        assert!(query.is_empty());
        assert!(query.all("a").is_empty());
    }

    proptest! {
        #[test]
        fn prop_encode_parse_preserves_per_key_order(
            pairs in proptest::collection::vec(("[a-c]{1,2}", "[ -~]{0,8}"), 0..12)
        ) {
            let mut query = QueryParams::new();
            for (name, value) in &pairs {
                query.add(name.clone(), value.clone());
            }
            let parsed = QueryParams::parse(&query.encode()).unwrap();
            for (name, _) in &pairs {
                prop_assert_eq!(parsed.all(name), query.all(name));
            }
        }
    }
}
