//! Construction parameters.
//!
//! An ordered list of `(name, value)` pairs handed to construction. Order
//! is kept; a later entry for the same property wins when the runtime
//! applies them.

use objbridge_rt::param::canonical_name;
use objbridge_rt::{ToValue, Value};

/// Ordered construct-time property values.
///
/// # Example
///
/// ```rust
/// use objbridge::ConstructParams;
///
/// let params = ConstructParams::new().with("age", 5i32).with("name", "Ada");
/// assert_eq!(params.len(), 2);
/// assert_eq!(params.get("age").and_then(|v| v.get::<i32>()), Some(5));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstructParams {
    entries: Vec<(String, Value)>,
}

impl ConstructParams {
    #[must_use]
    pub fn new() -> Self {
        ConstructParams::default()
    }

    /// Appends an entry, builder style.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl ToValue) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: &str, value: impl ToValue) {
        self.entries.push((name.to_string(), value.to_value()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the last value given for `name`. `-` and `_` are interchangeable.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let name = canonical_name(name);
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| canonical_name(n) == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Borrowed form accepted by the runtime's construction entry points.
    pub fn to_raw(&self) -> Vec<(&str, Value)> {
        self.entries
            .iter()
            .map(|(n, v)| (n.as_str(), v.clone()))
            .collect()
    }
}

impl<S: AsRef<str>> FromIterator<(S, Value)> for ConstructParams {
    fn from_iter<I: IntoIterator<Item = (S, Value)>>(iter: I) -> Self {
        ConstructParams {
            entries: iter
                .into_iter()
                .map(|(n, v)| (n.as_ref().to_string(), v))
                .collect(),
        }
    }
}

impl<S: AsRef<str>> Extend<(S, Value)> for ConstructParams {
    fn extend<I: IntoIterator<Item = (S, Value)>>(&mut self, iter: I) {
        self.entries
            .extend(iter.into_iter().map(|(n, v)| (n.as_ref().to_string(), v)));
    }
}
