//! Exact-match label selectors.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Conjunction of `key=value` terms.
///
/// An empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    terms: BTreeMap<String, String>,
}

impl Selector {
    /// Selector matching every object
    pub fn everything() -> Self {
        Self::default()
    }

    /// Selector with a single `key=value` term
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::default().and(key, value)
    }

    /// Adds a `key=value` term
    #[must_use]
    pub fn and(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.terms.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// True when every term is present in `labels` with the same value
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.terms
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }
}

impl FromStr for Selector {
    type Err = Error;

    /// Parses `a=b,c==d`. Set-based and existence terms are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut selector = Selector::default();
        for term in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = term
                .split_once("==")
                .or_else(|| term.split_once('='))
                .ok_or_else(|| Error::InvalidSelector {
                    selector: s.to_string(),
                    reason: format!("term '{term}' is not of the form key=value"),
                })?;
            let key = key.trim();
            if key.is_empty() || key.ends_with('!') {
                return Err(Error::InvalidSelector {
                    selector: s.to_string(),
                    reason: format!("term '{term}' has an unsupported key"),
                });
            }
            selector = selector.and(key, value.trim());
        }
        Ok(selector)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.terms {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}
