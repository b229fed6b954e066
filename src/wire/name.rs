//! Management-bean resource names.
//!
//! A name has the canonical form `domain:key=value,key2=value2`. Names may
//! also be patterns (`*` / `?` wildcards) when used in queries. The wire
//! codec compresses repeated names per connection via a reference table,
//! which is why equality and hashing work on the canonical text.

use std::fmt;

use crate::error::{BeanwireError, Result};

/// A validated management-bean resource name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BeanName {
    canonical: String,
    colon: usize,
}

impl BeanName {
    /// Parse a name of the form `domain:key=value,...`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the text has no domain separator or an empty
    /// property list.
    pub fn parse(text: &str) -> Result<Self> {
        let colon = text
            .find(':')
            .ok_or_else(|| BeanwireError::Config(format!("bean name has no domain separator: {text:?}")))?;
        let props = &text[colon + 1..];
        if props.is_empty() {
            return Err(BeanwireError::Config(format!(
                "bean name has no properties: {text:?}"
            )));
        }
        Ok(Self {
            canonical: text.to_string(),
            colon,
        })
    }

    /// The full canonical text.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// The domain part (before the colon). Empty means the default domain.
    pub fn domain(&self) -> &str {
        &self.canonical[..self.colon]
    }

    /// The property list part (after the colon).
    pub fn properties(&self) -> &str {
        &self.canonical[self.colon + 1..]
    }

    /// True if this name contains query wildcards.
    pub fn is_pattern(&self) -> bool {
        self.canonical.contains('*') || self.canonical.contains('?')
    }

    /// Look up a single property value.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties().split(',').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key).then_some(v)
        })
    }
}

impl fmt::Display for BeanName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl std::str::FromStr for BeanName {
    type Err = BeanwireError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
