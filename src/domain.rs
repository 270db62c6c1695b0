use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GrabError;

/// One retrievable unit of a dataset: an ordered tuple holding one value per
/// declared replacement.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Element(Vec<String>);

impl Element {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Values paired with their replacement names, in declaration order.
    pub fn named<'a>(
        &'a self,
        replacements: &'a [String],
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        replacements
            .iter()
            .map(String::as_str)
            .zip(self.0.iter().map(String::as_str))
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}

impl FromStr for Element {
    type Err = GrabError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let values = value
            .split(',')
            .map(|part| part.trim().to_string())
            .collect::<Vec<_>>();
        let is_valid = values
            .iter()
            .all(|part| !part.is_empty() && !part.contains('/') && !has_wildcard(part));
        if !is_valid {
            return Err(GrabError::InvalidElement(value.to_string()));
        }
        Ok(Self(values))
    }
}

impl From<Vec<String>> for Element {
    fn from(values: Vec<String>) -> Self {
        Self(values)
    }
}

/// Characters that make a template segment match more than one path.
pub const WILDCARDS: [char; 3] = ['*', '?', '['];

pub fn has_wildcard(value: &str) -> bool {
    value.contains(WILDCARDS)
}
