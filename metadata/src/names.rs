use std::{borrow::Borrow, fmt, str::FromStr, sync::Arc};

use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::error::Error;

/// Normalize a project or extra name: lowercase, with runs of `-`, `_` and `.`
/// collapsed into a single `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('-');
        }
        pending_sep = false;
        out.push(c.to_ascii_lowercase());
    }
    out
}

pub(crate) fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// A package name in its normalized form, suitable as an index key.
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct PackageName(Arc<str>);

impl PackageName {
    pub fn new(name: &str) -> Result<Self, Error> {
        let trimmed = name.trim();
        let valid = !trimmed.is_empty()
            && trimmed.chars().all(is_name_char)
            && trimmed.starts_with(|c: char| c.is_ascii_alphanumeric())
            && trimmed.ends_with(|c: char| c.is_ascii_alphanumeric());
        if !valid {
            return Err(Error::InvalidPackageName(name.to_string()));
        }
        Ok(Self(Arc::from(normalize_name(trimmed))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PackageName {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::new(input)
    }
}

impl TryFrom<&str> for PackageName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_separators() {
        assert_eq!(normalize_name("Foo.Bar__baz"), "foo-bar-baz");
        assert_eq!(normalize_name("zope.interface"), "zope-interface");
        assert_eq!(PackageName::new("PyYAML").unwrap().as_str(), "pyyaml");
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(PackageName::new("").is_err());
        assert!(PackageName::new("-leading").is_err());
        assert!(PackageName::new("has space").is_err());
    }
}
