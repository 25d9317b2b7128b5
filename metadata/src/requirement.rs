use std::{fmt, str::FromStr};

use crate::{
    error::Error,
    marker::MarkerTree,
    names::{PackageName, is_name_char, normalize_name},
    version::SpecifierSet,
};

/// A parsed requirement string: `name[extras] specifiers ; marker` or `name @ url`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requirement {
    pub name: PackageName,
    pub extras: Vec<String>,
    pub specifier: SpecifierSet,
    pub url: Option<String>,
    pub marker: Option<MarkerTree>,
}

impl Requirement {
    pub fn parse(input: &str) -> Result<Self, Error> {
        let malformed = |message: String| Error::MalformedRequirement {
            requirement: input.to_string(),
            message,
        };

        let (body, marker) = match input.split_once(';') {
            Some((body, marker)) => (body, Some(marker.trim())),
            None => (input, None),
        };
        let body = body.trim();
        // `#egg=` and VCS fragments take no part in selection.
        let body = if body.contains('@') {
            body
        } else {
            body.split_once('#').map_or(body, |(head, _)| head).trim_end()
        };

        let name_len = body
            .find(|c: char| !is_name_char(c))
            .unwrap_or(body.len());
        let (name, mut rest) = body.split_at(name_len);
        if name.is_empty() {
            return Err(malformed("missing package name".to_string()));
        }
        let name = PackageName::new(name).map_err(|err| malformed(err.to_string()))?;

        rest = rest.trim_start();
        let mut extras = Vec::new();
        if let Some(after) = rest.strip_prefix('[') {
            let Some((inner, after)) = after.split_once(']') else {
                return Err(malformed("unclosed `[` in extras".to_string()));
            };
            for extra in inner.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                if !extra.chars().all(is_name_char) {
                    return Err(malformed(format!("invalid extra `{extra}`")));
                }
                extras.push(normalize_name(extra));
            }
            extras.sort();
            extras.dedup();
            rest = after.trim_start();
        }

        let mut url = None;
        let mut specifier = SpecifierSet::default();
        if let Some(target) = rest.strip_prefix('@') {
            let target = target.trim();
            if target.is_empty() {
                return Err(malformed("missing URL after `@`".to_string()));
            }
            url = Some(target.to_string());
        } else {
            let spec = rest
                .strip_prefix('(')
                .and_then(|inner| inner.strip_suffix(')'))
                .unwrap_or(rest);
            specifier = SpecifierSet::parse(spec).map_err(|err| malformed(err.to_string()))?;
        }

        let marker = match marker {
            Some(text) if !text.is_empty() => {
                Some(MarkerTree::parse(text).map_err(|err| malformed(err.to_string()))?)
            }
            _ => None,
        };

        Ok(Self {
            name,
            extras,
            specifier,
            url,
            marker,
        })
    }

    pub fn without_marker(&self) -> Self {
        Self {
            marker: None,
            ..self.clone()
        }
    }
}

impl FromStr for Requirement {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name.as_str())?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        match &self.url {
            Some(url) => write!(f, " @ {url}")?,
            None => write!(f, "{}", self.specifier)?,
        }
        if let Some(marker) = &self.marker {
            write!(f, "; {marker}")?;
        }
        Ok(())
    }
}
