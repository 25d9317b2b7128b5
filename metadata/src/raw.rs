use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::{
    artifact::{ArtifactRef, Fetch},
    error::Error,
    names::{PackageName, normalize_name},
    record::{Metadata, PackageRecord, Requirements},
    requirement::Requirement,
};

/// Metadata keys that fall back to an older spelling when absent.
const METADATA_ALIASES: [(&str, &str); 2] = [("url", "home_page"), ("description", "summary")];

/// A record as produced by an evaluator, before normalization.
///
/// Two styles are accepted: setuptools style, where requirement lists live under
/// `options`, and wheel style, where `requires_dist` carries every requirement
/// with its environment marker.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, rename = "fetchurl")]
    pub fetch: Option<Fetch>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub options: RawOptions,
    #[serde(default, deserialize_with = "lines_or_list")]
    pub requires_dist: Vec<String>,
    /// Set by evaluators that report per-artifact failures inline.
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawOptions {
    #[serde(default, deserialize_with = "lines_or_list")]
    pub setup_requires: Vec<String>,
    #[serde(default, deserialize_with = "lines_or_list")]
    pub install_requires: Vec<String>,
    #[serde(default, deserialize_with = "lines_or_list")]
    pub tests_require: Vec<String>,
    #[serde(default)]
    pub extras_require: BTreeMap<String, RequirementList>,
}

#[derive(Clone, Debug, Default)]
pub struct RequirementList(pub Vec<String>);

impl<'de> Deserialize<'de> for RequirementList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        lines_or_list(deserializer).map(Self)
    }
}

/// setuptools accepts requirement lists as a newline separated string too.
fn lines_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(text) => Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(text) => Ok(text.trim().to_string()),
                other => Err(serde::de::Error::custom(format!(
                    "requirement must be a string, got {other}"
                ))),
            })
            .collect(),
        other => Err(serde::de::Error::custom(format!(
            "expected a requirement list, got {other}"
        ))),
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

impl RawRecord {
    /// Normalize into a [`PackageRecord`]. `artifact` fills in the name, version
    /// and fetch block when the evaluator did not echo them back.
    pub fn normalize(self, artifact: Option<&ArtifactRef>) -> Result<PackageRecord, Error> {
        let metadata = normalize_metadata(self.metadata);

        let name = self
            .name
            .or_else(|| metadata.get_str("name").map(str::to_string))
            .or_else(|| artifact.map(|a| a.name.clone()))
            .ok_or(Error::MissingField { field: "name" })?;
        let name = PackageName::new(&name)?;

        let version = self
            .version
            .or_else(|| metadata.get_str("version").map(str::to_string))
            .or_else(|| artifact.map(|a| a.version.clone()))
            .ok_or(Error::MissingField { field: "version" })?;

        let fetch = self
            .fetch
            .or_else(|| artifact.map(|a| a.fetch.clone()))
            .ok_or_else(|| Error::MissingFetch {
                name: name.to_string(),
            })?;

        let mut requirements = Requirements::default();
        sort_by_marker(
            self.options.setup_requires,
            &mut requirements.setup,
            &mut requirements.extras,
        )?;
        sort_by_marker(
            self.options.install_requires,
            &mut requirements.install,
            &mut requirements.extras,
        )?;
        sort_by_marker(
            self.options.tests_require,
            &mut requirements.test,
            &mut requirements.extras,
        )?;
        for (key, reqs) in self.options.extras_require {
            let key = match key.split_once(':') {
                Some((extra, marker)) => format!("{}:{}", normalize_name(extra), marker.trim()),
                None => normalize_name(&key),
            };
            requirements.extras.entry(key).or_default().extend(compact_all(reqs.0));
        }

        for entry in &self.requires_dist {
            let req = Requirement::parse(entry)?;
            match &req.marker {
                None => requirements.install.push(req.to_string()),
                Some(marker) => requirements
                    .extras
                    .entry(marker.group_key())
                    .or_default()
                    .push(req.without_marker().to_string()),
            }
        }

        Ok(PackageRecord {
            name,
            version,
            fetch,
            metadata,
            requirements,
        })
    }
}

/// Keep unconditional entries in `unconditional`; entries with a marker move to
/// the extras group their marker selects.
fn sort_by_marker(
    entries: Vec<String>,
    unconditional: &mut Vec<String>,
    extras: &mut BTreeMap<String, Vec<String>>,
) -> Result<(), Error> {
    for entry in entries {
        let body = match entry.split_once(';') {
            Some((body, marker)) if !marker.trim().is_empty() => body,
            Some((body, _)) => {
                unconditional.push(compact(body));
                continue;
            }
            None => {
                unconditional.push(compact(&entry));
                continue;
            }
        };
        match Requirement::parse(&entry)?.marker {
            Some(marker) => extras.entry(marker.group_key()).or_default().push(compact(body)),
            None => unconditional.push(compact(body)),
        }
    }
    Ok(())
}

/// Drop whitespace from the requirement part of each entry. Markers keep theirs,
/// `and`/`or` need it.
fn compact_all(entries: Vec<String>) -> Vec<String> {
    entries
        .into_iter()
        .map(|entry| match entry.split_once(';') {
            Some((body, marker)) if !marker.trim().is_empty() => {
                format!("{}; {}", compact(body), marker.trim())
            }
            Some((body, _)) => compact(body),
            None => compact(&entry),
        })
        .collect()
}

fn compact(body: &str) -> String {
    body.split_whitespace().collect()
}

fn normalize_metadata(mut fields: Map<String, Value>) -> Metadata {
    for (key, alias) in METADATA_ALIASES {
        let missing = fields.get(key).is_none_or(is_empty_value);
        if missing && let Some(value) = fields.remove(alias) {
            fields.insert(key.to_string(), value);
        }
    }
    Metadata::new(
        fields
            .into_iter()
            .filter(|(_, value)| !is_empty_value(value))
            .collect(),
    )
}
