use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    artifact::Fetch,
    error::Error,
    names::{PackageName, normalize_name},
    raw::RawRecord,
    version::canonical_version,
};

/// Descriptive metadata carried through to the emitter untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, Value>);

impl Metadata {
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default)]
    pub setup: Vec<String>,
    #[serde(default)]
    pub install: Vec<String>,
    #[serde(default)]
    pub test: Vec<String>,
    /// Conditional requirements grouped by `extra`, `extra:marker` or `:marker`.
    #[serde(default)]
    pub extras: BTreeMap<String, Vec<String>>,
}

impl Requirements {
    /// Requirements activated by `extra`, across every group keyed by it.
    pub fn for_extra<'a>(&'a self, extra: &str) -> impl Iterator<Item = &'a String> + use<'a> {
        let extra = normalize_name(extra);
        self.extras
            .iter()
            .filter(move |(key, _)| {
                let name = key.split_once(':').map_or(key.as_str(), |(name, _)| name);
                !name.is_empty() && normalize_name(name) == extra
            })
            .flat_map(|(_, reqs)| reqs.iter())
    }
}

/// Canonical metadata for one resolved package version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: PackageName,
    pub version: String,
    #[serde(rename = "fetchurl")]
    pub fetch: Fetch,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub requirements: Requirements,
}

impl PackageRecord {
    /// `(name, canonical version)`, comparable with [`crate::ArtifactRef::key`].
    pub fn key(&self) -> (PackageName, String) {
        (self.name.clone(), canonical_version(&self.version))
    }

    /// `name==version`, as written to a frozen requirements listing.
    pub fn pin(&self) -> String {
        format!("{}=={}", self.name, self.version)
    }

    /// Accept either a canonical record or a raw evaluator record.
    pub fn from_value(value: Value) -> Result<Self, Error> {
        let is_raw = value
            .as_object()
            .is_some_and(|obj| obj.contains_key("options") || obj.contains_key("requires_dist"));
        if is_raw {
            let raw: RawRecord = serde_json::from_value(value)?;
            raw.normalize(None)
        } else {
            Ok(serde_json::from_value(value)?)
        }
    }
}
