
pub mod backend;
mod frontend;

use std::{collections::BTreeMap, sync::Arc};

use miette::Diagnostic;
use pydex_evaluator::Evaluate;
use pydex_locator::Locate;
use pydex_metadata::{PackageName, PackageRecord, canonical_version, normalize_name};

pub use frontend::{FailurePolicy, Progress, ProgressFn, Resolution, ResolveOptions, Skipped};

#[derive(Debug, thiserror::Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to locate `{requirement}`")]
    #[diagnostic(code(index::locate_failed))]
    Locate {
        requirement: String,
        #[source]
        #[diagnostic_source]
        source: pydex_locator::Error,
    },
    #[error(transparent)]
    #[diagnostic(transparent)]
    Evaluate(#[from] pydex_evaluator::Error),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Metadata(#[from] pydex_metadata::Error),
}

/// Every resolved record, keyed by normalized name and canonical version.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Index {
    packages: BTreeMap<PackageName, BTreeMap<String, PackageRecord>>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record` unless one with the same name and version is present.
    /// Returns whether the record was new.
    pub fn insert(&mut self, record: PackageRecord) -> bool {
        let (name, version) = record.key();
        let versions = self.packages.entry(name).or_default();
        if versions.contains_key(&version) {
            return false;
        }
        versions.insert(version, record);
        true
    }

    pub fn get(&self, name: &str, version: &str) -> Option<&PackageRecord> {
        self.packages
            .get(normalize_name(name).as_str())?
            .get(&canonical_version(version))
    }

    pub fn contains(&self, name: &str, version: &str) -> bool {
        self.get(name, version).is_some()
    }

    pub fn packages(&self) -> &BTreeMap<PackageName, BTreeMap<String, PackageRecord>> {
        &self.packages
    }

    /// Records ordered by name, then version.
    pub fn records(&self) -> impl Iterator<Item = &PackageRecord> {
        self.packages.values().flat_map(BTreeMap::values)
    }

    pub fn len(&self) -> usize {
        self.packages.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// `name==version` lines in index order.
    pub fn frozen(&self) -> Vec<String> {
        self.records().map(PackageRecord::pin).collect()
    }
}

#[derive(Clone)]
pub struct Indexer {
    locator: Arc<dyn Locate>,
    evaluator: Arc<dyn Evaluate>,
}

impl Indexer {
    pub fn new(locator: Arc<dyn Locate>, evaluator: Arc<dyn Evaluate>) -> Self {
        Self { locator, evaluator }
    }

    /// Resolve the dependency closure of `roots`.
    pub async fn resolve<I, S>(&self, roots: I, opts: ResolveOptions) -> Result<Resolution, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roots = roots.into_iter().map(Into::into).collect();
        frontend::resolve_closure(&*self.locator, &*self.evaluator, roots, &opts).await
    }
}
