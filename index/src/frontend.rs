use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use futures::stream::StreamExt;
use pydex_evaluator::{Evaluate, associate};
use pydex_locator::Locate;
use pydex_metadata::{ArtifactRef, PackageName, Requirement, normalize_name};

use crate::{Error, Index};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FailurePolicy {
    /// The first failed lookup aborts the run.
    #[default]
    Strict,
    /// Failed lookups are logged and reported in [`Resolution::skipped`].
    /// Evaluator failures still abort.
    Lenient,
}

/// Reported once per completed iteration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Progress {
    pub records: usize,
    pub iteration: usize,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>2}/{:>2}] building index...", self.records, self.iteration)
    }
}

pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

#[derive(Clone)]
pub struct ResolveOptions {
    /// Follow requirements past the roots' own dependencies.
    pub recurse: bool,
    pub include_test_requirements: bool,
    /// Requirement strings that are never located.
    pub skip: BTreeSet<String>,
    /// Extras followed for every package.
    pub extras: BTreeSet<String>,
    pub max_concurrency: usize,
    pub failure_policy: FailurePolicy,
    pub progress: Option<ProgressFn>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            recurse: true,
            include_test_requirements: true,
            skip: BTreeSet::new(),
            extras: BTreeSet::new(),
            max_concurrency: 16,
            failure_policy: FailurePolicy::Strict,
            progress: None,
        }
    }
}

impl fmt::Debug for ResolveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveOptions")
            .field("recurse", &self.recurse)
            .field("include_test_requirements", &self.include_test_requirements)
            .field("skip", &self.skip)
            .field("extras", &self.extras)
            .field("max_concurrency", &self.max_concurrency)
            .field("failure_policy", &self.failure_policy)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// A requirement dropped under [`FailurePolicy::Lenient`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Skipped {
    pub requirement: String,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct Resolution {
    pub index: Index,
    pub iterations: usize,
    pub skipped: Vec<Skipped>,
}

/// Without recursion only the roots and their direct requirements are resolved.
const SINGLE_PASS_LAYERS: usize = 2;

pub(crate) async fn resolve_closure(
    locator: &dyn Locate,
    evaluator: &dyn Evaluate,
    roots: Vec<String>,
    opts: &ResolveOptions,
) -> Result<Resolution, Error> {
    let max_concurrency = opts.max_concurrency.max(1);
    let layer_limit = (!opts.recurse).then_some(SINGLE_PASS_LAYERS);
    let global_extras: BTreeSet<String> = opts.extras.iter().map(|e| normalize_name(e)).collect();

    let mut seen = opts.skip.clone();
    let mut pending: BTreeSet<String> = roots
        .into_iter()
        .filter(|root| seen.insert(root.clone()))
        .collect();
    let mut index = Index::new();
    let mut skipped = Vec::new();
    let mut iteration = 0;

    while !pending.is_empty() && layer_limit.is_none_or(|limit| iteration < limit) {
        iteration += 1;
        let requirements = std::mem::take(&mut pending);
        tracing::debug!(iteration, requirements = requirements.len(), "locating");

        let mut lookups = futures::stream::iter(requirements.into_iter().map(|requirement| {
            async move {
                let result = locator.locate(&requirement).await;
                (requirement, result)
            }
        }))
        .buffer_unordered(max_concurrency);

        let mut located: Vec<(String, ArtifactRef)> = Vec::new();
        while let Some((requirement, result)) = lookups.next().await {
            match result {
                Ok(artifact) => {
                    tracing::debug!(%requirement, %artifact, "located");
                    located.push((requirement, artifact));
                }
                Err(source) if opts.failure_policy == FailurePolicy::Lenient => {
                    tracing::warn!(%requirement, error = %source, "skipping requirement");
                    skipped.push(Skipped {
                        requirement,
                        reason: source.to_string(),
                    });
                }
                Err(source) => return Err(Error::Locate { requirement, source }),
            }
        }
        located.sort_by(|a, b| a.0.cmp(&b.0));

        // Extras requested through `name[extra]` follow the package they located to.
        let mut touched: BTreeMap<(PackageName, String), BTreeSet<String>> = BTreeMap::new();
        let mut batch = Vec::new();
        for (requirement, artifact) in located {
            let key = artifact.key()?;
            let requested = Requirement::parse(&requirement)
                .map(|req| req.extras)
                .unwrap_or_default();
            let is_new = !touched.contains_key(&key);
            touched.entry(key.clone()).or_default().extend(requested);
            if is_new && !index.contains(key.0.as_str(), &key.1) {
                batch.push(artifact);
            }
        }

        if !batch.is_empty() {
            tracing::debug!(artifacts = batch.len(), "evaluating");
            let records = evaluator.evaluate(&batch).await?;
            for record in associate(&batch, records)? {
                index.insert(record);
            }
        }

        let mut candidates = BTreeSet::new();
        for ((name, version), extras) in &touched {
            let Some(record) = index.get(name.as_str(), version) else {
                continue;
            };
            let reqs = &record.requirements;
            candidates.extend(reqs.install.iter().cloned());
            candidates.extend(reqs.setup.iter().cloned());
            if opts.include_test_requirements {
                candidates.extend(reqs.test.iter().cloned());
            }
            for extra in global_extras.iter().chain(extras) {
                candidates.extend(reqs.for_extra(extra).cloned());
            }
        }
        pending = candidates
            .into_iter()
            .filter(|candidate| seen.insert(candidate.clone()))
            .collect();

        let progress = Progress {
            records: index.len(),
            iteration,
        };
        tracing::info!(
            records = progress.records,
            iteration,
            pending = pending.len(),
            "iteration complete"
        );
        if let Some(report) = &opts.progress {
            report(progress);
        }
    }

    Ok(Resolution {
        index,
        iterations: iteration,
        skipped,
    })
}
