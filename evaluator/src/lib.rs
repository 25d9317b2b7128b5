//! Turns located artifacts into normalized package records.
//!
//! Evaluation (running setup scripts, reading wheel metadata) always happens in
//! an external process. This crate only launches it and normalizes what comes
//! back.

mod command;
mod nix;

use std::{collections::BTreeMap, future::Future, io, pin::Pin};

pub use command::CommandEvaluator;
use miette::Diagnostic;
pub use nix::{NixEvaluator, NixEvaluatorOptions};
use pydex_metadata::{
    ArtifactRef, PackageName, PackageRecord, RawRecord, canonical_version, normalize_name,
};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to launch evaluator `{program}`: {source}")]
    #[diagnostic(code(evaluator::spawn))]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("evaluator `{program}` exited with {status}")]
    #[diagnostic(code(evaluator::failed), help("{stderr}"))]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("malformed evaluator output: {message}")]
    #[diagnostic(code(evaluator::malformed_output))]
    Output { message: String },

    #[error("evaluating {name}=={version} failed: {message}")]
    #[diagnostic(code(evaluator::artifact_failed))]
    Artifact {
        name: String,
        version: String,
        message: String,
    },

    #[error("evaluator returned no record for {name}=={version}")]
    #[diagnostic(code(evaluator::missing_record))]
    MissingRecord { name: String, version: String },

    #[error("invalid evaluator JSON: {0}")]
    #[diagnostic(code(evaluator::json))]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    #[diagnostic(code(evaluator::io))]
    Io(#[from] io::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Metadata(#[from] pydex_metadata::Error),
}

/// Evaluates a batch of artifacts in one go.
///
/// Records may come back in any order; callers match them up with
/// [`associate`].
pub trait Evaluate: Send + Sync {
    fn evaluate<'a>(
        &'a self,
        batch: &'a [ArtifactRef],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PackageRecord>, Error>> + Send + 'a>>;
}

/// Split evaluator output into JSON values. Accepts a single array, a single
/// object, or one object per line.
pub fn parse_records(output: &str) -> Result<Vec<Value>, Error> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return match value {
            Value::Array(items) => Ok(items),
            Value::Object(_) => Ok(vec![value]),
            other => Err(Error::Output {
                message: format!("expected a record or list of records, got {other}"),
            }),
        };
    }
    serde_json::Deserializer::from_str(trimmed)
        .into_iter::<Value>()
        .map(|value| match value? {
            value @ Value::Object(_) => Ok(value),
            other => Err(Error::Output {
                message: format!("expected a record, got {other}"),
            }),
        })
        .collect()
}

/// Normalize raw evaluator values, borrowing name, version and fetch block
/// from the matching artifact in `batch` when a record leaves them out.
pub fn normalize_records(
    values: Vec<Value>,
    batch: &[ArtifactRef],
) -> Result<Vec<PackageRecord>, Error> {
    values
        .into_iter()
        .map(|value| normalize_value(value, batch))
        .collect()
}

fn normalize_value(value: Value, batch: &[ArtifactRef]) -> Result<PackageRecord, Error> {
    if value.get("requirements").is_some() {
        return Ok(serde_json::from_value(value)?);
    }
    let raw: RawRecord = serde_json::from_value(value)?;
    let artifact = match_artifact(&raw, batch);
    if let Some(message) = &raw.error {
        let (name, version) = match artifact {
            Some(artifact) => (artifact.name.clone(), artifact.version.clone()),
            None => (
                raw_field(&raw, "name").unwrap_or("<unknown>").to_string(),
                raw_field(&raw, "version").unwrap_or("<unknown>").to_string(),
            ),
        };
        return Err(Error::Artifact {
            name,
            version,
            message: message.clone(),
        });
    }
    Ok(raw.normalize(artifact)?)
}

fn raw_field<'r>(raw: &'r RawRecord, field: &str) -> Option<&'r str> {
    let own = match field {
        "name" => raw.name.as_deref(),
        "version" => raw.version.as_deref(),
        _ => None,
    };
    own.or_else(|| raw.metadata.get(field).and_then(Value::as_str))
}

fn match_artifact<'b>(raw: &RawRecord, batch: &'b [ArtifactRef]) -> Option<&'b ArtifactRef> {
    if let Some(fetch) = &raw.fetch
        && let Some(artifact) = batch.iter().find(|a| a.fetch.url == fetch.url)
    {
        return Some(artifact);
    }
    match (raw_field(raw, "name"), raw_field(raw, "version")) {
        (Some(name), Some(version)) => {
            let (name, version) = (normalize_name(name), canonical_version(version));
            batch.iter().find(|a| {
                normalize_name(&a.name) == name && canonical_version(&a.version) == version
            })
        }
        (Some(name), None) => {
            let name = normalize_name(name);
            let mut found = batch.iter().filter(|a| normalize_name(&a.name) == name);
            let first = found.next();
            found.next().is_none().then_some(first).flatten()
        }
        _ if batch.len() == 1 => batch.first(),
        _ => None,
    }
}

/// Pair every artifact in `batch` with its record, in batch order.
///
/// Records are matched on normalized name and canonical version, never by
/// position. Records for artifacts outside the batch are dropped.
pub fn associate(
    batch: &[ArtifactRef],
    records: Vec<PackageRecord>,
) -> Result<Vec<PackageRecord>, Error> {
    let mut by_key: BTreeMap<(PackageName, String), PackageRecord> = BTreeMap::new();
    for record in records {
        let key = record.key();
        if by_key.contains_key(&key) {
            tracing::debug!(record = %record.pin(), "ignoring duplicate record");
            continue;
        }
        by_key.insert(key, record);
    }

    let mut matched = Vec::with_capacity(batch.len());
    for artifact in batch {
        let key = artifact.key()?;
        let Some(record) = by_key.get(&key) else {
            return Err(Error::MissingRecord {
                name: artifact.name.clone(),
                version: artifact.version.clone(),
            });
        };
        matched.push(record.clone());
    }
    if by_key.len() > matched.len() {
        tracing::debug!(
            extra = by_key.len() - matched.len(),
            "evaluator returned records outside the batch"
        );
    }
    Ok(matched)
}
