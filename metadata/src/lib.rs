#[cfg(test)]
mod tests;

mod artifact;
mod error;
pub mod marker;
mod names;
mod raw;
mod record;
pub mod requirement;
pub mod version;

pub use artifact::{ArtifactRef, DigestAlg, Fetch};
pub use error::Error;
pub use marker::MarkerTree;
pub use names::{PackageName, normalize_name};
pub use raw::{RawOptions, RawRecord, RequirementList};
pub use record::{Metadata, PackageRecord, Requirements};
pub use requirement::Requirement;
pub use version::{SpecifierSet, Version, canonical_version};
