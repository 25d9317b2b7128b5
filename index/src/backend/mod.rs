use miette::Diagnostic;
use pydex_metadata::PackageRecord;
use thiserror::Error;

pub mod nix;

pub use nix::NixBackend;

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum BackendError {
    #[error("records `{first}` and `{second}` both render as attribute `{attr}`")]
    #[diagnostic(code(backend::duplicate_attribute))]
    DuplicateAttribute {
        attr: String,
        first: String,
        second: String,
    },
}

pub trait Backend {
    type Artifact;

    fn emit(&self, records: &[PackageRecord]) -> Result<Self::Artifact, BackendError>;
}
