use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[error("malformed requirement `{requirement}`: {message}")]
    #[diagnostic(code(metadata::malformed_requirement))]
    MalformedRequirement { requirement: String, message: String },

    #[error("invalid environment marker `{marker}`: {message}")]
    #[diagnostic(code(metadata::invalid_marker))]
    InvalidMarker { marker: String, message: String },

    #[error("invalid package name `{0}`")]
    #[diagnostic(
        code(metadata::invalid_name),
        help("Package names may only contain ASCII letters, digits, `-`, `_` and `.`.")
    )]
    InvalidPackageName(String),

    #[error("invalid version `{0}`")]
    #[diagnostic(code(metadata::invalid_version))]
    InvalidVersion(String),

    #[error("invalid version specifier `{0}`")]
    #[diagnostic(code(metadata::invalid_specifier))]
    InvalidSpecifier(String),

    #[error("fetch block for `{url}` carries no digest")]
    #[diagnostic(code(metadata::missing_digest))]
    MissingDigest { url: String },

    #[error("record is missing `{field}`")]
    #[diagnostic(code(metadata::missing_field))]
    MissingField { field: &'static str },

    #[error("record for `{name}` has no fetch block")]
    #[diagnostic(code(metadata::missing_fetch))]
    MissingFetch { name: String },

    #[error("invalid record: {0}")]
    #[diagnostic(code(metadata::invalid_record))]
    Json(#[from] serde_json::Error),
}
