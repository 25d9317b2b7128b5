use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{error::Error, names::PackageName, version::canonical_version};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DigestAlg {
    Sha256,
    Sha512,
    #[default]
    Unknown,
}

impl DigestAlg {
    pub fn as_str(self) -> &'static str {
        match self {
            DigestAlg::Sha256 => "sha256",
            DigestAlg::Sha512 => "sha512",
            DigestAlg::Unknown => "unknown",
        }
    }

    pub fn is_supported(self) -> bool {
        !matches!(self, DigestAlg::Unknown)
    }
}

impl FromStr for DigestAlg {
    type Err = std::convert::Infallible;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Ok(match input.to_ascii_lowercase().as_str() {
            "sha256" => DigestAlg::Sha256,
            "sha512" => DigestAlg::Sha512,
            _ => DigestAlg::Unknown,
        })
    }
}

impl fmt::Display for DigestAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to download an artifact and how to verify it.
///
/// On the wire this is the `fetchurl` shape consumed by Nix:
/// `{ "url": "...", "sha256": "..." }`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "FetchRepr", into = "FetchRepr")]
pub struct Fetch {
    pub url: Url,
    pub digest_algorithm: DigestAlg,
    pub digest: String,
}

#[derive(Serialize, Deserialize)]
struct FetchRepr {
    url: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha512: Option<String>,
}

impl TryFrom<FetchRepr> for Fetch {
    type Error = Error;

    fn try_from(repr: FetchRepr) -> Result<Self, Self::Error> {
        let (digest_algorithm, digest) = match (repr.sha256, repr.sha512) {
            (Some(digest), _) => (DigestAlg::Sha256, digest),
            (None, Some(digest)) => (DigestAlg::Sha512, digest),
            (None, None) => {
                return Err(Error::MissingDigest {
                    url: repr.url.to_string(),
                });
            }
        };
        Ok(Self {
            url: repr.url,
            digest_algorithm,
            digest,
        })
    }
}

impl From<Fetch> for FetchRepr {
    fn from(fetch: Fetch) -> Self {
        let (sha256, sha512) = match fetch.digest_algorithm {
            DigestAlg::Sha512 => (None, Some(fetch.digest)),
            _ => (Some(fetch.digest), None),
        };
        Self {
            url: fetch.url,
            sha256,
            sha512,
        }
    }
}

impl Fetch {
    pub fn filename(&self) -> &str {
        self.url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
    }

    pub fn is_wheel(&self) -> bool {
        self.filename().ends_with(".whl")
    }
}

/// A located source artifact for one package version.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub version: String,
    #[serde(rename = "fetchurl")]
    pub fetch: Fetch,
}

impl ArtifactRef {
    pub fn package_name(&self) -> Result<PackageName, Error> {
        PackageName::new(&self.name)
    }

    /// The `(normalized name, version)` pair evaluator output is matched against.
    pub fn key(&self) -> Result<(PackageName, String), Error> {
        Ok((self.package_name()?, canonical_version(&self.version)))
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}
