//! Maps requirement strings to concrete, digest-pinned artifacts on a package index.

pub mod cache;
pub mod file;
pub mod http;
pub mod page;
pub mod remote;
mod select;

use std::{future::Future, pin::Pin, sync::Arc};

pub use cache::PageCache;
pub use file::FileLocator;
pub use http::{ContentTypePolicy, HttpLocator, HttpLocatorOptions};
use miette::Diagnostic;
pub use page::{DistFile, DistKind, ProjectPage};
use pydex_metadata::{ArtifactRef, DigestAlg, Fetch, PackageName, Requirement};
pub use remote::{Backend, RemoteLocator};
use url::Url;

pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/simple";

#[derive(Debug, thiserror::Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[error("unsupported URL scheme `{scheme}`")]
    #[diagnostic(code(locator::unsupported_scheme))]
    UnsupportedScheme { scheme: String },
    #[error("project `{project}` not found on the index")]
    #[diagnostic(code(locator::project_not_found))]
    ProjectNotFound { project: String },
    #[error("no usable distributions listed for `{project}`")]
    #[diagnostic(code(locator::no_distributions))]
    NoDistributions { project: String },
    #[error("no version of `{project}` satisfies `{requirement}`")]
    #[diagnostic(code(locator::no_matching_version))]
    NoMatchingVersion {
        project: String,
        requirement: String,
    },
    #[error("no supported digest available for `{url}`")]
    #[diagnostic(
        code(locator::no_supported_digest),
        help("The index must publish a sha256 or sha512 digest, or serve an X-Checksum-Sha256 header.")
    )]
    NoSupportedDigest { url: Url },
    #[error("direct references are not supported: `{requirement}`")]
    #[diagnostic(code(locator::direct_reference))]
    DirectReference { requirement: String },
    #[error("response body from `{url}` exceeds max size {max_bytes} bytes (got {size} bytes)")]
    #[diagnostic(code(locator::response_too_large))]
    ResponseTooLarge {
        url: Url,
        size: u64,
        max_bytes: usize,
    },
    #[error("unsupported content type `{content_type}` for `{url}`")]
    #[diagnostic(code(locator::unsupported_content_type))]
    UnsupportedContentType { url: Url, content_type: String },
    #[error("http error: {0}")]
    #[diagnostic(code(locator::http_error))]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    #[diagnostic(code(locator::io_error))]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Requirement(#[from] pydex_metadata::Error),
}

/// Anything that can turn a requirement string into an artifact.
pub trait Locate: Send + Sync {
    fn locate<'a>(
        &'a self,
        requirement: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ArtifactRef, Error>> + Send + 'a>>;
}

#[derive(Clone, Debug)]
pub struct Locator {
    index_url: Url,
    pub file: FileLocator,
    pub http: HttpLocator,
    remotes: remote::RemoteDispatch,
    cache: PageCache,
}

impl Locator {
    pub fn new(mut index_url: Url) -> Self {
        // Project pages are joined onto the index URL, which needs a trailing slash.
        if !index_url.path().ends_with('/') {
            let path = format!("{}/", index_url.path());
            index_url.set_path(&path);
        }
        Self {
            index_url,
            file: FileLocator::new(),
            http: HttpLocator::new(),
            remotes: Default::default(),
            cache: PageCache::default(),
        }
    }

    pub fn index_url(&self) -> &Url {
        &self.index_url
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn with_http(&self, http: HttpLocator) -> Self {
        Self {
            http,
            ..self.clone()
        }
    }

    pub fn with_remote(&self, locator: RemoteLocator) -> Self {
        Self {
            remotes: self.remotes.with_remote(locator),
            ..self.clone()
        }
    }

    pub async fn locate(&self, requirement: &str) -> Result<ArtifactRef, Error> {
        let req = Requirement::parse(requirement)?;
        if req.url.is_some() {
            return Err(Error::DirectReference {
                requirement: requirement.to_string(),
            });
        }

        let page = self.project_page(&req.name).await?;
        let ranked = select::rank_candidates(&page, &req, requirement)?;
        let (file, (digest_algorithm, digest)) = self.pick_digest(&ranked).await?;
        tracing::debug!(
            requirement,
            file = %file.filename,
            digest = %digest_algorithm,
            "located artifact"
        );

        Ok(ArtifactRef {
            name: file.project.clone(),
            version: file.raw_version.clone(),
            fetch: Fetch {
                url: file.url.clone(),
                digest_algorithm,
                digest,
            },
        })
    }

    /// Take the best candidate's published digest, else ask its server, else
    /// settle for the best candidate that does publish one. A failed server
    /// lookup counts as no digest.
    async fn pick_digest<'a>(
        &self,
        ranked: &[&'a DistFile],
    ) -> Result<(&'a DistFile, (DigestAlg, String)), Error> {
        let best = ranked[0];
        if let Some((alg, digest)) = best.supported_digest() {
            return Ok((best, (alg, digest.to_string())));
        }
        match self.fallback_digest(&best.url).await {
            Ok(Some(found)) if found.0.is_supported() => return Ok((best, found)),
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(url = %best.url, error = %err, "checksum lookup failed");
            }
        }
        ranked
            .iter()
            .find_map(|file| {
                file.supported_digest()
                    .map(|(alg, digest)| (*file, (alg, digest.to_string())))
            })
            .ok_or_else(|| Error::NoSupportedDigest {
                url: best.url.clone(),
            })
    }

    async fn project_page(&self, project: &PackageName) -> Result<Arc<ProjectPage>, Error> {
        let page_url = self
            .index_url
            .join(&format!("{project}/"))
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;
        if let Some(page) = self.cache.get(&page_url) {
            return Ok(page);
        }

        let page = if let Some(remote) = self.remotes.get(page_url.scheme()) {
            remote.backend().project_page(&page_url, project).await?
        } else {
            match page_url.scheme() {
                "file" => self.file.project_page(&page_url, project).await?,
                "http" | "https" => self.http.project_page(&page_url, project).await?,
                scheme => {
                    return Err(Error::UnsupportedScheme {
                        scheme: scheme.to_string(),
                    });
                }
            }
        };
        Ok(self.cache.put(page_url, page))
    }

    async fn fallback_digest(&self, url: &Url) -> Result<Option<(DigestAlg, String)>, Error> {
        if let Some(remote) = self.remotes.get(url.scheme()) {
            return remote.backend().fallback_digest(url).await;
        }
        match url.scheme() {
            "file" => self.file.fallback_digest(url).await,
            "http" | "https" => self.http.fallback_digest(url).await,
            _ => Ok(None),
        }
    }
}

impl Locate for Locator {
    fn locate<'a>(
        &'a self,
        requirement: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ArtifactRef, Error>> + Send + 'a>> {
        Box::pin(Locator::locate(self, requirement))
    }
}
