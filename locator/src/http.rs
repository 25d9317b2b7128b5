use std::{io, sync::Arc, time::Duration};

use futures::StreamExt;
use pydex_metadata::{DigestAlg, PackageName};
use reqwest::{
    StatusCode,
    header::{ACCEPT, CONTENT_TYPE},
};
use tokio::sync::OnceCell;
use url::Url;

use super::{Error, page::ProjectPage};

const CHECKSUM_HEADERS: [(&str, DigestAlg); 2] = [
    ("x-checksum-sha256", DigestAlg::Sha256),
    ("x-checksum-sha512", DigestAlg::Sha512),
];

#[derive(Clone, Debug)]
pub struct HttpLocator {
    client: Arc<OnceCell<reqwest::Client>>,
    options: HttpLocatorOptions,
}

impl HttpLocator {
    pub fn new() -> Self {
        Self::with_options(HttpLocatorOptions::default())
    }

    pub fn with_options(options: HttpLocatorOptions) -> Self {
        Self {
            client: Arc::new(OnceCell::new()),
            options,
        }
    }

    async fn client(&self) -> Result<&reqwest::Client, Error> {
        self.client
            .get_or_try_init(|| async {
                let mut builder = reqwest::Client::builder()
                    .user_agent(concat!("pydex/", env!("CARGO_PKG_VERSION")))
                    .connect_timeout(self.options.connect_timeout)
                    .timeout(self.options.request_timeout);
                if let Some(read_timeout) = self.options.read_timeout {
                    builder = builder.read_timeout(read_timeout);
                }
                builder.build()
            })
            .await
            .map_err(Error::from)
    }

    pub(super) async fn project_page(
        &self,
        page_url: &Url,
        project: &PackageName,
    ) -> Result<ProjectPage, Error> {
        let res = self
            .client()
            .await?
            .get(page_url.clone())
            .header(ACCEPT, "text/html")
            .send()
            .await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Err(Error::ProjectNotFound {
                project: project.to_string(),
            });
        }
        let res = res.error_for_status()?;
        let resolved_url = res.url().clone();

        let max_body_bytes = self.options.max_body_bytes;
        if let Some(content_length) = res.content_length()
            && content_length > max_body_bytes as u64
        {
            return Err(Error::ResponseTooLarge {
                url: resolved_url,
                size: content_length,
                max_bytes: max_body_bytes,
            });
        }

        if self.options.content_type_policy == ContentTypePolicy::RequireHtml {
            let content_type = res
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            if !is_allowed_content_type(&content_type) {
                return Err(Error::UnsupportedContentType {
                    url: resolved_url,
                    content_type,
                });
            }
        }

        let mut body = Vec::new();
        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if body.len() + chunk.len() > max_body_bytes {
                return Err(Error::ResponseTooLarge {
                    url: resolved_url,
                    size: (body.len() + chunk.len()) as u64,
                    max_bytes: max_body_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        let html = std::str::from_utf8(&body)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        Ok(ProjectPage::parse(project, resolved_url, html))
    }

    /// Ask the file server for a checksum header when the index published none.
    pub(super) async fn fallback_digest(
        &self,
        url: &Url,
    ) -> Result<Option<(DigestAlg, String)>, Error> {
        let res = self
            .client()
            .await?
            .head(url.clone())
            .send()
            .await?
            .error_for_status()?;
        let found = CHECKSUM_HEADERS.iter().find_map(|(header, alg)| {
            let value = res.headers().get(*header)?.to_str().ok()?.trim();
            (!value.is_empty()).then(|| (*alg, value.to_ascii_lowercase()))
        });
        Ok(found)
    }
}

impl Default for HttpLocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentTypePolicy {
    Any,
    RequireHtml,
}

#[derive(Clone, Debug)]
pub struct HttpLocatorOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub max_body_bytes: usize,
    pub content_type_policy: ContentTypePolicy,
}

impl Default for HttpLocatorOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            read_timeout: Some(Duration::from_secs(30)),
            max_body_bytes: 8 * 1024 * 1024,
            content_type_policy: ContentTypePolicy::Any,
        }
    }
}

fn is_allowed_content_type(content_type: &str) -> bool {
    content_type == "text/html"
        || content_type == "application/xhtml+xml"
        || content_type == "application/vnd.pypi.simple.v1+html"
}
