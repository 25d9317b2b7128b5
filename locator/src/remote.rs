use std::{fmt, future::Future, pin::Pin, sync::Arc};

use pydex_metadata::{DigestAlg, PackageName};
use url::Url;

use super::{Error, page::ProjectPage};

/// A source of project pages for index URLs with a custom scheme.
pub trait Backend: Send + Sync {
    fn project_page<'a>(
        &'a self,
        page_url: &'a Url,
        project: &'a PackageName,
    ) -> Pin<Box<dyn Future<Output = Result<ProjectPage, Error>> + Send + 'a>>;

    /// Digest lookup for a file whose link carried none.
    fn fallback_digest<'a>(
        &'a self,
        _url: &'a Url,
    ) -> Pin<Box<dyn Future<Output = Result<Option<(DigestAlg, String)>, Error>> + Send + 'a>>
    {
        Box::pin(std::future::ready(Ok(None)))
    }
}

#[derive(Clone)]
pub struct RemoteLocator {
    schemes: Arc<[Arc<str>]>,
    backend: Arc<dyn Backend>,
}

impl fmt::Debug for RemoteLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteLocator")
            .field("schemes", &self.schemes)
            .finish_non_exhaustive()
    }
}

impl RemoteLocator {
    pub fn new<I, S>(schemes: I, backend: Arc<dyn Backend>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        let schemes: Vec<Arc<str>> = schemes.into_iter().map(Into::into).collect();
        Self {
            schemes: schemes.into(),
            backend,
        }
    }

    pub fn schemes(&self) -> &[Arc<str>] {
        &self.schemes
    }

    pub fn backend(&self) -> &dyn Backend {
        &*self.backend
    }
}

/// Dispatches lookups to custom backends based on the URL scheme.
#[derive(Clone, Debug, Default)]
pub(super) struct RemoteDispatch {
    locators: Vec<RemoteLocator>,
}

impl RemoteDispatch {
    /// Find a locator that supports the given scheme.
    pub(super) fn get(&self, scheme: &str) -> Option<RemoteLocator> {
        // Later registrations shadow earlier ones.
        self.locators
            .iter()
            .rev()
            .find(|locator| locator.schemes().iter().any(|s| &**s == scheme))
            .cloned()
    }

    /// Return a new dispatch instance including the provided locator.
    pub(super) fn with_remote(&self, locator: RemoteLocator) -> Self {
        let mut locators = self.locators.clone();
        locators.push(locator);
        Self { locators }
    }
}

#[cfg(test)]
mod tests {
    use std::{future::Future, pin::Pin, sync::Arc};

    use pydex_metadata::PackageName;
    use url::Url;

    use super::{Backend, Error, ProjectPage, RemoteDispatch, RemoteLocator};

    struct NoopBackend;

    impl Backend for NoopBackend {
        fn project_page<'a>(
            &'a self,
            _page_url: &'a Url,
            project: &'a PackageName,
        ) -> Pin<Box<dyn Future<Output = Result<ProjectPage, Error>> + Send + 'a>> {
            Box::pin(std::future::ready(Err(Error::ProjectNotFound {
                project: project.to_string(),
            })))
        }
    }

    fn locator_for(schemes: &[&str]) -> RemoteLocator {
        RemoteLocator::new(schemes.iter().copied(), Arc::new(NoopBackend))
    }

    #[test]
    fn shadowing_prefers_latest_locator() {
        let root = locator_for(&["mirror"]);
        let child = locator_for(&["mirror", "s3"]);
        let dispatch = RemoteDispatch::default()
            .with_remote(root)
            .with_remote(child);

        let locator = dispatch.get("mirror").expect("mirror locator");
        assert_eq!(locator.schemes().len(), 2);
        assert!(locator.schemes().iter().any(|s| s.as_ref() == "s3"));
    }

    #[test]
    fn with_remote_leaves_the_receiver_untouched() {
        let base = RemoteDispatch::default().with_remote(locator_for(&["base"]));
        let extended = base.with_remote(locator_for(&["extra"]));

        assert!(extended.get("base").is_some());
        assert!(extended.get("extra").is_some());
        assert!(base.get("extra").is_none());
    }
}
