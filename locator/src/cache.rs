use std::sync::Arc;

use dashmap::DashMap;
use url::Url;

use crate::page::ProjectPage;

/// Parsed project pages keyed by the page URL that was requested.
///
/// A page remembers the URL it was finally served from (after redirects) for
/// resolving relative links, but lookups always use the requested URL.
///
/// Several requirement strings usually name the same project (`six`,
/// `six>=1.10`), so one run should fetch and parse each page once. Clones share
/// the same underlying store.
#[derive(Clone, Debug, Default)]
pub struct PageCache {
    inner: Arc<DashMap<Url, Arc<ProjectPage>>>,
}

impl PageCache {
    pub fn get(&self, url: &Url) -> Option<Arc<ProjectPage>> {
        self.inner.get(url).map(|entry| Arc::clone(entry.value()))
    }

    /// Store `page` under `url`, keeping an existing entry if another task got
    /// there first.
    pub fn put(&self, url: Url, page: ProjectPage) -> Arc<ProjectPage> {
        Arc::clone(
            self.inner
                .entry(url)
                .or_insert_with(|| Arc::new(page))
                .value(),
        )
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_put_wins_and_clones_share_entries() {
        let cache = PageCache::default();
        let url = Url::parse("https://index.example/simple/six/").unwrap();

        let first = cache.put(
            url.clone(),
            ProjectPage {
                url: url.clone(),
                files: Vec::new(),
            },
        );
        let shared = cache.clone();
        let second = shared.put(
            url.clone(),
            ProjectPage {
                url: url.clone(),
                files: Vec::new(),
            },
        );

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&cache.get(&url).unwrap(), &first));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn entries_are_keyed_by_the_requested_url() {
        let cache = PageCache::default();
        let requested = Url::parse("https://index.example/simple/six/").unwrap();
        let served = Url::parse("https://mirror.example/simple/six/").unwrap();

        cache.put(
            requested.clone(),
            ProjectPage {
                url: served.clone(),
                files: Vec::new(),
            },
        );
        assert_eq!(cache.get(&requested).unwrap().url, served);
        assert!(cache.get(&served).is_none());
    }
}
