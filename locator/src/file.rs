use std::io;

use pydex_metadata::{DigestAlg, PackageName};
use sha2::{Digest as _, Sha256};
use url::Url;

use super::{Error, page::ProjectPage};

/// Reads a simple index laid out on disk: `<root>/<project>/index.html`.
///
/// Local mirrors rarely publish digests, so files linked without one are
/// hashed directly.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileLocator;

fn to_path(url: &Url) -> Result<std::path::PathBuf, Error> {
    url.to_file_path().map_err(|()| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid file URL: {url}"),
        )
        .into()
    })
}

impl FileLocator {
    pub fn new() -> Self {
        Default::default()
    }

    pub(super) async fn project_page(
        &self,
        page_url: &Url,
        project: &PackageName,
    ) -> Result<ProjectPage, Error> {
        let path = to_path(page_url)?.join("index.html");
        let html = match tokio::fs::read_to_string(&path).await {
            Ok(html) => html,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Error::ProjectNotFound {
                    project: project.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        Ok(ProjectPage::parse(project, page_url.clone(), &html))
    }

    pub(super) async fn fallback_digest(
        &self,
        url: &Url,
    ) -> Result<Option<(DigestAlg, String)>, Error> {
        let bytes = tokio::fs::read(to_path(url)?).await?;
        let digest = Sha256::digest(&bytes);
        Ok(Some((DigestAlg::Sha256, hex::encode(digest))))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pydex_metadata::DigestAlg;
    use url::Url;

    use crate::{Error, Locator};

    #[tokio::test]
    async fn locates_from_local_mirror_and_hashes_files() {
        let root = tempfile::tempdir().unwrap();
        let files = root.path().join("files");
        let project = root.path().join("simple").join("pkg-a");
        fs::create_dir_all(&files).unwrap();
        fs::create_dir_all(&project).unwrap();
        fs::write(files.join("pkg-a-1.0.0.tar.gz"), b"hello").unwrap();
        fs::write(
            project.join("index.html"),
            r#"<a href="../../files/pkg-a-1.0.0.tar.gz">pkg-a-1.0.0.tar.gz</a>"#,
        )
        .unwrap();

        let index = Url::from_directory_path(root.path().join("simple")).unwrap();
        let artifact = Locator::new(index).locate("pkg-a").await.unwrap();

        assert_eq!(artifact.name, "pkg-a");
        assert_eq!(artifact.version, "1.0.0");
        assert_eq!(artifact.fetch.digest_algorithm, DigestAlg::Sha256);
        // sha256("hello")
        assert_eq!(
            artifact.fetch.digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn missing_project_directory_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let index = Url::from_directory_path(root.path()).unwrap();
        let err = Locator::new(index).locate("absent").await.unwrap_err();
        assert!(matches!(err, Error::ProjectNotFound { .. }), "{err}");
    }
}
