use pydex_metadata::Requirement;

use crate::{
    Error,
    page::{DistFile, ProjectPage},
};

/// Candidates for `req` on `page`, best first.
///
/// Only the newest matching version is considered. Its files are ordered by
/// format preference, then by whether the index published a usable digest.
/// The returned list is never empty. `requirement` is the string `req` was
/// parsed from and is reported verbatim when nothing matches.
pub(crate) fn rank_candidates<'p>(
    page: &'p ProjectPage,
    req: &Requirement,
    requirement: &str,
) -> Result<Vec<&'p DistFile>, Error> {
    let available: Vec<&DistFile> = page.files.iter().filter(|file| !file.yanked).collect();
    if available.is_empty() {
        return Err(Error::NoDistributions {
            project: req.name.to_string(),
        });
    }

    let matching: Vec<&DistFile> = available
        .into_iter()
        .filter(|file| req.specifier.contains(&file.version))
        .collect();
    let finals: Vec<&DistFile> = matching
        .iter()
        .copied()
        .filter(|file| !file.version.is_prerelease())
        .collect();
    let pool = if req.specifier.allows_prereleases() || finals.is_empty() {
        matching
    } else {
        finals
    };

    let Some(newest) = pool.iter().map(|file| &file.version).max() else {
        return Err(Error::NoMatchingVersion {
            project: req.name.to_string(),
            requirement: requirement.to_string(),
        });
    };
    let mut ranked: Vec<&DistFile> = pool
        .iter()
        .copied()
        .filter(|file| &file.version == newest)
        .collect();
    ranked.sort_by(|a, b| {
        (b.kind, b.supported_digest().is_some()).cmp(&(a.kind, a.supported_digest().is_some()))
    });
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use pydex_metadata::{PackageName, Requirement};
    use url::Url;

    use super::rank_candidates;
    use crate::{
        Error,
        page::{DistKind, ProjectPage},
    };

    fn page(links: &[&str]) -> ProjectPage {
        let html: String = links
            .iter()
            .map(|link| format!(r#"<a href="https://f.example/{link}">{}</a>"#, link.split('#').next().unwrap()))
            .collect();
        ProjectPage::parse(
            &PackageName::new("demo").unwrap(),
            Url::parse("https://index.example/simple/demo/").unwrap(),
            &html,
        )
    }

    fn best(page: &ProjectPage, requirement: &str) -> (String, DistKind) {
        let req = Requirement::parse(requirement).unwrap();
        let ranked = rank_candidates(page, &req, requirement).unwrap();
        (ranked[0].raw_version.clone(), ranked[0].kind)
    }

    #[test]
    fn newest_version_then_preferred_format() {
        let page = page(&[
            "demo-1.0.zip#sha256=aa",
            "demo-1.1.zip#sha256=bb",
            "demo-1.1.tar.gz#sha256=cc",
            "demo-1.1-cp311-cp311-linux_x86_64.whl#sha256=dd",
            "demo-1.2.tar.gz#sha256=ee",
            "demo-1.2.zip#sha256=ff",
            "demo-1.2-cp311-cp311-linux_x86_64.whl#sha256=11",
            "demo-1.2-py3-none-any.whl#sha256=22",
        ]);
        assert_eq!(best(&page, "demo"), ("1.2".into(), DistKind::Wheel));
        assert_eq!(best(&page, "demo<1.2"), ("1.1".into(), DistKind::PlatformWheel));
        assert_eq!(best(&page, "demo<1.1"), ("1.0".into(), DistKind::LegacyArchive));

        let req = Requirement::parse("demo").unwrap();
        let kinds: Vec<DistKind> = rank_candidates(&page, &req, "demo")
            .unwrap()
            .iter()
            .map(|file| file.kind)
            .collect();
        assert_eq!(
            kinds,
            [
                DistKind::Wheel,
                DistKind::PlatformWheel,
                DistKind::SourceArchive,
                DistKind::LegacyArchive,
            ]
        );
    }

    #[test]
    fn built_distribution_beats_legacy_archive() {
        let page = page(&[
            "demo-1.0.zip#sha256=aa",
            "demo-1.0-cp311-cp311-manylinux_2_17_x86_64.whl#sha256=bb",
        ]);
        let req = Requirement::parse("demo").unwrap();
        let ranked = rank_candidates(&page, &req, "demo").unwrap();
        assert_eq!(
            ranked[0].filename,
            "demo-1.0-cp311-cp311-manylinux_2_17_x86_64.whl"
        );
        assert_eq!(ranked[0].supported_digest().unwrap().1, "bb");
    }

    #[test]
    fn no_match_reports_the_requirement_as_written() {
        let page = page(&["demo-1.0.tar.gz#sha256=aa"]);
        let req = Requirement::parse("Demo >= 2.0 ; python_version > '3'").unwrap();
        let err = rank_candidates(&page, &req, "Demo >= 2.0 ; python_version > '3'").unwrap_err();
        let Error::NoMatchingVersion { requirement, .. } = err else {
            panic!("expected NoMatchingVersion, got {err}");
        };
        assert_eq!(requirement, "Demo >= 2.0 ; python_version > '3'");
    }

    #[test]
    fn published_digest_breaks_format_ties() {
        let page = page(&["demo-2.0.tar.bz2", "demo-2.0.tar.gz#sha512=ee"]);
        let req = Requirement::parse("demo").unwrap();
        let ranked = rank_candidates(&page, &req, "demo").unwrap();
        assert_eq!(ranked[0].filename, "demo-2.0.tar.gz");
        assert_eq!(ranked[1].filename, "demo-2.0.tar.bz2");
    }

    #[test]
    fn prereleases_need_to_be_asked_for() {
        let page = page(&["demo-1.0.tar.gz#sha256=aa", "demo-2.0b1.tar.gz#sha256=bb"]);
        assert_eq!(best(&page, "demo").0, "1.0");
        assert_eq!(best(&page, "demo>=2.0b1").0, "2.0b1");

        // With no final release left the pre-release is taken anyway.
        assert_eq!(best(&page, "demo>1.0").0, "2.0b1");
    }

    #[test]
    fn yanked_files_are_ignored() {
        let html = r#"<a href="https://f.example/demo-3.0.tar.gz#sha256=aa" data-yanked="">demo-3.0.tar.gz</a>
<a href="https://f.example/demo-2.0.tar.gz#sha256=bb">demo-2.0.tar.gz</a>"#;
        let page = ProjectPage::parse(
            &PackageName::new("demo").unwrap(),
            Url::parse("https://index.example/simple/demo/").unwrap(),
            html,
        );
        assert_eq!(best(&page, "demo").0, "2.0");

        let req = Requirement::parse("demo==3.0").unwrap();
        assert!(matches!(
            rank_candidates(&page, &req, "demo==3.0"),
            Err(Error::NoMatchingVersion { .. })
        ));
    }
}
