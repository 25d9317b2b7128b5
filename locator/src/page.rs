use std::{str::FromStr, sync::LazyLock};

use pydex_metadata::{DigestAlg, PackageName, Version, normalize_name};
use regex::Regex;
use url::Url;

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<a\s([^>]*)>(.*?)</a\s*>").expect("anchor pattern is valid")
});

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)([a-z][a-z0-9_:-]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#)
        .expect("attribute pattern is valid")
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));

/// Distribution formats in ascending order of preference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DistKind {
    /// A legacy `.zip` source archive.
    LegacyArchive,
    /// A `.tar.gz`-style source distribution.
    SourceArchive,
    /// A wheel tied to an interpreter ABI or platform.
    PlatformWheel,
    /// A pure-Python `none-any` wheel.
    Wheel,
}

const SOURCE_EXTENSIONS: [&str; 5] = [".tar.gz", ".tar.bz2", ".tar.xz", ".tgz", ".tar"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DistFile {
    pub filename: String,
    /// Project name as spelled in the filename.
    pub project: String,
    pub version: Version,
    pub raw_version: String,
    pub kind: DistKind,
    /// The download URL with the digest fragment removed.
    pub url: Url,
    pub digest: Option<(DigestAlg, String)>,
    pub yanked: bool,
}

impl DistFile {
    pub fn supported_digest(&self) -> Option<(DigestAlg, &str)> {
        match &self.digest {
            Some((alg, digest)) if alg.is_supported() => Some((*alg, digest.as_str())),
            _ => None,
        }
    }
}

/// The parsed listing of one project on a simple index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectPage {
    pub url: Url,
    pub files: Vec<DistFile>,
}

impl ProjectPage {
    pub fn parse(project: &PackageName, url: Url, html: &str) -> Self {
        let mut files = Vec::new();
        for anchor in ANCHOR_RE.captures_iter(html) {
            let mut href = None;
            let mut yanked = false;
            for attr in ATTR_RE.captures_iter(&anchor[1]) {
                let name = attr[1].to_ascii_lowercase();
                let value = attr
                    .get(2)
                    .or_else(|| attr.get(3))
                    .or_else(|| attr.get(4))
                    .map(|m| unescape(m.as_str()));
                match name.as_str() {
                    "href" => href = value,
                    "data-yanked" => yanked = true,
                    _ => {}
                }
            }
            let Some(href) = href else {
                continue;
            };
            let Ok(mut link) = url.join(&href) else {
                tracing::debug!(%href, "skipping unparsable link");
                continue;
            };

            let digest = link.fragment().and_then(|fragment| {
                let (alg, value) = fragment.split_once('=')?;
                let alg = DigestAlg::from_str(alg).unwrap_or_default();
                Some((alg, value.to_ascii_lowercase()))
            });
            link.set_fragment(None);

            let text = unescape(TAG_RE.replace_all(&anchor[2], "").trim());
            let filename = if text.is_empty() {
                link.path_segments()
                    .and_then(|mut segments| segments.next_back())
                    .unwrap_or_default()
                    .to_string()
            } else {
                text
            };

            match parse_filename(project, &filename) {
                Some((project_name, raw_version, kind)) => match Version::parse(&raw_version) {
                    Ok(version) => files.push(DistFile {
                        filename,
                        project: project_name,
                        version,
                        raw_version,
                        kind,
                        url: link,
                        digest,
                        yanked,
                    }),
                    Err(_) => tracing::debug!(%filename, "skipping file with invalid version"),
                },
                None => tracing::debug!(%filename, "skipping unsupported distribution"),
            }
        }
        Self { url, files }
    }
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// Split a distribution filename into `(project, version, kind)`.
pub(crate) fn parse_filename(
    project: &PackageName,
    filename: &str,
) -> Option<(String, String, DistKind)> {
    if let Some(stem) = filename.strip_suffix(".whl") {
        let parts: Vec<&str> = stem.split('-').collect();
        if parts.len() < 5 {
            return None;
        }
        let n = parts.len();
        let kind = if parts[n - 2] == "none" && parts[n - 1] == "any" {
            DistKind::Wheel
        } else {
            DistKind::PlatformWheel
        };
        return Some((parts[0].to_string(), parts[1].to_string(), kind));
    }

    let (stem, kind) = SOURCE_EXTENSIONS
        .iter()
        .find_map(|ext| filename.strip_suffix(ext).map(|s| (s, DistKind::SourceArchive)))
        .or_else(|| {
            filename
                .strip_suffix(".zip")
                .map(|s| (s, DistKind::LegacyArchive))
        })?;

    // Project names may contain `-`, so find the split whose prefix names the project.
    let split = stem
        .match_indices('-')
        .map(|(i, _)| i)
        .find(|&i| normalize_name(&stem[..i]) == project.as_str())
        .or_else(|| stem.rfind('-'))?;
    let (name, version) = (&stem[..split], &stem[split + 1..]);
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some((name.to_string(), version.to_string(), kind))
}
