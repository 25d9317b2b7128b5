//! PEP 440 versions and version specifiers, as far as artifact selection needs them.

use std::{
    cmp::Ordering,
    fmt,
    str::FromStr,
    sync::LazyLock,
};

use regex::Regex;

use crate::error::Error;

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^\s*v?",
        r"(?:(?P<epoch>[0-9]+)!)?",
        r"(?P<release>[0-9]+(?:\.[0-9]+)*)",
        r"(?:[-_.]?(?P<pre_l>alpha|a|beta|b|preview|pre|c|rc)[-_.]?(?P<pre_n>[0-9]+)?)?",
        r"(?:-(?P<post_n1>[0-9]+)|[-_.]?(?P<post_l>post|rev|r)[-_.]?(?P<post_n2>[0-9]+)?)?",
        r"(?:[-_.]?(?P<dev_l>dev)[-_.]?(?P<dev_n>[0-9]+)?)?",
        r"(?:\+(?P<local>[a-z0-9]+(?:[-_.][a-z0-9]+)*))?",
        r"\s*$",
    ))
    .expect("version pattern is valid")
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreRelease {
    Alpha,
    Beta,
    Rc,
}

impl PreRelease {
    fn as_str(self) -> &'static str {
        match self {
            PreRelease::Alpha => "a",
            PreRelease::Beta => "b",
            PreRelease::Rc => "rc",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Version {
    epoch: u64,
    release: Vec<u64>,
    pre: Option<(PreRelease, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
    local: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum PreKey {
    DevOnly,
    Pre(PreRelease, u64),
    Final,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum DevKey {
    Dev(u64),
    Final,
}

fn parse_number(input: &str, text: &str) -> Result<u64, Error> {
    text.parse()
        .map_err(|_| Error::InvalidVersion(input.to_string()))
}

impl Version {
    pub fn parse(input: &str) -> Result<Self, Error> {
        let caps = VERSION_RE
            .captures(input)
            .ok_or_else(|| Error::InvalidVersion(input.to_string()))?;

        let epoch = match caps.name("epoch") {
            Some(m) => parse_number(input, m.as_str())?,
            None => 0,
        };
        let release = caps["release"]
            .split('.')
            .map(|part| parse_number(input, part))
            .collect::<Result<Vec<_>, _>>()?;

        let pre = match caps.name("pre_l") {
            Some(label) => {
                let kind = match label.as_str().to_ascii_lowercase().as_str() {
                    "a" | "alpha" => PreRelease::Alpha,
                    "b" | "beta" => PreRelease::Beta,
                    _ => PreRelease::Rc,
                };
                let n = match caps.name("pre_n") {
                    Some(m) => parse_number(input, m.as_str())?,
                    None => 0,
                };
                Some((kind, n))
            }
            None => None,
        };

        let post = if let Some(m) = caps.name("post_n1") {
            Some(parse_number(input, m.as_str())?)
        } else if caps.name("post_l").is_some() {
            match caps.name("post_n2") {
                Some(m) => Some(parse_number(input, m.as_str())?),
                None => Some(0),
            }
        } else {
            None
        };

        let dev = if caps.name("dev_l").is_some() {
            match caps.name("dev_n") {
                Some(m) => Some(parse_number(input, m.as_str())?),
                None => Some(0),
            }
        } else {
            None
        };

        let local = caps.name("local").map(|m| {
            m.as_str()
                .to_ascii_lowercase()
                .replace(['-', '_'], ".")
        });

        Ok(Self {
            epoch,
            release,
            pre,
            post,
            dev,
            local,
        })
    }

    pub fn release(&self) -> &[u64] {
        &self.release
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    pub fn is_postrelease(&self) -> bool {
        self.post.is_some()
    }

    pub fn has_local(&self) -> bool {
        self.local.is_some()
    }

    fn without_local(&self) -> Self {
        Self {
            local: None,
            ..self.clone()
        }
    }

    fn same_release(&self, other: &Version) -> bool {
        self.epoch == other.epoch && cmp_release(&self.release, &other.release).is_eq()
    }

    fn pre_key(&self) -> PreKey {
        match (self.pre, self.post, self.dev) {
            (None, None, Some(_)) => PreKey::DevOnly,
            (Some((kind, n)), _, _) => PreKey::Pre(kind, n),
            (None, _, _) => PreKey::Final,
        }
    }

    fn dev_key(&self) -> DevKey {
        match self.dev {
            Some(n) => DevKey::Dev(n),
            None => DevKey::Final,
        }
    }
}

fn cmp_release(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| cmp_release(&self.release, &other.release))
            .then_with(|| self.pre_key().cmp(&other.pre_key()))
            .then_with(|| self.post.cmp(&other.post))
            .then_with(|| self.dev_key().cmp(&other.dev_key()))
            .then_with(|| self.local.cmp(&other.local))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for Version {}

impl FromStr for Version {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let mut first = true;
        for part in &self.release {
            if !first {
                f.write_str(".")?;
            }
            first = false;
            write!(f, "{part}")?;
        }
        if let Some((kind, n)) = self.pre {
            write!(f, "{}{n}", kind.as_str())?;
        }
        if let Some(n) = self.post {
            write!(f, ".post{n}")?;
        }
        if let Some(n) = self.dev {
            write!(f, ".dev{n}")?;
        }
        if let Some(local) = &self.local {
            write!(f, "+{local}")?;
        }
        Ok(())
    }
}

/// The normalized spelling of `version`, or the input unchanged when it is not
/// a PEP 440 version. Used to match `1.0-1` against `1.0.post1`.
pub fn canonical_version(version: &str) -> String {
    Version::parse(version).map_or_else(|_| version.to_string(), |v| v.to_string())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Compatible,
    Equal,
    NotEqual,
    LessEqual,
    GreaterEqual,
    Less,
    Greater,
    Arbitrary,
}

impl Operator {
    fn as_str(self) -> &'static str {
        match self {
            Operator::Compatible => "~=",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::LessEqual => "<=",
            Operator::GreaterEqual => ">=",
            Operator::Less => "<",
            Operator::Greater => ">",
            Operator::Arbitrary => "===",
        }
    }
}

/// A single clause such as `>=2.0` or `==1.4.*`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Specifier {
    op: Operator,
    version: Version,
    wildcard: bool,
}

impl Specifier {
    pub fn parse(input: &str) -> Result<Self, Error> {
        let text = input.trim();
        const OPERATORS: [(&str, Operator); 8] = [
            ("===", Operator::Arbitrary),
            ("~=", Operator::Compatible),
            ("==", Operator::Equal),
            ("!=", Operator::NotEqual),
            ("<=", Operator::LessEqual),
            (">=", Operator::GreaterEqual),
            ("<", Operator::Less),
            (">", Operator::Greater),
        ];
        let (op, rest) = OPERATORS
            .iter()
            .find_map(|(prefix, op)| text.strip_prefix(prefix).map(|rest| (*op, rest.trim())))
            .ok_or_else(|| Error::InvalidSpecifier(input.to_string()))?;

        let (rest, wildcard) = match rest.strip_suffix(".*") {
            Some(prefix) if matches!(op, Operator::Equal | Operator::NotEqual) => (prefix, true),
            Some(_) => return Err(Error::InvalidSpecifier(input.to_string())),
            None => (rest, false),
        };
        let version =
            Version::parse(rest).map_err(|_| Error::InvalidSpecifier(input.to_string()))?;
        if op == Operator::Compatible && version.release.len() < 2 {
            return Err(Error::InvalidSpecifier(input.to_string()));
        }

        Ok(Self {
            op,
            version,
            wildcard,
        })
    }

    pub fn operator(&self) -> Operator {
        self.op
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn contains(&self, candidate: &Version) -> bool {
        let spec = &self.version;
        match self.op {
            Operator::Equal if self.wildcard => prefix_matches(candidate, spec, spec.release.len()),
            Operator::NotEqual if self.wildcard => {
                !prefix_matches(candidate, spec, spec.release.len())
            }
            Operator::Equal => equals(candidate, spec),
            Operator::NotEqual => !equals(candidate, spec),
            Operator::Compatible => {
                candidate >= spec && prefix_matches(candidate, spec, spec.release.len() - 1)
            }
            Operator::LessEqual => candidate.without_local() <= *spec,
            Operator::GreaterEqual => candidate.without_local() >= *spec,
            Operator::Less => {
                candidate.without_local() < *spec
                    && (spec.is_prerelease()
                        || !candidate.is_prerelease()
                        || !candidate.same_release(spec))
            }
            Operator::Greater => {
                candidate.without_local() > *spec
                    && (spec.is_postrelease()
                        || !candidate.is_postrelease()
                        || !candidate.same_release(spec))
                    && !(candidate.has_local() && candidate.without_local() == *spec)
            }
            Operator::Arbitrary => candidate.to_string() == spec.to_string(),
        }
    }
}

fn equals(candidate: &Version, spec: &Version) -> bool {
    if spec.has_local() {
        candidate == spec
    } else {
        candidate.without_local() == *spec
    }
}

fn prefix_matches(candidate: &Version, spec: &Version, len: usize) -> bool {
    candidate.epoch == spec.epoch
        && (0..len).all(|i| candidate.release.get(i).copied().unwrap_or(0) == spec.release[i])
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.as_str(), self.version)?;
        if self.wildcard {
            f.write_str(".*")?;
        }
        Ok(())
    }
}

/// A comma separated conjunction of specifiers. The empty set matches every version.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpecifierSet(Vec<Specifier>);

impl SpecifierSet {
    pub fn parse(input: &str) -> Result<Self, Error> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(Self::default());
        }
        input
            .split(',')
            .map(Specifier::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Specifier> {
        self.0.iter()
    }

    pub fn contains(&self, candidate: &Version) -> bool {
        self.0.iter().all(|spec| spec.contains(candidate))
    }

    /// Pre-releases are only considered when a clause names one explicitly.
    pub fn allows_prereleases(&self) -> bool {
        self.0.iter().any(|spec| spec.version.is_prerelease())
    }
}

impl fmt::Display for SpecifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, spec) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{spec}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn set(s: &str) -> SpecifierSet {
        SpecifierSet::parse(s).unwrap()
    }

    #[test]
    fn orders_releases_and_suffixes() {
        let ordered = [
            "1.0.dev0", "1.0a1", "1.0a2.dev1", "1.0a2", "1.0b1", "1.0rc1", "1.0", "1.0.post1",
            "1.1", "1!0.1",
        ];
        for pair in ordered.windows(2) {
            assert!(v(pair[0]) < v(pair[1]), "{} < {}", pair[0], pair[1]);
        }
        assert_eq!(v("1.0"), v("1.0.0"));
        assert_eq!(v("1.0-1"), v("1.0.post1"));
    }

    #[test]
    fn renders_canonical_form() {
        assert_eq!(v("V1.0-Alpha-3").to_string(), "1.0a3");
        assert_eq!(v("2.0.0rc1.dev2+Ubuntu-1").to_string(), "2.0.0rc1.dev2+ubuntu.1");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Version::parse("not-a-version").is_err());
        assert!(SpecifierSet::parse(">=").is_err());
        assert!(SpecifierSet::parse("~=1").is_err());
    }

    #[test]
    fn specifier_matching() {
        assert!(set(">=2.0").contains(&v("2.1.0")));
        assert!(!set(">=2.0,<2.1").contains(&v("2.1.0")));
        assert!(set("==1.4.*").contains(&v("1.4.7")));
        assert!(!set("!=1.4.*").contains(&v("1.4.7")));
        assert!(set("~=2.2").contains(&v("2.9")));
        assert!(!set("~=2.2").contains(&v("3.0")));
        assert!(set("==1.0").contains(&v("1.0+local")));
        assert!(!set("<2.0").contains(&v("2.0rc1")));
        assert!(!set(">1.0").contains(&v("1.0.post1")));
        assert!(set("").contains(&v("0.0.1")));
    }

    #[test]
    fn prerelease_opt_in() {
        assert!(!set(">=1.0").allows_prereleases());
        assert!(set(">=1.0b1").allows_prereleases());
    }
}
