use serde_json::json;
use url::Url;

use crate::{ArtifactRef, DigestAlg, Error, Fetch, PackageRecord, RawRecord};

fn artifact(name: &str, version: &str) -> ArtifactRef {
    ArtifactRef {
        name: name.to_string(),
        version: version.to_string(),
        fetch: Fetch {
            url: Url::parse(&format!("https://files.example/{name}-{version}.tar.gz")).unwrap(),
            digest_algorithm: DigestAlg::Sha256,
            digest: "00".repeat(32),
        },
    }
}

#[test]
fn setuptools_style_record_keeps_option_lists() {
    let raw: RawRecord = serde_json::from_value(json!({
        "name": "Pkg_A",
        "version": "1.0.0",
        "metadata": {
            "name": "Pkg_A",
            "summary": "A package",
            "license": "MIT",
            "keywords": "",
            "classifiers": [],
        },
        "options": {
            "setup_requires": ["setuptools_scm"],
            "install_requires": "pkg-b >= 2.0\n# comment\nsix",
            "tests_require": ["pytest"],
            "extras_require": {
                "Socks": ["PySocks>=1.5.6"],
                "security:python_version < \"3\"": ["pyOpenSSL"],
            },
        },
    }))
    .unwrap();

    let record = raw.normalize(Some(&artifact("Pkg_A", "1.0.0"))).unwrap();
    assert_eq!(record.name.as_str(), "pkg-a");
    assert_eq!(record.requirements.setup, vec!["setuptools_scm"]);
    assert_eq!(record.requirements.install, vec!["pkg-b>=2.0", "six"]);
    assert_eq!(record.requirements.test, vec!["pytest"]);
    assert_eq!(
        record.requirements.extras.keys().collect::<Vec<_>>(),
        vec!["security:python_version < \"3\"", "socks"]
    );
    assert_eq!(record.metadata.get_str("description"), Some("A package"));
    assert_eq!(record.metadata.get_str("license"), Some("MIT"));
    assert!(record.metadata.get("keywords").is_none());
    assert!(record.metadata.get("classifiers").is_none());
    assert_eq!(record.fetch.digest_algorithm, DigestAlg::Sha256);
}

#[test]
fn setuptools_entries_with_markers_move_to_extras() {
    let raw: RawRecord = serde_json::from_value(json!({
        "name": "pkg-c",
        "version": "0.5",
        "options": {
            "setup_requires": ["wheel; sys_platform == 'win32'"],
            "install_requires": [
                "six",
                "enum34; python_version < '3.4'",
                "pytest; extra == 'test'",
            ],
            "tests_require": ["mock ; python_version < '3'", "nose;"],
        },
    }))
    .unwrap();

    let record = raw.normalize(Some(&artifact("pkg-c", "0.5"))).unwrap();
    let reqs = &record.requirements;
    assert!(reqs.setup.is_empty());
    assert_eq!(reqs.install, vec!["six"]);
    assert_eq!(reqs.test, vec!["nose"]);
    assert_eq!(reqs.extras["test"], vec!["pytest"]);
    assert_eq!(reqs.extras[":python_version < \"3.4\""], vec!["enum34"]);
    assert_eq!(reqs.extras[":python_version < \"3\""], vec!["mock"]);
    assert_eq!(reqs.extras[":sys_platform == \"win32\""], vec!["wheel"]);
    assert_eq!(reqs.for_extra("test").collect::<Vec<_>>(), vec!["pytest"]);
}

#[test]
fn wheel_style_record_groups_conditional_requirements() {
    let raw: RawRecord = serde_json::from_value(json!({
        "metadata": { "name": "requests", "version": "2.31.0" },
        "requires_dist": [
            "charset-normalizer (<4,>=2)",
            "urllib3 <3,>=1.21.1",
            "PySocks !=1.5.7,>=1.5.6 ; extra == 'socks'",
            "chardet <6,>=3.0.2 ; (python_version >= \"3.7\") and extra == 'use_chardet_on_py3'",
            "colorama ; sys_platform == \"win32\"",
        ],
    }))
    .unwrap();

    let record = raw.normalize(Some(&artifact("requests", "2.31.0"))).unwrap();
    assert_eq!(
        record.requirements.install,
        vec!["charset-normalizer<4,>=2", "urllib3<3,>=1.21.1"]
    );
    let extras = &record.requirements.extras;
    assert_eq!(extras["socks"], vec!["pysocks!=1.5.7,>=1.5.6"]);
    assert_eq!(
        extras["use-chardet-on-py3:python_version >= \"3.7\""],
        vec!["chardet<6,>=3.0.2"]
    );
    assert_eq!(extras[":sys_platform == \"win32\""], vec!["colorama"]);

    let socks: Vec<_> = record.requirements.for_extra("SOCKS").collect();
    assert_eq!(socks, vec!["pysocks!=1.5.7,>=1.5.6"]);
    assert_eq!(record.requirements.for_extra("use_chardet_on_py3").count(), 1);
    assert_eq!(record.requirements.for_extra("").count(), 0);
}

#[test]
fn malformed_requires_dist_entry_is_an_error() {
    let raw: RawRecord = serde_json::from_value(json!({
        "name": "broken",
        "version": "0.1",
        "requires_dist": ["foo; python_version <"],
    }))
    .unwrap();
    let err = raw.normalize(Some(&artifact("broken", "0.1"))).unwrap_err();
    assert!(matches!(err, Error::MalformedRequirement { .. }));
}

#[test]
fn record_without_fetch_or_artifact_is_rejected() {
    let raw: RawRecord =
        serde_json::from_value(json!({ "name": "orphan", "version": "1.0" })).unwrap();
    assert!(matches!(raw.normalize(None), Err(Error::MissingFetch { .. })));
}

#[test]
fn from_value_accepts_canonical_and_raw_records() {
    let canonical = json!({
        "name": "pkg-b",
        "version": "2.1.0",
        "fetchurl": { "url": "https://files.example/pkg-b-2.1.0.tar.gz", "sha256": "aa" },
        "requirements": { "install": ["six"] },
    });
    let record = PackageRecord::from_value(canonical).unwrap();
    assert_eq!(record.pin(), "pkg-b==2.1.0");
    assert_eq!(record.requirements.install, vec!["six"]);

    let raw = json!({
        "name": "pkg-b",
        "version": "2.1.0",
        "fetchurl": { "url": "https://files.example/pkg-b-2.1.0.tar.gz", "sha256": "aa" },
        "options": { "install_requires": ["six"] },
    });
    assert_eq!(PackageRecord::from_value(raw).unwrap(), record);
}
