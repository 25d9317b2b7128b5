use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Write as _,
};

use pydex_metadata::{DigestAlg, PackageRecord, Requirement, normalize_name};

use super::{Backend, BackendError};

/// Renders records as a Nix attribute set of `buildPythonPackage` calls.
#[derive(Clone, Debug, Default)]
pub struct NixBackend {
    /// Added to every package's `buildInputs`.
    pub build_inputs: Vec<String>,
    /// Added to every package's `propagatedBuildInputs`.
    pub propagated_build_inputs: Vec<String>,
}

impl Backend for NixBackend {
    type Artifact = String;

    fn emit(&self, records: &[PackageRecord]) -> Result<Self::Artifact, BackendError> {
        let mut rendered: BTreeMap<String, &PackageRecord> = BTreeMap::new();
        let mut out = String::new();
        let _ = writeln!(out, "{{ pkgs, lib, callPackage }}:");
        let _ = writeln!(out, "{{");
        for record in records {
            let attr = attr_name(record);
            if let Some(first) = rendered.get(&attr) {
                if *first == record {
                    continue;
                }
                return Err(BackendError::DuplicateAttribute {
                    attr,
                    first: first.pin(),
                    second: record.pin(),
                });
            }
            out.push_str(&render_record(
                record,
                &self.build_inputs,
                &self.propagated_build_inputs,
            ));
            rendered.insert(attr, record);
        }
        let _ = writeln!(out, "}}");
        Ok(out)
    }
}

/// `<name>_<version>`, with the dots of the version turned into underscores.
pub fn attr_name(record: &PackageRecord) -> String {
    let attr = format!("{}_{}", record.name, record.version.replace('.', "_"));
    if is_identifier(&attr) {
        attr
    } else {
        format!("\"{}\"", escape(&attr))
    }
}

/// Render one `callPackage` binding.
pub fn render_record(
    record: &PackageRecord,
    build_inputs: &[String],
    propagated_inputs: &[String],
) -> String {
    let setup: BTreeSet<String> = record
        .requirements
        .setup
        .iter()
        .map(|req| project_name(req))
        .chain(build_inputs.iter().cloned())
        .collect();
    let install: BTreeSet<String> = record
        .requirements
        .install
        .iter()
        .map(|req| project_name(req))
        .chain(propagated_inputs.iter().cloned())
        .collect();
    let mut args: BTreeSet<&str> = BTreeSet::from(["buildPythonPackage", "fetchurl"]);
    args.extend(setup.iter().map(String::as_str));
    args.extend(install.iter().map(String::as_str));

    let pname = record
        .metadata
        .get_str("name")
        .unwrap_or(record.name.as_str());
    let description = record.metadata.get_str("description");
    let license = record.metadata.get_str("license").and_then(nix_license);
    let digest_attr = match record.fetch.digest_algorithm {
        DigestAlg::Sha512 => "sha512",
        _ => "sha256",
    };

    let mut out = String::new();
    let _ = writeln!(out, "  {} = callPackage", attr_name(record));
    let _ = writeln!(out, "    ({{ {} }}:", args.into_iter().collect::<Vec<_>>().join(", "));
    let _ = writeln!(out, "     buildPythonPackage rec {{");
    let _ = writeln!(out, "       pname = \"{}\";", escape(pname));
    let _ = writeln!(out, "       version = \"{}\";", escape(&record.version));
    let _ = writeln!(out, "       src = fetchurl {{");
    let _ = writeln!(out, "         url = \"{}\";", escape(record.fetch.url.as_str()));
    let _ = writeln!(out, "         {digest_attr} = \"{}\";", escape(&record.fetch.digest));
    let _ = writeln!(out, "       }};");
    if record.fetch.is_wheel() {
        let _ = writeln!(out, "       format = \"wheel\";");
    }
    if !setup.is_empty() {
        let _ = writeln!(out, "       buildInputs = [ {} ];", join(&setup));
    }
    if !install.is_empty() {
        let _ = writeln!(out, "       propagatedBuildInputs = [ {} ];", join(&install));
    }
    let _ = writeln!(out, "       doCheck = false;");
    let _ = writeln!(out, "       meta = with lib; {{");
    if let Some(description) = description {
        let _ = writeln!(out, "         description = \"{}\";", escape(description));
    }
    if let Some(license) = license {
        let _ = writeln!(out, "         license = licenses.{license};");
    }
    let _ = writeln!(out, "       }};");
    let _ = writeln!(out, "     }}) {{ }};");
    out
}

fn join(inputs: &BTreeSet<String>) -> String {
    inputs.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}

/// The bare project name of a requirement string.
fn project_name(requirement: &str) -> String {
    match Requirement::parse(requirement) {
        Ok(req) => req.name.to_string(),
        Err(_) => {
            let end = requirement
                .find(|c: char| "<=>!~;[( @".contains(c))
                .unwrap_or(requirement.len());
            normalize_name(requirement[..end].trim())
        }
    }
}

/// Map a license string onto a `lib.licenses` attribute.
fn nix_license(license: &str) -> Option<&'static str> {
    let license = match license.trim() {
        "MIT" | "MIT License" => "mit",
        "BSD" | "BSD License" | "BSD-3-Clause" | "3-clause BSD" | "New BSD" => "bsd3",
        "BSD-2-Clause" | "Simplified BSD" => "bsd2",
        "Apache 2.0" | "Apache-2.0" | "Apache License 2.0" | "Apache License, Version 2.0"
        | "Apache Software License" => "asl20",
        "GPLv2" | "GPL-2.0" | "GPL-2.0-only" => "gpl2",
        "GPLv3" | "GPL-3.0" | "GPL-3.0-only" => "gpl3",
        "LGPL" | "LGPLv2.1" | "LGPL-2.1" => "lgpl21",
        "LGPLv3" | "LGPL-3.0" => "lgpl3",
        "MPL-2.0" | "MPL 2.0" | "Mozilla Public License 2.0 (MPL 2.0)" => "mpl20",
        "ISC" | "ISC License" => "isc",
        "PSF" | "PSFL" | "Python Software Foundation License" => "psfl",
        "ZPL 2.1" | "ZPL-2.1" => "zpl21",
        _ => return None,
    };
    Some(license)
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '\''))
}

/// Escape text for a double-quoted Nix string.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use pydex_metadata::{PackageRecord, Requirements};
    use serde_json::json;

    use super::*;

    fn record(value: serde_json::Value) -> PackageRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn renders_call_package_with_sorted_inputs() {
        let record = record(json!({
            "name": "pkg-a",
            "version": "1.0.0",
            "fetchurl": { "url": "https://files.example/pkg_a-1.0.0-py3-none-any.whl", "sha256": "abc" },
            "metadata": { "name": "Pkg_A", "description": "Says \"hi\" for ${USER}", "license": "MIT" },
            "requirements": {
                "setup": ["setuptools_scm>=3"],
                "install": ["six", "pkg-b>=2.0", "Six; python_version < \"3\""],
            },
        }));
        let text = render_record(&record, &["pytest".to_string()], &[]);
        let expected = r#"  pkg-a_1_0_0 = callPackage
    ({ buildPythonPackage, fetchurl, pkg-b, pytest, setuptools-scm, six }:
     buildPythonPackage rec {
       pname = "Pkg_A";
       version = "1.0.0";
       src = fetchurl {
         url = "https://files.example/pkg_a-1.0.0-py3-none-any.whl";
         sha256 = "abc";
       };
       format = "wheel";
       buildInputs = [ pytest setuptools-scm ];
       propagatedBuildInputs = [ pkg-b six ];
       doCheck = false;
       meta = with lib; {
         description = "Says \"hi\" for \${USER}";
         license = licenses.mit;
       };
     }) { };
"#;
        assert_eq!(text, expected);
    }

    #[test]
    fn unknown_license_and_missing_description_are_omitted() {
        let record = record(json!({
            "name": "pkg-b",
            "version": "2.1.0",
            "fetchurl": { "url": "https://files.example/pkg-b-2.1.0.tar.gz", "sha512": "ff" },
            "metadata": { "license": "Proprietary" },
        }));
        let text = render_record(&record, &[], &[]);
        assert!(text.contains("({ buildPythonPackage, fetchurl }:"));
        assert!(text.contains("sha512 = \"ff\";"));
        assert!(!text.contains("format"));
        assert!(!text.contains("license"));
        assert!(!text.contains("description"));
        assert!(!text.contains("buildInputs"));
        assert_eq!(record.requirements, Requirements::default());
    }

    #[test]
    fn document_wraps_records_and_rejects_clashes() {
        let a = record(json!({
            "name": "pkg-a",
            "version": "1.0+local.1",
            "fetchurl": { "url": "https://files.example/pkg-a-1.0.tar.gz", "sha256": "aa" },
        }));
        let backend = NixBackend::default();
        let text = backend.emit(&[a.clone(), a.clone()]).unwrap();
        assert!(text.starts_with("{ pkgs, lib, callPackage }:\n{\n"));
        assert!(text.ends_with("}\n"));
        assert_eq!(text.matches("callPackage\n").count(), 1);
        assert!(text.contains("  \"pkg-a_1_0+local_1\" = callPackage"));

        let mut b = a.clone();
        b.fetch.digest = "bb".into();
        let err = backend.emit(&[a, b]).unwrap_err();
        assert!(matches!(err, BackendError::DuplicateAttribute { .. }), "{err}");
    }
}
