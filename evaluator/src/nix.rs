use std::{ffi::OsString, future::Future, path::PathBuf, pin::Pin, process::Stdio};

use pydex_metadata::{ArtifactRef, PackageRecord};
use tokio::process::Command;

use crate::{Error, Evaluate, normalize_records, parse_records};

/// Output links are `<out_dir>/result`, `<out_dir>/result-2`, ...
const RESULT_PREFIX: &str = "result";

#[derive(Clone, Debug)]
pub struct NixEvaluatorOptions {
    pub program: PathBuf,
    /// Expression passed to `nix build -f`.
    pub expr: String,
    /// Directory of evaluation expressions, exposed to `expr` as `<pypi/...>`.
    pub nix_path: Option<PathBuf>,
    pub out_dir: PathBuf,
    pub keep_going: bool,
}

impl Default for NixEvaluatorOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from("nix"),
            expr: "<pypi/setup.nix>".to_string(),
            nix_path: None,
            out_dir: PathBuf::from("build"),
            keep_going: true,
        }
    }
}

/// Evaluates a batch with a single `nix build`, one output link per artifact.
#[derive(Clone, Debug, Default)]
pub struct NixEvaluator {
    options: NixEvaluatorOptions,
}

impl NixEvaluator {
    pub fn new(options: NixEvaluatorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &NixEvaluatorOptions {
        &self.options
    }

    fn command_args(&self, inputs: &str) -> Vec<OsString> {
        let options = &self.options;
        let mut args: Vec<OsString> = vec!["build".into()];
        if options.keep_going {
            args.extend(["--option", "keep-going", "true"].map(OsString::from));
        }
        if let Some(nix_path) = &options.nix_path {
            let mut entry = OsString::from("pypi=");
            entry.push(nix_path);
            args.extend([OsString::from("-I"), entry]);
        }
        args.extend([
            OsString::from("-f"),
            OsString::from(&options.expr),
            OsString::from("-o"),
            options.out_dir.join(RESULT_PREFIX).into_os_string(),
            OsString::from("--argstr"),
            OsString::from("inputs"),
            OsString::from(inputs),
        ]);
        args
    }

    /// Output links currently in the out dir, sorted by name.
    async fn result_files(&self) -> Result<Vec<PathBuf>, Error> {
        let mut found = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.options.out_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(RESULT_PREFIX))
            {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }

    pub async fn evaluate(&self, batch: &[ArtifactRef]) -> Result<Vec<PackageRecord>, Error> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        for stale in self.result_files().await? {
            tokio::fs::remove_file(&stale).await?;
        }
        tokio::fs::create_dir_all(&self.options.out_dir).await?;

        let program = self.options.program.display().to_string();
        let inputs = serde_json::to_string(batch)?;
        tracing::debug!(%program, artifacts = batch.len(), "running nix build");
        let output = Command::new(&self.options.program)
            .args(self.command_args(&inputs))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| Error::Spawn {
                program: program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(Error::Failed {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let mut values = Vec::new();
        for path in self.result_files().await? {
            let text = tokio::fs::read_to_string(&path).await?;
            values.extend(parse_records(&text)?);
        }
        normalize_records(values, batch)
    }
}

impl Evaluate for NixEvaluator {
    fn evaluate<'a>(
        &'a self,
        batch: &'a [ArtifactRef],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PackageRecord>, Error>> + Send + 'a>> {
        Box::pin(NixEvaluator::evaluate(self, batch))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{NixEvaluator, NixEvaluatorOptions};

    #[test]
    fn builds_the_nix_command_line() {
        let evaluator = NixEvaluator::new(NixEvaluatorOptions {
            nix_path: Some(PathBuf::from("/opt/pypi/nix")),
            out_dir: PathBuf::from("/tmp/out"),
            ..Default::default()
        });
        let args: Vec<String> = evaluator
            .command_args("[]")
            .into_iter()
            .map(|arg| arg.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            [
                "build",
                "--option",
                "keep-going",
                "true",
                "-I",
                "pypi=/opt/pypi/nix",
                "-f",
                "<pypi/setup.nix>",
                "-o",
                "/tmp/out/result",
                "--argstr",
                "inputs",
                "[]",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reads_every_result_link_and_clears_stale_ones() {
        use std::{fs, os::unix::fs::PermissionsExt as _};

        use crate::tests::artifact;

        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("build");
        fs::create_dir_all(&out_dir).unwrap();
        fs::write(out_dir.join("result-9"), r#"{"error":"stale"}"#).unwrap();

        // Stands in for `nix build`: one output file per artifact.
        let program = dir.path().join("fake-nix");
        fs::write(
            &program,
            r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
printf '%s' '{"metadata":{"name":"pkg-a","version":"1.0.0"},"options":{"install_requires":"pkg-b>=2.0"}}' > "$out"
printf '%s' '{"metadata":{"name":"pkg-b","version":"2.1.0"}}' > "$out-2"
"#,
        )
        .unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

        let evaluator = NixEvaluator::new(NixEvaluatorOptions {
            program,
            out_dir: out_dir.clone(),
            ..Default::default()
        });
        let batch = [artifact("pkg-a", "1.0.0"), artifact("pkg-b", "2.1.0")];
        let records = evaluator.evaluate(&batch).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].pin(), "pkg-a==1.0.0");
        assert_eq!(records[0].requirements.install, vec!["pkg-b>=2.0"]);
        assert_eq!(records[1].pin(), "pkg-b==2.1.0");
        assert!(!out_dir.join("result-9").exists());
    }
}
