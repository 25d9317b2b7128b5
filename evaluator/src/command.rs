use std::{ffi::OsString, future::Future, io, path::PathBuf, pin::Pin, process::Stdio};

use pydex_metadata::{ArtifactRef, PackageRecord};
use tokio::{io::AsyncWriteExt as _, process::Command};

use crate::{Error, Evaluate, normalize_records, parse_records};

/// Runs a program once per batch: the artifacts go to its stdin as a JSON
/// array, records come back on stdout.
#[derive(Clone, Debug)]
pub struct CommandEvaluator {
    program: PathBuf,
    args: Vec<OsString>,
}

impl CommandEvaluator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    pub async fn evaluate(&self, batch: &[ArtifactRef]) -> Result<Vec<PackageRecord>, Error> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let program = self.program.display().to_string();
        let input = serde_json::to_vec(batch)?;
        tracing::debug!(%program, artifacts = batch.len(), "running evaluator");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: program.clone(),
                source,
            })?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("evaluator stdin was not captured"))?;

        // Feed stdin while draining stdout so large batches cannot deadlock on a full pipe.
        let feed = async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;

        if !output.status.success() {
            return Err(Error::Failed {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if let Err(err) = fed
            && err.kind() != io::ErrorKind::BrokenPipe
        {
            return Err(err.into());
        }

        let stdout = String::from_utf8(output.stdout).map_err(|err| Error::Output {
            message: err.to_string(),
        })?;
        normalize_records(parse_records(&stdout)?, batch)
    }
}

impl Evaluate for CommandEvaluator {
    fn evaluate<'a>(
        &'a self,
        batch: &'a [ArtifactRef],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PackageRecord>, Error>> + Send + 'a>> {
        Box::pin(CommandEvaluator::evaluate(self, batch))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;

    use super::CommandEvaluator;
    use crate::{Error, tests::artifact};

    /// `sh <script>` avoids executing a file that was only just written.
    fn shell(script: &str) -> (tempfile::TempDir, CommandEvaluator) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evaluate.sh");
        fs::write(&path, script).unwrap();
        let evaluator = CommandEvaluator::new("/bin/sh").arg(path);
        (dir, evaluator)
    }

    #[tokio::test]
    async fn sends_batch_on_stdin_and_reads_json_lines() {
        let (dir, evaluator) = shell(
            r#"cat > "$(dirname "$0")/stdin.json"
printf '%s\n' '{"metadata":{"name":"pkg-a","version":"1.0.0"},"options":{"install_requires":["pkg-b >= 2.0"]}}'
printf '%s\n' '{"name":"pkg-b","version":"2.1.0","requires_dist":["six; extra == \"test\""]}'
"#,
        );
        let batch = [artifact("pkg-a", "1.0.0"), artifact("pkg-b", "2.1.0")];
        let records = evaluator.evaluate(&batch).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].requirements.install, vec!["pkg-b>=2.0"]);
        assert_eq!(records[1].requirements.extras["test"], vec!["six"]);
        assert_eq!(records[1].fetch, batch[1].fetch);

        let stdin: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("stdin.json")).unwrap())
                .unwrap();
        assert_eq!(stdin[0]["name"], "pkg-a");
        assert_eq!(stdin[1]["fetchurl"]["url"], "https://files.example/pkg-b-2.1.0.tar.gz");
    }

    #[tokio::test]
    async fn non_zero_exit_is_fatal() {
        let (_dir, evaluator) = shell("cat > /dev/null\necho 'boom' >&2\nexit 3\n");
        let err = evaluator
            .evaluate(&[artifact("pkg-a", "1.0.0")])
            .await
            .unwrap_err();
        let Error::Failed { stderr, .. } = err else {
            panic!("expected Failed, got {err}");
        };
        assert_eq!(stderr, "boom");
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let evaluator = CommandEvaluator::new("/nonexistent/pydex-evaluator");
        let err = evaluator
            .evaluate(&[artifact("pkg-a", "1.0.0")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }), "{err}");
    }

    #[tokio::test]
    async fn empty_batch_skips_the_process() {
        let evaluator = CommandEvaluator::new("/nonexistent/pydex-evaluator");
        assert!(evaluator.evaluate(&[]).await.unwrap().is_empty());
    }
}
