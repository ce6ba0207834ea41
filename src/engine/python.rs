use std::{path::PathBuf, process::Stdio, time::Instant};

use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, warn};

use super::{EngineError, RunFuture, RunOutput, RunRequest, ScriptRunner};

/// Runs helper scripts with the configured Python interpreter.
///
/// Each call writes the helper to a temporary `.py` file, spawns the
/// interpreter with piped streams and waits under the request's timeout.
/// The child is killed when the wait is abandoned.
#[derive(Debug, Clone)]
pub struct PythonRunner {
    python: PathBuf,
}

impl PythonRunner {
    pub fn new(python: PathBuf) -> Self {
        Self { python }
    }

    async fn execute(&self, request: RunRequest) -> Result<RunOutput, EngineError> {
        let started = Instant::now();

        let script = tempfile::Builder::new()
            .prefix("sofa_mcp_")
            .suffix(".py")
            .tempfile()?;
        tokio::fs::write(script.path(), request.script).await?;

        let mut cmd = Command::new(&self.python);
        cmd.arg(script.path())
            .args(&request.args)
            .stdin(if request.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| EngineError::Spawn {
            python: self.python.display().to_string(),
            source,
        })?;

        let input = request.stdin.clone();
        let stdin = child.stdin.take();
        let wait = async move {
            if let (Some(input), Some(mut stdin)) = (input, stdin) {
                // The helper may exit before reading everything; its output still matters.
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!("helper closed stdin early: {e}");
                }
                drop(stdin);
            }
            child.wait_with_output().await
        };

        // On timeout the wait future is dropped with the child, which kills it.
        let output = match tokio::time::timeout(request.timeout, wait).await {
            Ok(res) => res?,
            Err(_) => {
                warn!(helper = %request.label, timeout_s = request.timeout.as_secs(), "helper timed out, killed");
                return Err(EngineError::Timeout {
                    label: request.label,
                    after: request.timeout,
                });
            }
        };

        let out = RunOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(
            helper = %request.label,
            exit_code = ?out.exit_code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "helper finished"
        );

        Ok(out)
    }
}

impl ScriptRunner for PythonRunner {
    fn run(&self, request: RunRequest) -> RunFuture<'_> {
        Box::pin(self.execute(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn missing_interpreter_is_a_spawn_error() {
        let runner = PythonRunner::new(PathBuf::from("/nonexistent/bin/python"));
        let req = RunRequest::new("probe", "print('hi')\n", Duration::from_secs(5));
        let err = runner.run(req).await.unwrap_err();
        assert!(matches!(err, EngineError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/bin/python"));
    }
}
