//! Plain-Python math sandbox.

use std::{sync::Arc, time::Duration};

use tracing::warn;

use crate::config::EngineConfig;
use crate::engine::{EngineError, RunRequest, ScriptRunner, scripts};

pub struct Sandbox {
    runner: Arc<dyn ScriptRunner>,
    timeout: Duration,
}

impl Sandbox {
    pub fn new(runner: Arc<dyn ScriptRunner>, engine: &EngineConfig) -> Self {
        Self {
            runner,
            timeout: engine.sandbox_timeout,
        }
    }

    /// Run `script` and return what it printed, or the exception message.
    pub async fn run_math_script(&self, script: &str) -> String {
        let req = RunRequest::new("sandbox", scripts::SANDBOX, self.timeout).stdin(script);
        match self.runner.run(req).await {
            Ok(out) if out.success() => out.stdout,
            Ok(out) => out.failure_text().to_string(),
            Err(EngineError::Timeout { after, .. }) => {
                format!("Error: script timed out after {}s", after.as_secs())
            }
            Err(e) => {
                warn!(error = %e, "sandbox helper failed");
                format!("Error: {e}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::testing::ScriptedRunner;
    use std::path::Path;

    fn sandbox(runner: ScriptedRunner) -> (Sandbox, Arc<ScriptedRunner>) {
        let cfg = Config::test_default(Path::new("/tmp"));
        let runner = Arc::new(runner);
        (Sandbox::new(runner.clone(), &cfg.engine), runner)
    }

    #[tokio::test]
    async fn returns_captured_stdout() {
        let (sb, runner) = sandbox(ScriptedRunner::new().ok("50\nHello, world!\n"));
        assert_eq!(sb.run_math_script("print(50)").await, "50\nHello, world!\n");
        assert_eq!(runner.seen.lock().unwrap()[0].stdin.as_deref(), Some("print(50)"));
    }

    #[tokio::test]
    async fn exception_text_is_the_result() {
        let (sb, _) = sandbox(ScriptedRunner::new().ok("division by zero"));
        assert_eq!(sb.run_math_script("print(1 / 0)").await, "division by zero");
    }

    #[tokio::test]
    async fn timeout_message() {
        let (sb, _) = sandbox(ScriptedRunner::new().timeout());
        assert_eq!(sb.run_math_script("while True: pass").await, "Error: script timed out after 30s");
    }
}
