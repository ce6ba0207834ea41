//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use serde_json::Value;
use sofa_mcp::config::Config;
use sofa_mcp::engine::{EngineError, RESULT_MARKER, RunFuture, RunOutput, RunRequest, ScriptRunner};

/// Fake helper runner replaying canned outputs in call order.
#[derive(Default)]
pub struct FakeRunner {
    replies: Mutex<VecDeque<Result<RunOutput, ()>>>,
    pub seen: Mutex<Vec<RunRequest>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdout(self, stdout: &str) -> Self {
        self.replies.lock().unwrap().push_back(Ok(RunOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }));
        self
    }

    pub fn result(self, payload: Value) -> Self {
        self.stdout(&format!("{RESULT_MARKER}{payload}\n"))
    }

    pub fn failure(self, code: i32, stderr: &str) -> Self {
        self.replies.lock().unwrap().push_back(Ok(RunOutput {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }));
        self
    }

    pub fn timeout(self) -> Self {
        self.replies.lock().unwrap().push_back(Err(()));
        self
    }

    pub fn labels(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|r| r.label.clone()).collect()
    }
}

impl ScriptRunner for FakeRunner {
    fn run(&self, request: RunRequest) -> RunFuture<'_> {
        let label = request.label.clone();
        let after = request.timeout;
        self.seen.lock().unwrap().push(request);
        let next = self.replies.lock().unwrap().pop_front();
        Box::pin(async move {
            match next {
                Some(Ok(out)) => Ok(out),
                Some(Err(())) => Err(EngineError::Timeout { label, after }),
                None => panic!("FakeRunner: no reply queued for '{label}'"),
            }
        })
    }
}

pub fn config(work_dir: &Path) -> Config {
    Config::test_default(work_dir)
}

pub fn shared(runner: FakeRunner) -> Arc<FakeRunner> {
    Arc::new(runner)
}

/// Write `content` to `dir/name` and return the path.
pub fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// A 2x1x1 box as eight points and twelve triangles, legacy ASCII VTK.
pub const BOX_VTK: &str = "\
# vtk DataFile Version 3.0
box
ASCII
DATASET POLYDATA
POINTS 8 float
0 0 0  2 0 0  2 1 0  0 1 0
0 0 1  2 0 1  2 1 1  0 1 1
POLYGONS 12 48
3 0 1 2
3 0 2 3
3 4 5 6
3 4 6 7
3 0 1 5
3 0 5 4
3 1 2 6
3 1 6 5
3 2 3 7
3 2 7 6
3 3 0 4
3 3 4 7
";

pub const TETRA_OBJ: &str = "\
# tetrahedron
v -1.5 0 0
v 1 0 0
v 0 3 0
v 0 0 0.25
f 1 2 3
f 1 2 4
f 2 3 4
f 1 3 4
";
