//! Scene validation, writing and patching through the public service.

mod common;

use std::sync::Arc;

use serde_json::json;
use sofa_mcp::scene::{SceneError, SceneService};
use tempfile::TempDir;

use common::{FakeRunner, config};

const FRAGMENT: &str = "\
def add_scene_content(parent_node):
    body = parent_node.addChild('Body')
    body.addObject('MechanicalObject', name='mo', template='Vec3d')
";

fn service(dir: &TempDir, runner: FakeRunner) -> (SceneService, Arc<FakeRunner>) {
    let cfg = config(dir.path());
    let runner = Arc::new(runner);
    (SceneService::new(runner.clone(), &cfg.scene, &cfg.engine), runner)
}

#[tokio::test]
async fn missing_callback_is_reported_without_running_the_engine() {
    let dir = TempDir::new().unwrap();
    let (scenes, runner) = service(&dir, FakeRunner::new());

    let err = scenes.validate("x = 1\n").await.unwrap_err();
    assert!(matches!(err, SceneError::MissingCallback));
    let body = err.to_json();
    assert_eq!(body["success"], false);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("must define a function called 'add_scene_content(parent_node)'")
    );
    assert!(runner.labels().is_empty());
}

#[tokio::test]
async fn write_and_test_saves_only_after_validation() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("scenes/good.py");
    let (scenes, runner) = service(&dir, FakeRunner::new().stdout("step ok\n").failure(1, "Traceback: boom"));

    let report = scenes
        .write_and_test(FRAGMENT, &out.display().to_string())
        .await
        .unwrap();
    assert!(report.success);
    assert_eq!(report.stdout.as_deref(), Some("step ok\n"));
    let written = std::fs::read_to_string(&out).unwrap();
    assert!(written.contains("def createScene"));
    assert!(written.contains("addObject('MechanicalObject', name='mo'"));

    let bad = dir.path().join("scenes/bad.py");
    let err = scenes
        .write_and_test(FRAGMENT, &bad.display().to_string())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Traceback: boom");
    assert!(!bad.exists());
    assert_eq!(runner.labels(), vec!["scene-validate", "scene-validate"]);
}

#[tokio::test]
async fn anchor_patch_inserts_text_next_to_the_anchor() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scene.py");
    std::fs::write(&path, "root.addObject('A')\n# marker\nroot.addObject('B')\n").unwrap();
    let (scenes, _) = service(&dir, FakeRunner::new());

    let report = scenes
        .patch(
            &path.display().to_string(),
            &json!([
                {"op": "insert_after", "anchor": "# marker\n", "text": "root.addObject('C')\n"},
                {"op": "insert_before", "anchor": "# marker", "text": "# before\n"},
            ]),
        )
        .await
        .unwrap();
    assert_eq!(report.applied_ops, 2);

    let patched = std::fs::read_to_string(&path).unwrap();
    assert_eq!(
        patched,
        "root.addObject('A')\n# before\n# marker\nroot.addObject('C')\nroot.addObject('B')\n"
    );
    assert_eq!(report.size_bytes, patched.len() as u64);
}

#[tokio::test]
async fn absent_anchor_leaves_the_file_untouched() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scene.py");
    let original = "root.addObject('A')\n";
    std::fs::write(&path, original).unwrap();
    let (scenes, _) = service(&dir, FakeRunner::new());

    let err = scenes
        .patch(
            &path.display().to_string(),
            &json!([
                {"op": "append", "text": "# tail\n"},
                {"op": "insert_after", "anchor": "no such line", "text": "x"},
            ]),
        )
        .await
        .unwrap_err();
    let body = err.to_json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "insert anchor not found");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
}

#[tokio::test]
async fn update_field_rewrites_one_keyword() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scene.py");
    std::fs::write(&path, "node.addObject('MechanicalObject', name='mo', position=[0, 0, 0])\n").unwrap();
    let (scenes, _) = service(&dir, FakeRunner::new());

    let report = scenes
        .update_field(&path.display().to_string(), "mo", "position", &json!([1, 2, 3]))
        .await
        .unwrap();
    assert_eq!(report.action, "replaced");
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("position=[1, 2, 3]"), "{text}");
}
