//! End-to-end JSON-RPC over the HTTP router, the supervisor bus and the
//! tools subsystem, with a fake engine.

mod common;

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use sofa_mcp::subsystems::comms::{CommsState, ServerInfo, http};
use sofa_mcp::subsystems::tools::{Toolbox, ToolsSubsystem};
use sofa_mcp::supervisor::{self, bus::SupervisorBus, dispatch::BusHandler};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use common::{BOX_VTK, FakeRunner, config, write_file};

fn app(dir: &TempDir, runner: FakeRunner) -> Router {
    let cfg = config(dir.path());
    let toolbox = Arc::new(Toolbox::new(Arc::new(runner), &cfg));

    let bus = SupervisorBus::new(16);
    let handle = bus.handle.clone();
    let handlers: Vec<Box<dyn BusHandler>> = vec![Box::new(ToolsSubsystem::new(toolbox))];
    tokio::spawn(supervisor::run(bus, CancellationToken::new(), handlers));

    let comms = Arc::new(CommsState::new(
        handle,
        ServerInfo {
            name: "sofa-mcp-test".into(),
            version: "0.0.0".into(),
        },
    ));
    http::router("http-test", comms, "/mcp")
}

async fn post(app: &Router, body: Value) -> (StatusCode, Option<Value>) {
    let req = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        None
    } else {
        Some(serde_json::from_slice(&bytes).unwrap())
    };
    (status, json)
}

async fn call_tool(app: &Router, name: &str, arguments: Value) -> Value {
    let (status, body) = post(
        app,
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": name, "arguments": arguments}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body.unwrap()
}

#[tokio::test]
async fn health_reports_server_name() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, FakeRunner::new());

    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&to_bytes(resp.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["server"], "sofa-mcp-test");
}

#[tokio::test]
async fn handshake_and_tool_listing() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, FakeRunner::new());

    let (status, body) = post(
        &app,
        json!({"jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {"protocolVersion": "2025-03-26"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["result"]["capabilities"]["tools"]["listChanged"], false);

    let (status, body) = post(&app, json!({"jsonrpc": "2.0", "method": "notifications/initialized"})).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body.is_none());

    let (_, body) = post(&app, json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})).await;
    let tools = body.unwrap()["result"]["tools"].as_array().unwrap().clone();
    assert_eq!(tools.len(), 20);
    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    for expected in ["validate_scene", "mesh_stats", "run_math_script", "analyze_simulation_results"] {
        assert!(names.contains(&expected), "missing {expected}");
    }
    assert!(tools.iter().all(|t| t["inputSchema"]["type"] == "object"));
}

#[tokio::test]
async fn mesh_tool_returns_structured_content() {
    let dir = TempDir::new().unwrap();
    let mesh = write_file(dir.path(), "box.vtk", BOX_VTK.as_bytes());
    let app = app(&dir, FakeRunner::new());

    let body = call_tool(&app, "get_mesh_bounding_box", json!({"mesh_path": mesh.display().to_string()})).await;
    let result = &body["result"];
    assert_eq!(result["isError"], false);
    assert_eq!(result["structuredContent"]["min"], json!([0.0, 0.0, 0.0]));
    assert_eq!(result["structuredContent"]["max"], json!([2.0, 1.0, 1.0]));
    assert_eq!(result["content"][0]["type"], "text");
}

#[tokio::test]
async fn math_script_output_is_plain_text() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, FakeRunner::new().stdout("50\n").stdout("division by zero"));

    let ok = call_tool(&app, "run_math_script", json!({"script": "print(5 * 10)"})).await;
    assert_eq!(ok["result"]["content"][0]["text"], "50\n");
    assert!(ok["result"].get("structuredContent").is_none());

    let err = call_tool(&app, "run_math_script", json!({"script": "1 / 0"})).await;
    assert_eq!(err["result"]["content"][0]["text"], "division by zero");
}

#[tokio::test]
async fn validation_failure_is_a_result_not_a_protocol_error() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, FakeRunner::new());

    let body = call_tool(&app, "validate_scene", json!({"script_content": "print('hi')"})).await;
    assert!(body.get("error").is_none());
    let content = &body["result"]["structuredContent"];
    assert_eq!(content["success"], false);
    assert!(content["error"].as_str().unwrap().contains("add_scene_content(parent_node)"));
}

#[tokio::test]
async fn bad_arguments_and_unknown_tools() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, FakeRunner::new());

    let body = call_tool(&app, "mesh_stats", json!({"path": "wrong key"})).await;
    assert_eq!(body["result"]["isError"], true);
    assert_eq!(body["result"]["structuredContent"]["error"]["type"], "invalid_arguments");

    let body = call_tool(&app, "teleport", json!({})).await;
    assert_eq!(body["error"]["code"], -32602);
    assert_eq!(body["error"]["message"], "Unknown tool: teleport");
}
