// Library root. The binary entry point is src/main.rs; integration tests
// reach the internals through these modules.

pub mod config;
pub mod engine;
pub mod error;
pub mod logger;
pub mod mesh;
pub mod observer;
pub mod registry;
pub mod sandbox;
pub mod scene;
pub mod subsystems;
pub mod supervisor;
