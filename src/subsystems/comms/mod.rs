//! Comms subsystem: the client-facing transports.
//!
//! Each channel implements [`Component`] and is spawned by [`start`] via
//! [`spawn_components`]. Channels capture their shared [`Arc<CommsState>`] at
//! construction time. Exactly one channel runs, chosen by
//! `transport.mode`.

pub mod http;
pub mod rpc;
mod state;
pub mod stdio;

pub use state::{CommsState, ServerInfo};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{Config, TransportMode};
use crate::subsystems::runtime::{Component, SubsystemHandle, spawn_components};
use crate::supervisor::bus::BusHandle;

/// Spawn the configured transport and return its [`SubsystemHandle`].
///
/// Synchronous: returns as soon as the task is spawned.
pub fn start(config: &Config, bus: BusHandle, shutdown: CancellationToken) -> SubsystemHandle {
    let info = ServerInfo {
        name: config.server_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let state = Arc::new(CommsState::new(bus, info));

    let component: Box<dyn Component> = match config.transport.mode {
        TransportMode::Http => {
            info!(bind = %config.transport.bind, path = %config.transport.path, "loading http channel");
            Box::new(http::HttpChannel::new(
                "http0",
                config.transport.bind.clone(),
                config.transport.path.clone(),
                state,
            ))
        }
        TransportMode::Stdio => {
            info!("loading stdio channel");
            Box::new(stdio::StdioChannel::new("stdio0", state))
        }
    };

    spawn_components(vec![component], shutdown)
}
