//! Shared state for the comms subsystem: the capability boundary for channels.
//!
//! Channels receive an `Arc<CommsState>` and are restricted to the typed
//! methods below. The raw [`BusHandle`] is private; channels cannot call
//! arbitrary bus methods.

use serde_json::Value;
use tracing::{debug, warn};

use crate::supervisor::bus::{BusError, BusHandle, BusPayload, ERR_INTERNAL};

/// Identity reported in the MCP `initialize` handshake.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

pub struct CommsState {
    bus: BusHandle,
    info: ServerInfo,
}

impl CommsState {
    pub fn new(bus: BusHandle, info: ServerInfo) -> Self {
        Self { bus, info }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// The tool catalog as a `{ "tools": [...] }` object.
    pub async fn list_tools(&self) -> Result<Value, BusError> {
        self.json_request("tools/list", BusPayload::ToolList).await
    }

    /// Execute one tool; the reply is an MCP `tools/call` result body.
    pub async fn call_tool(&self, name: String, arguments: Value) -> Result<Value, BusError> {
        self.json_request("tools/call", BusPayload::ToolCall { name, arguments }).await
    }

    /// Forward a client notification. Dropped with a warning when the bus is busy.
    pub fn notify(&self, method: &str, params: Option<Value>) {
        let payload = match params {
            Some(data) => BusPayload::Json { data },
            None => BusPayload::Empty,
        };
        if let Err(e) = self.bus.notify(method, payload) {
            warn!(%method, "notification dropped: {e}");
        }
    }

    async fn json_request(&self, method: &str, payload: BusPayload) -> Result<Value, BusError> {
        match self.bus.request(method, payload).await {
            Err(e) => Err(BusError::new(ERR_INTERNAL, e.to_string())),
            Ok(Err(e)) => Err(e),
            Ok(Ok(BusPayload::Json { data })) => Ok(data),
            Ok(Ok(other)) => {
                debug!(%method, reply = ?other, "unexpected reply payload");
                Err(BusError::new(ERR_INTERNAL, "unexpected reply payload"))
            }
        }
    }
}
