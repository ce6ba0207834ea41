//! The seam between the supervisor and the subsystems it routes to.
//!
//! Bus methods are `"prefix/action"` strings. MCP method names already have
//! that shape (`tools/list`, `tools/call`, `notifications/initialized`), so a
//! transport forwards them unchanged and the supervisor picks the handler by
//! the first segment.

use tokio::sync::oneshot;

use crate::supervisor::bus::{BusPayload, BusResult};

/// A subsystem registered with the supervisor.
pub trait BusHandler: Send + Sync {
    /// The method prefix this handler owns, unique per supervisor.
    fn prefix(&self) -> &str;

    /// Answer a request through `reply_tx`.
    ///
    /// Runs on the supervisor loop: slow work (tool calls, engine helpers)
    /// must move `reply_tx` into a spawned task.
    fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>);

    /// Fire-and-forget message. Ignored unless overridden.
    fn handle_notification(&self, _method: &str, _payload: BusPayload) {}
}
