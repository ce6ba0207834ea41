//! Supervisor event bus — typed request/notification channel between the
//! transports and the subsystems.
//!
//! Transports hold a cloneable [`BusHandle`] and call [`BusHandle::request`];
//! the supervisor owns the receiving end in [`SupervisorBus`] and routes each
//! [`BusMessage`] by its method prefix.

use std::{
    error::Error,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

// ── Error codes (JSON-RPC compatible) ─────────────────────────────────────────

pub const ERR_INVALID_PAYLOAD: i32 = -32600;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_INTERNAL: i32 = -32603;

/// Error returned by a handler in place of a payload.
#[derive(Debug, Clone, PartialEq)]
pub struct BusError {
    pub code: i32,
    pub message: String,
}

impl BusError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus error {}: {}", self.code, self.message)
    }
}

impl Error for BusError {}

// ── Payloads ──────────────────────────────────────────────────────────────────

/// Typed payloads carried in both directions over the bus.
#[derive(Debug, Clone)]
pub enum BusPayload {
    /// Request the tool catalog.
    ToolList,
    /// Execute one tool with JSON arguments.
    ToolCall { name: String, arguments: Value },
    /// Generic JSON response body.
    Json { data: Value },
    /// No content.
    Empty,
}

pub type BusResult = Result<BusPayload, BusError>;

/// Messages delivered to the supervisor loop.
#[derive(Debug)]
pub enum BusMessage {
    Request {
        id: u64,
        method: String,
        payload: BusPayload,
        reply_tx: oneshot::Sender<BusResult>,
    },
    Notification {
        method: String,
        payload: BusPayload,
    },
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Client-facing handle for the bus. Cheap to clone.
#[derive(Clone)]
pub struct BusHandle {
    tx: mpsc::Sender<BusMessage>,
    next_id: Arc<AtomicU64>,
}

impl BusHandle {
    pub fn new(tx: mpsc::Sender<BusMessage>) -> Self {
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Send a request and wait for the handler's reply.
    pub async fn request(
        &self,
        method: impl Into<String>,
        payload: BusPayload,
    ) -> Result<BusResult, BusCallError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(BusMessage::Request {
                id,
                method: method.into(),
                payload,
                reply_tx,
            })
            .await
            .map_err(|_| BusCallError::Send)?;

        reply_rx.await.map_err(|_| BusCallError::Recv)
    }

    /// Fire-and-forget notification. Fails fast when the queue is full.
    pub fn notify(&self, method: impl Into<String>, payload: BusPayload) -> Result<(), BusCallError> {
        self.tx
            .try_send(BusMessage::Notification {
                method: method.into(),
                payload,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => BusCallError::Full,
                mpsc::error::TrySendError::Closed(_) => BusCallError::Send,
            })
    }
}

/// Owns the supervisor-side bus receiver.
pub struct SupervisorBus {
    pub rx: mpsc::Receiver<BusMessage>,
    pub handle: BusHandle,
}

impl SupervisorBus {
    pub fn new(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        Self {
            rx,
            handle: BusHandle::new(tx),
        }
    }
}

/// Call-level transport errors for bus requests/notifications.
#[derive(Debug)]
pub enum BusCallError {
    Send,
    Recv,
    Full,
}

impl fmt::Display for BusCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusCallError::Send => write!(f, "bus send failed: supervisor is not running"),
            BusCallError::Recv => write!(f, "bus recv failed: handler dropped reply sender"),
            BusCallError::Full => write!(f, "bus queue full"),
        }
    }
}

impl Error for BusCallError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_round_trips_through_receiver() {
        let mut bus = SupervisorBus::new(4);
        let handle = bus.handle.clone();

        let responder = tokio::spawn(async move {
            match bus.rx.recv().await {
                Some(BusMessage::Request { method, reply_tx, .. }) => {
                    assert_eq!(method, "tools/list");
                    let _ = reply_tx.send(Ok(BusPayload::Empty));
                }
                other => panic!("unexpected message: {other:?}"),
            }
        });

        let result = handle.request("tools/list", BusPayload::ToolList).await.unwrap();
        assert!(matches!(result, Ok(BusPayload::Empty)));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn request_ids_increase() {
        let mut bus = SupervisorBus::new(4);
        let handle = bus.handle.clone();

        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(BusMessage::Request { id, reply_tx, .. }) = bus.rx.recv().await {
                seen.push(id);
                let _ = reply_tx.send(Ok(BusPayload::Json { data: Value::from(id) }));
            }
        });

        let first = handle.request("x", BusPayload::Empty).await.unwrap().unwrap();
        let second = handle.request("x", BusPayload::Empty).await.unwrap().unwrap();
        match (first, second) {
            (BusPayload::Json { data: a }, BusPayload::Json { data: b }) => {
                assert!(b.as_u64().unwrap() > a.as_u64().unwrap());
            }
            other => panic!("unexpected payloads: {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_fails_when_supervisor_gone() {
        let bus = SupervisorBus::new(1);
        let handle = bus.handle.clone();
        drop(bus);
        let err = handle.request("tools/list", BusPayload::ToolList).await.unwrap_err();
        assert!(matches!(err, BusCallError::Send));
    }

    #[test]
    fn notify_reports_full_queue() {
        let bus = SupervisorBus::new(1);
        bus.handle.notify("a", BusPayload::Empty).unwrap();
        let err = bus.handle.notify("a", BusPayload::Empty).unwrap_err();
        assert!(matches!(err, BusCallError::Full));
    }

    #[test]
    fn bus_error_display_includes_code() {
        let e = BusError::new(ERR_METHOD_NOT_FOUND, "method not found: nope");
        assert_eq!(e.to_string(), "bus error -32601: method not found: nope");
    }
}
