//! Supervisor: owns the bus receiver and routes each message to the
//! subsystem registered for its method prefix.

pub mod bus;
pub mod dispatch;

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use bus::{BusError, BusMessage, ERR_METHOD_NOT_FOUND, SupervisorBus};
use dispatch::BusHandler;

/// Run the supervisor message loop until `shutdown` is cancelled or every
/// bus handle is dropped.
///
/// # Panics
///
/// Panics on startup if two handlers share the same prefix.
pub async fn run(bus: SupervisorBus, shutdown: CancellationToken, handlers: Vec<Box<dyn BusHandler>>) {
    let mut table: HashMap<String, Box<dyn BusHandler>> = HashMap::new();
    for h in handlers {
        let prefix = h.prefix().to_string();
        debug!(%prefix, "registering bus handler");
        if table.insert(prefix.clone(), h).is_some() {
            panic!("duplicate BusHandler prefix registered: {prefix:?}");
        }
    }

    // Transports hold the only live senders from here on.
    let SupervisorBus { mut rx, handle } = bus;
    drop(handle);

    info!(handlers = ?table.keys().collect::<Vec<_>>(), "supervisor ready");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("supervisor shutting down");
                break;
            }

            msg = rx.recv() => {
                match msg {
                    Some(BusMessage::Request { id, method, payload, reply_tx }) => {
                        let prefix = method.split('/').next().unwrap_or_default();
                        match table.get(prefix) {
                            Some(handler) => {
                                debug!(%id, %method, "routing request");
                                trace!(%id, payload = ?payload, "request payload");
                                handler.handle_request(&method, payload, reply_tx);
                            }
                            None => {
                                warn!(%id, %method, "unhandled request method");
                                let _ = reply_tx.send(Err(BusError::new(
                                    ERR_METHOD_NOT_FOUND,
                                    format!("method not found: {method}"),
                                )));
                            }
                        }
                    }
                    Some(BusMessage::Notification { method, payload }) => {
                        let prefix = method.split('/').next().unwrap_or_default();
                        match table.get(prefix) {
                            Some(handler) => {
                                debug!(%method, "routing notification");
                                handler.handle_notification(&method, payload);
                            }
                            None => debug!(%method, "unhandled notification"),
                        }
                    }
                    None => {
                        info!("bus closed, supervisor exiting");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use tokio::sync::oneshot;

    use super::*;
    use crate::supervisor::bus::{BusPayload, BusResult};

    /// Records notifications and answers `tools/list` with an empty catalog.
    #[derive(Default)]
    struct Recorder {
        notes: Arc<Mutex<Vec<String>>>,
    }

    impl BusHandler for Recorder {
        fn prefix(&self) -> &str {
            "tools"
        }

        fn handle_request(&self, method: &str, _payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
            let _ = reply_tx.send(Ok(BusPayload::Json {
                data: json!({ "method": method, "tools": [] }),
            }));
        }

        fn handle_notification(&self, method: &str, _payload: BusPayload) {
            self.notes.lock().unwrap().push(method.to_string());
        }
    }

    #[tokio::test]
    async fn routes_by_first_segment() {
        let bus = SupervisorBus::new(8);
        let handle = bus.handle.clone();
        let shutdown = CancellationToken::new();
        let recorder = Recorder::default();
        let notes = recorder.notes.clone();
        let task = tokio::spawn(run(bus, shutdown.clone(), vec![Box::new(recorder)]));

        match handle.request("tools/list", BusPayload::ToolList).await.unwrap() {
            Ok(BusPayload::Json { data }) => assert_eq!(data["method"], "tools/list"),
            other => panic!("unexpected reply: {other:?}"),
        }

        let missing = handle.request("resources/list", BusPayload::Empty).await.unwrap().unwrap_err();
        assert_eq!(missing.code, ERR_METHOD_NOT_FOUND);

        handle.notify("tools/refresh", BusPayload::Empty).unwrap();
        handle.notify("notifications/initialized", BusPayload::Empty).unwrap();
        // A request after the notifications guarantees they were processed.
        handle.request("tools/list", BusPayload::ToolList).await.unwrap().unwrap();
        assert_eq!(*notes.lock().unwrap(), vec!["tools/refresh".to_string()]);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn exits_when_every_handle_is_dropped() {
        let bus = SupervisorBus::new(8);
        let handle = bus.handle.clone();
        let task = tokio::spawn(run(bus, CancellationToken::new(), Vec::new()));
        drop(handle);
        task.await.unwrap();
    }
}
