//! Stdio channel: newline-delimited JSON-RPC on stdin/stdout.
//!
//! Stdout carries protocol messages only; logs go to stderr. Runs until the
//! shutdown token is cancelled or stdin is closed.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::subsystems::runtime::{Component, ComponentFuture};

use super::rpc;
use super::state::CommsState;

pub struct StdioChannel {
    channel_id: String,
    state: Arc<CommsState>,
}

impl StdioChannel {
    pub fn new(channel_id: impl Into<String>, state: Arc<CommsState>) -> Self {
        Self {
            channel_id: channel_id.into(),
            state,
        }
    }
}

impl Component for StdioChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(async move {
            let reader = BufReader::new(tokio::io::stdin());
            let writer = tokio::io::stdout();
            serve_lines(&self.channel_id, &self.state, reader, writer, shutdown).await?;
            info!(channel_id = %self.channel_id, "stdio channel stopped");
            Ok(())
        })
    }
}

/// Serve one JSON-RPC message per line until EOF or shutdown.
pub(crate) async fn serve_lines<R, W>(
    channel_id: &str,
    state: &CommsState,
    reader: R,
    mut writer: W,
    shutdown: CancellationToken,
) -> Result<(), AppError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!(%channel_id, "stdio channel started");
    let mut lines = reader.lines();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(%channel_id, "stdio channel shutting down");
                break;
            }

            line = lines.next_line() => {
                match line {
                    Err(e) => {
                        warn!(%channel_id, "stdin read error: {e}");
                        return Err(AppError::Io(e));
                    }
                    Ok(None) => {
                        info!(%channel_id, "stdin closed");
                        break;
                    }
                    Ok(Some(input)) => {
                        let input = input.trim();
                        if input.is_empty() {
                            continue;
                        }
                        debug!(%channel_id, bytes = input.len(), "stdio message");
                        if let Some(response) = rpc::handle_bytes(state, channel_id, input.as_bytes()).await {
                            let mut out = serde_json::to_vec(&response)
                                .map_err(|e| AppError::Transport(format!("could not encode response: {e}")))?;
                            out.push(b'\n');
                            writer.write_all(&out).await?;
                            writer.flush().await?;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
