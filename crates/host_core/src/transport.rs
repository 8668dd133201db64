use std::sync::Arc;

use anyhow::{bail, Result};
use futures::StreamExt;
use shared::protocol::ChannelEvent;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::RoomEngine;

/// Derives the websocket url of the room channel from the server's base url.
pub fn channel_ws_url(server_url: &str) -> Result<String> {
    let server_url = server_url.trim_end_matches('/');
    let base = if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        bail!("unsupported server url scheme: {server_url}");
    };
    Ok(format!("{base}/room/channel"))
}

/// Connects to the room channel and feeds frames to the engine in arrival
/// order. The task ends when the server closes the stream or the socket
/// errors; a malformed frame is skipped, not fatal.
pub async fn spawn_channel_listener(
    engine: Arc<RoomEngine>,
    ws_url: &str,
) -> Result<JoinHandle<()>> {
    let (stream, _) = connect_async(ws_url).await?;
    info!(url = %ws_url, "channel: connected");
    let (_, mut read) = stream.split();

    Ok(tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(raw)) => match serde_json::from_str::<ChannelEvent>(&raw) {
                    Ok(event) => engine.apply_event(event).await,
                    Err(err) => {
                        warn!("channel: invalid channel event, skipping frame: {err}");
                        engine.emit_error(format!("invalid channel event: {err}"));
                    }
                },
                Ok(Message::Close(_)) => {
                    info!("channel: server closed the stream");
                    break;
                }
                Ok(other) => {
                    debug!("channel: ignoring non-text frame: {other:?}");
                }
                Err(err) => {
                    warn!("channel: socket error, stopping listener: {err}");
                    engine.emit_error(format!("channel socket error: {err}"));
                    break;
                }
            }
        }
    }))
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
