//! Terminal proxy: a bidirectional WebSocket bridge between a client
//! and a container's PTY on its node.
//!
//! The proxy resolves the node, swaps the URL scheme (http→ws,
//! https→wss), dials `{ws_url}/ws/terminal/{container_id}`, and runs
//! both directions concurrently, forwarding frames verbatim. Either
//! side's disconnect tears down both halves. The connection gauge is
//! incremented on accept and decremented on every exit path.

use axum::extract::ws::{CloseFrame, Message as ClientMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use metrics::gauge;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as NodeMessage;
use tracing::{debug, info, warn};

use crate::metrics::WEBSOCKET_CONNECTIONS;
use crate::server::AppState;

/// Application close code sent when the requested node is unknown.
const CLOSE_UNKNOWN_NODE: u16 = 4004;

/// Derive the node's terminal WebSocket URL from its registered HTTP
/// URL.
pub fn terminal_ws_url(node_url: &str, container_id: &str) -> String {
    let base = node_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        format!("ws://{}", base)
    };
    format!("{}/ws/terminal/{}", ws_base, container_id)
}

pub async fn terminal_proxy(
    State(state): State<AppState>,
    Path((node_id, container_id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_session(state, socket, node_id, container_id))
}

async fn handle_session(state: AppState, socket: WebSocket, node_id: String, container_id: String) {
    gauge!(WEBSOCKET_CONNECTIONS).increment(1.0);
    info!(node_id, container_id, "terminal session opened");

    run_session(state, socket, &node_id, &container_id).await;

    gauge!(WEBSOCKET_CONNECTIONS).decrement(1.0);
    info!(node_id, container_id, "terminal session closed");
}

async fn run_session(state: AppState, mut client: WebSocket, node_id: &str, container_id: &str) {
    let node = match state.catalog.get_node(node_id).await {
        Ok(Some(node)) => node,
        Ok(None) => {
            warn!(node_id, "terminal requested for unknown node");
            let _ = client
                .send(ClientMessage::Close(Some(CloseFrame {
                    code: CLOSE_UNKNOWN_NODE,
                    reason: "Node not found".into(),
                })))
                .await;
            return;
        }
        Err(e) => {
            warn!(node_id, error = %e, "catalog lookup failed for terminal");
            let _ = client.send(ClientMessage::Close(None)).await;
            return;
        }
    };

    let node_ws_url = terminal_ws_url(&node.url, container_id);
    let node_socket = match connect_async(node_ws_url.as_str()).await {
        Ok((socket, _)) => socket,
        Err(e) => {
            warn!(node_id, url = %node_ws_url, error = %e, "failed to dial node terminal");
            let _ = client.send(ClientMessage::Close(None)).await;
            return;
        }
    };
    debug!(node_id, container_id, "connected to node terminal");

    let (mut node_tx, mut node_rx) = node_socket.split();
    let (mut client_tx, mut client_rx) = client.split();

    let client_to_node = async {
        while let Some(message) = client_rx.next().await {
            let message = match message {
                Ok(message) => message,
                Err(_) => break,
            };
            let forwarded = match message {
                ClientMessage::Text(text) => NodeMessage::Text(text.as_str().into()),
                ClientMessage::Binary(bytes) => NodeMessage::Binary(bytes),
                ClientMessage::Close(_) => break,
                // Axum answers pings itself; nothing to forward.
                ClientMessage::Ping(_) | ClientMessage::Pong(_) => continue,
            };
            if node_tx.send(forwarded).await.is_err() {
                break;
            }
        }
    };

    let node_to_client = async {
        while let Some(message) = node_rx.next().await {
            let message = match message {
                Ok(message) => message,
                Err(_) => break,
            };
            let forwarded = match message {
                NodeMessage::Text(text) => ClientMessage::Text(text.as_str().into()),
                NodeMessage::Binary(bytes) => ClientMessage::Binary(bytes),
                NodeMessage::Close(_) => break,
                NodeMessage::Ping(_) | NodeMessage::Pong(_) => continue,
                NodeMessage::Frame(_) => continue,
            };
            if client_tx.send(forwarded).await.is_err() {
                break;
            }
        }
    };

    // Whichever direction ends first cancels the other; dropping the
    // halves closes both sockets.
    tokio::select! {
        _ = client_to_node => {}
        _ = node_to_client => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_from_http() {
        assert_eq!(
            terminal_ws_url("http://10.0.0.5:9000", "c-abc"),
            "ws://10.0.0.5:9000/ws/terminal/c-abc"
        );
    }

    #[test]
    fn test_ws_url_from_https() {
        assert_eq!(
            terminal_ws_url("https://worker.internal:9000", "c-abc"),
            "wss://worker.internal:9000/ws/terminal/c-abc"
        );
    }

    #[test]
    fn test_ws_url_trailing_slash() {
        assert_eq!(
            terminal_ws_url("http://10.0.0.5:9000/", "c-abc"),
            "ws://10.0.0.5:9000/ws/terminal/c-abc"
        );
    }

    #[test]
    fn test_ws_url_bare_host() {
        assert_eq!(
            terminal_ws_url("10.0.0.5:9000", "c-abc"),
            "ws://10.0.0.5:9000/ws/terminal/c-abc"
        );
    }
}
