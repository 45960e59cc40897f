use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::coordinator::Coordinator;
use crate::protocol::{generate_client_id, ClientCommand, ServerEvent};

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(coordinator): State<Coordinator>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, coordinator))
}

/// Per-connection loop: assign an id, pump outbound events, feed inbound
/// frames into the coordinator, and run the disconnect path on close.
async fn handle_socket(socket: WebSocket, coordinator: Coordinator) {
    let client_id = generate_client_id();
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Forward queued events to the socket
    let writer_id = client_id.clone();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!(client = %writer_id, "failed to encode event: {}", e),
            }
        }
        debug!(client = %writer_id, "event sender task ended");
    });

    coordinator.on_connect(&client_id, tx.clone());

    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                debug!(client = %client_id, "websocket error: {}", e);
                break;
            }
        };

        match frame {
            Message::Text(text) => {
                dispatch_frame(&coordinator, &client_id, &text, &tx).await;
            }
            Message::Binary(data) => {
                // Accept binary frames carrying UTF-8 JSON, for clients
                // that do not distinguish frame types
                match String::from_utf8(data) {
                    Ok(text) => dispatch_frame(&coordinator, &client_id, &text, &tx).await,
                    Err(_) => {
                        debug!(client = %client_id, "ignoring non-UTF8 binary frame");
                    }
                }
            }
            Message::Close(_) => {
                debug!(client = %client_id, "received close frame");
                break;
            }
            // Ping/Pong handled by axum
            _ => {}
        }
    }

    coordinator.on_disconnect(&client_id).await;
}

async fn dispatch_frame(
    coordinator: &Coordinator,
    client_id: &str,
    text: &str,
    tx: &mpsc::UnboundedSender<ServerEvent>,
) {
    match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => coordinator.handle_command(client_id, command).await,
        Err(e) => {
            warn!(client = %client_id, "unparseable frame: {}", e);
            let _ = tx.send(ServerEvent::Error {
                message: format!("invalid message format: {}", e),
            });
        }
    }
}
