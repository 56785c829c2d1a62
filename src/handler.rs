//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake, credential
//! extraction, frame decoding, and the per-connection session loop.
//!
//! Three tasks cooperate per connection:
//! - reader: WebSocket frames -> inbound queue
//! - writer: outbound queue -> WebSocket frames
//! - session loop (this function, via [`crate::session::Session::run`]): inbound queue -> session

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, COOKIE};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::hub::ChatHub;
use crate::message::{ClientEvent, ServerEvent};
use crate::session::Inbound;

/// Inbound queue capacity per connection
const INBOUND_BUFFER_SIZE: usize = 32;

/// Cookie carrying the session token
const SESSION_COOKIE: &str = "session";

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, authenticates from handshake
/// credentials when present, and runs the session until either side closes.
pub async fn handle_connection(stream: TcpStream, hub: Arc<ChatHub>) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake, capturing credentials from the upgrade request
    let (token_tx, token_rx) = oneshot::channel();
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let _ = token_tx.send(credentials_from_request(request));
            Ok(response)
        },
    )
    .await?;
    let token = token_rx.await.ok().flatten();
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Create channel for server -> client events and attach to the hub
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerEvent>(hub.outbound_buffer());
    let mut session = hub.open_session(msg_tx);
    let connection_id = session.id();
    info!("Connection {} established from {}", connection_id, peer_addr);

    // Signalled by whichever I/O task ends first
    let closed = Arc::new(Notify::new());

    // Spawn write task (ServerEvent -> WebSocket)
    let write_closed = Arc::clone(&closed);
    let write_task = tokio::spawn(async move {
        while let Some(event) = msg_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    // Continue - don't break on serialization errors
                }
            }
        }
        debug!("Write task ended for {}", connection_id);
        write_closed.notify_one();

        // Send close frame when done
        let _ = ws_sender.close().await;
    });

    // Session reuse: the upgrade request already identified the user
    if let Some(token) = token {
        match hub.authenticate(&token) {
            Some(identity) => {
                if let Err(e) = session.authenticate_with(identity).await {
                    session.report(e);
                }
            }
            None => {
                warn!("Connection {} presented an unknown token", connection_id);
                session.report(AppError::InvalidCredentials);
            }
        }
    }

    // Spawn read task (WebSocket -> inbound queue)
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<Inbound>(INBOUND_BUFFER_SIZE);
    let read_closed = Arc::clone(&closed);
    let read_task = tokio::spawn(async move {
        while let Some(msg_result) = ws_receiver.next().await {
            let inbound = match msg_result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => Inbound::Event(event),
                    Err(e) => {
                        warn!("Invalid JSON from {}: {}", connection_id, e);
                        Inbound::Malformed(e.to_string())
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!("Connection {} sent close frame", connection_id);
                    break;
                }
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by tungstenite
                    debug!("Ping from {}", connection_id);
                    continue;
                }
                Ok(Message::Binary(_)) => {
                    Inbound::Malformed("binary frames are not supported".to_string())
                }
                Ok(_) => continue,
                Err(e) => {
                    error!("WebSocket error for {}: {}", connection_id, e);
                    break;
                }
            };
            if inbound_tx.send(inbound).await.is_err() {
                break;
            }
        }
        debug!("Read task ended for {}", connection_id);
        read_closed.notify_one();
    });

    // Disconnecting detaches from the bus, which drops the last outbound
    // sender, ends the write task and closes the socket
    session.run(&mut inbound_rx, &closed).await;
    read_task.abort();
    drop(write_task);

    info!("Connection {} from {} disconnected", connection_id, peer_addr);

    Ok(())
}

/// Session token from the upgrade request
///
/// Checked in order: `Authorization: Bearer`, `?token=`, `session` cookie.
fn credentials_from_request(request: &Request) -> Option<String> {
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);

    let query = request.uri().query().and_then(|query| {
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("token="))
            .and_then(decode_query_value)
    });

    let cookie = request
        .headers()
        .get(COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|cookie| {
                cookie
                    .trim()
                    .strip_prefix(SESSION_COOKIE)
                    .and_then(|rest| rest.strip_prefix('='))
            })
        })
        .map(str::to_string);

    bearer
        .or(query)
        .or(cookie)
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Percent-decode a query string value (`+` is a space)
fn decode_query_value(raw: &str) -> Option<String> {
    urlencoding::decode(&raw.replace('+', " "))
        .ok()
        .map(|value| value.into_owned())
}
