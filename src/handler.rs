//! WebSocket connection handler
//!
//! Performs the WebSocket handshake for one TCP connection, picks the
//! room and principal from the request URI (`/ws?room=<id>&user=<id>`)
//! and runs a client actor for the lifetime of the connection.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::client::{ClientActor, ClientConfig};
use crate::connection::split_websocket;
use crate::error::TransportError;
use crate::hub::Hub;
use crate::service::EventApplier;
use crate::types::{ClientId, RoomId};

/// Handle a new TCP connection
///
/// Rejects the handshake with 400 if `room` or `user` is missing. A room
/// that is not registered is reported by closing the socket after the
/// upgrade.
pub async fn handle_connection(
    stream: TcpStream,
    hub: Arc<Hub>,
    applier: Arc<dyn EventApplier>,
    config: ClientConfig,
) -> Result<(), TransportError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    let mut target = None;
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        match parse_target(req.uri()) {
            Ok(parsed) => {
                target = Some(parsed);
                Ok(resp)
            }
            Err(reason) => Err(bad_request(reason)),
        }
    })
    .await?;

    let Some((room_id, client_id)) = target else {
        return Ok(());
    };

    info!(room = %room_id, client = %client_id, "Connection from {} upgraded", peer_addr);

    let (reader, writer) = split_websocket(ws_stream);
    let actor = ClientActor::new(hub, applier, client_id, room_id, config);
    if let Err(e) = actor.run(reader, writer).await {
        warn!("Connection from {} refused: {}", peer_addr, e);
    }

    Ok(())
}

/// Extract `(room, user)` from the query string
pub fn parse_target(uri: &Uri) -> Result<(RoomId, ClientId), &'static str> {
    let query = uri.query().unwrap_or("");
    let mut room = None;
    let mut user = None;

    // Values are percent-decoded; `+` decodes to a space
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if value.is_empty() {
            continue;
        }
        match key.as_ref() {
            "room" => room = Some(RoomId::new(value.into_owned())),
            "user" => user = Some(ClientId::new(value.into_owned())),
            _ => {}
        }
    }

    match (room, user) {
        (Some(room), Some(user)) => Ok((room, user)),
        (None, _) => Err("room query parameter is required"),
        (_, None) => Err("user query parameter is required"),
    }
}

fn bad_request(reason: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(reason.to_string()));
    *resp.status_mut() = StatusCode::BAD_REQUEST;
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        let uri: Uri = "/ws?room=lobby&user=alice".parse().unwrap();
        let (room, user) = parse_target(&uri).unwrap();
        assert_eq!(room.as_str(), "lobby");
        assert_eq!(user.as_str(), "alice");
    }

    #[test]
    fn test_parse_target_decodes_values() {
        let uri: Uri = "/ws?room=team%20chat&user=alice%40example.com"
            .parse()
            .unwrap();
        let (room, user) = parse_target(&uri).unwrap();
        assert_eq!(room.as_str(), "team chat");
        assert_eq!(user.as_str(), "alice@example.com");
    }

    #[test]
    fn test_parse_target_requires_both() {
        let uri: Uri = "/ws?room=lobby".parse().unwrap();
        assert!(parse_target(&uri).is_err());
        let uri: Uri = "/ws?user=alice&room=".parse().unwrap();
        assert!(parse_target(&uri).is_err());
        let uri: Uri = "/ws".parse().unwrap();
        assert!(parse_target(&uri).is_err());
    }

    #[test]
    fn test_bad_request_status() {
        assert_eq!(bad_request("nope").status(), StatusCode::BAD_REQUEST);
    }
}
