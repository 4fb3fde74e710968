//! Event application
//!
//! [`EventApplier`] is the seam between a client actor and the rest of
//! the application: it turns one inbound event into the outgoing event
//! the room should broadcast, or rejects it.
//!
//! [`ChatService`] is the chat implementation. Inbound types are resolved
//! to [`IncomingEventKind`] and dispatched through a handler table built
//! once in the constructor.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::ApplyError;
use crate::message::{Event, EventKind, IncomingEvent, IncomingEventKind};
use crate::store::{ChatStore, MessageId, StoredMessage};
use crate::types::{ClientId, RoomId};

/// Applies inbound events on behalf of client actors
///
/// Called concurrently from many connections.
#[async_trait]
pub trait EventApplier: Send + Sync {
    async fn apply(
        &self,
        room_id: &RoomId,
        client_id: &ClientId,
        incoming: IncomingEvent,
    ) -> Result<Event, ApplyError>;
}

type Handler<S> =
    fn(&ChatService<S>, &RoomId, &ClientId, &IncomingEvent) -> Result<Event, ApplyError>;

#[derive(Deserialize)]
struct SendMessageData {
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditMessageData {
    message_id: MessageId,
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteMessageData {
    message_id: MessageId,
}

/// Chat event handlers over a [`ChatStore`]
pub struct ChatService<S> {
    store: Arc<S>,
    handlers: HashMap<IncomingEventKind, Handler<S>>,
}

impl<S: ChatStore> ChatService<S> {
    pub fn new(store: Arc<S>) -> Self {
        let mut handlers: HashMap<IncomingEventKind, Handler<S>> = HashMap::new();
        handlers.insert(IncomingEventKind::JoinRoom, Self::handle_join_room);
        handlers.insert(IncomingEventKind::LeaveRoom, Self::handle_leave_room);
        handlers.insert(IncomingEventKind::SendMessage, Self::handle_send_message);
        handlers.insert(IncomingEventKind::EditMessage, Self::handle_edit_message);
        handlers.insert(IncomingEventKind::DeleteMessage, Self::handle_delete_message);

        Self { store, handlers }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn ensure_member(&self, room_id: &RoomId, user_id: &ClientId) -> Result<(), ApplyError> {
        if self.store.is_member(room_id, user_id)? {
            Ok(())
        } else {
            Err(ApplyError::NotRoomMember)
        }
    }

    /// Fetch a message of this room written by `user_id`
    fn owned_message(
        &self,
        room_id: &RoomId,
        user_id: &ClientId,
        id: MessageId,
    ) -> Result<StoredMessage, ApplyError> {
        let message = self.store.get_message(id)?;
        if &message.room_id != room_id {
            return Err(ApplyError::Internal(format!(
                "message {id} does not belong to room {room_id}"
            )));
        }
        if &message.user_id != user_id {
            return Err(ApplyError::Forbidden);
        }
        Ok(message)
    }

    fn handle_join_room(
        &self,
        room_id: &RoomId,
        user_id: &ClientId,
        _incoming: &IncomingEvent,
    ) -> Result<Event, ApplyError> {
        self.store.join_room(room_id, user_id)?;
        Ok(Event::new(
            EventKind::UserJoinedRoom,
            json!({ "roomId": room_id, "userId": user_id }),
        ))
    }

    fn handle_leave_room(
        &self,
        room_id: &RoomId,
        user_id: &ClientId,
        _incoming: &IncomingEvent,
    ) -> Result<Event, ApplyError> {
        self.store.leave_room(room_id, user_id)?;
        Ok(Event::new(
            EventKind::UserLeftRoom,
            json!({ "roomId": room_id, "userId": user_id }),
        ))
    }

    fn handle_send_message(
        &self,
        room_id: &RoomId,
        user_id: &ClientId,
        incoming: &IncomingEvent,
    ) -> Result<Event, ApplyError> {
        self.ensure_member(room_id, user_id)?;
        let data: SendMessageData = incoming.decode()?;

        let message = self.store.create_message(room_id, user_id, &data.content)?;
        Ok(Event::new(EventKind::MessageCreated, to_payload(&message)?))
    }

    fn handle_edit_message(
        &self,
        room_id: &RoomId,
        user_id: &ClientId,
        incoming: &IncomingEvent,
    ) -> Result<Event, ApplyError> {
        self.ensure_member(room_id, user_id)?;
        let data: EditMessageData = incoming.decode()?;

        self.owned_message(room_id, user_id, data.message_id)?;
        let updated = self.store.update_message(data.message_id, &data.content)?;
        Ok(Event::new(EventKind::MessageUpdated, to_payload(&updated)?))
    }

    fn handle_delete_message(
        &self,
        room_id: &RoomId,
        user_id: &ClientId,
        incoming: &IncomingEvent,
    ) -> Result<Event, ApplyError> {
        self.ensure_member(room_id, user_id)?;
        let data: DeleteMessageData = incoming.decode()?;

        self.owned_message(room_id, user_id, data.message_id)?;
        self.store.delete_message(data.message_id)?;
        Ok(Event::new(
            EventKind::MessageDeleted,
            json!({ "messageId": data.message_id, "roomId": room_id }),
        ))
    }
}

fn to_payload(message: &StoredMessage) -> Result<serde_json::Value, ApplyError> {
    serde_json::to_value(message).map_err(|e| ApplyError::Internal(e.to_string()))
}

#[async_trait]
impl<S: ChatStore + 'static> EventApplier for ChatService<S> {
    async fn apply(
        &self,
        room_id: &RoomId,
        client_id: &ClientId,
        incoming: IncomingEvent,
    ) -> Result<Event, ApplyError> {
        if !self.store.room_exists(room_id)? {
            return Err(ApplyError::Internal(format!("room {room_id} not found")));
        }

        let kind: IncomingEventKind = incoming.kind.parse()?;
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| ApplyError::UnsupportedEvent(incoming.kind.clone()))?;

        debug!(room = %room_id, client = %client_id, kind = kind.as_str(), "Applying event");
        handler(self, room_id, client_id, &incoming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> (ChatService<MemoryStore>, RoomId) {
        let store = Arc::new(MemoryStore::new());
        let room = RoomId::new("R1");
        store.create_room(&room).unwrap();
        (ChatService::new(store), room)
    }

    fn incoming(frame: &str) -> IncomingEvent {
        IncomingEvent::from_slice(frame.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_every_kind_has_a_handler() {
        let (service, _) = service();
        for kind in IncomingEventKind::ALL {
            assert!(service.handlers.contains_key(&kind), "{kind:?}");
        }
    }

    #[tokio::test]
    async fn test_join_then_send() {
        let (service, room) = service();
        let alice = ClientId::from("alice");

        let joined = service
            .apply(&room, &alice, incoming(r#"{"type":"join_room"}"#))
            .await
            .unwrap();
        assert_eq!(joined.kind(), EventKind::UserJoinedRoom);
        assert_eq!(joined.payload()["userId"], "alice");

        let created = service
            .apply(
                &room,
                &alice,
                incoming(r#"{"type":"send_message","data":{"content":"hello"}}"#),
            )
            .await
            .unwrap();
        assert_eq!(created.kind(), EventKind::MessageCreated);
        assert_eq!(created.payload()["content"], "hello");
        assert_eq!(created.payload()["roomId"], "R1");
    }

    #[tokio::test]
    async fn test_send_requires_membership() {
        let (service, room) = service();
        let err = service
            .apply(
                &room,
                &ClientId::from("mallory"),
                incoming(r#"{"type":"send_message","data":{"content":"hi"}}"#),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ApplyError::NotRoomMember);
    }

    #[tokio::test]
    async fn test_bad_data_is_invalid_payload() {
        let (service, room) = service();
        let alice = ClientId::from("alice");
        service.store().join_room(&room, &alice).unwrap();

        let err = service
            .apply(&room, &alice, incoming(r#"{"type":"send_message","data":{"text":1}}"#))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_payload");
    }

    #[tokio::test]
    async fn test_edit_and_delete_are_author_only() {
        let (service, room) = service();
        let alice = ClientId::from("alice");
        let bob = ClientId::from("bob");
        service.store().join_room(&room, &alice).unwrap();
        service.store().join_room(&room, &bob).unwrap();

        let created = service
            .apply(&room, &alice, incoming(r#"{"type":"send_message","data":{"content":"v1"}}"#))
            .await
            .unwrap();
        let id = created.payload()["id"].as_i64().unwrap();

        let edit = format!(r#"{{"type":"edit_message","data":{{"messageId":{id},"content":"v2"}}}}"#);
        let err = service.apply(&room, &bob, incoming(&edit)).await.unwrap_err();
        assert_eq!(err, ApplyError::Forbidden);

        let updated = service.apply(&room, &alice, incoming(&edit)).await.unwrap();
        assert_eq!(updated.kind(), EventKind::MessageUpdated);
        assert_eq!(updated.payload()["content"], "v2");

        let delete = format!(r#"{{"type":"delete_message","data":{{"messageId":{id}}}}}"#);
        assert_eq!(
            service.apply(&room, &bob, incoming(&delete)).await.unwrap_err(),
            ApplyError::Forbidden
        );
        let deleted = service.apply(&room, &alice, incoming(&delete)).await.unwrap();
        assert_eq!(deleted.kind(), EventKind::MessageDeleted);
        assert_eq!(deleted.payload()["messageId"], id);

        // Gone now
        let err = service.apply(&room, &alice, incoming(&delete)).await.unwrap_err();
        assert_eq!(err.code(), "internal_error");
    }

    #[tokio::test]
    async fn test_unknown_type_is_unsupported() {
        let (service, room) = service();
        let err = service
            .apply(&room, &ClientId::from("a"), incoming(r#"{"type":"typing"}"#))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unsupported_event");
    }

    #[tokio::test]
    async fn test_unknown_room_is_internal() {
        let (service, _) = service();
        let err = service
            .apply(&RoomId::new("R9"), &ClientId::from("a"), incoming(r#"{"type":"join_room"}"#))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "internal_error");
    }

    #[tokio::test]
    async fn test_double_join_is_internal() {
        let (service, room) = service();
        let alice = ClientId::from("alice");
        service
            .apply(&room, &alice, incoming(r#"{"type":"join_room"}"#))
            .await
            .unwrap();
        let err = service
            .apply(&room, &alice, incoming(r#"{"type":"join_room"}"#))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "internal_error");
    }
}
