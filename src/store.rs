//! Chat persistence interface
//!
//! `ChatStore` is the narrow surface the chat service needs from a
//! persistence layer. `MemoryStore` keeps everything in process memory.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;

use crate::error::ApplyError;
use crate::types::{ClientId, RoomId};

pub type MessageId = i64;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("user {0} is already in room {1}")]
    AlreadyMember(ClientId, RoomId),

    #[error("user {0} has not joined room {1}")]
    NotMember(ClientId, RoomId),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Store failures carry no client-facing meaning
impl From<StoreError> for ApplyError {
    fn from(err: StoreError) -> Self {
        ApplyError::Internal(err.to_string())
    }
}

/// A persisted chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub user_id: ClientId,
    pub content: String,
    /// Unix milliseconds
    pub created_at: u64,
    /// Unix milliseconds
    pub updated_at: u64,
}

/// Persistence needed by the chat service
pub trait ChatStore: Send + Sync {
    fn room_exists(&self, room_id: &RoomId) -> Result<bool, StoreError>;

    fn join_room(&self, room_id: &RoomId, user_id: &ClientId) -> Result<(), StoreError>;

    fn leave_room(&self, room_id: &RoomId, user_id: &ClientId) -> Result<(), StoreError>;

    fn is_member(&self, room_id: &RoomId, user_id: &ClientId) -> Result<bool, StoreError>;

    fn create_message(
        &self,
        room_id: &RoomId,
        user_id: &ClientId,
        content: &str,
    ) -> Result<StoredMessage, StoreError>;

    fn get_message(&self, id: MessageId) -> Result<StoredMessage, StoreError>;

    fn update_message(&self, id: MessageId, content: &str) -> Result<StoredMessage, StoreError>;

    fn delete_message(&self, id: MessageId) -> Result<(), StoreError>;
}

#[derive(Default)]
struct Inner {
    /// Room → joined users
    rooms: HashMap<RoomId, HashSet<ClientId>>,
    messages: BTreeMap<MessageId, StoredMessage>,
    next_message_id: MessageId,
}

/// In-memory `ChatStore`
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a room known to the store. Returns false if it already was.
    pub fn create_room(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        if inner.rooms.contains_key(room_id) {
            return Ok(false);
        }
        inner.rooms.insert(room_id.clone(), HashSet::new());
        Ok(true)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl ChatStore for MemoryStore {
    fn room_exists(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        Ok(self.lock()?.rooms.contains_key(room_id))
    }

    fn join_room(&self, room_id: &RoomId, user_id: &ClientId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let members = inner
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| StoreError::RoomNotFound(room_id.clone()))?;
        if !members.insert(user_id.clone()) {
            return Err(StoreError::AlreadyMember(user_id.clone(), room_id.clone()));
        }
        Ok(())
    }

    fn leave_room(&self, room_id: &RoomId, user_id: &ClientId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let members = inner
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| StoreError::RoomNotFound(room_id.clone()))?;
        if !members.remove(user_id) {
            return Err(StoreError::NotMember(user_id.clone(), room_id.clone()));
        }
        Ok(())
    }

    fn is_member(&self, room_id: &RoomId, user_id: &ClientId) -> Result<bool, StoreError> {
        Ok(self
            .lock()?
            .rooms
            .get(room_id)
            .is_some_and(|members| members.contains(user_id)))
    }

    fn create_message(
        &self,
        room_id: &RoomId,
        user_id: &ClientId,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        let mut inner = self.lock()?;
        if !inner.rooms.contains_key(room_id) {
            return Err(StoreError::RoomNotFound(room_id.clone()));
        }

        inner.next_message_id += 1;
        let now = now_millis();
        let message = StoredMessage {
            id: inner.next_message_id,
            room_id: room_id.clone(),
            user_id: user_id.clone(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        };
        inner.messages.insert(message.id, message.clone());
        Ok(message)
    }

    fn get_message(&self, id: MessageId) -> Result<StoredMessage, StoreError> {
        self.lock()?
            .messages
            .get(&id)
            .cloned()
            .ok_or(StoreError::MessageNotFound(id))
    }

    fn update_message(&self, id: MessageId, content: &str) -> Result<StoredMessage, StoreError> {
        let mut inner = self.lock()?;
        let message = inner
            .messages
            .get_mut(&id)
            .ok_or(StoreError::MessageNotFound(id))?;
        message.content = content.to_string();
        message.updated_at = now_millis();
        Ok(message.clone())
    }

    fn delete_message(&self, id: MessageId) -> Result<(), StoreError> {
        self.lock()?
            .messages
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::MessageNotFound(id))
    }
}
