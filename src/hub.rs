//! Hub registry
//!
//! The process-wide directory of rooms. The hub creates and destroys room
//! actors, routes operations to them, and tears everything down when its
//! cancellation token fires.
//!
//! The directory map is the only state shared between tasks; it sits
//! behind a reader/writer lock. Room membership itself is never touched
//! here, only routed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::ClientHandle;
use crate::error::HubError;
use crate::message::Event;
use crate::room::{MemberInfo, RoomCommand, RoomHandle, RoomState};
use crate::types::{ConnectionId, RoomId};

/// Hub settings
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Command queue capacity of each room actor
    pub room_queue_capacity: usize,
    /// How long rooms get to terminate once the hub is cancelled
    pub shutdown_grace: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            room_queue_capacity: 256,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// The room registry
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct Hub {
    rooms: RwLock<HashMap<RoomId, RoomHandle>>,
    cancel_token: CancellationToken,
    config: HubConfig,
}

impl Hub {
    /// Create a hub whose lifetime is a child of `parent`
    pub fn new(parent: &CancellationToken, config: HubConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            rooms: RwLock::new(HashMap::new()),
            cancel_token: parent.child_token(),
            config,
        }
    }

    /// Create a room under the given id
    ///
    /// An id that is already registered is rejected, never reused.
    pub async fn create_room(&self, id: RoomId) -> Result<RoomId, HubError> {
        let mut rooms = self.rooms.write().await;

        if self.cancel_token.is_cancelled() {
            return Err(HubError::ShuttingDown);
        }
        if rooms.contains_key(&id) {
            return Err(HubError::AlreadyExists(id));
        }

        let handle = RoomHandle::spawn(
            id.clone(),
            &self.cancel_token,
            self.config.room_queue_capacity,
        );
        rooms.insert(id.clone(), handle);

        info!(room = %id, rooms = rooms.len(), "Room created");
        Ok(id)
    }

    /// Create a room under a freshly generated id
    pub async fn create_random_room(&self) -> Result<RoomId, HubError> {
        self.create_room(RoomId::generate()).await
    }

    /// Remove a room and trigger its teardown
    ///
    /// Does not wait for the room to finish draining.
    pub async fn delete_room(&self, id: &RoomId) -> Result<(), HubError> {
        let mut rooms = self.rooms.write().await;
        let handle = rooms
            .remove(id)
            .ok_or_else(|| HubError::NotFound(id.clone()))?;
        handle.cancel();

        info!(room = %id, rooms = rooms.len(), "Room deleted");
        Ok(())
    }

    pub async fn room_exists(&self, id: &RoomId) -> bool {
        self.lookup(id).await.is_ok()
    }

    /// Number of live rooms. Cancelled rooms awaiting cleanup are not counted.
    pub async fn room_count(&self) -> usize {
        self.rooms
            .read()
            .await
            .values()
            .filter(|handle| !handle.is_cancelled())
            .count()
    }

    pub async fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self
            .rooms
            .read()
            .await
            .iter()
            .filter(|(_, handle)| !handle.is_cancelled())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Find a live room. Cancelled rooms count as absent.
    async fn lookup(&self, id: &RoomId) -> Result<RoomHandle, HubError> {
        let rooms = self.rooms.read().await;
        match rooms.get(id) {
            Some(handle) if !handle.is_cancelled() => Ok(handle.clone()),
            _ => Err(HubError::NotFound(id.clone())),
        }
    }

    /// Forward a command to a room
    ///
    /// The lock is released before sending. If the room is torn down in
    /// between, the send fails with `RoomClosed` rather than blocking.
    pub async fn route(&self, id: &RoomId, cmd: RoomCommand) -> Result<(), HubError> {
        let handle = self.lookup(id).await?;
        handle.send(cmd).await
    }

    pub async fn register_client(&self, id: &RoomId, client: ClientHandle) -> Result<(), HubError> {
        self.route(id, RoomCommand::Register(client)).await
    }

    pub async fn unregister_client(
        &self,
        id: &RoomId,
        connection_id: ConnectionId,
    ) -> Result<(), HubError> {
        self.route(id, RoomCommand::Unregister(connection_id)).await
    }

    pub async fn broadcast(&self, id: &RoomId, event: Arc<Event>) -> Result<(), HubError> {
        self.route(id, RoomCommand::Broadcast(event)).await
    }

    /// Current membership of a room, as seen by its loop
    pub async fn members(&self, id: &RoomId) -> Result<Vec<MemberInfo>, HubError> {
        let handle = self.lookup(id).await?;
        handle.members().await
    }

    /// Cancel the hub and, through it, every room
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Global teardown
    ///
    /// Waits for the hub's cancellation (directly or from its parent), drops
    /// every directory entry and waits for the dropped rooms to terminate.
    /// Rooms cancel themselves through the token tree; nothing is deleted
    /// one by one. Returns the number of rooms torn down.
    pub async fn cleanup(&self) -> Result<usize, HubError> {
        self.cancel_token.cancelled().await;
        info!("Cleaning up hub...");

        let drained: Vec<RoomHandle> = {
            let mut rooms = self.rooms.write().await;
            rooms.drain().map(|(_, handle)| handle).collect()
        };
        let count = drained.len();
        debug!(rooms = count, "Directory cleared, waiting for rooms to terminate");

        let all_terminated = join_all(drained.iter().map(|room| room.terminated()));
        match tokio::time::timeout(self.config.shutdown_grace, all_terminated).await {
            Ok(_) => {
                info!(rooms = count, "Hub cleanup complete");
                Ok(count)
            }
            Err(_) => {
                let pending = drained
                    .iter()
                    .filter(|room| room.state() != RoomState::Terminated)
                    .inspect(|room| warn!(room = %room.id(), state = ?room.state(), "Room still running"))
                    .count();
                error!(pending, "Rooms did not terminate within the grace period");
                Err(HubError::ShutdownTimeout { pending })
            }
        }
    }
}
