//! Room actor
//!
//! Each room runs as its own task and is the only place its membership
//! set is ever touched. Register, unregister and broadcast arrive through
//! one command queue, so within a room they are totally ordered.
//!
//! Lifecycle: `Running` → `Draining` (cancellation observed) → `Terminated`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::{ClientHandle, Delivery};
use crate::error::HubError;
use crate::message::Event;
use crate::types::{ClientId, ConnectionId, RoomId};

/// Commands processed by a room's event loop
#[derive(Debug)]
pub enum RoomCommand {
    /// Admit a client
    Register(ClientHandle),
    /// Evict a client and close its mailbox (no-op if absent)
    Unregister(ConnectionId),
    /// Fan an event out to every current member
    Broadcast(Arc<Event>),
    /// Snapshot of the membership as seen by the loop
    Members {
        respond_to: oneshot::Sender<Vec<MemberInfo>>,
    },
}

/// Room lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Running,
    Draining,
    Terminated,
}

/// One member as reported by [`RoomCommand::Members`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub connection_id: ConnectionId,
    pub client_id: ClientId,
}

/// Handle to a running room actor
///
/// Cheap to clone. Sends race the room's cancellation token, so a send to a
/// room that is being torn down fails instead of hanging.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
    cancel_token: CancellationToken,
    state: watch::Receiver<RoomState>,
}

impl RoomHandle {
    /// Spawn a room actor whose cancellation is a child of `parent`
    pub fn spawn(id: RoomId, parent: &CancellationToken, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(RoomState::Running);
        let cancel_token = parent.child_token();

        let actor = RoomActor {
            id: id.clone(),
            members: HashMap::new(),
            receiver,
            cancel_token: cancel_token.clone(),
            state: state_tx,
        };
        tokio::spawn(actor.run());

        Self {
            id,
            sender,
            cancel_token,
            state: state_rx,
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Deliver a command to the room loop
    pub async fn send(&self, cmd: RoomCommand) -> Result<(), HubError> {
        tokio::select! {
            biased;
            () = self.cancel_token.cancelled() => Err(HubError::RoomClosed(self.id.clone())),
            res = self.sender.send(cmd) => res.map_err(|_| HubError::RoomClosed(self.id.clone())),
        }
    }

    /// Ask the loop for its current membership
    pub async fn members(&self) -> Result<Vec<MemberInfo>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomCommand::Members { respond_to: tx }).await?;
        rx.await.map_err(|_| HubError::RoomClosed(self.id.clone()))
    }

    /// Trigger teardown. Fire-and-forget: the actor drains itself.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn state(&self) -> RoomState {
        *self.state.borrow()
    }

    /// Wait until the actor has finished its teardown
    pub async fn terminated(&self) {
        let mut state = self.state.clone();
        // An Err means the actor task is gone without reporting (panic);
        // either way there is nothing left to wait for.
        let _ = state.wait_for(|s| *s == RoomState::Terminated).await;
    }
}

/// The room actor itself; owned by its task
struct RoomActor {
    id: RoomId,
    members: HashMap<ConnectionId, ClientHandle>,
    receiver: mpsc::Receiver<RoomCommand>,
    cancel_token: CancellationToken,
    state: watch::Sender<RoomState>,
}

impl RoomActor {
    async fn run(mut self) {
        info!(room = %self.id, "Room started");

        loop {
            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => {
                    debug!(room = %self.id, "Room received cancellation signal");
                    break;
                }
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        debug!(room = %self.id, "All room handles dropped");
                        break;
                    }
                },
            }
        }

        self.terminate();
    }

    fn handle_command(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Register(client) => self.handle_register(client),
            RoomCommand::Unregister(connection_id) => self.handle_unregister(connection_id),
            RoomCommand::Broadcast(event) => self.handle_broadcast(&event),
            RoomCommand::Members { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    fn handle_register(&mut self, client: ClientHandle) {
        let connection_id = client.connection_id;
        if self.members.contains_key(&connection_id) {
            debug!(room = %self.id, connection = %connection_id, "Already a member");
            return;
        }

        debug!(
            room = %self.id,
            connection = %connection_id,
            client = %client.client_id,
            "Client registered"
        );
        self.members.insert(connection_id, client);
        debug!(room = %self.id, members = self.members.len(), "Membership changed");
    }

    fn handle_unregister(&mut self, connection_id: ConnectionId) {
        match self.members.remove(&connection_id) {
            Some(client) => {
                client.mailbox().close();
                debug!(
                    room = %self.id,
                    connection = %connection_id,
                    members = self.members.len(),
                    "Client unregistered"
                );
            }
            None => {
                debug!(room = %self.id, connection = %connection_id, "Unregister for non-member ignored");
            }
        }
    }

    fn handle_broadcast(&self, event: &Arc<Event>) {
        let mut delivered = 0usize;
        let mut dropped = 0usize;

        for (connection_id, client) in &self.members {
            match client.mailbox().try_deliver(event) {
                Delivery::Delivered => delivered += 1,
                Delivery::Full => {
                    // Slow consumer: skip it rather than stall the room
                    dropped += 1;
                    warn!(
                        room = %self.id,
                        connection = %connection_id,
                        "Mailbox full, dropping event for slow client"
                    );
                }
                Delivery::Closed => {
                    trace!(room = %self.id, connection = %connection_id, "Mailbox closed, skipping");
                }
            }
        }

        trace!(
            room = %self.id,
            kind = ?event.kind(),
            delivered,
            dropped,
            "Broadcast complete"
        );
    }

    fn snapshot(&self) -> Vec<MemberInfo> {
        self.members
            .values()
            .map(|client| MemberInfo {
                connection_id: client.connection_id,
                client_id: client.client_id.clone(),
            })
            .collect()
    }

    fn terminate(&mut self) {
        self.state.send_replace(RoomState::Draining);

        for (_, client) in self.members.drain() {
            client.mailbox().close();
        }

        // Refuse new commands, then drain what is already queued so queued
        // registrations get their mailboxes closed too.
        self.receiver.close();
        while let Ok(cmd) = self.receiver.try_recv() {
            if let RoomCommand::Register(client) = cmd {
                client.mailbox().close();
            }
        }

        self.state.send_replace(RoomState::Terminated);
        info!(room = %self.id, "Room terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{mailbox, MailboxReceiver};
    use crate::message::EventKind;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn client(room: &RoomId, name: &str, capacity: usize) -> (ClientHandle, MailboxReceiver) {
        let (mailbox, rx) = mailbox(capacity);
        (
            ClientHandle::new(ClientId::from(name), room.clone(), mailbox),
            rx,
        )
    }

    fn event(id: u64) -> Arc<Event> {
        Arc::new(Event::new(EventKind::MessageCreated, json!({ "id": id })))
    }

    #[tokio::test]
    async fn test_register_and_broadcast() {
        let root = CancellationToken::new();
        let room_id = RoomId::new("R1");
        let room = RoomHandle::spawn(room_id.clone(), &root, 16);

        let (a, mut a_rx) = client(&room_id, "alice", 8);
        let (b, mut b_rx) = client(&room_id, "bob", 8);
        room.send(RoomCommand::Register(a)).await.unwrap();
        room.send(RoomCommand::Register(b)).await.unwrap();
        room.send(RoomCommand::Broadcast(event(1))).await.unwrap();

        assert_eq!(a_rx.recv().await.unwrap().payload()["id"], 1);
        assert_eq!(b_rx.recv().await.unwrap().payload()["id"], 1);
        assert_eq!(room.members().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_register_keeps_one_member() {
        let root = CancellationToken::new();
        let room_id = RoomId::new("R1");
        let room = RoomHandle::spawn(room_id.clone(), &root, 16);

        let (a, mut a_rx) = client(&room_id, "alice", 8);
        room.send(RoomCommand::Register(a.clone())).await.unwrap();
        room.send(RoomCommand::Register(a)).await.unwrap();
        room.send(RoomCommand::Broadcast(event(7))).await.unwrap();

        assert_eq!(room.members().await.unwrap().len(), 1);
        assert_eq!(a_rx.recv().await.unwrap().payload()["id"], 7);
        assert!(!a_rx.is_closed());
        assert!(a_rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_full_mailbox_does_not_block_room() {
        let root = CancellationToken::new();
        let room_id = RoomId::new("R1");
        let room = RoomHandle::spawn(room_id.clone(), &root, 16);

        let (slow, mut slow_rx) = client(&room_id, "slow", 1);
        let (fast, mut fast_rx) = client(&room_id, "fast", 8);
        room.send(RoomCommand::Register(slow)).await.unwrap();
        room.send(RoomCommand::Register(fast)).await.unwrap();

        room.send(RoomCommand::Broadcast(event(1))).await.unwrap();
        room.send(RoomCommand::Broadcast(event(2))).await.unwrap();

        let first = timeout(Duration::from_secs(1), fast_rx.recv()).await.unwrap();
        let second = timeout(Duration::from_secs(1), fast_rx.recv()).await.unwrap();
        assert_eq!(first.unwrap().payload()["id"], 1);
        assert_eq!(second.unwrap().payload()["id"], 2);

        // The slow client only kept what fit
        assert_eq!(slow_rx.recv().await.unwrap().payload()["id"], 1);
        assert!(slow_rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_double_unregister_is_noop() {
        let root = CancellationToken::new();
        let room_id = RoomId::new("R1");
        let room = RoomHandle::spawn(room_id.clone(), &root, 16);

        let (a, mut a_rx) = client(&room_id, "alice", 8);
        let conn = a.connection_id;
        room.send(RoomCommand::Register(a)).await.unwrap();
        room.send(RoomCommand::Unregister(conn)).await.unwrap();
        room.send(RoomCommand::Unregister(conn)).await.unwrap();

        assert!(room.members().await.unwrap().is_empty());
        assert!(a_rx.recv().await.is_none());
        assert_eq!(room.state(), RoomState::Running);
    }

    #[tokio::test]
    async fn test_cancellation_closes_every_mailbox() {
        let root = CancellationToken::new();
        let room_id = RoomId::new("R1");
        let room = RoomHandle::spawn(room_id.clone(), &root, 16);

        let (a, mut a_rx) = client(&room_id, "alice", 8);
        let (b, mut b_rx) = client(&room_id, "bob", 8);
        room.send(RoomCommand::Register(a)).await.unwrap();
        room.send(RoomCommand::Register(b)).await.unwrap();
        room.members().await.unwrap();

        root.cancel();
        timeout(Duration::from_secs(1), room.terminated()).await.unwrap();

        assert_eq!(room.state(), RoomState::Terminated);
        assert!(a_rx.recv().await.is_none());
        assert!(b_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_cancel_fails_fast() {
        let root = CancellationToken::new();
        let room_id = RoomId::new("R1");
        let room = RoomHandle::spawn(room_id.clone(), &root, 1);

        room.cancel();
        timeout(Duration::from_secs(1), room.terminated()).await.unwrap();

        let err = room.send(RoomCommand::Broadcast(event(1))).await.unwrap_err();
        assert!(matches!(err, HubError::RoomClosed(id) if id == room_id));
        assert!(room.members().await.is_err());
    }
}
