//! Multi-room WebSocket fan-out hub
//!
//! A process-wide registry of chat rooms. Each room is an actor that
//! admits and evicts connected clients and broadcasts events to all of
//! its current members.
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Hub` is the room directory, behind a reader/writer lock
//! - Each room is a `RoomActor` task, the sole owner of its membership
//! - Each connection is a `ClientActor` with an inbound and an outbound loop,
//!   fed by a bounded mailbox
//! - Broadcast never blocks: a full mailbox drops the event for that client
//! - Shutdown flows down a `CancellationToken` tree: root → hub → rooms
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tokio_util::sync::CancellationToken;
//! use chat_hub::{handle_connection, ChatService, ClientConfig, Hub, HubConfig, MemoryStore, RoomId};
//!
//! #[tokio::main]
//! async fn main() {
//!     let root = CancellationToken::new();
//!     let hub = Arc::new(Hub::new(&root, HubConfig::default()));
//!     let store = Arc::new(MemoryStore::new());
//!     store.create_room(&RoomId::new("lobby")).unwrap();
//!     hub.create_room(RoomId::new("lobby")).await.unwrap();
//!     let service = Arc::new(ChatService::new(store));
//!
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(
//!             stream,
//!             Arc::clone(&hub),
//!             service.clone(),
//!             ClientConfig::default(),
//!         ));
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod hub;
pub mod message;
pub mod room;
pub mod service;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use client::{ClientActor, ClientConfig, ClientHandle, Mailbox, MailboxReceiver};
pub use config::Config;
pub use connection::{FrameReader, FrameWriter, OutboundFrame};
pub use error::{ApplyError, HubError, TransportError};
pub use handler::handle_connection;
pub use hub::{Hub, HubConfig};
pub use message::{Event, EventKind, IncomingEvent, IncomingEventKind};
pub use room::{MemberInfo, RoomCommand, RoomHandle, RoomState};
pub use service::{ChatService, EventApplier};
pub use store::{ChatStore, MemoryStore, StoredMessage};
pub use types::{ClientId, ConnectionId, RoomId};
