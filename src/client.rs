//! Client actor
//!
//! Bridges one physical connection to one room. Two loops run per
//! connection:
//! - inbound: read frame → decode → apply → broadcast to the room
//! - outbound: drain the mailbox (plus unicast replies) → write frames,
//!   with a heartbeat ping on a fixed period
//!
//! The mailbox is the bounded queue the room fans events into. Only the
//! room writes to it, and only the room closes it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{FrameReader, FrameWriter, OutboundFrame};
use crate::error::HubError;
use crate::hub::Hub;
use crate::message::{Event, IncomingEvent};
use crate::service::EventApplier;
use crate::types::{ClientId, ConnectionId, RoomId};

/// Buffer for unicast replies (error events) to this client only
const REPLY_BUFFER_SIZE: usize = 8;

/// Shortest heartbeat period; the ticker cannot run with a zero period
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Per-connection settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Mailbox capacity; at least 1
    pub mailbox_capacity: usize,
    /// Fixed period between ping frames, independent of other traffic.
    /// Values below `MIN_HEARTBEAT_INTERVAL` are raised to it.
    pub heartbeat_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 32,
            heartbeat_interval: Duration::from_secs(54),
        }
    }
}

/// Outcome of a non-blocking delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Mailbox at capacity; the event was dropped for this client
    Full,
    Closed,
}

/// Create a bounded mailbox
///
/// tokio's bounded channel needs a capacity of at least 1, so 0 is raised.
pub fn mailbox(capacity: usize) -> (Mailbox, MailboxReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let closed = CancellationToken::new();
    (
        Mailbox {
            tx,
            closed: closed.clone(),
        },
        MailboxReceiver { rx, closed },
    )
}

/// Sending side of a client's mailbox
#[derive(Debug, Clone)]
pub struct Mailbox {
    tx: mpsc::Sender<Arc<Event>>,
    closed: CancellationToken,
}

impl Mailbox {
    /// Enqueue without waiting
    ///
    /// Never writes once the mailbox has been closed.
    pub fn try_deliver(&self, event: &Arc<Event>) -> Delivery {
        if self.closed.is_cancelled() {
            return Delivery::Closed;
        }
        match self.tx.try_send(Arc::clone(event)) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Close the mailbox. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

/// Receiving side of a client's mailbox, owned by the outbound loop
#[derive(Debug)]
pub struct MailboxReceiver {
    rx: mpsc::Receiver<Arc<Event>>,
    closed: CancellationToken,
}

impl MailboxReceiver {
    /// Next queued event
    ///
    /// Events queued before the close are still handed out; `None` means
    /// the mailbox is closed and empty.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        tokio::select! {
            biased;
            event = self.rx.recv() => event,
            () = self.closed.cancelled() => self.rx.try_recv().ok(),
        }
    }

    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.rx.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// What a room holds for each member
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub connection_id: ConnectionId,
    pub client_id: ClientId,
    pub room_id: RoomId,
    mailbox: Mailbox,
}

impl ClientHandle {
    /// Create a handle for a fresh connection
    pub fn new(client_id: ClientId, room_id: RoomId, mailbox: Mailbox) -> Self {
        Self {
            connection_id: ConnectionId::new(),
            client_id,
            room_id,
            mailbox,
        }
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }
}

/// One connected client
pub struct ClientActor {
    connection_id: ConnectionId,
    client_id: ClientId,
    room_id: RoomId,
    hub: Arc<Hub>,
    applier: Arc<dyn EventApplier>,
    config: ClientConfig,
}

impl ClientActor {
    pub fn new(
        hub: Arc<Hub>,
        applier: Arc<dyn EventApplier>,
        client_id: ClientId,
        room_id: RoomId,
        config: ClientConfig,
    ) -> Self {
        Self {
            connection_id: ConnectionId::new(),
            client_id,
            room_id,
            hub,
            applier,
            config,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Admit the client to its room and run both loops to completion
    ///
    /// Returns the hub error if admission fails; the connection is closed
    /// in every case before this returns.
    pub async fn run<R, W>(self, mut reader: R, mut writer: W) -> Result<(), HubError>
    where
        R: FrameReader,
        W: FrameWriter + 'static,
    {
        let (mailbox, mailbox_rx) = mailbox(self.config.mailbox_capacity);
        let handle = ClientHandle {
            connection_id: self.connection_id,
            client_id: self.client_id.clone(),
            room_id: self.room_id.clone(),
            mailbox,
        };

        if let Err(e) = self.hub.register_client(&self.room_id, handle).await {
            warn!(
                connection = %self.connection_id,
                room = %self.room_id,
                "Failed to admit client: {}",
                e
            );
            let _ = writer.write_frame(OutboundFrame::Close).await;
            let _ = writer.close().await;
            return Err(e);
        }

        info!(
            connection = %self.connection_id,
            client = %self.client_id,
            room = %self.room_id,
            "Client joined room"
        );

        let (reply_tx, reply_rx) = mpsc::channel(REPLY_BUFFER_SIZE);
        let outbound_done = CancellationToken::new();

        let outbound = tokio::spawn(outbound_loop(
            writer,
            mailbox_rx,
            reply_rx,
            self.config.heartbeat_interval,
            outbound_done.clone(),
            self.connection_id,
        ));

        self.inbound_loop(&mut reader, reply_tx, &outbound_done).await;

        // Idempotent on the room side; fails only if the room is already gone,
        // in which case its teardown has closed the mailbox.
        if let Err(e) = self
            .hub
            .unregister_client(&self.room_id, self.connection_id)
            .await
        {
            debug!(connection = %self.connection_id, "Unregister skipped: {}", e);
        }

        if let Err(e) = outbound.await {
            error!(connection = %self.connection_id, "Outbound task failed: {}", e);
        }

        info!(
            connection = %self.connection_id,
            client = %self.client_id,
            room = %self.room_id,
            "Client left room"
        );
        Ok(())
    }

    async fn inbound_loop<R: FrameReader>(
        &self,
        reader: &mut R,
        replies: mpsc::Sender<Arc<Event>>,
        outbound_done: &CancellationToken,
    ) {
        loop {
            let frame = tokio::select! {
                biased;
                () = outbound_done.cancelled() => {
                    debug!(connection = %self.connection_id, "Outbound loop ended, stopping reads");
                    break;
                }
                frame = reader.read_frame() => frame,
            };

            let bytes = match frame {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    debug!(connection = %self.connection_id, "Peer closed connection");
                    break;
                }
                Err(e) => {
                    debug!(connection = %self.connection_id, "Read failed: {}", e);
                    break;
                }
            };

            let incoming = match IncomingEvent::from_slice(&bytes) {
                Ok(incoming) => incoming,
                Err(e) => {
                    warn!(connection = %self.connection_id, "Skipping malformed frame: {}", e);
                    continue;
                }
            };

            match self
                .applier
                .apply(&self.room_id, &self.client_id, incoming)
                .await
            {
                Ok(event) => {
                    if let Err(e) = self.hub.broadcast(&self.room_id, Arc::new(event)).await {
                        debug!(connection = %self.connection_id, "Broadcast failed: {}", e);
                    }
                }
                Err(err) => {
                    warn!(
                        connection = %self.connection_id,
                        code = err.code(),
                        "Event rejected: {}",
                        err
                    );
                    if replies.send(Arc::new(Event::error(&err))).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn outbound_loop<W: FrameWriter>(
    mut writer: W,
    mut mailbox: MailboxReceiver,
    mut replies: mpsc::Receiver<Arc<Event>>,
    heartbeat: Duration,
    done: CancellationToken,
    connection_id: ConnectionId,
) {
    let heartbeat = heartbeat.max(MIN_HEARTBEAT_INTERVAL);
    let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            biased;
            event = mailbox.recv() => match event {
                Some(event) => encode(&event),
                None => {
                    debug!(connection = %connection_id, "Mailbox closed, sending close frame");
                    let _ = writer.write_frame(OutboundFrame::Close).await;
                    break;
                }
            },
            Some(event) = replies.recv() => encode(&event),
            _ = ticker.tick() => Some(OutboundFrame::Ping),
        };

        let Some(frame) = frame else {
            continue;
        };

        if let Err(e) = writer.write_frame(frame).await {
            debug!(connection = %connection_id, "Write failed: {}", e);
            break;
        }
    }

    if let Err(e) = writer.close().await {
        debug!(connection = %connection_id, "Close failed: {}", e);
    }
    done.cancel();
    debug!(connection = %connection_id, "Outbound loop ended");
}

fn encode(event: &Event) -> Option<OutboundFrame> {
    match event.to_frame() {
        Ok(text) => Some(OutboundFrame::Text(text)),
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            None
        }
    }
}
