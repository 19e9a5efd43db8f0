//! Real-time transport seam for the notifier
//!
//! [`RealtimeGateway`] is the minimal surface the notifier needs from a
//! push transport: emit to everyone and emit to a named room. Emission is
//! synchronous and must not block.
//!
//! [`BroadcastGateway`] is an in-process implementation on a tokio
//! broadcast channel. Every subscriber sees every event and filters by
//! scope against the rooms it has joined. Slow subscribers that fall more
//! than the channel capacity behind lose events.

use crate::domain::{BroadcastEvent, EventScope, RoomName, SubscriberId};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("No subscribers connected")]
    NoSubscribers,

    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
}

/// Push transport used by the notifier
pub trait RealtimeGateway: Send + Sync {
    /// Deliver to every connected subscriber; returns the receiver count
    fn emit_all(&self, event: &BroadcastEvent) -> Result<usize, GatewayError>;

    /// Deliver to subscribers that joined `room`.
    ///
    /// The count is whatever the transport reports handing the event to.
    /// [`BroadcastGateway`] filters on the receiving side, so it reports
    /// every connected subscriber, not only room members.
    fn emit_to_room(&self, room: &RoomName, event: &BroadcastEvent) -> Result<usize, GatewayError>;
}

/// Default per-gateway buffer before slow subscribers start losing events
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct BroadcastGateway {
    sender: broadcast::Sender<Arc<BroadcastEvent>>,
}

impl BroadcastGateway {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Connect a subscriber that is a member of `rooms`
    pub fn subscribe(&self, rooms: impl IntoIterator<Item = RoomName>) -> Subscription {
        let subscription = Subscription {
            id: SubscriberId::generate(),
            rooms: RwLock::new(rooms.into_iter().collect()),
            receiver: self.sender.subscribe(),
        };
        debug!(subscriber = %subscription.id, "Subscriber connected");
        subscription
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn send(&self, event: &BroadcastEvent) -> Result<usize, GatewayError> {
        self.sender
            .send(Arc::new(event.clone()))
            .map_err(|_| GatewayError::NoSubscribers)
    }
}

impl Default for BroadcastGateway {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl RealtimeGateway for BroadcastGateway {
    fn emit_all(&self, event: &BroadcastEvent) -> Result<usize, GatewayError> {
        self.send(event)
    }

    fn emit_to_room(&self, _room: &RoomName, event: &BroadcastEvent) -> Result<usize, GatewayError> {
        // Room filtering happens on the receiving side from the event's scope.
        self.send(event)
    }
}

/// One connected subscriber of a [`BroadcastGateway`]
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rooms: RwLock<HashSet<RoomName>>,
    receiver: broadcast::Receiver<Arc<BroadcastEvent>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn join(&self, room: RoomName) {
        self.rooms.write().insert(room);
    }

    pub fn leave(&self, room: &RoomName) {
        self.rooms.write().remove(room);
    }

    pub fn is_member(&self, room: &RoomName) -> bool {
        self.rooms.read().contains(room)
    }

    fn accepts(&self, scope: &EventScope) -> bool {
        match scope {
            EventScope::Global => true,
            EventScope::Room(room) => self.is_member(room),
            EventScope::User(user) => {
                RoomName::for_user(user).is_ok_and(|room| self.is_member(&room))
            }
        }
    }

    /// Next event addressed to this subscriber; `None` once the gateway is gone
    pub async fn recv(&mut self) -> Option<BroadcastEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.accepts(&event.scope) => return Some((*event).clone()),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(subscriber = %self.id, missed, "Subscriber lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-delivered event addressed to this subscriber, without waiting
    pub fn try_recv(&mut self) -> Option<BroadcastEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event.scope) => return Some((*event).clone()),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    debug!(subscriber = %self.id, missed, "Subscriber lagged; events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}
