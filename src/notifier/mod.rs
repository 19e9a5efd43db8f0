//! Fire-and-forget fan-out of state-change events
//!
//! Delivery is at-most-once and best effort. With no gateway registered
//! every call is a silent no-op; gateway failures are logged and dropped.
//! Nothing here ever blocks the caller or returns an error.
//!
//! The returned counts are the gateway's receiver counts and are only
//! diagnostic. For room and user events they may include subscribers that
//! discard the event.

pub mod gateway;

pub use gateway::{BroadcastGateway, GatewayError, RealtimeGateway, Subscription};

use crate::domain::{BroadcastEvent, EventName, EventScope, RoomName, UserId};
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Publishes events through an optional real-time gateway
///
/// Clones share the same gateway slot.
#[derive(Clone, Default)]
pub struct Notifier {
    gateway: Arc<RwLock<Option<Arc<dyn RealtimeGateway>>>>,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("has_gateway", &self.has_gateway())
            .finish()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gateway(gateway: Arc<dyn RealtimeGateway>) -> Self {
        let notifier = Self::new();
        notifier.register_gateway(gateway);
        notifier
    }

    pub fn register_gateway(&self, gateway: Arc<dyn RealtimeGateway>) {
        *self.gateway.write() = Some(gateway);
        debug!("Real-time gateway registered");
    }

    pub fn clear_gateway(&self) {
        *self.gateway.write() = None;
        debug!("Real-time gateway cleared");
    }

    pub fn has_gateway(&self) -> bool {
        self.gateway.read().is_some()
    }

    fn current_gateway(&self) -> Option<Arc<dyn RealtimeGateway>> {
        self.gateway.read().clone()
    }

    /// Publish `name` to every subscriber; returns how many received it
    pub fn broadcast_event(&self, name: EventName, payload: Value) -> usize {
        let Some(gateway) = self.current_gateway() else {
            return 0;
        };
        let event = BroadcastEvent::new(name, payload, EventScope::Global);
        Self::delivered(&event, gateway.emit_all(&event))
    }

    /// Publish `name` to subscribers in `room`; returns the gateway's receiver count
    pub fn broadcast_to_room(&self, room: RoomName, name: EventName, payload: Value) -> usize {
        let Some(gateway) = self.current_gateway() else {
            return 0;
        };
        let event = BroadcastEvent::new(name, payload, EventScope::Room(room.clone()));
        Self::delivered(&event, gateway.emit_to_room(&room, &event))
    }

    /// Publish `name` to one user's room; returns the gateway's receiver count
    pub fn notify_user(&self, user_id: UserId, name: EventName, payload: Value) -> usize {
        let Some(gateway) = self.current_gateway() else {
            return 0;
        };
        let room = match RoomName::for_user(&user_id) {
            Ok(room) => room,
            Err(error) => {
                debug!(user = %user_id, %error, "Cannot address user room");
                return 0;
            }
        };
        let event = BroadcastEvent::new(name, payload, EventScope::User(user_id));
        Self::delivered(&event, gateway.emit_to_room(&room, &event))
    }

    fn delivered(event: &BroadcastEvent, result: Result<usize, GatewayError>) -> usize {
        match result {
            Ok(receivers) => {
                debug!(event = %event.name, receivers, "Event published");
                receivers
            }
            Err(error) => {
                debug!(event = %event.name, %error, "Event not delivered");
                0
            }
        }
    }
}
