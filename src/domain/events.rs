//! State-change events published after coordinated operations

use crate::domain::types::{EventName, RoomName, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Audience of a broadcast event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "target", rename_all = "snake_case")]
pub enum EventScope {
    Global,
    Room(RoomName),
    User(UserId),
}

/// An ephemeral event; not retained after delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub name: EventName,
    pub payload: Value,
    /// Server time at which the event was published
    pub timestamp: DateTime<Utc>,
    pub scope: EventScope,
}

impl BroadcastEvent {
    pub fn new(name: EventName, payload: Value, scope: EventScope) -> Self {
        Self {
            name,
            payload,
            timestamp: Utc::now(),
            scope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_scope_with_target() {
        let event = BroadcastEvent::new(
            EventName::try_new("slot.booked").expect("valid name"),
            json!({ "slot": 12 }),
            EventScope::Room(RoomName::try_new("facility:3").expect("valid room")),
        );

        let encoded = serde_json::to_value(&event).expect("serializes");
        assert_eq!(encoded["scope"]["type"], "room");
        assert_eq!(encoded["scope"]["target"], "facility:3");
        assert_eq!(encoded["payload"]["slot"], 12);
    }

    #[test]
    fn test_global_scope_has_no_target() {
        let encoded = serde_json::to_value(EventScope::Global).expect("serializes");
        assert_eq!(encoded, json!({ "type": "global" }));
    }
}
