use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row per unique `(session_id, ticket_type_id)` pair.
///
/// `total_quantity` is fixed at creation; `available_quantity` moves under
/// the row lock. Held quantity is derived, never stored.
#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::inventory_items)]
pub struct InventoryItem {
    pub id: Uuid,
    pub session_id: Uuid,
    pub ticket_type_id: Uuid,
    pub total_quantity: i32,
    pub available_quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    pub fn held_quantity(&self) -> i32 {
        self.total_quantity - self.available_quantity
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::inventory_items)]
pub struct NewInventoryItem {
    pub id: Uuid,
    pub session_id: Uuid,
    pub ticket_type_id: Uuid,
    pub total_quantity: i32,
    pub available_quantity: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HoldStatus {
    Held,
    Released,
    Committed,
}

impl HoldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldStatus::Held => "HELD",
            HoldStatus::Released => "RELEASED",
            HoldStatus::Committed => "COMMITTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "HELD" => Some(HoldStatus::Held),
            "RELEASED" => Some(HoldStatus::Released),
            "COMMITTED" => Some(HoldStatus::Committed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HoldStatus::Released | HoldStatus::Committed)
    }

    pub fn can_release(&self) -> bool {
        matches!(self, HoldStatus::Held)
    }

    pub fn can_commit(&self) -> bool {
        matches!(self, HoldStatus::Held)
    }
}

/// Hold row keyed by the caller-supplied hold id.
#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::inventory_holds)]
pub struct HoldRow {
    pub id: Uuid,
    pub inventory_item_id: Uuid,
    pub quantity: i32,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HoldRow {
    pub fn status(&self) -> HoldStatus {
        HoldStatus::parse(&self.status).unwrap_or(HoldStatus::Released)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::inventory_holds)]
pub struct NewHoldRow {
    pub id: Uuid,
    pub inventory_item_id: Uuid,
    pub quantity: i32,
    pub status: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::consumed_events)]
pub struct ConsumedEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub consumed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::consumed_events)]
pub struct NewConsumedEvent {
    pub event_id: Uuid,
    pub event_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_status_round_trips() {
        for status in [HoldStatus::Held, HoldStatus::Released, HoldStatus::Committed] {
            assert_eq!(HoldStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(HoldStatus::parse("EXPIRED"), None);
    }

    #[test]
    fn only_live_holds_can_transition() {
        assert!(HoldStatus::Held.can_release());
        assert!(HoldStatus::Held.can_commit());
        assert!(!HoldStatus::Held.is_terminal());

        for terminal in [HoldStatus::Released, HoldStatus::Committed] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_release());
            assert!(!terminal.can_commit());
        }
    }
}
