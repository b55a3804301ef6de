use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Customer-facing hold record. A thin mirror of the inventory-side hold
/// lifecycle plus customer metadata; the expiry loop drives it.
#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::holds)]
pub struct HoldRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub customer_email: String,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HoldRecord {
    pub fn status(&self) -> HoldRecordStatus {
        HoldRecordStatus::parse(&self.status).unwrap_or(HoldRecordStatus::Expired)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::holds)]
pub struct NewHoldRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub customer_email: String,
    pub status: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HoldRecordStatus {
    Active,
    Expired,
}

impl HoldRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldRecordStatus::Active => "ACTIVE",
            HoldRecordStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(HoldRecordStatus::Active),
            "EXPIRED" => Some(HoldRecordStatus::Expired),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, HoldRecordStatus::Active)
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::events)]
pub struct EventRow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub location: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::sessions)]
pub struct SessionRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub total_capacity: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::ticket_types)]
pub struct TicketTypeRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_record_status_round_trips() {
        for status in [HoldRecordStatus::Active, HoldRecordStatus::Expired] {
            assert_eq!(HoldRecordStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(HoldRecordStatus::parse("RELEASED"), None);
        assert!(HoldRecordStatus::Active.is_active());
        assert!(!HoldRecordStatus::Expired.is_active());
    }
}
