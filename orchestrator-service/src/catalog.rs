//! Read-only event catalog: list events, event detail, sessions with ticket
//! types. Backed by the catalog tables and fronted by a TTL read-through
//! cache. Advisory only; the inventory and order cores never consult it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use shared::{EventId, ValidationError};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{EventRow, SessionRow, TicketTypeRow};
use crate::schema::{events, sessions, ticket_types};

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("event not found")]
    EventNotFound,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("catalog storage unavailable")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<diesel::result::Error> for CatalogError {
    fn from(err: diesel::result::Error) -> Self {
        CatalogError::Unavailable(Box::new(err))
    }
}

impl From<diesel_async::pooled_connection::bb8::RunError> for CatalogError {
    fn from(err: diesel_async::pooled_connection::bb8::RunError) -> Self {
        CatalogError::Unavailable(Box::new(err))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventView {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub location: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub event_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub total_capacity: i32,
    pub ticket_types: Vec<TicketTypeView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketTypeView {
    pub id: Uuid,
    pub name: String,
    pub price: String,
    pub quantity: i32,
}

impl From<EventRow> for EventView {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            location: row.location,
            image_url: row.image_url,
            created_at: row.created_at,
        }
    }
}

impl From<TicketTypeRow> for TicketTypeView {
    fn from(row: TicketTypeRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            price: format!("{:.2}", row.price),
            quantity: row.quantity,
        }
    }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list_events(&self) -> Result<Vec<EventRow>, CatalogError>;

    async fn get_event(&self, event_id: Uuid) -> Result<Option<EventRow>, CatalogError>;

    /// `None` when the event itself does not exist.
    async fn sessions_for_event(
        &self,
        event_id: Uuid,
    ) -> Result<Option<Vec<(SessionRow, Vec<TicketTypeRow>)>>, CatalogError>;
}

pub struct PgCatalogStore {
    pool: DbPool,
}

impl PgCatalogStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn list_events(&self) -> Result<Vec<EventRow>, CatalogError> {
        let mut conn = self.pool.get().await?;
        let rows = events::table
            .order(events::created_at.desc())
            .load::<EventRow>(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn get_event(&self, event_id: Uuid) -> Result<Option<EventRow>, CatalogError> {
        let mut conn = self.pool.get().await?;
        let row = events::table
            .find(event_id)
            .first::<EventRow>(&mut conn)
            .await
            .optional()?;
        Ok(row)
    }

    async fn sessions_for_event(
        &self,
        event_id: Uuid,
    ) -> Result<Option<Vec<(SessionRow, Vec<TicketTypeRow>)>>, CatalogError> {
        let mut conn = self.pool.get().await?;
        let event: Option<EventRow> = events::table
            .find(event_id)
            .first(&mut conn)
            .await
            .optional()?;
        if event.is_none() {
            return Ok(None);
        }

        let session_rows = sessions::table
            .filter(sessions::event_id.eq(event_id))
            .order(sessions::starts_at.asc())
            .load::<SessionRow>(&mut conn)
            .await?;

        let session_ids: Vec<Uuid> = session_rows.iter().map(|s| s.id).collect();
        let ticket_rows = ticket_types::table
            .filter(ticket_types::session_id.eq_any(&session_ids))
            .order(ticket_types::created_at.asc())
            .load::<TicketTypeRow>(&mut conn)
            .await?;

        let mut by_session: HashMap<Uuid, Vec<TicketTypeRow>> = HashMap::new();
        for ticket in ticket_rows {
            by_session.entry(ticket.session_id).or_default().push(ticket);
        }

        Ok(Some(
            session_rows
                .into_iter()
                .map(|session| {
                    let tickets = by_session.remove(&session.id).unwrap_or_default();
                    (session, tickets)
                })
                .collect(),
        ))
    }
}

#[derive(Clone)]
enum CacheEntry {
    Events(Vec<EventView>),
    Event(EventView),
    Sessions(Vec<SessionView>),
}

/// TTL read-through cache keyed `events:list`, `events:{id}`,
/// `events:{id}:sessions`.
struct CatalogCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, CacheEntry)>>,
}

impl CatalogCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, key: &str) -> Option<CacheEntry> {
        let entries = self.entries.read().unwrap();
        let (stored_at, entry) = entries.get(key)?;
        if stored_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.clone())
    }

    fn put(&self, key: String, entry: CacheEntry) {
        self.entries
            .write()
            .unwrap()
            .insert(key, (Instant::now(), entry));
    }
}

pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
    cache: CatalogCache,
}

impl CatalogService {
    pub fn new(store: Arc<dyn CatalogStore>, cache_ttl: Duration) -> Self {
        Self {
            store,
            cache: CatalogCache::new(cache_ttl),
        }
    }

    pub async fn list_events(&self) -> Result<Vec<EventView>, CatalogError> {
        if let Some(CacheEntry::Events(cached)) = self.cache.get("events:list") {
            return Ok(cached);
        }

        let views: Vec<EventView> = self
            .store
            .list_events()
            .await?
            .into_iter()
            .map(EventView::from)
            .collect();
        self.cache
            .put("events:list".to_owned(), CacheEntry::Events(views.clone()));
        Ok(views)
    }

    pub async fn get_event(&self, raw_event_id: &str) -> Result<EventView, CatalogError> {
        let event_id = EventId::parse(raw_event_id)?;
        let key = format!("events:{event_id}");
        if let Some(CacheEntry::Event(cached)) = self.cache.get(&key) {
            return Ok(cached);
        }

        let view: EventView = self
            .store
            .get_event(event_id.as_uuid())
            .await?
            .ok_or(CatalogError::EventNotFound)?
            .into();
        self.cache.put(key, CacheEntry::Event(view.clone()));
        Ok(view)
    }

    pub async fn sessions_for_event(
        &self,
        raw_event_id: &str,
    ) -> Result<Vec<SessionView>, CatalogError> {
        let event_id = EventId::parse(raw_event_id)?;
        let key = format!("events:{event_id}:sessions");
        if let Some(CacheEntry::Sessions(cached)) = self.cache.get(&key) {
            return Ok(cached);
        }

        let sessions = self
            .store
            .sessions_for_event(event_id.as_uuid())
            .await?
            .ok_or(CatalogError::EventNotFound)?;
        let views: Vec<SessionView> = sessions
            .into_iter()
            .map(|(session, tickets)| SessionView {
                id: session.id,
                event_id: session.event_id,
                starts_at: session.starts_at,
                ends_at: session.ends_at,
                total_capacity: session.total_capacity,
                ticket_types: tickets.into_iter().map(TicketTypeView::from).collect(),
            })
            .collect();
        self.cache.put(key, CacheEntry::Sessions(views.clone()));
        Ok(views)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryCatalogStore {
        events: Mutex<Vec<EventRow>>,
        sessions: Mutex<Vec<SessionRow>>,
        tickets: Mutex<Vec<TicketTypeRow>>,
        calls: AtomicUsize,
    }

    impl MemoryCatalogStore {
        fn seed_event(&self, name: &str) -> Uuid {
            let id = Uuid::new_v4();
            self.events.lock().unwrap().push(EventRow {
                id,
                name: name.to_owned(),
                description: "an event".to_owned(),
                location: "somewhere".to_owned(),
                image_url: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            });
            id
        }

        fn seed_session(&self, event_id: Uuid, capacity: i32) -> Uuid {
            let id = Uuid::new_v4();
            self.sessions.lock().unwrap().push(SessionRow {
                id,
                event_id,
                starts_at: Utc::now(),
                ends_at: Utc::now(),
                total_capacity: capacity,
                created_at: Utc::now(),
            });
            id
        }

        fn seed_ticket_type(&self, session_id: Uuid, price: &str, quantity: i32) {
            self.tickets.lock().unwrap().push(TicketTypeRow {
                id: Uuid::new_v4(),
                session_id,
                name: "General".to_owned(),
                price: BigDecimal::from_str(price).unwrap(),
                quantity,
                created_at: Utc::now(),
            });
        }

        fn call_count(&self) -> usize {
            AtomicUsize::load(&self.calls, Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CatalogStore for MemoryCatalogStore {
        async fn list_events(&self) -> Result<Vec<EventRow>, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.events.lock().unwrap().clone())
        }

        async fn get_event(&self, event_id: Uuid) -> Result<Option<EventRow>, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.id == event_id)
                .cloned())
        }

        async fn sessions_for_event(
            &self,
            event_id: Uuid,
        ) -> Result<Option<Vec<(SessionRow, Vec<TicketTypeRow>)>>, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.events.lock().unwrap().iter().any(|e| e.id == event_id) {
                return Ok(None);
            }
            let sessions: Vec<SessionRow> = self
                .sessions
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.event_id == event_id)
                .cloned()
                .collect();
            let tickets = self.tickets.lock().unwrap();
            Ok(Some(
                sessions
                    .into_iter()
                    .map(|session| {
                        let session_tickets = tickets
                            .iter()
                            .filter(|t| t.session_id == session.id)
                            .cloned()
                            .collect();
                        (session, session_tickets)
                    })
                    .collect(),
            ))
        }
    }

    fn service_over(
        store: Arc<MemoryCatalogStore>,
        ttl: Duration,
    ) -> CatalogService {
        CatalogService::new(store, ttl)
    }

    #[tokio::test]
    async fn sessions_embed_ticket_types() {
        let store = Arc::new(MemoryCatalogStore::default());
        let event_id = store.seed_event("RustConf");
        let session_id = store.seed_session(event_id, 100);
        store.seed_ticket_type(session_id, "50.00", 100);

        let service = service_over(store, Duration::from_secs(60));
        let sessions = service
            .sessions_for_event(&event_id.to_string())
            .await
            .unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].ticket_types.len(), 1);
        assert_eq!(sessions[0].ticket_types[0].price, "50.00");
    }

    #[tokio::test]
    async fn reads_are_served_from_cache_within_ttl() {
        let store = Arc::new(MemoryCatalogStore::default());
        store.seed_event("RustConf");

        let service = service_over(store.clone(), Duration::from_secs(60));
        service.list_events().await.unwrap();
        service.list_events().await.unwrap();
        service.list_events().await.unwrap();
        assert_eq!(store.call_count(), 1);
    }

    #[tokio::test]
    async fn cache_entries_expire() {
        let store = Arc::new(MemoryCatalogStore::default());
        store.seed_event("RustConf");

        let service = service_over(store.clone(), Duration::from_millis(10));
        service.list_events().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        service.list_events().await.unwrap();
        assert_eq!(store.call_count(), 2);
    }

    #[tokio::test]
    async fn unknown_and_malformed_event_ids_are_distinct_errors() {
        let store = Arc::new(MemoryCatalogStore::default());
        let service = service_over(store, Duration::from_secs(60));

        assert!(matches!(
            service.get_event(&Uuid::new_v4().to_string()).await,
            Err(CatalogError::EventNotFound)
        ));
        assert!(matches!(
            service.get_event("not-a-uuid").await,
            Err(CatalogError::Validation(_))
        ));
        assert!(matches!(
            service.sessions_for_event(&Uuid::new_v4().to_string()).await,
            Err(CatalogError::EventNotFound)
        ));
    }
}
