//! # Data store
//!
//! Every table lives in the hosted database. The service only needs row
//! CRUD plus a change feed per table, so rows travel as JSON objects and the
//! typed layer in [`crate::repo`] converts them.
//!
//! Two backends:
//! - [`rest::RestStore`]: the provider's PostgREST face over HTTP
//! - [`memory::MemoryStore`]: in-process, same unique constraints, used for
//!   tests and read-only degraded mode
//!
//! ## Change feed
//!
//! Each backend publishes a [`Change`] for every write it performs and bumps a
//! per-table version. Readers that cache a table compare versions instead of
//! re-fetching the whole table on every change.
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

pub mod memory;
pub mod rest;

/// Postgres `unique_violation`.
pub const UNIQUE_VIOLATION: &str = "23505";

const FEED_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Pets,
    Sightings,
    SightingConfirmations,
    CaseClosures,
    ClosureConfirmations,
    CommunityOffers,
    VolunteerAssignments,
    ActivityLog,
}

impl Table {
    pub const ALL: [Table; 8] = [
        Table::Pets,
        Table::Sightings,
        Table::SightingConfirmations,
        Table::CaseClosures,
        Table::ClosureConfirmations,
        Table::CommunityOffers,
        Table::VolunteerAssignments,
        Table::ActivityLog,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Pets => "pets",
            Table::Sightings => "sightings",
            Table::SightingConfirmations => "sighting_confirmations",
            Table::CaseClosures => "case_closures",
            Table::ClosureConfirmations => "closure_confirmations",
            Table::CommunityOffers => "community_offers",
            Table::VolunteerAssignments => "volunteer_assignments",
            Table::ActivityLog => "activity_log",
        }
    }

    pub fn from_name(name: &str) -> Option<Table> {
        Table::ALL.into_iter().find(|table| table.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Lt,
    Gte,
}

impl Op {
    fn as_str(&self) -> &'static str {
        match self {
            Op::Eq => "eq",
            Op::Lt => "lt",
            Op::Gte => "gte",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: Op,
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self::new().eq("id", id)
    }

    fn filter(mut self, column: &str, op: Op, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, Op::Eq, value)
    }

    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, Op::Lt, value)
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, Op::Gte, value)
    }

    pub fn order(mut self, column: &str, direction: Direction) -> Self {
        self.order = Some((column.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// PostgREST query string pairs.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), "*".to_string())];

        for filter in &self.filters {
            params.push((
                filter.column.clone(),
                format!("{}.{}", filter.op.as_str(), param_value(&filter.value)),
            ));
        }

        if let Some((column, direction)) = &self.order {
            let direction = match direction {
                Direction::Asc => "asc",
                Direction::Desc => "desc",
            };
            params.push(("order".to_string(), format!("{column}.{direction}")));
        }

        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }

        params
    }
}

fn param_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Change {
    pub table: Table,
    pub kind: ChangeKind,
    pub version: u64,
}

pub struct ChangeFeed {
    all: broadcast::Sender<Change>,
    senders: HashMap<Table, broadcast::Sender<Change>>,
    versions: HashMap<Table, AtomicU64>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(FEED_CAPACITY).0,
            senders: Table::ALL
                .iter()
                .map(|table| (*table, broadcast::channel(FEED_CAPACITY).0))
                .collect(),
            versions: Table::ALL
                .iter()
                .map(|table| (*table, AtomicU64::new(0)))
                .collect(),
        }
    }

    pub fn subscribe(&self, table: Table) -> broadcast::Receiver<Change> {
        self.senders[&table].subscribe()
    }

    /// Every table's changes on one channel.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Change> {
        self.all.subscribe()
    }

    pub fn version(&self, table: Table) -> u64 {
        self.versions[&table].load(Ordering::Acquire)
    }

    pub fn publish(&self, table: Table, kind: ChangeKind) {
        let version = self.versions[&table].fetch_add(1, Ordering::AcqRel) + 1;

        let change = Change {
            table,
            kind,
            version,
        };

        // no subscribers is fine
        let _ = self.senders[&table].send(change);
        let _ = self.all.send(change);
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed row: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Store returned no row")]
    MissingRow,

    #[error("Store unavailable")]
    Unavailable,
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::Rejected { code, .. } if code == UNIQUE_VIOLATION)
    }
}

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn insert(&self, table: Table, row: Value) -> Result<Value, StoreError>;

    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError>;

    /// Applies `patch` to every matching row and returns the updated rows.
    async fn update(
        &self,
        table: Table,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, StoreError>;

    async fn delete(&self, table: Table, query: &Query) -> Result<usize, StoreError>;

    fn feed(&self) -> &ChangeFeed;

    fn subscribe(&self, table: Table) -> broadcast::Receiver<Change> {
        self.feed().subscribe(table)
    }

    fn version(&self, table: Table) -> u64 {
        self.feed().version(table)
    }
}

pub fn decode<T: DeserializeOwned>(row: Value) -> Result<T, StoreError> {
    Ok(serde_json::from_value(row)?)
}

pub fn decode_all<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, StoreError> {
    rows.into_iter().map(decode).collect()
}

pub fn encode<T: Serialize>(row: &T) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(row)?)
}
