//! In-process store with the hosted schema's unique constraints.
use std::{
    cmp::Ordering,
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering as AtomicOrdering},
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    ChangeFeed, ChangeKind, DataStore, Direction, Filter, Op, Query, StoreError, Table,
    UNIQUE_VIOLATION,
};

type Row = Map<String, Value>;

pub struct MemoryStore {
    tables: Mutex<HashMap<Table, Vec<Row>>>,
    feed: ChangeFeed,
    offline: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            feed: ChangeFeed::new(),
            offline: AtomicBool::new(false),
        }
    }

    /// Makes every call fail with [`StoreError::Unavailable`] until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, AtomicOrdering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(AtomicOrdering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }
}

fn unique_keys(table: Table) -> &'static [&'static [&'static str]] {
    match table {
        Table::CaseClosures => &[&["id"], &["pet_id"]],
        Table::ClosureConfirmations => &[&["id"], &["closure_id", "confirmed_by"]],
        Table::SightingConfirmations => &[&["id"], &["sighting_id", "confirmed_by"]],
        Table::VolunteerAssignments => &[&["id"], &["pet_id", "volunteer_id"]],
        Table::Pets | Table::Sightings | Table::CommunityOffers | Table::ActivityLog => &[&["id"]],
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn violates(existing: &[Row], row: &Row, columns: &[&str]) -> bool {
    existing.iter().any(|other| {
        columns.iter().all(|column| match (row.get(*column), other.get(*column)) {
            (Some(a), Some(b)) => !a.is_null() && a == b,
            _ => false,
        })
    })
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => {
            match (
                DateTime::parse_from_rfc3339(a),
                DateTime::parse_from_rfc3339(b),
            ) {
                (Ok(a), Ok(b)) => Some(a.cmp(&b)),
                _ => Some(a.cmp(b)),
            }
        }
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn matches(row: &Row, filter: &Filter) -> bool {
    let value = row.get(&filter.column).unwrap_or(&Value::Null);

    match (filter.op, compare(value, &filter.value)) {
        (Op::Eq, Some(Ordering::Equal)) => true,
        (Op::Lt, Some(Ordering::Less)) => true,
        (Op::Gte, Some(Ordering::Greater | Ordering::Equal)) => true,
        _ => false,
    }
}

fn matches_all(row: &Row, query: &Query) -> bool {
    query.filters.iter().all(|filter| matches(row, filter))
}

fn as_row(value: Value) -> Result<Row, StoreError> {
    match value {
        Value::Object(row) => Ok(row),
        _ => Err(StoreError::Rejected {
            code: "PGRST102".to_string(),
            message: "row must be a JSON object".to_string(),
        }),
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn insert(&self, table: Table, row: Value) -> Result<Value, StoreError> {
        self.check_online()?;
        let mut row = as_row(row)?;

        row.entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        row.entry("created_at")
            .or_insert_with(|| Value::String(now()));

        let mut tables = self.tables.lock().await;
        let rows = tables.entry(table).or_default();

        for columns in unique_keys(table) {
            if violates(rows, &row, columns) {
                return Err(StoreError::Rejected {
                    code: UNIQUE_VIOLATION.to_string(),
                    message: format!(
                        "duplicate key value violates unique constraint \"{}_{}_key\"",
                        table.name(),
                        columns.join("_")
                    ),
                });
            }
        }

        rows.push(row.clone());
        drop(tables);

        self.feed.publish(table, ChangeKind::Insert);
        Ok(Value::Object(row))
    }

    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.check_online()?;
        let tables = self.tables.lock().await;

        let mut found: Vec<Row> = tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_all(row, query))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some((column, direction)) = &query.order {
            found.sort_by(|a, b| {
                let a = a.get(column).unwrap_or(&Value::Null);
                let b = b.get(column).unwrap_or(&Value::Null);
                let ordering = compare(a, b).unwrap_or(Ordering::Equal);

                match direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = query.limit {
            found.truncate(limit);
        }

        Ok(found.into_iter().map(Value::Object).collect())
    }

    async fn update(
        &self,
        table: Table,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, StoreError> {
        self.check_online()?;
        let patch = as_row(patch)?;
        let mut tables = self.tables.lock().await;

        let mut updated = Vec::new();
        if let Some(rows) = tables.get_mut(&table) {
            for row in rows.iter_mut().filter(|row| matches_all(row, query)) {
                for (column, value) in &patch {
                    row.insert(column.clone(), value.clone());
                }
                updated.push(Value::Object(row.clone()));
            }
        }
        drop(tables);

        if !updated.is_empty() {
            self.feed.publish(table, ChangeKind::Update);
        }
        Ok(updated)
    }

    async fn delete(&self, table: Table, query: &Query) -> Result<usize, StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;

        let removed = match tables.get_mut(&table) {
            Some(rows) => {
                let before = rows.len();
                rows.retain(|row| !matches_all(row, query));
                before - rows.len()
            }
            None => 0,
        };
        drop(tables);

        if removed > 0 {
            self.feed.publish(table, ChangeKind::Delete);
        }
        Ok(removed)
    }

    fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}
