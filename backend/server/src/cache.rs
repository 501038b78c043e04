//! Table snapshots for the read-heavy views (list, routes, proximity).
//!
//! A snapshot remembers the change-feed version it was read at and is reused
//! until the store's version for that table moves, so the next read after any
//! write made through this process sees that write.
use std::sync::Arc;

use tokio::sync::RwLock;
use tracker::models::{Pet, Sighting};

use crate::{
    error::AppError,
    repo,
    store::{DataStore, Table},
};

struct Snapshot<T> {
    version: u64,
    rows: Arc<Vec<T>>,
}

#[derive(Default)]
pub struct SnapshotCache {
    pets: RwLock<Option<Snapshot<Pet>>>,
    sightings: RwLock<Option<Snapshot<Sighting>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pets(&self, store: &dyn DataStore) -> Result<Arc<Vec<Pet>>, AppError> {
        let version = store.version(Table::Pets);
        if let Some(rows) = fresh(&self.pets, version).await {
            return Ok(rows);
        }

        let rows = Arc::new(repo::list_pets(store).await?);
        *self.pets.write().await = Some(Snapshot {
            version,
            rows: rows.clone(),
        });

        Ok(rows)
    }

    pub async fn sightings(&self, store: &dyn DataStore) -> Result<Arc<Vec<Sighting>>, AppError> {
        let version = store.version(Table::Sightings);
        if let Some(rows) = fresh(&self.sightings, version).await {
            return Ok(rows);
        }

        let rows = Arc::new(repo::list_sightings(store).await?);
        *self.sightings.write().await = Some(Snapshot {
            version,
            rows: rows.clone(),
        });

        Ok(rows)
    }
}

// The version is read before fetching, so a write racing the fetch leaves the
// snapshot tagged stale and the next read fetches again.
async fn fresh<T>(slot: &RwLock<Option<Snapshot<T>>>, version: u64) -> Option<Arc<Vec<T>>> {
    slot.read()
        .await
        .as_ref()
        .filter(|snapshot| snapshot.version == version)
        .map(|snapshot| snapshot.rows.clone())
}
