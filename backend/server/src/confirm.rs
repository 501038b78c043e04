//! # Confirmations
//!
//! Closures and sightings are verified by the community. Every confirmation is
//! a `(target, user)` row guarded by a unique constraint, so the store decides
//! who already confirmed. The count that follows an accepted row comes from a
//! [`ConfirmationCounter`], never from a read-modify-write of the target row,
//! and is written back with a monotonic guard.
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use tracker::{
    closure::{ConfirmOutcome, reaches_quorum},
    models::{ClosureId, SightingId, UserId},
};

use crate::{
    error::AppError,
    repo,
    store::{DataStore, Query, StoreError, Table},
};

/// Where the confirmations of one kind of target live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quorum {
    pub confirmations: Table,
    pub target_column: &'static str,
}

pub const CLOSURES: Quorum = Quorum {
    confirmations: Table::ClosureConfirmations,
    target_column: "closure_id",
};

pub const SIGHTINGS: Quorum = Quorum {
    confirmations: Table::SightingConfirmations,
    target_column: "sighting_id",
};

impl Quorum {
    pub fn key(&self, target_id: &str) -> String {
        format!("huellas:{}:{target_id}", self.confirmations.name())
    }
}

#[async_trait]
pub trait ConfirmationCounter: Send + Sync {
    /// Returns the number of confirmations for `target_id`, counting `user`,
    /// whose row has already been stored.
    async fn record(
        &self,
        store: &dyn DataStore,
        quorum: Quorum,
        target_id: &str,
        user: &UserId,
    ) -> Result<u32, StoreError>;
}

/// Recounts the confirmation rows. Exact because the rows are unique.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoreCounter;

pub async fn confirmers(
    store: &dyn DataStore,
    quorum: Quorum,
    target_id: &str,
) -> Result<Vec<String>, StoreError> {
    let rows = store
        .select(
            quorum.confirmations,
            &Query::new().eq(quorum.target_column, target_id),
        )
        .await?;

    Ok(rows
        .iter()
        .filter_map(|row| row["confirmed_by"].as_str().map(str::to_string))
        .collect())
}

#[async_trait]
impl ConfirmationCounter for StoreCounter {
    async fn record(
        &self,
        store: &dyn DataStore,
        quorum: Quorum,
        target_id: &str,
        _user: &UserId,
    ) -> Result<u32, StoreError> {
        Ok(confirmers(store, quorum, target_id).await?.len() as u32)
    }
}

/// Stores the confirmation row. `Ok(false)` means the user had already confirmed.
async fn insert_confirmation(
    store: &dyn DataStore,
    quorum: Quorum,
    target_id: &str,
    user: &UserId,
) -> Result<bool, StoreError> {
    let row = json!({
        quorum.target_column: target_id,
        "confirmed_by": user,
    });

    match store.insert(quorum.confirmations, row).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_unique_violation() => Ok(false),
        Err(e) => Err(e),
    }
}

pub async fn confirm_closure(
    store: &dyn DataStore,
    counter: &dyn ConfirmationCounter,
    closure_id: &ClosureId,
    user: &UserId,
) -> Result<ConfirmOutcome, AppError> {
    let mut closure = repo::get_closure(store, closure_id).await?;
    let inserted = insert_confirmation(store, CLOSURES, closure_id.as_str(), user).await?;

    // a repeat still recounts, so a count lost to a failed write is repaired
    let count = counter
        .record(store, CLOSURES, closure_id.as_str(), user)
        .await?;
    let stored = closure.verification_count;
    let was_verified = closure.is_verified;
    closure.apply_count(count, Utc::now());

    if closure.verification_count > stored {
        repo::save_closure_count(store, &closure).await?;
    }

    if closure.is_verified && !was_verified {
        info!(closure = %closure.id, pet = %closure.pet_id, "Case closure verified");

        let status = closure.closure_type.resulting_status();
        if let Err(e) = repo::set_pet_status(store, &closure.pet_id, status).await {
            warn!(pet = %closure.pet_id, "Failed to move closed pet to {}: {e}", status.as_str());
        }
    }

    if !inserted {
        return Ok(ConfirmOutcome::AlreadyConfirmed {
            count: closure.verification_count,
        });
    }

    Ok(ConfirmOutcome::Recorded {
        count: closure.verification_count,
        verified: closure.is_verified,
    })
}

pub async fn confirm_sighting(
    store: &dyn DataStore,
    counter: &dyn ConfirmationCounter,
    sighting_id: &SightingId,
    user: &UserId,
) -> Result<ConfirmOutcome, AppError> {
    let sighting = repo::get_sighting(store, sighting_id).await?;
    let inserted = insert_confirmation(store, SIGHTINGS, sighting_id.as_str(), user).await?;

    let count = counter
        .record(store, SIGHTINGS, sighting_id.as_str(), user)
        .await?
        .max(sighting.verification_count);
    let verified = reaches_quorum(count);

    if count > sighting.verification_count {
        if let Err(e) = repo::save_sighting_count(store, sighting_id, count, verified).await {
            // the confirmation row is stored, the next confirmation repairs the count
            warn!(sighting = %sighting_id, "Failed to save verification count: {e}");
            return Err(e.into());
        }
    }

    if !inserted {
        return Ok(ConfirmOutcome::AlreadyConfirmed { count });
    }

    Ok(ConfirmOutcome::Recorded { count, verified })
}
