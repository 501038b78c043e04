//! # Case closure
//!
//! A closure starts open and becomes verified once [`CONFIRMATION_QUORUM`]
//! distinct community members confirm it. Verified is terminal: later
//! confirmations still count but never reopen the case.
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::TrackerError,
    models::{CaseClosure, ClosureType, Pet, PetStatus},
};

pub const CONFIRMATION_QUORUM: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClosureState {
    Open,
    Verified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmOutcome {
    Recorded { count: u32, verified: bool },
    AlreadyConfirmed { count: u32 },
}

pub fn reaches_quorum(count: u32) -> bool {
    count >= CONFIRMATION_QUORUM
}

pub fn ensure_closable(pet: &Pet) -> Result<(), TrackerError> {
    match pet.status {
        PetStatus::Lost => Ok(()),
        _ => Err(TrackerError::NotLost),
    }
}

impl ClosureType {
    pub fn resulting_status(&self) -> PetStatus {
        match self {
            ClosureType::Found => PetStatus::Found,
            ClosureType::Returned | ClosureType::Other => PetStatus::Returned,
        }
    }
}

impl CaseClosure {
    pub fn state(&self) -> ClosureState {
        if self.is_verified {
            ClosureState::Verified
        } else {
            ClosureState::Open
        }
    }

    pub fn confirmations_needed(&self) -> u32 {
        CONFIRMATION_QUORUM.saturating_sub(self.verification_count)
    }

    /// Applies an authoritative confirmation count. Counts only move forward.
    pub fn apply_count(&mut self, count: u32, now: DateTime<Utc>) {
        self.verification_count = self.verification_count.max(count);
        self.is_verified = reaches_quorum(self.verification_count);

        if self.is_verified && self.verified_at.is_none() {
            self.verified_at = Some(now);
        }
    }
}
