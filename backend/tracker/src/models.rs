//! Shared data model. Data-only, no I/O.
use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::TrackerError, geo::Coordinates};

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

id_type!(PetId);
id_type!(SightingId);
id_type!(ClosureId);
id_type!(UserId);
id_type!(OfferId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Species {
    Dog,
    Cat,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PetStatus {
    Lost,
    Found,
    Sighted,
    Returned,
}

impl PetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PetStatus::Lost => "lost",
            PetStatus::Found => "found",
            PetStatus::Sighted => "sighted",
            PetStatus::Returned => "returned",
        }
    }
}

impl Species {
    pub fn as_str(&self) -> &'static str {
        match self {
            Species::Dog => "dog",
            Species::Cat => "cat",
            Species::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pet {
    pub id: PetId,
    #[serde(default)]
    pub name: Option<String>,
    pub species: Species,
    #[serde(default)]
    pub breed_id: Option<String>,
    #[serde(default)]
    pub breed_custom: Option<String>,
    #[serde(default)]
    pub color_id: Option<String>,
    pub status: PetStatus,
    #[serde(default)]
    pub lost_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lost_latitude: Option<f64>,
    #[serde(default)]
    pub lost_longitude: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Pet {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or("A lost pet")
    }

    pub fn lost_location(&self) -> Option<Coordinates> {
        match (self.lost_latitude, self.lost_longitude) {
            (Some(lat), Some(lng)) => Coordinates::new(lat, lng).ok(),
            _ => None,
        }
    }
}

/// Who filed a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reporter {
    Identified { user_id: UserId },
    Anonymous { contact: String },
}

impl Reporter {
    pub fn anonymous(contact: &str) -> Result<Self, TrackerError> {
        let contact = contact.trim();
        if contact.is_empty() {
            return Err(TrackerError::MissingContact);
        }

        Ok(Reporter::Anonymous {
            contact: contact.to_string(),
        })
    }

    pub fn validate(self) -> Result<Self, TrackerError> {
        match self {
            Reporter::Anonymous { contact } => Reporter::anonymous(&contact),
            identified => Ok(identified),
        }
    }
}

/// A location report: sighting, lost or found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub id: SightingId,
    pub pet_id: PetId,
    pub location: Coordinates,
    pub notes: Option<String>,
    pub reporter: Option<Reporter>,
    pub created_at: DateTime<Utc>,
    pub reported_at: Option<DateTime<Utc>>,
    pub verification_count: u32,
    pub verified: bool,
}

/// What a report claims about its pet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    #[default]
    Sighting,
    Lost,
    Found,
}

impl ReportKind {
    pub fn implied_status(&self) -> PetStatus {
        match self {
            ReportKind::Sighting => PetStatus::Sighted,
            ReportKind::Lost => PetStatus::Lost,
            ReportKind::Found => PetStatus::Found,
        }
    }

    /// Plain sightings leave the pet's status alone.
    pub fn changes_status(&self) -> bool {
        !matches!(self, ReportKind::Sighting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClosureType {
    #[default]
    Found,
    Returned,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseClosure {
    pub id: ClosureId,
    pub pet_id: PetId,
    pub closed_by: UserId,
    pub closure_type: ClosureType,
    #[serde(default)]
    pub closure_reason: Option<String>,
    #[serde(default)]
    pub thank_you_message: Option<String>,
    #[serde(default)]
    pub verification_count: u32,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One community member vouching for a closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureConfirmation {
    pub id: String,
    pub closure_id: ClosureId,
    pub confirmed_by: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferType {
    Foster,
    Medications,
    Donations,
}

impl OfferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferType::Foster => "foster",
            OfferType::Medications => "medications",
            OfferType::Donations => "donations",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    #[default]
    Active,
    Cancelled,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Active => "active",
            AssignmentStatus::Cancelled => "cancelled",
        }
    }
}

/// A volunteer who joined the search for a lost pet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolunteerAssignment {
    pub id: String,
    pub pet_id: PetId,
    pub volunteer_id: UserId,
    #[serde(default)]
    pub status: AssignmentStatus,
    pub created_at: DateTime<Utc>,
}

fn yes() -> bool {
    true
}

/// Community aid: a foster home, medication or a donation, offered or asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityOffer {
    pub id: OfferId,
    #[serde(rename = "type")]
    pub offer_type: OfferType,
    /// `false` for a request.
    #[serde(default = "yes")]
    pub offering: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub medication_name: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default = "yes")]
    pub active: bool,
    #[serde(default)]
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}
