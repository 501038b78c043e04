//! Typed reads and writes over the generic [`DataStore`].
//!
//! Pets and closures map one-to-one onto their domain types. Sightings keep
//! the hosted schema's `is_anonymous` / `anonymous_contact` / `reported_by`
//! columns and are folded into [`Reporter`] on the way in and out.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;
use tracker::{
    geo::Coordinates,
    models::{
        AssignmentStatus, CaseClosure, ClosureConfirmation, ClosureId, ClosureType,
        CommunityOffer, OfferType, Pet, PetId, PetStatus, Reporter, Sighting, SightingId, Species,
        UserId, VolunteerAssignment,
    },
};

use crate::{
    error::AppError,
    store::{DataStore, Direction, Query, StoreError, Table, decode, decode_all},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPet {
    #[serde(default)]
    pub name: Option<String>,
    pub species: Species,
    #[serde(default)]
    pub breed_id: Option<String>,
    #[serde(default)]
    pub breed_custom: Option<String>,
    #[serde(default)]
    pub color_id: Option<String>,
    #[serde(default = "lost")]
    pub status: PetStatus,
    #[serde(default)]
    pub lost_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lost_location: Option<Coordinates>,
    #[serde(default)]
    pub description: Option<String>,
}

fn lost() -> PetStatus {
    PetStatus::Lost
}

#[derive(Debug, Clone)]
pub struct NewSighting {
    pub pet_id: PetId,
    pub location: Coordinates,
    pub notes: Option<String>,
    pub reporter: Option<Reporter>,
    pub reported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClosure {
    pub closed_by: UserId,
    #[serde(default)]
    pub closure_type: ClosureType,
    #[serde(default)]
    pub closure_reason: Option<String>,
    #[serde(default)]
    pub thank_you_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOffer {
    #[serde(rename = "type")]
    pub offer_type: OfferType,
    #[serde(default = "offering")]
    pub offering: bool,
    pub title: String,
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
    #[serde(default)]
    pub created_by: Option<UserId>,
}

fn offering() -> bool {
    true
}

/// `GET /offers` filters. Only active offers are listed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OfferQuery {
    #[serde(default, rename = "type")]
    pub offer_type: Option<OfferType>,
    #[serde(default)]
    pub offering: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SightingRow {
    id: SightingId,
    pet_id: PetId,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    reported_by: Option<UserId>,
    #[serde(default)]
    is_anonymous: bool,
    #[serde(default)]
    anonymous_contact: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    reported_at: Option<DateTime<Utc>>,
    #[serde(default)]
    verification_count: u32,
    #[serde(default)]
    verified: bool,
}

impl TryFrom<SightingRow> for Sighting {
    type Error = tracker::TrackerError;

    fn try_from(row: SightingRow) -> Result<Self, Self::Error> {
        let reporter = if row.is_anonymous {
            Some(Reporter::anonymous(
                row.anonymous_contact.as_deref().unwrap_or_default(),
            )?)
        } else {
            row.reported_by
                .map(|user_id| Reporter::Identified { user_id })
        };

        Ok(Sighting {
            id: row.id,
            pet_id: row.pet_id,
            location: Coordinates::new(row.latitude, row.longitude)?,
            notes: row.notes,
            reporter,
            created_at: row.created_at,
            reported_at: row.reported_at,
            verification_count: row.verification_count,
            verified: row.verified,
        })
    }
}

fn sighting_columns(new: &NewSighting) -> Value {
    let (reported_by, anonymous_contact) = match &new.reporter {
        Some(Reporter::Identified { user_id }) => (Some(user_id.as_str()), None),
        Some(Reporter::Anonymous { contact }) => (None, Some(contact.as_str())),
        None => (None, None),
    };

    json!({
        "pet_id": new.pet_id,
        "latitude": new.location.latitude,
        "longitude": new.location.longitude,
        "notes": new.notes,
        "reported_by": reported_by,
        "is_anonymous": anonymous_contact.is_some(),
        "anonymous_contact": anonymous_contact,
        "reported_at": new.reported_at,
        "verification_count": 0,
        "verified": false,
    })
}

fn pet_columns(new: &NewPet) -> Value {
    json!({
        "name": new.name,
        "species": new.species,
        "breed_id": new.breed_id,
        "breed_custom": new.breed_custom,
        "color_id": new.color_id,
        "status": new.status,
        "lost_at": new.lost_at,
        "lost_latitude": new.lost_location.map(|c| c.latitude),
        "lost_longitude": new.lost_location.map(|c| c.longitude),
        "description": new.description,
    })
}

/// Rows that fail validation are logged and skipped rather than failing the list.
fn decode_sightings(rows: Vec<Value>) -> Vec<Sighting> {
    rows.into_iter()
        .filter_map(|row| {
            let parsed = serde_json::from_value::<SightingRow>(row)
                .map_err(|e| e.to_string())
                .and_then(|row| Sighting::try_from(row).map_err(|e| e.to_string()));

            parsed
                .map_err(|e| warn!("Skipping malformed sighting row: {e}"))
                .ok()
        })
        .collect()
}

fn single<T>(rows: Vec<T>, what: &'static str) -> Result<T, AppError> {
    rows.into_iter().next().ok_or(AppError::NotFound(what))
}

pub async fn list_pets(store: &dyn DataStore) -> Result<Vec<Pet>, AppError> {
    let rows = store
        .select(
            Table::Pets,
            &Query::new().order("created_at", Direction::Desc),
        )
        .await?;

    Ok(decode_all(rows)?)
}

pub async fn get_pet(store: &dyn DataStore, id: &PetId) -> Result<Pet, AppError> {
    let rows = store
        .select(Table::Pets, &Query::by_id(id.as_str()).limit(1))
        .await?;

    single(decode_all(rows)?, "Pet")
}

pub async fn insert_pet(store: &dyn DataStore, new: &NewPet) -> Result<Pet, AppError> {
    let row = store.insert(Table::Pets, pet_columns(new)).await?;

    Ok(decode(row)?)
}

pub async fn set_pet_status(
    store: &dyn DataStore,
    id: &PetId,
    status: PetStatus,
) -> Result<Pet, AppError> {
    let rows = store
        .update(
            Table::Pets,
            &Query::by_id(id.as_str()),
            json!({ "status": status }),
        )
        .await?;

    single(decode_all(rows)?, "Pet")
}

pub async fn list_sightings(store: &dyn DataStore) -> Result<Vec<Sighting>, AppError> {
    let rows = store.select(Table::Sightings, &Query::new()).await?;

    Ok(decode_sightings(rows))
}

pub async fn pet_sightings(
    store: &dyn DataStore,
    pet_id: &PetId,
) -> Result<Vec<Sighting>, AppError> {
    let rows = store
        .select(
            Table::Sightings,
            &Query::new()
                .eq("pet_id", pet_id.as_str())
                .order("created_at", Direction::Desc),
        )
        .await?;

    Ok(decode_sightings(rows))
}

pub async fn get_sighting(store: &dyn DataStore, id: &SightingId) -> Result<Sighting, AppError> {
    let rows = store
        .select(Table::Sightings, &Query::by_id(id.as_str()).limit(1))
        .await?;

    single(decode_sightings(rows), "Sighting")
}

pub async fn insert_sighting(
    store: &dyn DataStore,
    new: &NewSighting,
) -> Result<Sighting, AppError> {
    let row = store.insert(Table::Sightings, sighting_columns(new)).await?;

    single(decode_sightings(vec![row]), "Sighting")
}

pub async fn closure_for_pet(
    store: &dyn DataStore,
    pet_id: &PetId,
) -> Result<Option<CaseClosure>, AppError> {
    let rows = store
        .select(
            Table::CaseClosures,
            &Query::new().eq("pet_id", pet_id.as_str()).limit(1),
        )
        .await?;

    Ok(decode_all(rows)?.into_iter().next())
}

pub async fn get_closure(store: &dyn DataStore, id: &ClosureId) -> Result<CaseClosure, AppError> {
    let rows = store
        .select(Table::CaseClosures, &Query::by_id(id.as_str()).limit(1))
        .await?;

    single(decode_all(rows)?, "Closure")
}

pub async fn insert_closure(
    store: &dyn DataStore,
    pet_id: &PetId,
    new: &NewClosure,
) -> Result<CaseClosure, AppError> {
    let row = json!({
        "pet_id": pet_id,
        "closed_by": new.closed_by,
        "closure_type": new.closure_type,
        "closure_reason": new.closure_reason,
        "thank_you_message": new.thank_you_message,
        "verification_count": 0,
        "is_verified": false,
    });

    match store.insert(Table::CaseClosures, row).await {
        Ok(row) => Ok(decode(row)?),
        Err(e) if e.is_unique_violation() => Err(AppError::CaseAlreadyClosed),
        Err(e) => Err(e.into()),
    }
}

pub async fn closure_confirmations(
    store: &dyn DataStore,
    closure_id: &ClosureId,
) -> Result<Vec<ClosureConfirmation>, AppError> {
    let rows = store
        .select(
            Table::ClosureConfirmations,
            &Query::new()
                .eq("closure_id", closure_id.as_str())
                .order("created_at", Direction::Asc),
        )
        .await?;

    Ok(decode_all(rows)?)
}

/// Writes a closure's count only if it moves the stored count forward.
pub async fn save_closure_count(
    store: &dyn DataStore,
    closure: &CaseClosure,
) -> Result<(), StoreError> {
    let query =
        Query::by_id(closure.id.as_str()).lt("verification_count", closure.verification_count);

    store
        .update(
            Table::CaseClosures,
            &query,
            json!({
                "verification_count": closure.verification_count,
                "is_verified": closure.is_verified,
                "verified_at": closure.verified_at,
            }),
        )
        .await?;

    Ok(())
}

pub async fn save_sighting_count(
    store: &dyn DataStore,
    id: &SightingId,
    count: u32,
    verified: bool,
) -> Result<(), StoreError> {
    store
        .update(
            Table::Sightings,
            &Query::by_id(id.as_str()).lt("verification_count", count),
            json!({ "verification_count": count, "verified": verified }),
        )
        .await?;

    Ok(())
}

pub async fn list_offers(
    store: &dyn DataStore,
    filter: &OfferQuery,
) -> Result<Vec<CommunityOffer>, AppError> {
    let mut query = Query::new().eq("active", true);
    if let Some(offer_type) = filter.offer_type {
        query = query.eq("type", offer_type.as_str());
    }
    if let Some(offering) = filter.offering {
        query = query.eq("offering", offering);
    }

    let rows = store
        .select(
            Table::CommunityOffers,
            &query.order("created_at", Direction::Desc),
        )
        .await?;

    Ok(decode_all(rows)?)
}

pub async fn insert_offer(
    store: &dyn DataStore,
    new: &NewOffer,
) -> Result<CommunityOffer, AppError> {
    let title = new.title.trim();
    if title.is_empty() {
        return Err(AppError::MalformedPayload("an offer needs a title".to_string()));
    }
    if new.amount.is_some_and(|amount| !amount.is_finite() || amount < 0.0) {
        return Err(AppError::MalformedPayload(
            "amount must be a non-negative number".to_string(),
        ));
    }

    let row = json!({
        "type": new.offer_type,
        "offering": new.offering,
        "title": title,
        "description": new.description,
        "location": new.location,
        "contact": new.contact,
        "medication_name": new.medication_name,
        "amount": new.amount,
        "created_by": new.created_by,
        "active": true,
    });
    let row = store.insert(Table::CommunityOffers, row).await?;

    Ok(decode(row)?)
}

fn assignment(pet_id: &PetId, volunteer: &UserId) -> Query {
    Query::new()
        .eq("pet_id", pet_id.as_str())
        .eq("volunteer_id", volunteer.as_str())
}

pub async fn search_volunteers(
    store: &dyn DataStore,
    pet_id: &PetId,
) -> Result<Vec<VolunteerAssignment>, AppError> {
    let rows = store
        .select(
            Table::VolunteerAssignments,
            &Query::new()
                .eq("pet_id", pet_id.as_str())
                .eq("status", AssignmentStatus::Active.as_str())
                .order("created_at", Direction::Asc),
        )
        .await?;

    Ok(decode_all(rows)?)
}

/// One assignment row per (pet, volunteer). Joining again after leaving
/// reactivates the cancelled row.
pub async fn join_search(
    store: &dyn DataStore,
    pet_id: &PetId,
    volunteer: &UserId,
) -> Result<VolunteerAssignment, AppError> {
    let row = json!({
        "pet_id": pet_id,
        "volunteer_id": volunteer,
        "status": AssignmentStatus::Active,
    });

    match store.insert(Table::VolunteerAssignments, row).await {
        Ok(row) => Ok(decode(row)?),
        Err(e) if e.is_unique_violation() => {
            let query =
                assignment(pet_id, volunteer).eq("status", AssignmentStatus::Cancelled.as_str());
            let rows = store
                .update(
                    Table::VolunteerAssignments,
                    &query,
                    json!({ "status": AssignmentStatus::Active }),
                )
                .await?;

            decode_all(rows)?
                .into_iter()
                .next()
                .ok_or(AppError::AlreadyJoined)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn leave_search(
    store: &dyn DataStore,
    pet_id: &PetId,
    volunteer: &UserId,
) -> Result<VolunteerAssignment, AppError> {
    let query = assignment(pet_id, volunteer).eq("status", AssignmentStatus::Active.as_str());
    let rows = store
        .update(
            Table::VolunteerAssignments,
            &query,
            json!({ "status": AssignmentStatus::Cancelled }),
        )
        .await?;

    single(decode_all(rows)?, "Assignment")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn new_sighting(pet_id: &PetId, reporter: Option<Reporter>) -> NewSighting {
        NewSighting {
            pet_id: pet_id.clone(),
            location: Coordinates::new(-37.47, -72.35).unwrap(),
            notes: Some("near the plaza".to_string()),
            reporter,
            reported_at: None,
        }
    }

    #[tokio::test]
    async fn test_reporter_columns_round_trip() {
        let store = MemoryStore::new();
        let pet = PetId::from("p1");

        let anonymous = insert_sighting(
            &store,
            &new_sighting(&pet, Some(Reporter::Anonymous { contact: "+56 9 555".to_string() })),
        )
        .await
        .unwrap();
        let identified = insert_sighting(
            &store,
            &new_sighting(&pet, Some(Reporter::Identified { user_id: UserId::from("ana") })),
        )
        .await
        .unwrap();
        let unattributed = insert_sighting(&store, &new_sighting(&pet, None)).await.unwrap();

        let raw = store
            .select(Table::Sightings, &Query::by_id(anonymous.id.as_str()))
            .await
            .unwrap();
        assert_eq!(raw[0]["is_anonymous"], true);
        assert_eq!(raw[0]["reported_by"], Value::Null);

        assert!(matches!(anonymous.reporter, Some(Reporter::Anonymous { .. })));
        assert!(matches!(identified.reporter, Some(Reporter::Identified { .. })));
        assert_eq!(unattributed.reporter, None);
    }

    #[tokio::test]
    async fn test_malformed_rows_are_skipped() {
        let store = MemoryStore::new();
        store
            .insert(
                Table::Sightings,
                json!({"pet_id": "p1", "latitude": 123.0, "longitude": 0.0}),
            )
            .await
            .unwrap();
        insert_sighting(&store, &new_sighting(&PetId::from("p1"), None))
            .await
            .unwrap();

        assert_eq!(list_sightings(&store).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_closure_is_translated() {
        let store = MemoryStore::new();
        let pet = PetId::from("p1");
        let new = NewClosure {
            closed_by: UserId::from("owner"),
            closure_type: ClosureType::Found,
            closure_reason: None,
            thank_you_message: None,
        };

        insert_closure(&store, &pet, &new).await.unwrap();

        assert!(matches!(
            insert_closure(&store, &pet, &new).await,
            Err(AppError::CaseAlreadyClosed)
        ));
    }

    #[tokio::test]
    async fn test_anonymous_row_without_contact_is_skipped() {
        let store = MemoryStore::new();
        store
            .insert(
                Table::Sightings,
                json!({"pet_id": "p1", "latitude": -37.47, "longitude": -72.35,
                       "is_anonymous": true, "anonymous_contact": null}),
            )
            .await
            .unwrap();
        store
            .insert(
                Table::Sightings,
                json!({"pet_id": "p1", "latitude": -37.47, "longitude": -72.35,
                       "is_anonymous": true, "anonymous_contact": "  "}),
            )
            .await
            .unwrap();

        assert!(list_sightings(&store).await.unwrap().is_empty());
    }

    fn new_offer(offer_type: OfferType, offering: bool, title: &str) -> NewOffer {
        NewOffer {
            offer_type,
            offering,
            title: title.to_string(),
            description: None,
            location: Some("Los Ángeles".to_string()),
            contact: Some("+56 9 555".to_string()),
            medication_name: None,
            amount: None,
            created_by: None,
        }
    }

    #[tokio::test]
    async fn test_offers_filter_by_type_and_active() {
        let store = MemoryStore::new();
        insert_offer(&store, &new_offer(OfferType::Foster, true, "Patio grande"))
            .await
            .unwrap();
        insert_offer(&store, &new_offer(OfferType::Foster, false, "Busco hogar"))
            .await
            .unwrap();
        insert_offer(&store, &new_offer(OfferType::Donations, true, "Alimento"))
            .await
            .unwrap();
        store
            .insert(
                Table::CommunityOffers,
                json!({"type": "foster", "offering": true, "title": "Old", "active": false}),
            )
            .await
            .unwrap();

        let foster = OfferQuery {
            offer_type: Some(OfferType::Foster),
            offering: None,
        };
        assert_eq!(list_offers(&store, &foster).await.unwrap().len(), 2);

        let requests = OfferQuery {
            offering: Some(false),
            ..foster
        };
        let found = list_offers(&store, &requests).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title.as_deref(), Some("Busco hogar"));

        assert_eq!(list_offers(&store, &OfferQuery::default()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_offers() {
        let store = MemoryStore::new();

        let untitled = new_offer(OfferType::Foster, true, "   ");
        assert!(matches!(
            insert_offer(&store, &untitled).await,
            Err(AppError::MalformedPayload(_))
        ));

        let negative = NewOffer {
            amount: Some(-5.0),
            ..new_offer(OfferType::Donations, true, "Ayuda")
        };
        assert!(matches!(
            insert_offer(&store, &negative).await,
            Err(AppError::MalformedPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_join_leave_and_rejoin() {
        let store = MemoryStore::new();
        let pet = PetId::from("p1");
        let ana = UserId::from("ana");

        join_search(&store, &pet, &ana).await.unwrap();
        join_search(&store, &pet, &UserId::from("ben")).await.unwrap();
        assert!(matches!(
            join_search(&store, &pet, &ana).await,
            Err(AppError::AlreadyJoined)
        ));

        let left = leave_search(&store, &pet, &ana).await.unwrap();
        assert_eq!(left.status, AssignmentStatus::Cancelled);
        assert!(matches!(
            leave_search(&store, &pet, &ana).await,
            Err(AppError::NotFound("Assignment"))
        ));

        let volunteers = search_volunteers(&store, &pet).await.unwrap();
        assert_eq!(volunteers.len(), 1);
        assert_eq!(volunteers[0].volunteer_id, UserId::from("ben"));

        let back = join_search(&store, &pet, &ana).await.unwrap();
        assert_eq!(back.status, AssignmentStatus::Active);
        assert_eq!(back.id, left.id);
        assert_eq!(search_volunteers(&store, &pet).await.unwrap().len(), 2);
    }
}
