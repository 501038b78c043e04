use std::{convert::Infallible, sync::Arc};

use async_stream::stream;
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracker::{
    closure::{ClosureState, ConfirmOutcome, ensure_closable},
    geo::Coordinates,
    models::{
        CaseClosure, ClosureConfirmation, ClosureId, CommunityOffer, Pet, PetId, PetStatus,
        ReportKind, Reporter, Sighting, SightingId, UserId, VolunteerAssignment,
    },
    proximity::{ProximityMatch, nearby_lost},
    route::build_routes,
    search::{PetQuery, filter_and_sort, index_pets},
};

use crate::{
    activity,
    config::Diagnostics,
    confirm,
    error::AppError,
    geocoding::GeocodeHit,
    notify::{Notification, Permission, notify},
    repo::{self, NewClosure, NewOffer, NewPet, NewSighting, OfferQuery},
    session::{LocationUpdate, SessionView},
    state::State as AppState,
    store::{Query as StoreQuery, Table},
    utils::{parse_body, require_user},
};

type AppResult<T> = Result<T, AppError>;

#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub read_only: bool,
    pub store_reachable: bool,
    pub sessions: usize,
    #[serde(flatten)]
    pub diagnostics: Diagnostics,
}

/// Always 200 so a client can poll it as a manual retry.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store_reachable = match state
        .store()
        .select(Table::Pets, &StoreQuery::new().limit(1))
        .await
    {
        Ok(_) => true,
        Err(e) => {
            warn!("Store health check failed: {e}");
            false
        }
    };

    let healthy = store_reachable && !state.read_only;

    Json(Health {
        status: if healthy { "ok" } else { "degraded" },
        read_only: state.read_only,
        store_reachable,
        sessions: state.sessions.len().await,
        diagnostics: state.config.diagnostics(),
    })
}

pub async fn list_pets_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PetQuery>,
) -> AppResult<Json<Vec<Pet>>> {
    let pets = state.cache.pets(state.store()).await?;
    let sightings = state.cache.sightings(state.store()).await?;

    Ok(Json(filter_and_sort(&pets, &sightings, &query)))
}

pub async fn create_pet_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    state.ensure_writable()?;
    let new: NewPet = parse_body(&body)?;

    let pet = repo::insert_pet(state.store(), &new).await?;
    info!(pet = %pet.id, status = pet.status.as_str(), "Pet registered");

    activity::record(
        state.store(),
        None,
        "create_pet",
        "pet",
        Some(pet.id.as_str()),
        Some(json!({ "name": pet.name, "status": pet.status })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(pet)))
}

pub async fn get_pet_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<PetId>,
) -> AppResult<Json<Pet>> {
    Ok(Json(repo::get_pet(state.store(), &id).await?))
}

pub async fn pet_sightings_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<PetId>,
) -> AppResult<Json<Vec<Sighting>>> {
    let pet = repo::get_pet(state.store(), &id).await?;

    Ok(Json(repo::pet_sightings(state.store(), &pet.id).await?))
}

/// A report about an existing pet (`pet_id`) or a pet seen for the first time (`pet`).
#[derive(Debug, Deserialize)]
pub struct ReportPayload {
    #[serde(default)]
    pub pet_id: Option<PetId>,
    #[serde(default)]
    pub pet: Option<NewPet>,
    #[serde(default)]
    pub kind: ReportKind,
    pub location: Coordinates,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub reporter: Option<Reporter>,
    #[serde(default)]
    pub reported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ReportCreated {
    pub pet: Pet,
    pub sighting: Sighting,
}

pub async fn create_sighting_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    state.ensure_writable()?;
    let report: ReportPayload = parse_body(&body)?;
    let reporter = report.reporter.map(Reporter::validate).transpose()?;
    let store = state.store();
    let status = report.kind.implied_status();

    let mut pet = match (report.pet_id, report.pet) {
        (Some(_), Some(_)) => {
            return Err(AppError::MalformedPayload(
                "a report takes pet_id or pet, not both".to_string(),
            ));
        }
        (Some(id), None) => repo::get_pet(store, &id).await?,
        (None, Some(mut new)) => {
            new.status = status;
            if report.kind == ReportKind::Lost {
                new.lost_location = new.lost_location.or(Some(report.location));
                new.lost_at = new.lost_at.or(report.reported_at).or(Some(Utc::now()));
            }

            repo::insert_pet(store, &new).await?
        }
        (None, None) => {
            return Err(AppError::MalformedPayload(
                "a report needs either pet_id or pet".to_string(),
            ));
        }
    };

    let sighting = repo::insert_sighting(
        store,
        &NewSighting {
            pet_id: pet.id.clone(),
            location: report.location,
            notes: report.notes,
            reporter,
            reported_at: report.reported_at,
        },
    )
    .await?;

    if report.kind.changes_status() && pet.status != status {
        pet = repo::set_pet_status(store, &pet.id, status).await?;
    }

    let user = match &sighting.reporter {
        Some(Reporter::Identified { user_id }) => Some(user_id),
        _ => None,
    };
    activity::record(
        store,
        user,
        "create_sighting",
        "sighting",
        Some(sighting.id.as_str()),
        Some(json!({ "pet_id": pet.id, "kind": report.kind })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(ReportCreated { pet, sighting })))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPayload {
    #[serde(default)]
    pub user_id: Option<UserId>,
}

fn confirmed(outcome: ConfirmOutcome) -> AppResult<Json<ConfirmOutcome>> {
    match outcome {
        ConfirmOutcome::AlreadyConfirmed { .. } => Err(AppError::AlreadyConfirmed),
        recorded => Ok(Json(recorded)),
    }
}

pub async fn confirm_sighting_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SightingId>,
    body: Bytes,
) -> AppResult<Json<ConfirmOutcome>> {
    state.ensure_writable()?;
    let payload: ConfirmPayload = parse_body(&body)?;
    let user = require_user(payload.user_id)?;

    let outcome =
        confirm::confirm_sighting(state.store(), state.counter.as_ref(), &id, &user).await?;

    activity::record(
        state.store(),
        Some(&user),
        "confirm_sighting",
        "sighting",
        Some(id.as_str()),
        None,
    )
    .await;

    confirmed(outcome)
}

#[derive(Debug, Serialize)]
pub struct RouteView {
    pub pet_id: PetId,
    pub pet_name: Option<String>,
    pub status: Option<PetStatus>,
    pub drawable: bool,
    pub path: Vec<Coordinates>,
    pub reports: Vec<Sighting>,
}

pub async fn routes_handler(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<RouteView>>> {
    let pets = state.cache.pets(state.store()).await?;
    let sightings = state.cache.sightings(state.store()).await?;
    let pets_by_id = index_pets(&pets);

    let mut routes: Vec<RouteView> = build_routes(sightings.iter().cloned())
        .into_iter()
        .map(|(pet_id, route)| {
            let pet = pets_by_id.get(&pet_id);

            RouteView {
                pet_name: pet.and_then(|pet| pet.name.clone()),
                status: pet.map(|pet| pet.status),
                drawable: route.is_drawable(),
                path: route.path(),
                reports: route.reports,
                pet_id,
            }
        })
        .collect();
    routes.sort_by(|a, b| a.pet_id.cmp(&b.pet_id));

    Ok(Json(routes))
}

#[derive(Debug, Default, Deserialize)]
pub struct OpenSession {
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub permission: Permission,
}

pub async fn open_session_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let request: OpenSession = if body.is_empty() {
        OpenSession::default()
    } else {
        parse_body(&body)?
    };

    let session = state
        .sessions
        .open(request.user_id, request.permission)
        .await;

    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn set_location_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<Json<SessionView>> {
    let update: LocationUpdate = parse_body(&body)?;

    Ok(Json(state.sessions.set_location(&id, update).await?))
}

pub async fn volunteers_handler(
    State(state): State<Arc<AppState>>,
    Path(pet_id): Path<PetId>,
) -> AppResult<Json<Vec<VolunteerAssignment>>> {
    let pet = repo::get_pet(state.store(), &pet_id).await?;

    Ok(Json(repo::search_volunteers(state.store(), &pet.id).await?))
}

pub async fn join_search_handler(
    State(state): State<Arc<AppState>>,
    Path(pet_id): Path<PetId>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    state.ensure_writable()?;
    let payload: ConfirmPayload = parse_body(&body)?;
    let user = require_user(payload.user_id)?;
    let pet = repo::get_pet(state.store(), &pet_id).await?;

    let assignment = repo::join_search(state.store(), &pet.id, &user).await?;
    info!(pet = %pet.id, volunteer = %user, "Volunteer joined search");

    activity::record(
        state.store(),
        Some(&user),
        "join_search",
        "pet",
        Some(pet.id.as_str()),
        None,
    )
    .await;

    Ok((StatusCode::CREATED, Json(assignment)))
}

pub async fn leave_search_handler(
    State(state): State<Arc<AppState>>,
    Path((pet_id, user)): Path<(PetId, UserId)>,
) -> AppResult<StatusCode> {
    state.ensure_writable()?;
    let user = require_user(Some(user))?;

    repo::leave_search(state.store(), &pet_id, &user).await?;

    activity::record(
        state.store(),
        Some(&user),
        "leave_search",
        "pet",
        Some(pet_id.as_str()),
        None,
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_offers_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OfferQuery>,
) -> AppResult<Json<Vec<CommunityOffer>>> {
    Ok(Json(repo::list_offers(state.store(), &query).await?))
}

pub async fn create_offer_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    state.ensure_writable()?;
    let new: NewOffer = parse_body(&body)?;

    let offer = repo::insert_offer(state.store(), &new).await?;
    info!(offer = %offer.id, kind = offer.offer_type.as_str(), "Community offer posted");

    activity::record(
        state.store(),
        offer.created_by.as_ref(),
        "create_offer",
        "community_offer",
        Some(offer.id.as_str()),
        Some(json!({ "type": offer.offer_type, "offering": offer.offering })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(offer)))
}

pub async fn close_session_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.sessions.close(&id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Lost pets near the session's viewer. Newly matched pets are notified once.
pub async fn alerts_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<ProximityMatch>>> {
    let Some(viewer) = state.sessions.with(&id, |session| session.viewer).await? else {
        return Ok(Json(Vec::new()));
    };

    let pets = state.cache.pets(state.store()).await?;
    let sightings = state.cache.sightings(state.store()).await?;
    let matches = nearby_lost(&viewer, &pets, &sightings, state.config.alert_radius_km);

    let (visible, fresh, permission) = state
        .sessions
        .with(&id, |session| {
            let visible = session.alerts.visible(matches);
            let fresh: Vec<Notification> = session
                .alerts
                .take_unnotified(&visible)
                .into_iter()
                .map(|found| Notification::for_match(&id, found))
                .collect();

            (visible, fresh, session.permission)
        })
        .await?;

    for notification in fresh {
        notify(state.notifier.as_ref(), permission, notification);
    }

    Ok(Json(visible))
}

pub async fn dismiss_alert_handler(
    State(state): State<Arc<AppState>>,
    Path((id, pet_id)): Path<(String, PetId)>,
) -> AppResult<StatusCode> {
    state
        .sessions
        .with(&id, |session| session.alerts.dismiss(pet_id))
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn open_closure_handler(
    State(state): State<Arc<AppState>>,
    Path(pet_id): Path<PetId>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    state.ensure_writable()?;
    let new: NewClosure = parse_body(&body)?;
    require_user(Some(new.closed_by.clone()))?;

    let pet = repo::get_pet(state.store(), &pet_id).await?;
    ensure_closable(&pet)?;

    let closure = repo::insert_closure(state.store(), &pet.id, &new).await?;
    info!(closure = %closure.id, pet = %pet.id, "Case closure opened");

    activity::record(
        state.store(),
        Some(&new.closed_by),
        "close_case",
        "pet",
        Some(pet.id.as_str()),
        Some(json!({ "closure_id": closure.id, "closure_type": closure.closure_type })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(closure)))
}

#[derive(Debug, Deserialize)]
pub struct ClosureLookup {
    #[serde(default)]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Serialize)]
pub struct ClosureStatus {
    pub closure: Option<CaseClosure>,
    pub state: Option<ClosureState>,
    pub confirmations_needed: u32,
    pub confirmations: Vec<ClosureConfirmation>,
    pub has_confirmed: bool,
}

pub async fn closure_status_handler(
    State(state): State<Arc<AppState>>,
    Path(pet_id): Path<PetId>,
    Query(lookup): Query<ClosureLookup>,
) -> AppResult<Json<ClosureStatus>> {
    let Some(closure) = repo::closure_for_pet(state.store(), &pet_id).await? else {
        return Ok(Json(ClosureStatus {
            closure: None,
            state: None,
            confirmations_needed: 0,
            confirmations: Vec::new(),
            has_confirmed: false,
        }));
    };

    let confirmations = repo::closure_confirmations(state.store(), &closure.id).await?;
    let has_confirmed = lookup.user_id.as_ref().is_some_and(|user| {
        confirmations
            .iter()
            .any(|confirmation| &confirmation.confirmed_by == user)
    });

    Ok(Json(ClosureStatus {
        state: Some(closure.state()),
        confirmations_needed: closure.confirmations_needed(),
        closure: Some(closure),
        confirmations,
        has_confirmed,
    }))
}

pub async fn confirm_closure_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ClosureId>,
    body: Bytes,
) -> AppResult<Json<ConfirmOutcome>> {
    state.ensure_writable()?;
    let payload: ConfirmPayload = parse_body(&body)?;
    let user = require_user(payload.user_id)?;

    let outcome =
        confirm::confirm_closure(state.store(), state.counter.as_ref(), &id, &user).await?;

    activity::record(
        state.store(),
        Some(&user),
        "confirm_closure",
        "case_closure",
        Some(id.as_str()),
        Some(json!(outcome)),
    )
    .await;

    confirmed(outcome)
}

#[derive(Debug, Deserialize)]
pub struct ForwardLookup {
    pub address: String,
}

pub async fn geocode_handler(
    State(state): State<Arc<AppState>>,
    Query(lookup): Query<ForwardLookup>,
) -> AppResult<Json<GeocodeHit>> {
    state
        .geocoder
        .forward(&lookup.address)
        .await
        .map(Json)
        .ok_or(AppError::NotFound("Address"))
}

#[derive(Debug, Deserialize)]
pub struct ReverseLookup {
    pub lat: f64,
    pub lng: f64,
}

pub async fn reverse_geocode_handler(
    State(state): State<Arc<AppState>>,
    Query(lookup): Query<ReverseLookup>,
) -> AppResult<Json<GeocodeHit>> {
    let coordinates = Coordinates::new(lookup.lat, lookup.lng)?;
    let address = state.geocoder.reverse(coordinates).await;

    Ok(Json(GeocodeHit {
        coordinates,
        address,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ChangesFilter {
    #[serde(default)]
    pub table: Option<String>,
}

/// Server-sent events, one per store write seen by this process.
pub async fn changes_handler(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ChangesFilter>,
) -> AppResult<impl IntoResponse> {
    let wanted = match filter.table.as_deref() {
        Some(name) => Some(Table::from_name(name).ok_or(AppError::NotFound("Table"))?),
        None => None,
    };
    let mut changes = state.store().feed().subscribe_all();

    let stream = stream! {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    if wanted.map_or(false, |table| table != change.table) {
                        continue;
                    }

                    match Event::default()
                        .event(change.table.name())
                        .id(change.version.to_string())
                        .json_data(change)
                    {
                        Ok(event) => yield Ok::<Event, Infallible>(event),
                        Err(e) => warn!("Failed to encode change event: {e}"),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    yield Ok(Event::default().event("lagged").data(skipped.to_string()));
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
