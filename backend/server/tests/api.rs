mod common;

use std::time::Duration;

use common::{spawn_app, spawn_state};
use serde_json::{Value, json};
use server::{
    config::Config,
    state::State,
    store::{DataStore, Table},
};

#[tokio::test]
async fn health_reports_configuration() {
    let app = spawn_app().await;

    let response = app.get("/health").await;
    assert_eq!(response.status(), 200);

    let health: Value = response.json().await.unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["store_reachable"], true);
    assert_eq!(health["geocoding_configured"], false);
    assert_eq!(
        health["missing"],
        json!(["SUPABASE_URL", "SUPABASE_ANON_KEY", "GOOGLE_MAPS_API_KEY"])
    );
}

#[tokio::test]
async fn read_only_mode_refuses_writes() {
    let mut state = State::in_memory(Config::default());
    state.read_only = true;
    let app = spawn_state(state).await;

    let created = app
        .post("/pets", json!({"name": "Luna", "species": "dog"}))
        .await;
    assert_eq!(created.status(), 503);

    let listed = app.get("/pets").await;
    assert_eq!(listed.status(), 200);
    assert_eq!(listed.json::<Value>().await.unwrap(), json!([]));

    let health: Value = app.get("/health").await.json().await.unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["read_only"], true);
}

#[tokio::test]
async fn report_for_new_lost_pet() {
    let app = spawn_app().await;

    let response = app
        .post(
            "/sightings",
            json!({
                "kind": "lost",
                "pet": {"name": "Canela", "species": "cat"},
                "location": {"latitude": -37.4697, "longitude": -72.3537},
                "reporter": {"kind": "anonymous", "contact": "+56 9 1234 5678"},
            }),
        )
        .await;
    assert_eq!(response.status(), 201);

    let created: Value = response.json().await.unwrap();
    assert_eq!(created["pet"]["status"], "lost");
    assert_eq!(created["pet"]["lost_latitude"], -37.4697);
    assert!(created["pet"]["lost_at"].is_string());
    assert_eq!(created["sighting"]["reporter"]["kind"], "anonymous");

    let pet_id = created["pet"]["id"].as_str().unwrap();
    let sightings: Value = app
        .get(&format!("/pets/{pet_id}/sightings"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(sightings.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn found_report_moves_pet_status() {
    let app = spawn_app().await;
    let pet_id = app.pet("Toby", "lost").await;

    let sighted = app.sighting(&pet_id, -37.47, -72.35).await;
    assert_eq!(sighted["pet"]["status"], "lost");

    let found = app
        .post(
            "/sightings",
            json!({
                "pet_id": pet_id,
                "kind": "found",
                "location": {"latitude": -37.48, "longitude": -72.36},
            }),
        )
        .await;
    assert_eq!(found.status(), 201);

    let pet: Value = app.get(&format!("/pets/{pet_id}")).await.json().await.unwrap();
    assert_eq!(pet["status"], "found");
}

#[tokio::test]
async fn invalid_reports_are_rejected() {
    let app = spawn_app().await;
    let pet_id = app.pet("Toby", "lost").await;

    let out_of_range = app
        .post(
            "/sightings",
            json!({"pet_id": pet_id, "location": {"latitude": 91.0, "longitude": 0.0}}),
        )
        .await;
    assert_eq!(out_of_range.status(), 400);

    let no_contact = app
        .post(
            "/sightings",
            json!({
                "pet_id": pet_id,
                "location": {"latitude": 1.0, "longitude": 1.0},
                "reporter": {"kind": "anonymous", "contact": "  "},
            }),
        )
        .await;
    assert_eq!(no_contact.status(), 400);

    let no_pet = app
        .post("/sightings", json!({"location": {"latitude": 1.0, "longitude": 1.0}}))
        .await;
    assert_eq!(no_pet.status(), 400);
    let body: Value = no_pet.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("pet_id"));

    let unknown = app
        .post(
            "/sightings",
            json!({"pet_id": "nope", "location": {"latitude": 1.0, "longitude": 1.0}}),
        )
        .await;
    assert_eq!(unknown.status(), 404);

    let both = app
        .post(
            "/sightings",
            json!({
                "pet_id": pet_id,
                "pet": {"name": "Otro", "species": "dog"},
                "location": {"latitude": 1.0, "longitude": 1.0},
            }),
        )
        .await;
    assert_eq!(both.status(), 400);
    let pets: Value = app.get("/pets").await.json().await.unwrap();
    assert_eq!(pets.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn pet_list_filters_and_sorts() {
    let app = spawn_app().await;
    app.pet("Señor Bigotes", "lost").await;
    app.pet("Luna", "found").await;
    app.pet("Milo", "lost").await;

    let lost: Value = app.get("/pets?status=lost&sort=name&order=asc").await.json().await.unwrap();
    let names: Vec<&str> = lost
        .as_array()
        .unwrap()
        .iter()
        .map(|pet| pet["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["Milo", "Señor Bigotes"]);

    let searched: Value = app.get("/pets?q=se%C3%B1or_bigotes!").await.json().await.unwrap();
    assert_eq!(searched.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn routes_follow_report_time() {
    let app = spawn_app().await;
    let pet_id = app.pet("Rocky", "lost").await;
    let lonely = app.pet("Kira", "lost").await;

    for (minute, latitude) in [(3, -37.43), (1, -37.41), (2, -37.42)] {
        app.state
            .store
            .insert(
                Table::Sightings,
                json!({
                    "pet_id": pet_id,
                    "latitude": latitude,
                    "longitude": -72.35,
                    "created_at": format!("2025-03-01T12:0{minute}:00Z"),
                }),
            )
            .await
            .unwrap();
    }
    app.sighting(&lonely, -37.5, -72.4).await;

    let routes: Value = app.get("/routes").await.json().await.unwrap();
    let routes = routes.as_array().unwrap();
    assert_eq!(routes.len(), 2);

    let rocky = routes.iter().find(|r| r["pet_id"] == pet_id.as_str()).unwrap();
    assert_eq!(rocky["drawable"], true);
    assert_eq!(rocky["pet_name"], "Rocky");
    let latitudes: Vec<f64> = rocky["path"]
        .as_array()
        .unwrap()
        .iter()
        .map(|point| point["latitude"].as_f64().unwrap())
        .collect();
    assert_eq!(latitudes, [-37.41, -37.42, -37.43]);

    let kira = routes.iter().find(|r| r["pet_id"] == lonely.as_str()).unwrap();
    assert_eq!(kira["drawable"], false);
}

#[tokio::test]
async fn reads_see_previous_writes() {
    let app = spawn_app().await;

    assert_eq!(app.get("/pets").await.json::<Value>().await.unwrap(), json!([]));
    app.pet("Luna", "lost").await;

    let pets: Value = app.get("/pets").await.json().await.unwrap();
    assert_eq!(pets.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn changes_stream_emits_writes() {
    let app = spawn_app().await;

    let mut stream = app.get("/changes?table=pets").await;
    assert_eq!(stream.status(), 200);

    app.state
        .store
        .insert(Table::ActivityLog, json!({"action_type": "noop"}))
        .await
        .unwrap();
    app.pet("Luna", "lost").await;

    let chunk = tokio::time::timeout(Duration::from_secs(5), stream.chunk())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8_lossy(&chunk);

    assert!(text.contains("event: pets"), "{text}");
    assert!(text.contains("\"kind\":\"insert\""), "{text}");

    assert_eq!(app.get("/changes?table=users").await.status(), 404);
}

#[tokio::test]
async fn community_offers_board() {
    let app = spawn_app().await;

    let mut stream = app.get("/changes?table=community_offers").await;
    assert_eq!(stream.status(), 200);

    for (kind, offering, title) in [
        ("foster", true, "Patio grande"),
        ("foster", false, "Busco hogar temporal"),
        ("medications", true, "Insulina"),
    ] {
        let response = app
            .post(
                "/offers",
                json!({"type": kind, "offering": offering, "title": title, "contact": "+56 9 555"}),
            )
            .await;
        assert_eq!(response.status(), 201);
    }

    let foster: Value = app.get("/offers?type=foster").await.json().await.unwrap();
    assert_eq!(foster.as_array().unwrap().len(), 2);

    let requests: Value = app
        .get("/offers?type=foster&offering=false")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(requests[0]["title"], "Busco hogar temporal");
    assert_eq!(requests.as_array().unwrap().len(), 1);

    let untitled = app.post("/offers", json!({"type": "donations", "title": ""})).await;
    assert_eq!(untitled.status(), 400);

    let chunk = tokio::time::timeout(Duration::from_secs(5), stream.chunk())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8_lossy(&chunk);
    assert!(text.contains("event: community_offers"), "{text}");
}

#[tokio::test]
async fn offers_are_read_only_when_degraded() {
    let mut state = State::in_memory(Config::default());
    state.read_only = true;
    let app = spawn_state(state).await;

    let posted = app.post("/offers", json!({"type": "foster", "title": "Patio"})).await;
    assert_eq!(posted.status(), 503);
    assert_eq!(app.get("/offers").await.status(), 200);
}

#[tokio::test]
async fn volunteers_join_and_leave_search() {
    let app = spawn_app().await;
    let pet_id = app.pet("Toby", "lost").await;
    let path = format!("/pets/{pet_id}/volunteers");

    let joined = app.post(&path, json!({"user_id": "ana"})).await;
    assert_eq!(joined.status(), 201);
    let assignment: Value = joined.json().await.unwrap();
    assert_eq!(assignment["status"], "active");

    assert_eq!(app.post(&path, json!({"user_id": "ana"})).await.status(), 409);
    assert_eq!(app.post(&path, json!({})).await.status(), 400);
    assert_eq!(
        app.post("/pets/nope/volunteers", json!({"user_id": "ana"}))
            .await
            .status(),
        404
    );

    let volunteers: Value = app.get(&path).await.json().await.unwrap();
    assert_eq!(volunteers.as_array().unwrap().len(), 1);

    assert_eq!(app.delete(&format!("{path}/ana")).await.status(), 204);
    assert_eq!(app.delete(&format!("{path}/ana")).await.status(), 404);
    let volunteers: Value = app.get(&path).await.json().await.unwrap();
    assert_eq!(volunteers, json!([]));

    assert_eq!(app.post(&path, json!({"user_id": "ana"})).await.status(), 201);
}
