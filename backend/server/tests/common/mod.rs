#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc};

use reqwest::Client;
use serde_json::{Value, json};
use server::{build_router, config::Config, state::State};
use tokio::net::TcpListener;

pub struct TestApp {
    pub base: String,
    pub client: Client,
    pub state: Arc<State>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    pub async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client.post(self.url(path)).json(&body).send().await.unwrap()
    }

    pub async fn put(&self, path: &str, body: Value) -> reqwest::Response {
        self.client.put(self.url(path)).json(&body).send().await.unwrap()
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.client.delete(self.url(path)).send().await.unwrap()
    }

    /// Registers a pet and returns its id.
    pub async fn pet(&self, name: &str, status: &str) -> String {
        let response = self
            .post(
                "/pets",
                json!({"name": name, "species": "dog", "status": status}),
            )
            .await;
        assert_eq!(response.status(), 201);

        let pet: Value = response.json().await.unwrap();
        pet["id"].as_str().unwrap().to_string()
    }

    pub async fn sighting(&self, pet_id: &str, latitude: f64, longitude: f64) -> Value {
        let response = self
            .post(
                "/sightings",
                json!({
                    "pet_id": pet_id,
                    "location": {"latitude": latitude, "longitude": longitude},
                }),
            )
            .await;
        assert_eq!(response.status(), 201);

        response.json().await.unwrap()
    }

    pub async fn session(&self, permission: &str) -> String {
        let response = self
            .post("/sessions", json!({"permission": permission}))
            .await;
        assert_eq!(response.status(), 201);

        let session: Value = response.json().await.unwrap();
        session["id"].as_str().unwrap().to_string()
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_state(State::in_memory(Config::default())).await
}

pub async fn spawn_state(state: State) -> TestApp {
    let state = Arc::new(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address: SocketAddr = listener.local_addr().unwrap();
    let app = build_router(state.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        base: format!("http://{address}"),
        client: Client::new(),
        state,
    }
}

/// Serves `router` on an ephemeral port and returns its base url.
pub async fn spawn_mock(router: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{address}")
}
