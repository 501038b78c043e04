//! Proximity notifications. Fire-and-forget: failures are logged, never returned.
use std::{sync::Arc, time::Duration};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracker::{models::PetId, proximity::ProximityMatch};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Granted,
    Denied,
    #[default]
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub session_id: String,
    pub pet_id: PetId,
    pub title: String,
    pub body: String,
    pub distance_km: f64,
}

impl Notification {
    pub fn for_match(session_id: &str, found: &ProximityMatch) -> Self {
        Self {
            session_id: session_id.to_string(),
            pet_id: found.pet.id.clone(),
            title: format!("{} is lost nearby", found.pet.display_name()),
            body: format!(
                "Last reported {:.1} km from you. Keep an eye out!",
                found.distance_km
            ),
            distance_km: found.distance_km,
        }
    }
}

pub trait Notifier: Send + Sync {
    fn deliver(&self, notification: Notification);
}

/// Drops notifications unless the viewer granted permission.
pub fn notify(notifier: &dyn Notifier, permission: Permission, notification: Notification) {
    if permission == Permission::Granted {
        notifier.deliver(notification);
    }
}

pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn deliver(&self, notification: Notification) {
        info!(
            session = %notification.session_id,
            pet = %notification.pet_id,
            distance_km = notification.distance_km,
            "{}",
            notification.title
        );
    }
}

pub struct WebhookNotifier {
    client: Client,
    url: Arc<str>,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: Arc::from(url),
        }
    }
}

impl Notifier for WebhookNotifier {
    fn deliver(&self, notification: Notification) {
        let client = self.client.clone();
        let url = self.url.clone();

        tokio::spawn(async move {
            let sent = client
                .post(url.as_ref())
                .json(&notification)
                .send()
                .await
                .and_then(|response| response.error_for_status());

            if let Err(e) = sent {
                warn!(pet = %notification.pet_id, "Notification webhook failed: {e}");
            }
        });
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Keeps every delivered notification for assertions.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub delivered: Mutex<Vec<Notification>>,
    }

    impl Notifier for RecordingNotifier {
        fn deliver(&self, notification: Notification) {
            if let Ok(mut delivered) = self.delivered.lock() {
                delivered.push(notification);
            }
        }
    }
}
