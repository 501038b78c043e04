//! Viewer sessions: where a viewer is, whether they allow notifications, and
//! which alerts they already saw. Held by the application state.
//!
//! Sessions idle for longer than the TTL are dropped on the next access.
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracker::{
    geo::Coordinates,
    models::UserId,
    position::{PositionSample, refine},
    proximity::AlertBook,
};
use uuid::Uuid;

use crate::{config::DEFAULT_SESSION_TTL_SECS, error::AppError, notify::Permission};

#[derive(Debug, Clone, Default)]
pub struct ViewerSession {
    pub user: Option<UserId>,
    pub viewer: Option<Coordinates>,
    pub permission: Permission,
    pub alerts: AlertBook,
}

/// A direct fix, or raw samples to refine into one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LocationUpdate {
    Samples { samples: Vec<PositionSample> },
    Fix(Coordinates),
}

impl LocationUpdate {
    pub fn resolve(self) -> Option<Coordinates> {
        match self {
            LocationUpdate::Samples { samples } => refine(samples).map(|fix| fix.coords),
            LocationUpdate::Fix(coords) => Some(coords),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: String,
    pub user: Option<UserId>,
    pub viewer: Option<Coordinates>,
    pub permission: Permission,
}

struct Entry {
    session: ViewerSession,
    last_seen: Instant,
}

pub struct Sessions {
    ttl: Duration,
    sessions: RwLock<HashMap<String, Entry>>,
}

impl Default for Sessions {
    fn default() -> Self {
        Self::with_ttl(Duration::from_secs(DEFAULT_SESSION_TTL_SECS))
    }
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn open(&self, user: Option<UserId>, permission: Permission) -> SessionView {
        let id = Uuid::new_v4().to_string();
        let session = ViewerSession {
            user,
            permission,
            ..ViewerSession::default()
        };
        let view = view(&id, &session);
        let now = Instant::now();

        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, entry| now.duration_since(entry.last_seen) <= self.ttl);
        sessions.insert(
            id,
            Entry {
                session,
                last_seen: now,
            },
        );

        view
    }

    /// Runs `f` against the session, or fails with 404 when it does not exist
    /// or has expired.
    pub async fn with<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut ViewerSession) -> R,
    ) -> Result<R, AppError> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        let expired = match sessions.get(id) {
            None => return Err(AppError::NotFound("Session")),
            Some(entry) => now.duration_since(entry.last_seen) > self.ttl,
        };
        if expired {
            sessions.remove(id);
            return Err(AppError::NotFound("Session"));
        }

        let entry = sessions.get_mut(id).ok_or(AppError::NotFound("Session"))?;
        entry.last_seen = now;

        Ok(f(&mut entry.session))
    }

    pub async fn set_location(
        &self,
        id: &str,
        update: LocationUpdate,
    ) -> Result<SessionView, AppError> {
        let Some(viewer) = update.resolve() else {
            return Err(AppError::MalformedPayload("no position samples".to_string()));
        };

        self.with(id, |session| {
            session.viewer = Some(viewer);
            view(id, session)
        })
        .await
    }

    pub async fn close(&self, id: &str) -> Result<(), AppError> {
        self.sessions
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or(AppError::NotFound("Session"))
    }

    /// Live sessions.
    pub async fn len(&self) -> usize {
        let now = Instant::now();

        self.sessions
            .read()
            .await
            .values()
            .filter(|entry| now.duration_since(entry.last_seen) <= self.ttl)
            .count()
    }
}

fn view(id: &str, session: &ViewerSession) -> SessionView {
    SessionView {
        id: id.to_string(),
        user: session.user.clone(),
        viewer: session.viewer,
        permission: session.permission,
    }
}

#[cfg(test)]
mod tests {
    use tracker::models::PetId;

    use super::*;

    #[tokio::test]
    async fn test_location_from_samples() {
        let sessions = Sessions::new();
        let opened = sessions.open(None, Permission::Granted).await;

        let update: LocationUpdate = serde_json::from_str(
            r#"{"samples": [
                {"latitude": -37.0, "longitude": -72.0, "accuracy_m": 80.0, "at_ms": 0},
                {"latitude": -37.4697, "longitude": -72.3537, "accuracy_m": 8.0, "at_ms": 900}
            ]}"#,
        )
        .unwrap();
        let view = sessions.set_location(&opened.id, update).await.unwrap();

        assert_eq!(view.viewer, Some(Coordinates::new(-37.4697, -72.3537).unwrap()));
    }

    #[tokio::test]
    async fn test_direct_fix_and_validation() {
        let sessions = Sessions::new();
        let opened = sessions.open(Some(UserId::from("ana")), Permission::Default).await;

        let fix: LocationUpdate =
            serde_json::from_str(r#"{"latitude": 1.5, "longitude": 2.5}"#).unwrap();
        assert!(sessions.set_location(&opened.id, fix).await.is_ok());

        let out_of_range = r#"{"latitude": 91, "longitude": 0}"#;
        assert!(serde_json::from_str::<LocationUpdate>(out_of_range).is_err());

        let empty: LocationUpdate = serde_json::from_str(r#"{"samples": []}"#).unwrap();
        assert!(matches!(
            sessions.set_location(&opened.id, empty).await,
            Err(AppError::MalformedPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let sessions = Sessions::new();
        let first = sessions.open(None, Permission::Granted).await;
        let second = sessions.open(None, Permission::Granted).await;
        let pet = PetId::from("p1");

        sessions
            .with(&first.id, |session| session.alerts.dismiss(pet.clone()))
            .await
            .unwrap();

        assert!(sessions.with(&first.id, |s| s.alerts.is_dismissed(&pet)).await.unwrap());
        assert!(!sessions.with(&second.id, |s| s.alerts.is_dismissed(&pet)).await.unwrap());
        assert!(matches!(
            sessions.with("missing", |_| ()).await,
            Err(AppError::NotFound("Session"))
        ));
        assert_eq!(sessions.len().await, 2);
    }

    #[tokio::test]
    async fn test_idle_sessions_expire() {
        let sessions = Sessions::with_ttl(Duration::from_millis(20));
        let stale = sessions.open(None, Permission::Granted).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        let fresh = sessions.open(None, Permission::Granted).await;

        assert!(matches!(
            sessions.with(&stale.id, |_| ()).await,
            Err(AppError::NotFound("Session"))
        ));
        assert!(sessions.with(&fresh.id, |_| ()).await.is_ok());
        assert_eq!(sessions.len().await, 1);
    }

    #[tokio::test]
    async fn test_close_session() {
        let sessions = Sessions::new();
        let opened = sessions.open(None, Permission::Default).await;

        sessions.close(&opened.id).await.unwrap();

        assert!(matches!(
            sessions.close(&opened.id).await,
            Err(AppError::NotFound("Session"))
        ));
        assert_eq!(sessions.len().await, 0);
    }
}
