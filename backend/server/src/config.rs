use std::{env, fmt::Display, fs::read_to_string, path::Path, str::FromStr};

use serde::Serialize;
use tracing::{info, warn};
use tracker::proximity::DEFAULT_ALERT_RADIUS_KM;

const SECRETS_DIR: &str = "/run/secrets";

pub const STORE_URL: &str = "SUPABASE_URL";
pub const STORE_KEY: &str = "SUPABASE_ANON_KEY";
pub const GEOCODING_KEY: &str = "GOOGLE_MAPS_API_KEY";
pub const REDIS_URL: &str = "REDIS_URL";
pub const NOTIFY_WEBHOOK_URL: &str = "NOTIFY_WEBHOOK_URL";

/// Idle time after which a viewer session is forgotten.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub alert_radius_km: f64,
    pub session_ttl_secs: u64,
    pub geocoding_language: String,
    pub store_url: Option<String>,
    pub store_key: Option<String>,
    pub geocoding_key: Option<String>,
    pub redis_url: Option<String>,
    pub notify_webhook_url: Option<String>,
}

/// What `/health` reports about configuration.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Diagnostics {
    pub store_configured: bool,
    pub geocoding_configured: bool,
    pub redis_configured: bool,
    pub missing: Vec<&'static str>,
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(Path::new(SECRETS_DIR))
    }

    pub fn load_from(secrets_dir: &Path) -> Self {
        let config = Self {
            port: try_load("RUST_PORT", 1111),
            alert_radius_km: try_load("ALERT_RADIUS_KM", DEFAULT_ALERT_RADIUS_KM),
            session_ttl_secs: try_load("SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS),
            geocoding_language: try_load("GEOCODING_LANGUAGE", "es".to_string()),
            store_url: credential(STORE_URL, secrets_dir),
            store_key: credential(STORE_KEY, secrets_dir),
            geocoding_key: credential(GEOCODING_KEY, secrets_dir),
            redis_url: credential(REDIS_URL, secrets_dir),
            notify_webhook_url: credential(NOTIFY_WEBHOOK_URL, secrets_dir),
        };

        for name in &config.diagnostics().missing {
            warn!("{name} not configured");
        }

        config
    }

    pub fn store_credentials(&self) -> Option<(&str, &str)> {
        Some((self.store_url.as_deref()?, self.store_key.as_deref()?))
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let mut missing = Vec::new();

        if self.store_url.is_none() {
            missing.push(STORE_URL);
        }
        if self.store_key.is_none() {
            missing.push(STORE_KEY);
        }
        if self.geocoding_key.is_none() {
            missing.push(GEOCODING_KEY);
        }

        Diagnostics {
            store_configured: self.store_credentials().is_some(),
            geocoding_configured: self.geocoding_key.is_some(),
            redis_configured: self.redis_url.is_some(),
            missing,
        }
    }
}

impl Default for Config {
    /// Nothing configured: read-only over an empty store.
    fn default() -> Self {
        Self {
            port: 1111,
            alert_radius_km: DEFAULT_ALERT_RADIUS_KM,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            geocoding_language: "es".to_string(),
            store_url: None,
            store_key: None,
            geocoding_key: None,
            redis_url: None,
            notify_webhook_url: None,
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = var(key) else {
        info!("{key} not set, using default: {default}");
        return default;
    };

    raw.parse().unwrap_or_else(|e| {
        warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
        default
    })
}

/// Environment first, then a mounted secret file.
fn credential(name: &str, secrets_dir: &Path) -> Option<String> {
    var(name).or_else(|| read_secret(name, secrets_dir))
}

fn read_secret(secret_name: &str, secrets_dir: &Path) -> Option<String> {
    let path = secrets_dir.join(secret_name);

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
}
