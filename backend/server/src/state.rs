use std::{sync::Arc, time::Duration};

use tracing::{info, warn};

use super::{
    cache::SnapshotCache,
    config::Config,
    confirm::{ConfirmationCounter, StoreCounter},
    database::{RedisCounter, init_redis},
    error::AppError,
    geocoding::Geocoder,
    notify::{Notifier, TracingNotifier, WebhookNotifier},
    session::Sessions,
    store::{DataStore, memory::MemoryStore, rest::RestStore},
};

pub struct State {
    pub config: Config,
    pub store: Arc<dyn DataStore>,
    pub counter: Arc<dyn ConfirmationCounter>,
    pub geocoder: Geocoder,
    pub notifier: Arc<dyn Notifier>,
    pub sessions: Sessions,
    pub cache: SnapshotCache,
    pub read_only: bool,
}

impl State {
    pub async fn new() -> Arc<Self> {
        let config = Config::load();

        let (store, read_only): (Arc<dyn DataStore>, bool) = match config.store_credentials() {
            Some((url, key)) => match RestStore::new(url, key) {
                Ok(store) => (Arc::new(store), false),
                Err(e) => {
                    warn!("Failed to build store client, starting read-only: {e}");
                    (Arc::new(MemoryStore::new()), true)
                }
            },
            None => {
                warn!("Store credentials missing, starting read-only");
                (Arc::new(MemoryStore::new()), true)
            }
        };

        let counter: Arc<dyn ConfirmationCounter> = match config.redis_url.as_deref() {
            Some(url) => match init_redis(url).await {
                Some(connection) => Arc::new(RedisCounter::new(connection)),
                None => Arc::new(StoreCounter),
            },
            None => Arc::new(StoreCounter),
        };

        let notifier: Arc<dyn Notifier> = match config.notify_webhook_url.as_deref() {
            Some(url) => {
                info!("Delivering notifications to webhook");
                Arc::new(WebhookNotifier::new(url))
            }
            None => Arc::new(TracingNotifier),
        };

        Arc::new(Self::with_parts(config, store, counter, notifier, read_only))
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn DataStore>,
        counter: Arc<dyn ConfirmationCounter>,
        notifier: Arc<dyn Notifier>,
        read_only: bool,
    ) -> Self {
        let geocoder = Geocoder::new(config.geocoding_key.clone(), &config.geocoding_language);
        let sessions = Sessions::with_ttl(Duration::from_secs(config.session_ttl_secs));

        Self {
            config,
            store,
            counter,
            geocoder,
            notifier,
            sessions,
            cache: SnapshotCache::new(),
            read_only,
        }
    }

    /// In-memory state for tests and local runs.
    pub fn in_memory(config: Config) -> Self {
        Self::with_parts(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(StoreCounter),
            Arc::new(TracingNotifier),
            false,
        )
    }

    pub fn ensure_writable(&self) -> Result<(), AppError> {
        if self.read_only {
            return Err(AppError::ReadOnly);
        }

        Ok(())
    }

    pub fn store(&self) -> &dyn DataStore {
        self.store.as_ref()
    }
}
