//! # Redis
//!
//! Optional RAM counter in front of the confirmation tables.
//!
//! ## Implementation
//!
//! - One Redis set per confirmed target: `huellas:{table}:{target id}`
//! - Members are the confirming user ids, so a repeat is a no-op
//! - `SADD` + `SCARD` run in a single Lua script, Redis queues scripts so the
//!   count returned to each caller already includes every earlier confirmation
//! - A missing key (first use, flush, eviction) is seeded from the stored rows
//!   before counting
//!
//! The store's unique constraint stays the authority on who confirmed. Redis
//! only saves the recount, and any Redis failure falls back to [`StoreCounter`].
use std::time::Duration;

use async_trait::async_trait;
use redis::{
    AsyncCommands, Client, RedisError, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tokio::time::timeout;
use tracing::{info, warn};
use tracker::models::UserId;

use crate::{
    confirm::{ConfirmationCounter, Quorum, StoreCounter, confirmers},
    store::{DataStore, StoreError},
};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Returns -1 when the set does not exist yet.
const CONFIRM_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return -1
end
redis.call('SADD', KEYS[1], ARGV[1])
return redis.call('SCARD', KEYS[1])
";

pub async fn init_redis(redis_url: &str) -> Option<ConnectionManager> {
    let config = ConnectionManagerConfig::new().set_number_of_retries(1);

    let client = match Client::open(redis_url) {
        Ok(client) => client,
        Err(e) => {
            warn!("Invalid Redis URL: {e}");
            return None;
        }
    };

    match timeout(
        CONNECT_TIMEOUT,
        client.get_connection_manager_with_config(config),
    )
    .await
    {
        Ok(Ok(connection_manager)) => {
            info!("Connected to Redis");
            Some(connection_manager)
        }
        Ok(Err(e)) => {
            warn!("Redis unavailable, counting confirmations from the store: {e}");
            None
        }
        Err(_) => {
            warn!("Redis connection timed out, counting confirmations from the store");
            None
        }
    }
}

pub struct RedisCounter {
    connection: ConnectionManager,
    script: Script,
}

impl RedisCounter {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            script: Script::new(CONFIRM_SCRIPT),
        }
    }

    async fn count(&self, key: &str, user: &UserId) -> Result<i64, RedisError> {
        let mut connection = self.connection.clone();

        let count = self
            .script
            .key(key)
            .arg(user.as_str())
            .invoke_async(&mut connection)
            .await?;

        Ok(count)
    }

    async fn seed(&self, key: &str, members: &[String]) -> Result<i64, RedisError> {
        let mut connection = self.connection.clone();

        if !members.is_empty() {
            let _: i64 = connection.sadd(key, members).await?;
        }

        let count = connection.scard(key).await?;

        Ok(count)
    }
}

#[async_trait]
impl ConfirmationCounter for RedisCounter {
    async fn record(
        &self,
        store: &dyn DataStore,
        quorum: Quorum,
        target_id: &str,
        user: &UserId,
    ) -> Result<u32, StoreError> {
        let key = quorum.key(target_id);

        let counted = match self.count(&key, user).await {
            Ok(-1) => {
                let members = confirmers(store, quorum, target_id).await?;

                #[cfg(feature = "verbose")]
                tracing::debug!(key = %key, seeded = members.len(), "Seeding confirmation set");

                self.seed(&key, &members).await
            }
            other => other,
        };

        match counted {
            Ok(count) => Ok(count.max(0) as u32),
            Err(e) => {
                warn!(key = %key, "Redis count failed, recounting from the store: {e}");
                StoreCounter.record(store, quorum, target_id, user).await
            }
        }
    }
}
