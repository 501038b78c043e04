//! Best-effort audit trail in `activity_log`.
use serde_json::{Value, json};
use tracing::warn;
use tracker::models::UserId;

use crate::store::{DataStore, Table};

pub async fn record(
    store: &dyn DataStore,
    user: Option<&UserId>,
    action: &str,
    entity: &str,
    entity_id: Option<&str>,
    details: Option<Value>,
) {
    let row = json!({
        "user_id": user,
        "action_type": action,
        "entity_type": entity,
        "entity_id": entity_id,
        "details": details,
    });

    if let Err(e) = store.insert(Table::ActivityLog, row).await {
        warn!(action, entity, "Failed to record activity: {e}");
    }
}
