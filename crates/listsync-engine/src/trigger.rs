//! Event-driven trigger adapter.
//!
//! The hosting application calls these hooks from its own create/update/
//! delete paths. They forward to the engine's real-time sync and discard
//! the outcome: a sync problem must never fail the local operation that
//! triggered it.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::engine::SyncEngine;
use crate::types::{EntityKind, TriggerAction};

/// Fire-and-forget bridge from local mutation events to the engine.
#[derive(Debug, Clone)]
pub struct SyncTrigger {
    engine: Arc<SyncEngine>,
}

impl SyncTrigger {
    #[must_use]
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    /// A local entity was created.
    #[instrument(skip(self))]
    pub async fn entity_created(&self, kind: EntityKind, entity_id: i64) {
        let outcome = self
            .engine
            .real_time_sync(kind, entity_id, TriggerAction::Create)
            .await;
        debug!(status = %outcome.status, message = outcome.message, "create trigger handled");
    }

    /// A local entity was updated.
    #[instrument(skip(self))]
    pub async fn entity_updated(&self, kind: EntityKind, entity_id: i64) {
        let outcome = self
            .engine
            .real_time_sync(kind, entity_id, TriggerAction::Update)
            .await;
        debug!(status = %outcome.status, message = outcome.message, "update trigger handled");
    }

    /// A local entity was deleted. The caller captures the email before the
    /// row is gone; it is the only key the remote delete can use.
    #[instrument(skip(self))]
    pub async fn entity_deleted(&self, kind: EntityKind, entity_id: i64, email: String) {
        let outcome = self
            .engine
            .real_time_sync(kind, entity_id, TriggerAction::Delete { email })
            .await;
        debug!(status = %outcome.status, message = outcome.message, "delete trigger handled");
    }
}
