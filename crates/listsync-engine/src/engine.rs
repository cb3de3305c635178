//! The sync orchestrator.
//!
//! One engine instance holds a read-only settings snapshot plus the mapping
//! catalog and rule set for its passes; the hosting application rebuilds
//! the engine when configuration changes. Entities within a pass are
//! processed sequentially: each entity's pending record, remote call and
//! terminal record complete before the next entity starts, which keeps the
//! pending/terminal pairing invariant without any cross-entity locking.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use listsync_client::{ListClient, MemberPayload, PageRequest, RemoteMember, SubscriptionStatus};
use tracing::{debug, error, instrument, warn};

use crate::config::SyncSettings;
use crate::entity::{Entity, FieldChange};
use crate::error::{EngineError, EngineResult};
use crate::history::{HistoryStore, SyncHistoryRecord};
use crate::mapping::{MappingCatalog, MappingSet};
use crate::result::{
    BidirectionalReport, EntityOutcome, KindReport, RunReport, ScheduledOutcome,
    SingleSyncOutcome, SyncRunResult,
};
use crate::rules::RuleSet;
use crate::types::{EntityKind, RunStatus, SyncDirection, SyncStatus, SyncTarget, TriggerAction};

/// Local entity access, owned by the hosting application.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// All entities of a kind with a non-empty email.
    async fn fetch_eligible(&self, kind: EntityKind) -> EngineResult<Vec<Entity>>;

    /// Look up one entity by id.
    async fn find_by_id(&self, kind: EntityKind, id: i64) -> EngineResult<Option<Entity>>;

    /// Look up one entity by email, exact match after trimming.
    async fn find_by_email(&self, kind: EntityKind, email: &str)
        -> EngineResult<Option<Entity>>;

    /// Persist inward field changes to an existing entity.
    async fn apply_fields(
        &self,
        kind: EntityKind,
        entity_id: i64,
        changes: &[FieldChange],
    ) -> EngineResult<()>;

    /// Create a new person for a remote member with no local match. The
    /// implementation marks the record as remote-originated. Returns the
    /// new local id.
    async fn create_remote_originated(
        &self,
        email: &str,
        changes: &[FieldChange],
    ) -> EngineResult<i64>;
}

/// Builder for [`SyncEngine`].
#[derive(Default)]
pub struct SyncEngineBuilder {
    settings: Option<SyncSettings>,
    mappings: Option<MappingCatalog>,
    rules: Option<RuleSet>,
    client: Option<Arc<dyn ListClient>>,
    entities: Option<Arc<dyn EntityStore>>,
    history: Option<Arc<dyn HistoryStore>>,
    actor: Option<String>,
}

impl SyncEngineBuilder {
    #[must_use]
    pub fn settings(mut self, settings: SyncSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    #[must_use]
    pub fn mappings(mut self, mappings: MappingCatalog) -> Self {
        self.mappings = Some(mappings);
        self
    }

    #[must_use]
    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = Some(rules);
        self
    }

    #[must_use]
    pub fn client(mut self, client: Arc<dyn ListClient>) -> Self {
        self.client = Some(client);
        self
    }

    #[must_use]
    pub fn entities(mut self, entities: Arc<dyn EntityStore>) -> Self {
        self.entities = Some(entities);
        self
    }

    #[must_use]
    pub fn history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Actor recorded on history entries this engine writes.
    #[must_use]
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn build(self) -> EngineResult<SyncEngine> {
        let mappings = self.mappings.unwrap_or_default();
        mappings.validate()?;
        Ok(SyncEngine {
            settings: self
                .settings
                .ok_or_else(|| EngineError::configuration("settings are required"))?,
            mappings,
            rules: self.rules.unwrap_or_default(),
            client: self
                .client
                .ok_or_else(|| EngineError::configuration("list client is required"))?,
            entities: self
                .entities
                .ok_or_else(|| EngineError::configuration("entity store is required"))?,
            history: self
                .history
                .ok_or_else(|| EngineError::configuration("history store is required"))?,
            actor: self.actor.unwrap_or_else(|| "system".to_string()),
        })
    }
}

/// Lazily loaded name-to-id map for one list's segments, held for the
/// duration of a pass.
#[derive(Default)]
struct SegmentCache {
    loaded: bool,
    ids: HashMap<String, String>,
}

/// The synchronization engine.
pub struct SyncEngine {
    settings: SyncSettings,
    mappings: MappingCatalog,
    rules: RuleSet,
    client: Arc<dyn ListClient>,
    entities: Arc<dyn EntityStore>,
    history: Arc<dyn HistoryStore>,
    actor: String,
}

impl SyncEngine {
    #[must_use]
    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::default()
    }

    #[must_use]
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Push all eligible entities of one kind to the list.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn sync_outward(
        &self,
        kind: EntityKind,
        list_id: Option<&str>,
    ) -> EngineResult<SyncRunResult> {
        self.settings.validate()?;
        let mapping = self.mappings.for_kind(kind)?;
        let list_id = self.settings.resolve_list_id(list_id);

        let entities = self.entities.fetch_eligible(kind).await?;
        debug!(count = entities.len(), list_id, "starting outward pass");

        let mut result = SyncRunResult::default();
        let mut segments = SegmentCache::default();
        for entity in &entities {
            let outcome = self
                .sync_entity_outward(entity, mapping, list_id, &mut segments)
                .await;
            result.record(outcome);
        }
        Ok(result)
    }

    /// One entity's outward sync: payload build, pending record, remote
    /// upsert, segment application, terminal record — strictly in that
    /// order. A remote failure writes the terminal error record and moves
    /// on; retry belongs to the next scheduled run, never to this pass.
    async fn sync_entity_outward(
        &self,
        entity: &Entity,
        mapping: &MappingSet,
        list_id: &str,
        segments: &mut SegmentCache,
    ) -> EntityOutcome {
        let kind = entity.kind;

        // Defensive re-check; ineligible entities produce no history and no
        // remote traffic.
        if !entity.is_sync_eligible() {
            return EntityOutcome::skipped(kind, entity.id, "no usable email address");
        }

        // One rule evaluation per entity: the snapshot and the instant are
        // fixed before anything else happens.
        let evaluated = self.rules.evaluate(kind, &entity.snapshot(), Utc::now());

        let payload = match self.build_payload(entity, mapping, evaluated.tags) {
            Ok(p) => p,
            Err(e) => {
                let _ = self
                    .log(kind, entity.id, SyncDirection::Outward, SyncStatus::Error, e.to_string())
                    .await;
                return EntityOutcome::error(kind, entity.id, e.to_string());
            }
        };

        if let Err(e) = self
            .log(
                kind,
                entity.id,
                SyncDirection::Outward,
                SyncStatus::Pending,
                format!("upserting {}", payload.email_address),
            )
            .await
        {
            return EntityOutcome::error(kind, entity.id, e.to_string());
        }

        let member = match self.client.upsert_member(list_id, &payload).await {
            Ok(member) => member,
            Err(e) => {
                let detail = e.to_string();
                let _ = self
                    .log(kind, entity.id, SyncDirection::Outward, SyncStatus::Error, &detail)
                    .await;
                return EntityOutcome::error(kind, entity.id, detail);
            }
        };

        for segment in evaluated.segments {
            if let Err(e) = self
                .apply_segment(list_id, &segment, &payload.email_address, segments)
                .await
            {
                // Segment placement is additive; a failure here does not
                // undo the member upsert.
                warn!(segment, error = %e, "failed to place member in segment");
            }
        }

        if let Err(e) = self
            .history
            .append(
                SyncHistoryRecord::new(
                    kind,
                    entity.id,
                    SyncDirection::Outward,
                    SyncStatus::Success,
                    format!("synced {}", payload.email_address),
                )
                .with_remote_id(&member.id)
                .with_actor(&self.actor),
            )
            .await
        {
            return EntityOutcome::error(kind, entity.id, e.to_string());
        }

        EntityOutcome::success(kind, entity.id, member.id)
    }

    fn build_payload(
        &self,
        entity: &Entity,
        mapping: &MappingSet,
        rule_tags: std::collections::BTreeSet<String>,
    ) -> EngineResult<MemberPayload> {
        let outward = mapping.apply_outward(entity)?;
        let email = outward
            .email_override
            .unwrap_or_else(|| entity.email.trim().to_string());

        let mut tags: Vec<String> = rule_tags.into_iter().collect();
        tags.push(entity.kind.provenance_tag());

        let mut payload = MemberPayload::new(email, SubscriptionStatus::Subscribed).with_tags(tags);
        payload.merge_fields = outward.merge_fields;
        Ok(payload)
    }

    async fn apply_segment(
        &self,
        list_id: &str,
        name: &str,
        email: &str,
        cache: &mut SegmentCache,
    ) -> EngineResult<()> {
        if !cache.loaded {
            for segment in self.client.list_segments(list_id).await? {
                cache.ids.insert(segment.name, segment.id);
            }
            cache.loaded = true;
        }

        let id = match cache.ids.get(name) {
            Some(id) => id.clone(),
            None => {
                let created = self.client.create_segment(list_id, name).await?;
                cache.ids.insert(created.name, created.id.clone());
                created.id
            }
        };

        self.client.add_to_segment(list_id, &id, email).await?;
        Ok(())
    }

    /// Pull list members and reconcile them into local entities.
    #[instrument(skip(self))]
    pub async fn sync_inward(&self, list_id: Option<&str>) -> EngineResult<SyncRunResult> {
        self.settings.validate()?;
        let list_id = self.settings.resolve_list_id(list_id);

        let mut result = SyncRunResult::default();
        let mut page = PageRequest::default();
        loop {
            let batch = self.client.fetch_members(list_id, page).await?;
            for member in &batch.members {
                if let Some(outcome) = self.sync_member_inward(member).await {
                    result.record(outcome);
                }
            }
            if !batch.has_more || batch.members.is_empty() {
                break;
            }
            page = page.next(&batch);
        }
        Ok(result)
    }

    /// Reconcile one remote member. Returns `None` for the silent no-op
    /// case: an unchanged member writes no history and no local fields.
    async fn sync_member_inward(&self, member: &RemoteMember) -> Option<EntityOutcome> {
        let email = member.email_address.trim();

        let mut matches = Vec::new();
        for kind in EntityKind::MATCH_PRIORITY {
            match self.entities.find_by_email(kind, email).await {
                Ok(Some(entity)) => matches.push(entity),
                Ok(None) => {}
                Err(e) => {
                    error!(kind = %kind, email, error = %e, "entity lookup failed");
                    return Some(EntityOutcome::error(kind, 0, e.to_string()));
                }
            }
        }

        match matches.len() {
            0 => Some(self.create_from_member(member).await),
            n => {
                let chosen = &matches[0];
                if n > 1 {
                    // Keep updating only the highest-priority kind, but make
                    // the collision visible to operators.
                    let others: Vec<&str> =
                        matches[1..].iter().map(|e| e.kind.as_str()).collect();
                    let _ = self
                        .log(
                            chosen.kind,
                            chosen.id,
                            SyncDirection::Inward,
                            SyncStatus::AmbiguousMatch,
                            format!("email {email} also matches: {}", others.join(", ")),
                        )
                        .await;
                }
                self.update_from_member(chosen, member).await
            }
        }
    }

    async fn update_from_member(
        &self,
        entity: &Entity,
        member: &RemoteMember,
    ) -> Option<EntityOutcome> {
        let mapping = match self.mappings.for_kind(entity.kind) {
            Ok(m) => m,
            Err(e) => return Some(EntityOutcome::error(entity.kind, entity.id, e.to_string())),
        };

        let changes: Vec<FieldChange> = mapping
            .apply_inward(member)
            .into_iter()
            .filter(|change| {
                let current = entity
                    .field(&change.local_field)
                    .map(|v| v.render())
                    .unwrap_or_default();
                current != change.value
            })
            .collect();

        if changes.is_empty() {
            return None;
        }

        match self
            .entities
            .apply_fields(entity.kind, entity.id, &changes)
            .await
        {
            Ok(()) => {
                let _ = self
                    .log(
                        entity.kind,
                        entity.id,
                        SyncDirection::Inward,
                        SyncStatus::Success,
                        format!("updated {} field(s)", changes.len()),
                    )
                    .await;
                Some(EntityOutcome::success(entity.kind, entity.id, &member.id))
            }
            Err(e) => {
                let detail = e.to_string();
                let _ = self
                    .log(
                        entity.kind,
                        entity.id,
                        SyncDirection::Inward,
                        SyncStatus::Error,
                        &detail,
                    )
                    .await;
                Some(EntityOutcome::error(entity.kind, entity.id, detail))
            }
        }
    }

    async fn create_from_member(&self, member: &RemoteMember) -> EntityOutcome {
        // Members with no local match become persons.
        let kind = EntityKind::Person;
        let changes = match self.mappings.for_kind(kind) {
            Ok(mapping) => mapping.apply_inward(member),
            Err(e) => return EntityOutcome::error(kind, 0, e.to_string()),
        };

        match self
            .entities
            .create_remote_originated(member.email_address.trim(), &changes)
            .await
        {
            Ok(id) => {
                let _ = self
                    .log(
                        kind,
                        id,
                        SyncDirection::Inward,
                        SyncStatus::Success,
                        format!("created from member {}", member.email_address),
                    )
                    .await;
                EntityOutcome::success(kind, id, &member.id)
            }
            Err(e) => {
                let detail = e.to_string();
                let _ = self
                    .log(kind, 0, SyncDirection::Inward, SyncStatus::Error, &detail)
                    .await;
                EntityOutcome::error(kind, 0, detail)
            }
        }
    }

    /// Run the outward pass for one kind or all three, sequentially.
    ///
    /// A kind disabled in settings reports skipped; a configuration problem
    /// for one kind fails only that kind and the siblings still run.
    #[instrument(skip(self))]
    pub async fn manual_sync(
        &self,
        target: SyncTarget,
        list_id: Option<&str>,
    ) -> EngineResult<RunReport> {
        self.settings.validate()?;

        let kinds: Vec<EntityKind> = match target {
            SyncTarget::Kind(kind) => vec![kind],
            SyncTarget::All => EntityKind::all().to_vec(),
        };

        let mut report = RunReport::default();
        for kind in kinds {
            if !self.settings.enabled_for(kind) {
                report.insert(kind, KindReport::Skipped);
                continue;
            }
            match self.sync_outward(kind, list_id).await {
                Ok(result) => report.insert(kind, KindReport::Ran(result)),
                Err(e) => {
                    error!(kind = %kind, error = %e, "outward pass failed");
                    report.insert(
                        kind,
                        KindReport::Failed {
                            message: e.to_string(),
                        },
                    );
                }
            }
        }
        Ok(report)
    }

    /// Outward for every kind, then inward once. Outward failures never
    /// block the inward pass.
    #[instrument(skip(self))]
    pub async fn bidirectional_sync(
        &self,
        list_id: Option<&str>,
    ) -> EngineResult<BidirectionalReport> {
        let outward = self.manual_sync(SyncTarget::All, list_id).await?;

        let inward = match self.sync_inward(list_id).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "inward pass failed");
                SyncRunResult {
                    errors: 1,
                    ..SyncRunResult::default()
                }
            }
        };

        Ok(BidirectionalReport { outward, inward })
    }

    /// The cron entry point: gated by the enable flags and the minimum
    /// interval since the last recorded activity.
    #[instrument(skip(self))]
    pub async fn scheduled_sync(&self) -> EngineResult<ScheduledOutcome> {
        if !self.settings.sync_enabled || !self.settings.auto_sync {
            return Ok(ScheduledOutcome::Disabled);
        }

        if let Some(last) = self.history.last_activity_at().await? {
            let elapsed = Utc::now() - last;
            if elapsed < Duration::seconds(self.settings.min_sync_interval_secs) {
                debug!(
                    elapsed_secs = elapsed.num_seconds(),
                    "within minimum interval, skipping"
                );
                return Ok(ScheduledOutcome::Skipped);
            }
        }

        let report = self.manual_sync(SyncTarget::All, None).await?;
        Ok(ScheduledOutcome::Ran(report))
    }

    /// Single-entity sync driven by a local mutation event.
    ///
    /// Never returns an error: the triggering local operation must not be
    /// blocked or failed by a sync problem, so every failure is logged and
    /// reported as a status only.
    #[instrument(skip(self))]
    pub async fn real_time_sync(
        &self,
        kind: EntityKind,
        entity_id: i64,
        action: TriggerAction,
    ) -> SingleSyncOutcome {
        if !self.settings.sync_enabled {
            return SingleSyncOutcome::new(RunStatus::Disabled, "sync is disabled");
        }
        if !self.settings.enabled_for(kind) {
            return SingleSyncOutcome::new(RunStatus::Skipped, format!("{kind} sync is disabled"));
        }
        if let Err(e) = self.settings.validate() {
            warn!(error = %e, "real-time sync misconfigured");
            return SingleSyncOutcome::new(RunStatus::Error, e.to_string());
        }

        match action {
            TriggerAction::Delete { email } => self.delete_remote(kind, entity_id, &email).await,
            TriggerAction::Create | TriggerAction::Update => {
                self.sync_single(kind, entity_id).await
            }
        }
    }

    async fn sync_single(&self, kind: EntityKind, entity_id: i64) -> SingleSyncOutcome {
        let mapping = match self.mappings.for_kind(kind) {
            Ok(m) => m,
            Err(e) => return SingleSyncOutcome::new(RunStatus::Error, e.to_string()),
        };

        let entity = match self.entities.find_by_id(kind, entity_id).await {
            Ok(Some(entity)) => entity,
            Ok(None) => {
                return SingleSyncOutcome::new(
                    RunStatus::Skipped,
                    format!("{kind} {entity_id} not found"),
                )
            }
            Err(e) => return SingleSyncOutcome::new(RunStatus::Error, e.to_string()),
        };

        let list_id = self.settings.resolve_list_id(None).to_string();
        let mut segments = SegmentCache::default();
        let outcome = self
            .sync_entity_outward(&entity, mapping, &list_id, &mut segments)
            .await;

        match outcome.status {
            crate::result::OutcomeStatus::Success => {
                SingleSyncOutcome::new(RunStatus::Success, outcome.remote_id.unwrap_or_default())
            }
            crate::result::OutcomeStatus::Error => {
                SingleSyncOutcome::new(RunStatus::Error, outcome.detail)
            }
            crate::result::OutcomeStatus::Skipped => {
                SingleSyncOutcome::new(RunStatus::Skipped, outcome.detail)
            }
        }
    }

    async fn delete_remote(
        &self,
        kind: EntityKind,
        entity_id: i64,
        email: &str,
    ) -> SingleSyncOutcome {
        let list_id = self.settings.resolve_list_id(None).to_string();

        if let Err(e) = self
            .log(
                kind,
                entity_id,
                SyncDirection::Outward,
                SyncStatus::Pending,
                format!("deleting member {email}"),
            )
            .await
        {
            return SingleSyncOutcome::new(RunStatus::Error, e.to_string());
        }

        match self.client.delete_member(&list_id, email).await {
            Ok(()) => {
                let _ = self
                    .log(
                        kind,
                        entity_id,
                        SyncDirection::Outward,
                        SyncStatus::Success,
                        format!("deleted member {email}"),
                    )
                    .await;
                SingleSyncOutcome::new(RunStatus::Success, format!("deleted member {email}"))
            }
            Err(e) => {
                let detail = e.to_string();
                let _ = self
                    .log(
                        kind,
                        entity_id,
                        SyncDirection::Outward,
                        SyncStatus::Error,
                        &detail,
                    )
                    .await;
                SingleSyncOutcome::new(RunStatus::Error, detail)
            }
        }
    }

    async fn log(
        &self,
        kind: EntityKind,
        entity_id: i64,
        direction: SyncDirection,
        status: SyncStatus,
        message: impl Into<String>,
    ) -> EngineResult<()> {
        self.history
            .append(
                SyncHistoryRecord::new(kind, entity_id, direction, status, message)
                    .with_actor(&self.actor),
            )
            .await
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("settings", &self.settings)
            .field("actor", &self.actor)
            .finish()
    }
}
