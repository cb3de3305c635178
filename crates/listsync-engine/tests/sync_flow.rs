//! End-to-end engine tests against in-memory collaborators.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use listsync_client::{
    subscriber_key, AccountInfo, ClientError, ClientResult, ListClient, MemberPage, MemberPayload,
    PageRequest, RemoteMember, Segment, SubscriptionStatus,
};
use listsync_engine::{
    Entity, EntityKind, EntityStore, FieldChange, HistoryStore, KindReport, MappingCatalog,
    MemoryHistoryStore, RuleSet, RunStatus, ScheduledOutcome, SyncEngine, SyncSettings,
    SyncStatus, SyncTarget, TriggerAction,
};

/// In-memory stand-in for the list service, one list.
#[derive(Default)]
struct MemoryListClient {
    members: Mutex<BTreeMap<String, RemoteMember>>,
    segments: Mutex<BTreeMap<String, Segment>>,
    segment_members: Mutex<BTreeMap<String, BTreeSet<String>>>,
    deleted: Mutex<Vec<String>>,
    upsert_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    segment_creates: AtomicUsize,
    fail_upserts: AtomicBool,
    next_segment_id: AtomicUsize,
}

impl MemoryListClient {
    fn member_count(&self) -> usize {
        self.members.lock().unwrap().len()
    }

    fn member(&self, email: &str) -> Option<RemoteMember> {
        self.members.lock().unwrap().get(&subscriber_key(email)).cloned()
    }

    fn seed_member(&self, email: &str, merge_fields: &[(&str, &str)]) {
        let member = RemoteMember {
            id: subscriber_key(email),
            email_address: email.to_string(),
            status: SubscriptionStatus::Subscribed,
            merge_fields: merge_fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            tags: vec![],
        };
        self.members.lock().unwrap().insert(member.id.clone(), member);
    }

    fn segment_emails(&self, name: &str) -> BTreeSet<String> {
        let segments = self.segments.lock().unwrap();
        let Some(segment) = segments.get(name) else {
            return BTreeSet::new();
        };
        self.segment_members
            .lock()
            .unwrap()
            .get(&segment.id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ListClient for MemoryListClient {
    async fn upsert_member(
        &self,
        _list_id: &str,
        payload: &MemberPayload,
    ) -> ClientResult<RemoteMember> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(ClientError::api(500, "Internal Server Error"));
        }

        let key = subscriber_key(&payload.email_address);
        let mut members = self.members.lock().unwrap();
        let member = members.entry(key.clone()).or_insert_with(|| RemoteMember {
            id: key.clone(),
            email_address: payload.email_address.clone(),
            status: payload.status_if_new,
            merge_fields: Default::default(),
            tags: vec![],
        });
        member.merge_fields = payload.merge_fields.clone();
        for tag in &payload.tags {
            if !member.tags.contains(tag) {
                member.tags.push(tag.clone());
            }
        }
        Ok(member.clone())
    }

    async fn fetch_members(&self, _list_id: &str, page: PageRequest) -> ClientResult<MemberPage> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let members = self.members.lock().unwrap();
        let all: Vec<RemoteMember> = members.values().cloned().collect();
        let total = all.len() as u64;
        let start = page.offset as usize;
        let slice: Vec<RemoteMember> = all
            .into_iter()
            .skip(start)
            .take(page.count as usize)
            .collect();
        let has_more = (start + slice.len()) < total as usize;
        Ok(MemberPage {
            members: slice,
            total_items: total,
            has_more,
        })
    }

    async fn delete_member(&self, _list_id: &str, email: &str) -> ClientResult<()> {
        self.members.lock().unwrap().remove(&subscriber_key(email));
        self.deleted.lock().unwrap().push(email.to_string());
        Ok(())
    }

    async fn add_tags(&self, _list_id: &str, email: &str, tags: &[String]) -> ClientResult<()> {
        let key = subscriber_key(email);
        let mut members = self.members.lock().unwrap();
        if let Some(member) = members.get_mut(&key) {
            for tag in tags {
                if !member.tags.contains(tag) {
                    member.tags.push(tag.clone());
                }
            }
        }
        Ok(())
    }

    async fn remove_tags(&self, _list_id: &str, email: &str, tags: &[String]) -> ClientResult<()> {
        let key = subscriber_key(email);
        let mut members = self.members.lock().unwrap();
        if let Some(member) = members.get_mut(&key) {
            member.tags.retain(|t| !tags.contains(t));
        }
        Ok(())
    }

    async fn list_segments(&self, _list_id: &str) -> ClientResult<Vec<Segment>> {
        Ok(self.segments.lock().unwrap().values().cloned().collect())
    }

    async fn create_segment(&self, _list_id: &str, name: &str) -> ClientResult<Segment> {
        self.segment_creates.fetch_add(1, Ordering::SeqCst);
        let id = format!("seg{}", self.next_segment_id.fetch_add(1, Ordering::SeqCst));
        let segment = Segment {
            id,
            name: name.to_string(),
            member_count: 0,
        };
        self.segments
            .lock()
            .unwrap()
            .insert(name.to_string(), segment.clone());
        Ok(segment)
    }

    async fn add_to_segment(
        &self,
        _list_id: &str,
        segment_id: &str,
        email: &str,
    ) -> ClientResult<()> {
        self.segment_members
            .lock()
            .unwrap()
            .entry(segment_id.to_string())
            .or_default()
            .insert(email.to_string());
        Ok(())
    }

    async fn test_connection(&self) -> ClientResult<AccountInfo> {
        Ok(AccountInfo {
            account_name: "Test Account".to_string(),
            account_id: "acct".to_string(),
        })
    }
}

/// In-memory stand-in for the hosting application's entity tables.
#[derive(Default)]
struct MemoryEntityStore {
    entities: Mutex<Vec<Entity>>,
    next_id: AtomicI64,
    apply_calls: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryEntityStore {
    fn with_entities(entities: Vec<Entity>) -> Self {
        let max_id = entities.iter().map(|e| e.id).max().unwrap_or(0);
        let store = Self::default();
        store.next_id.store(max_id + 1, Ordering::SeqCst);
        *store.entities.lock().unwrap() = entities;
        store
    }

    fn get(&self, kind: EntityKind, id: i64) -> Option<Entity> {
        self.entities
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.kind == kind && e.id == id)
            .cloned()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn fetch_eligible(&self, kind: EntityKind) -> listsync_engine::EngineResult<Vec<Entity>> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect())
    }

    async fn find_by_id(
        &self,
        kind: EntityKind,
        id: i64,
    ) -> listsync_engine::EngineResult<Option<Entity>> {
        Ok(self.get(kind, id))
    }

    async fn find_by_email(
        &self,
        kind: EntityKind,
        email: &str,
    ) -> listsync_engine::EngineResult<Option<Entity>> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.kind == kind && e.email.trim().eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn apply_fields(
        &self,
        kind: EntityKind,
        entity_id: i64,
        changes: &[FieldChange],
    ) -> listsync_engine::EngineResult<()> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(listsync_engine::EngineError::local_write(
                kind,
                entity_id,
                "write refused",
            ));
        }
        let mut entities = self.entities.lock().unwrap();
        let entity = entities
            .iter_mut()
            .find(|e| e.kind == kind && e.id == entity_id)
            .ok_or_else(|| {
                listsync_engine::EngineError::local_write(kind, entity_id, "not found")
            })?;
        for change in changes {
            entity.set_field(&change.local_field, &change.value)?;
        }
        Ok(())
    }

    async fn create_remote_originated(
        &self,
        email: &str,
        changes: &[FieldChange],
    ) -> listsync_engine::EngineResult<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut entity = Entity::new(id, EntityKind::Person, email);
        for change in changes {
            entity.set_field(&change.local_field, &change.value)?;
        }
        self.entities.lock().unwrap().push(entity);
        Ok(id)
    }
}

fn settings() -> SyncSettings {
    SyncSettings {
        api_key: "key".to_string(),
        server_prefix: "us21".to_string(),
        default_list_id: "L1".to_string(),
        ..SyncSettings::default()
    }
}

struct Fixture {
    engine: SyncEngine,
    client: Arc<MemoryListClient>,
    store: Arc<MemoryEntityStore>,
    history: Arc<MemoryHistoryStore>,
}

fn fixture(entities: Vec<Entity>, settings: SyncSettings) -> Fixture {
    let client = Arc::new(MemoryListClient::default());
    let store = Arc::new(MemoryEntityStore::with_entities(entities));
    let history = Arc::new(MemoryHistoryStore::new());
    let engine = SyncEngine::builder()
        .settings(settings)
        .mappings(MappingCatalog::defaults())
        .rules(RuleSet::defaults())
        .client(client.clone())
        .entities(store.clone())
        .history(history.clone())
        .actor("tests")
        .build()
        .unwrap();
    Fixture {
        engine,
        client,
        store,
        history,
    }
}

fn person(id: i64, email: &str, first_name: &str) -> Entity {
    let mut e = Entity::new(id, EntityKind::Person, email);
    e.first_name = first_name.to_string();
    e
}

#[tokio::test]
async fn outward_sync_is_idempotent() {
    let fx = fixture(vec![person(1, "a@x.com", "A")], settings());

    let first = fx.engine.sync_outward(EntityKind::Person, None).await.unwrap();
    assert_eq!((first.success, first.errors, first.skipped), (1, 0, 0));

    let member = fx.client.member("a@x.com").unwrap();
    assert_eq!(member.id, subscriber_key("a@x.com"));
    assert_eq!(member.merge_fields.get("FNAME").unwrap(), "A");
    assert_eq!(member.merge_fields.get("LNAME").unwrap(), "");
    assert!(member.tags.contains(&"source:person".to_string()));

    let second = fx.engine.sync_outward(EntityKind::Person, None).await.unwrap();
    assert_eq!(second.success, 1);

    // Same subscriber key, so still one member, in the same state.
    assert_eq!(fx.client.member_count(), 1);
    assert_eq!(fx.client.member("a@x.com").unwrap().merge_fields, member.merge_fields);

    // Two runs: two pending records and two success records.
    let records = fx.history.records().await;
    assert_eq!(
        records.iter().filter(|r| r.status == SyncStatus::Pending).count(),
        2
    );
    assert_eq!(
        records.iter().filter(|r| r.status == SyncStatus::Success).count(),
        2
    );
}

#[tokio::test]
async fn failed_upsert_pairs_pending_with_error() {
    let fx = fixture(vec![person(1, "a@x.com", "A")], settings());
    fx.client.fail_upserts.store(true, Ordering::SeqCst);

    let result = fx.engine.sync_outward(EntityKind::Person, None).await.unwrap();
    assert_eq!((result.success, result.errors), (0, 1));
    // The service's own error text is preserved verbatim.
    assert!(result.outcomes[0].detail.contains("Internal Server Error"));

    let records = fx.history.records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].status, SyncStatus::Pending);
    assert_eq!(records[1].status, SyncStatus::Error);
    assert!(records[1].message.contains("Internal Server Error"));

    // The error record pairs the pending one, so nothing counts as stuck.
    assert!(fx.history.pending_counts().await.unwrap().is_empty());
}

#[tokio::test]
async fn entity_without_email_is_skipped_silently() {
    let fx = fixture(vec![person(1, "", "A"), person(2, "b@x.com", "B")], settings());

    let result = fx.engine.sync_outward(EntityKind::Person, None).await.unwrap();
    assert_eq!((result.success, result.errors, result.skipped), (1, 0, 1));

    // The skipped entity left no trace: one upsert, one pending/success pair.
    assert_eq!(fx.client.upsert_calls.load(Ordering::SeqCst), 1);
    let records = fx.history.records().await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.entity_id == 2));
}

#[tokio::test]
async fn rules_tag_and_segment_organizations() {
    let mut org = Entity::new(1, EntityKind::Organization, "sales@acme.example");
    org.name = "Acme".to_string();
    org.annual_revenue = Some(12_000_000.0);
    org.country = "US".to_string();
    let mut org2 = Entity::new(2, EntityKind::Organization, "info@other.example");
    org2.annual_revenue = Some(8_000_000.0);
    org2.country = "CA".to_string();

    let fx = fixture(vec![org, org2], settings());
    let result = fx
        .engine
        .sync_outward(EntityKind::Organization, None)
        .await
        .unwrap();
    assert_eq!(result.success, 2);

    let member = fx.client.member("sales@acme.example").unwrap();
    for tag in ["Enterprise", "High Value", "US Market", "source:organization"] {
        assert!(member.tags.contains(&tag.to_string()), "missing tag {tag}");
    }

    let high_value = fx.client.segment_emails("High Value Customers");
    assert!(high_value.contains("sales@acme.example"));
    assert!(high_value.contains("info@other.example"));
    assert!(fx
        .client
        .segment_emails("North America")
        .contains("info@other.example"));

    // Both entities land in High Value Customers but the segment is only
    // created once per pass.
    let creates = fx.client.segment_creates.load(Ordering::SeqCst);
    assert_eq!(creates, 2); // one per distinct segment name
}

#[tokio::test]
async fn inward_unchanged_member_is_silent() {
    let fx = fixture(vec![person(1, "a@x.com", "A")], settings());
    fx.client.seed_member("a@x.com", &[("FNAME", "A"), ("LNAME", "")]);

    let result = fx.engine.sync_inward(None).await.unwrap();
    assert_eq!((result.success, result.errors, result.skipped), (0, 0, 0));
    assert!(result.outcomes.is_empty());
    assert!(fx.history.records().await.is_empty());
    assert_eq!(fx.store.apply_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn inward_updates_changed_member() {
    let fx = fixture(vec![person(1, "a@x.com", "A")], settings());
    fx.client.seed_member("a@x.com", &[("FNAME", "Alice"), ("PHONE", "555-0100")]);

    let result = fx.engine.sync_inward(None).await.unwrap();
    assert_eq!(result.success, 1);

    let updated = fx.store.get(EntityKind::Person, 1).unwrap();
    assert_eq!(updated.first_name, "Alice");
    assert_eq!(updated.phone, "555-0100");
    // Email is identity, never rewritten.
    assert_eq!(updated.email, "a@x.com");

    let records = fx.history.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, SyncStatus::Success);
    assert_eq!(records[0].direction.as_str(), "inward");
}

#[tokio::test]
async fn inward_creates_person_for_unknown_member() {
    let fx = fixture(vec![], settings());
    fx.client
        .seed_member("john.doe@example.com", &[("FNAME", "John"), ("LNAME", "Doe")]);

    let result = fx.engine.sync_inward(None).await.unwrap();
    assert_eq!(result.success, 1);

    let created_id = result.outcomes[0].entity_id;
    let created = fx.store.get(EntityKind::Person, created_id).unwrap();
    assert_eq!(created.email, "john.doe@example.com");
    assert_eq!(created.first_name, "John");
    assert_eq!(created.last_name, "Doe");

    let records = fx.history.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].entity_id, created_id);
}

#[tokio::test]
async fn inward_ambiguous_email_updates_highest_priority_kind() {
    let mut org = Entity::new(1, EntityKind::Organization, "shared@x.com");
    org.name = "Acme".to_string();
    let fx = fixture(vec![org, person(2, "shared@x.com", "A")], settings());
    fx.client.seed_member("shared@x.com", &[("COMPANY", "Acme Inc")]);

    let result = fx.engine.sync_inward(None).await.unwrap();
    assert_eq!(result.success, 1);

    // Organization outranks person in the match order.
    let updated = fx.store.get(EntityKind::Organization, 1).unwrap();
    assert_eq!(updated.name, "Acme Inc");
    assert_eq!(fx.store.get(EntityKind::Person, 2).unwrap().first_name, "A");

    let records = fx.history.records().await;
    let ambiguous = records
        .iter()
        .find(|r| r.status == SyncStatus::AmbiguousMatch)
        .expect("ambiguity must be recorded");
    assert_eq!(ambiguous.entity_kind, EntityKind::Organization);
    assert!(ambiguous.message.contains("person"));
}

#[tokio::test]
async fn inward_local_write_failure_continues_pass() {
    let fx = fixture(
        vec![person(1, "a@x.com", "A"), person(2, "b@x.com", "B")],
        settings(),
    );
    fx.client.seed_member("a@x.com", &[("FNAME", "Alice")]);
    fx.client.seed_member("b@x.com", &[("FNAME", "Beth")]);
    fx.store.fail_writes.store(true, Ordering::SeqCst);

    let result = fx.engine.sync_inward(None).await.unwrap();
    assert_eq!((result.success, result.errors), (0, 2));

    let records = fx.history.records().await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == SyncStatus::Error));
}

#[tokio::test]
async fn manual_sync_all_respects_kind_flags() {
    let mut cfg = settings();
    cfg.persons_enabled = false;
    let mut user = Entity::new(1, EntityKind::SystemUser, "urbana@example.com");
    user.first_name = "Urbana".to_string();
    let fx = fixture(vec![user, person(2, "a@x.com", "A")], cfg);

    let report = fx.engine.manual_sync(SyncTarget::All, None).await.unwrap();
    assert!(matches!(
        report.kinds.get(&EntityKind::Person),
        Some(KindReport::Skipped)
    ));
    assert!(matches!(
        report.kinds.get(&EntityKind::SystemUser),
        Some(KindReport::Ran(r)) if r.success == 1
    ));

    // The disabled kind generated no traffic at all.
    assert!(fx.client.member("a@x.com").is_none());
    assert_eq!(report.totals().success, 1);
}

#[tokio::test]
async fn repeated_manual_sync_leaves_remote_count_unchanged() {
    let mut user = Entity::new(1, EntityKind::SystemUser, "urbana@example.com");
    user.first_name = "Urbana".to_string();
    let fx = fixture(vec![user], settings());

    let first = fx
        .engine
        .manual_sync(SyncTarget::Kind(EntityKind::SystemUser), None)
        .await
        .unwrap();
    let count_after_first = fx.client.member_count();
    let second = fx
        .engine
        .manual_sync(SyncTarget::Kind(EntityKind::SystemUser), None)
        .await
        .unwrap();

    assert_eq!(first.totals().success, second.totals().success);
    assert_eq!(fx.client.member_count(), count_after_first);
}

#[tokio::test]
async fn bidirectional_runs_outward_then_inward() {
    let fx = fixture(vec![person(1, "a@x.com", "A")], settings());
    fx.client
        .seed_member("john.doe@example.com", &[("FNAME", "John")]);

    let report = fx.engine.bidirectional_sync(None).await.unwrap();
    assert_eq!(report.outward.totals().success, 1);
    // The unknown member came back in as a new person, and the outward
    // member was unchanged on the way back (silent no-op).
    assert_eq!(report.inward.success, 1);
    assert!(fx
        .store
        .entities
        .lock()
        .unwrap()
        .iter()
        .any(|e| e.email == "john.doe@example.com"));
}

#[tokio::test]
async fn scheduled_sync_honors_flags_and_interval() {
    let mut cfg = settings();
    cfg.auto_sync = false;
    let fx = fixture(vec![person(1, "a@x.com", "A")], cfg);
    assert!(matches!(
        fx.engine.scheduled_sync().await.unwrap(),
        ScheduledOutcome::Disabled
    ));
    assert_eq!(fx.client.upsert_calls.load(Ordering::SeqCst), 0);

    let mut cfg = settings();
    cfg.auto_sync = true;
    let fx = fixture(vec![person(1, "a@x.com", "A")], cfg);

    let first = fx.engine.scheduled_sync().await.unwrap();
    assert!(matches!(first, ScheduledOutcome::Ran(_)));
    let records_after_first = fx.history.records().await.len();
    let calls_after_first = fx.client.upsert_calls.load(Ordering::SeqCst);

    // Second invocation lands inside the minimum interval.
    let second = fx.engine.scheduled_sync().await.unwrap();
    assert!(matches!(second, ScheduledOutcome::Skipped));
    assert_eq!(fx.history.records().await.len(), records_after_first);
    assert_eq!(fx.client.upsert_calls.load(Ordering::SeqCst), calls_after_first);
}

#[tokio::test]
async fn real_time_sync_swallows_failures() {
    let fx = fixture(vec![person(1, "a@x.com", "A")], settings());
    fx.client.fail_upserts.store(true, Ordering::SeqCst);

    let outcome = fx
        .engine
        .real_time_sync(EntityKind::Person, 1, TriggerAction::Update)
        .await;
    assert_eq!(outcome.status, RunStatus::Error);
    assert!(outcome.message.contains("Internal Server Error"));

    // Unknown entity: skipped, not an error.
    let outcome = fx
        .engine
        .real_time_sync(EntityKind::Person, 99, TriggerAction::Create)
        .await;
    assert_eq!(outcome.status, RunStatus::Skipped);
}

#[tokio::test]
async fn real_time_delete_uses_captured_email() {
    let fx = fixture(vec![], settings());
    fx.client.seed_member("a@x.com", &[]);

    let outcome = fx
        .engine
        .real_time_sync(
            EntityKind::Person,
            1,
            TriggerAction::Delete {
                email: "a@x.com".to_string(),
            },
        )
        .await;
    assert_eq!(outcome.status, RunStatus::Success);
    assert!(fx.client.member("a@x.com").is_none());
    assert_eq!(fx.client.deleted.lock().unwrap().as_slice(), ["a@x.com"]);

    let records = fx.history.records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].status, SyncStatus::Pending);
    assert_eq!(records[1].status, SyncStatus::Success);
}

#[tokio::test]
async fn disabled_sync_gates_real_time() {
    let mut cfg = settings();
    cfg.sync_enabled = false;
    let fx = fixture(vec![person(1, "a@x.com", "A")], cfg);

    let outcome = fx
        .engine
        .real_time_sync(EntityKind::Person, 1, TriggerAction::Update)
        .await;
    assert_eq!(outcome.status, RunStatus::Disabled);
    assert_eq!(fx.client.upsert_calls.load(Ordering::SeqCst), 0);
}
