//! Append-only sync attempt history.
//!
//! Every outward attempt writes a pending record before the remote call and
//! exactly one terminal record after it. Records are never mutated in
//! place; even timing out a stuck attempt appends a terminal record rather
//! than rewriting the pending one. Aggregate views (recent stats, pending
//! counts, last sync per kind) are derived queries over the log.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::types::{EntityKind, SyncDirection, SyncStatus};

/// Message recorded when a stale pending attempt is closed.
pub const TIMEOUT_MESSAGE: &str = "sync timed out";

/// One immutable sync attempt record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHistoryRecord {
    pub id: Uuid,
    pub entity_kind: EntityKind,
    pub entity_id: i64,
    pub direction: SyncDirection,
    pub status: SyncStatus,
    pub message: String,
    /// Remote member identifier, set on successful outward attempts.
    pub remote_id: Option<String>,
    /// Who ran the pass: a login for manual runs, `scheduler` or `trigger`
    /// for automatic ones.
    pub actor: String,
    pub recorded_at: DateTime<Utc>,
}

impl SyncHistoryRecord {
    /// Create a record timestamped now.
    pub fn new(
        entity_kind: EntityKind,
        entity_id: i64,
        direction: SyncDirection,
        status: SyncStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_kind,
            entity_id,
            direction,
            status,
            message: message.into(),
            remote_id: None,
            actor: "system".to_string(),
            recorded_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }

    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }
}

/// Aggregate view over a recent time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecentStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Contract for history persistence.
///
/// Appends must be individually atomic; no cross-record transaction is
/// required, which is what lets passes interleave with aggregate queries.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one record.
    async fn append(&self, record: SyncHistoryRecord) -> EngineResult<()>;

    /// Aggregate counts over the trailing window.
    async fn recent_stats(&self, window_hours: i64) -> EngineResult<RecentStats>;

    /// Per-kind count of pending attempts with no later terminal record
    /// for the same (kind, id, direction).
    async fn pending_counts(&self) -> EngineResult<BTreeMap<EntityKind, u64>>;

    /// Most recent record for a kind, if any.
    async fn last_sync_for_kind(&self, kind: EntityKind)
        -> EngineResult<Option<SyncHistoryRecord>>;

    /// Most recent records for one entity, newest first.
    async fn entity_history(
        &self,
        kind: EntityKind,
        entity_id: i64,
        limit: u32,
    ) -> EngineResult<Vec<SyncHistoryRecord>>;

    /// Timestamp of the most recent record of any status. Drives the
    /// scheduled-run minimum-interval gate.
    async fn last_activity_at(&self) -> EngineResult<Option<DateTime<Utc>>>;

    /// Purge records older than the retention window. Returns the number
    /// removed.
    async fn clear_older_than(&self, days: i64) -> EngineResult<u64>;

    /// Close out pending attempts older than the timeout by appending a
    /// terminal error record with [`TIMEOUT_MESSAGE`] for each. Returns the
    /// number closed. Must be invoked periodically, independent of sync
    /// passes, so crashes mid-call cannot leave attempts pending forever.
    async fn timeout_pending(&self, minutes: i64) -> EngineResult<u64>;
}

/// In-memory history store for tests and embedded deployments.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: tokio::sync::RwLock<Vec<SyncHistoryRecord>>,
}

impl MemoryHistoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, oldest first (test inspection).
    pub async fn records(&self) -> Vec<SyncHistoryRecord> {
        self.records.read().await.clone()
    }

    fn is_unpaired(records: &[SyncHistoryRecord], pending: &SyncHistoryRecord) -> bool {
        !records.iter().any(|r| {
            r.status.is_terminal()
                && r.entity_kind == pending.entity_kind
                && r.entity_id == pending.entity_id
                && r.direction == pending.direction
                && r.recorded_at >= pending.recorded_at
        })
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, record: SyncHistoryRecord) -> EngineResult<()> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn recent_stats(&self, window_hours: i64) -> EngineResult<RecentStats> {
        let since = Utc::now() - Duration::hours(window_hours);
        let records = self.records.read().await;
        let mut stats = RecentStats::default();
        for r in records.iter().filter(|r| r.recorded_at >= since) {
            stats.total += 1;
            match r.status {
                SyncStatus::Success => {
                    stats.successful += 1;
                    stats.last_success_at = stats.last_success_at.max(Some(r.recorded_at));
                }
                SyncStatus::Error => {
                    stats.failed += 1;
                    stats.last_failure_at = stats.last_failure_at.max(Some(r.recorded_at));
                }
                SyncStatus::Pending | SyncStatus::AmbiguousMatch => {}
            }
        }
        Ok(stats)
    }

    async fn pending_counts(&self) -> EngineResult<BTreeMap<EntityKind, u64>> {
        let records = self.records.read().await;
        let mut counts = BTreeMap::new();
        for pending in records.iter().filter(|r| r.status == SyncStatus::Pending) {
            if Self::is_unpaired(&records, pending) {
                *counts.entry(pending.entity_kind).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn last_sync_for_kind(
        &self,
        kind: EntityKind,
    ) -> EngineResult<Option<SyncHistoryRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.entity_kind == kind)
            .max_by_key(|r| r.recorded_at)
            .cloned())
    }

    async fn entity_history(
        &self,
        kind: EntityKind,
        entity_id: i64,
        limit: u32,
    ) -> EngineResult<Vec<SyncHistoryRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<SyncHistoryRecord> = records
            .iter()
            .filter(|r| r.entity_kind == kind && r.entity_id == entity_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn last_activity_at(&self) -> EngineResult<Option<DateTime<Utc>>> {
        let records = self.records.read().await;
        Ok(records.iter().map(|r| r.recorded_at).max())
    }

    async fn clear_older_than(&self, days: i64) -> EngineResult<u64> {
        let cutoff = Utc::now() - Duration::days(days);
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.recorded_at >= cutoff);
        Ok((before - records.len()) as u64)
    }

    async fn timeout_pending(&self, minutes: i64) -> EngineResult<u64> {
        let cutoff = Utc::now() - Duration::minutes(minutes);
        let mut records = self.records.write().await;
        let stale: Vec<SyncHistoryRecord> = records
            .iter()
            .filter(|r| r.status == SyncStatus::Pending && r.recorded_at < cutoff)
            .filter(|r| Self::is_unpaired(&records, r))
            .cloned()
            .collect();

        for pending in &stale {
            records.push(
                SyncHistoryRecord::new(
                    pending.entity_kind,
                    pending.entity_id,
                    pending.direction,
                    SyncStatus::Error,
                    TIMEOUT_MESSAGE,
                )
                .with_actor("system"),
            );
        }
        Ok(stale.len() as u64)
    }
}

/// Postgres-backed history store over the `listsync_history` table.
#[derive(Debug, Clone)]
pub struct PgHistoryStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    entity_kind: String,
    entity_id: i64,
    direction: String,
    status: String,
    message: String,
    remote_id: Option<String>,
    actor: String,
    recorded_at: DateTime<Utc>,
}

impl HistoryRow {
    fn into_record(self) -> EngineResult<SyncHistoryRecord> {
        let parse_err = |m: String| EngineError::Serialization { message: m };
        Ok(SyncHistoryRecord {
            id: self.id,
            entity_kind: self.entity_kind.parse().map_err(parse_err)?,
            entity_id: self.entity_id,
            direction: self.direction.parse().map_err(parse_err)?,
            status: self.status.parse().map_err(parse_err)?,
            message: self.message,
            remote_id: self.remote_id,
            actor: self.actor,
            recorded_at: self.recorded_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StatsRow {
    total: Option<i64>,
    successful: Option<i64>,
    failed: Option<i64>,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
}

impl PgHistoryStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    #[instrument(skip(self, record), fields(kind = %record.entity_kind, entity_id = record.entity_id, status = %record.status))]
    async fn append(&self, record: SyncHistoryRecord) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO listsync_history
                (id, entity_kind, entity_id, direction, status, message,
                 remote_id, actor, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(record.entity_kind.as_str())
        .bind(record.entity_id)
        .bind(record.direction.as_str())
        .bind(record.status.as_str())
        .bind(&record.message)
        .bind(&record.remote_id)
        .bind(&record.actor)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_stats(&self, window_hours: i64) -> EngineResult<RecentStats> {
        let since = Utc::now() - Duration::hours(window_hours);
        let row = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'success') AS successful,
                COUNT(*) FILTER (WHERE status = 'error') AS failed,
                MAX(recorded_at) FILTER (WHERE status = 'success') AS last_success_at,
                MAX(recorded_at) FILTER (WHERE status = 'error') AS last_failure_at
            FROM listsync_history
            WHERE recorded_at >= $1
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(RecentStats {
            total: row.total.unwrap_or(0) as u64,
            successful: row.successful.unwrap_or(0) as u64,
            failed: row.failed.unwrap_or(0) as u64,
            last_success_at: row.last_success_at,
            last_failure_at: row.last_failure_at,
        })
    }

    async fn pending_counts(&self) -> EngineResult<BTreeMap<EntityKind, u64>> {
        #[derive(sqlx::FromRow)]
        struct CountRow {
            entity_kind: String,
            pending: i64,
        }

        let rows = sqlx::query_as::<_, CountRow>(
            r#"
            SELECT p.entity_kind, COUNT(*) AS pending
            FROM listsync_history p
            WHERE p.status = 'pending'
              AND NOT EXISTS (
                  SELECT 1 FROM listsync_history t
                  WHERE t.entity_kind = p.entity_kind
                    AND t.entity_id = p.entity_id
                    AND t.direction = p.direction
                    AND t.status IN ('success', 'error')
                    AND t.recorded_at >= p.recorded_at
              )
            GROUP BY p.entity_kind
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let kind: EntityKind = row
                .entity_kind
                .parse()
                .map_err(|m: String| EngineError::Serialization { message: m })?;
            counts.insert(kind, row.pending as u64);
        }
        Ok(counts)
    }

    async fn last_sync_for_kind(
        &self,
        kind: EntityKind,
    ) -> EngineResult<Option<SyncHistoryRecord>> {
        let row = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, entity_kind, entity_id, direction, status, message,
                   remote_id, actor, recorded_at
            FROM listsync_history
            WHERE entity_kind = $1
            ORDER BY recorded_at DESC
            LIMIT 1
            "#,
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(HistoryRow::into_record).transpose()
    }

    async fn entity_history(
        &self,
        kind: EntityKind,
        entity_id: i64,
        limit: u32,
    ) -> EngineResult<Vec<SyncHistoryRecord>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, entity_kind, entity_id, direction, status, message,
                   remote_id, actor, recorded_at
            FROM listsync_history
            WHERE entity_kind = $1 AND entity_id = $2
            ORDER BY recorded_at DESC
            LIMIT $3
            "#,
        )
        .bind(kind.as_str())
        .bind(entity_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HistoryRow::into_record).collect()
    }

    async fn last_activity_at(&self) -> EngineResult<Option<DateTime<Utc>>> {
        let row: (Option<DateTime<Utc>>,) =
            sqlx::query_as("SELECT MAX(recorded_at) FROM listsync_history")
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    #[instrument(skip(self))]
    async fn clear_older_than(&self, days: i64) -> EngineResult<u64> {
        let cutoff = Utc::now() - Duration::days(days);
        let result = sqlx::query("DELETE FROM listsync_history WHERE recorded_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        debug!(deleted = result.rows_affected(), "purged history");
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn timeout_pending(&self, minutes: i64) -> EngineResult<u64> {
        let cutoff = Utc::now() - Duration::minutes(minutes);
        let stale = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, entity_kind, entity_id, direction, status, message,
                   remote_id, actor, recorded_at
            FROM listsync_history p
            WHERE p.status = 'pending'
              AND p.recorded_at < $1
              AND NOT EXISTS (
                  SELECT 1 FROM listsync_history t
                  WHERE t.entity_kind = p.entity_kind
                    AND t.entity_id = p.entity_id
                    AND t.direction = p.direction
                    AND t.status IN ('success', 'error')
                    AND t.recorded_at >= p.recorded_at
              )
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut closed = 0u64;
        for row in stale {
            let pending = row.into_record()?;
            self.append(
                SyncHistoryRecord::new(
                    pending.entity_kind,
                    pending.entity_id,
                    pending.direction,
                    SyncStatus::Error,
                    TIMEOUT_MESSAGE,
                )
                .with_actor("system"),
            )
            .await?;
            closed += 1;
        }
        debug!(closed, "timed out stale pending attempts");
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        kind: EntityKind,
        id: i64,
        status: SyncStatus,
        age_minutes: i64,
    ) -> SyncHistoryRecord {
        let mut r = SyncHistoryRecord::new(kind, id, SyncDirection::Outward, status, "");
        r.recorded_at = Utc::now() - Duration::minutes(age_minutes);
        r
    }

    #[tokio::test]
    async fn test_pending_counts_only_unpaired() {
        let store = MemoryHistoryStore::new();
        // Entity 1: pending then success (paired).
        store
            .append(record(EntityKind::Person, 1, SyncStatus::Pending, 10))
            .await
            .unwrap();
        store
            .append(record(EntityKind::Person, 1, SyncStatus::Success, 9))
            .await
            .unwrap();
        // Entity 2: still pending.
        store
            .append(record(EntityKind::Person, 2, SyncStatus::Pending, 5))
            .await
            .unwrap();

        let counts = store.pending_counts().await.unwrap();
        assert_eq!(counts.get(&EntityKind::Person), Some(&1));
    }

    #[tokio::test]
    async fn test_timeout_appends_terminal_error() {
        let store = MemoryHistoryStore::new();
        store
            .append(record(EntityKind::SystemUser, 7, SyncStatus::Pending, 120))
            .await
            .unwrap();
        // Recent pending must survive.
        store
            .append(record(EntityKind::SystemUser, 8, SyncStatus::Pending, 1))
            .await
            .unwrap();

        let closed = store.timeout_pending(30).await.unwrap();
        assert_eq!(closed, 1);

        let records = store.records().await;
        let timeout = records
            .iter()
            .find(|r| r.status == SyncStatus::Error)
            .unwrap();
        assert_eq!(timeout.entity_id, 7);
        assert_eq!(timeout.message, TIMEOUT_MESSAGE);

        // The original pending record is untouched; the log stays
        // append-only.
        assert!(records
            .iter()
            .any(|r| r.entity_id == 7 && r.status == SyncStatus::Pending));

        let counts = store.pending_counts().await.unwrap();
        assert_eq!(counts.get(&EntityKind::SystemUser), Some(&1));
    }

    #[tokio::test]
    async fn test_timeout_is_idempotent() {
        let store = MemoryHistoryStore::new();
        store
            .append(record(EntityKind::Person, 1, SyncStatus::Pending, 120))
            .await
            .unwrap();

        assert_eq!(store.timeout_pending(30).await.unwrap(), 1);
        assert_eq!(store.timeout_pending(30).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recent_stats_window() {
        let store = MemoryHistoryStore::new();
        store
            .append(record(EntityKind::Person, 1, SyncStatus::Success, 10))
            .await
            .unwrap();
        store
            .append(record(EntityKind::Person, 2, SyncStatus::Error, 20))
            .await
            .unwrap();
        // Outside a 1-hour window.
        store
            .append(record(EntityKind::Person, 3, SyncStatus::Success, 600))
            .await
            .unwrap();

        let stats = store.recent_stats(1).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 1);
        assert!(stats.last_success_at.is_some());
        assert!(stats.last_failure_at.is_some());
    }

    #[tokio::test]
    async fn test_clear_older_than() {
        let store = MemoryHistoryStore::new();
        store
            .append(record(EntityKind::Person, 1, SyncStatus::Success, 10))
            .await
            .unwrap();
        let mut old = record(EntityKind::Person, 2, SyncStatus::Success, 0);
        old.recorded_at = Utc::now() - Duration::days(100);
        store.append(old).await.unwrap();

        assert_eq!(store.clear_older_than(90).await.unwrap(), 1);
        assert_eq!(store.records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_last_sync_and_activity() {
        let store = MemoryHistoryStore::new();
        assert!(store.last_activity_at().await.unwrap().is_none());
        assert!(store
            .last_sync_for_kind(EntityKind::Person)
            .await
            .unwrap()
            .is_none());

        store
            .append(record(EntityKind::Person, 1, SyncStatus::Success, 30))
            .await
            .unwrap();
        store
            .append(record(EntityKind::Person, 1, SyncStatus::Success, 5))
            .await
            .unwrap();

        let last = store
            .last_sync_for_kind(EntityKind::Person)
            .await
            .unwrap()
            .unwrap();
        assert!(Utc::now() - last.recorded_at < Duration::minutes(6));
        assert_eq!(store.last_activity_at().await.unwrap(), Some(last.recorded_at));
    }

    #[tokio::test]
    async fn test_entity_history_newest_first() {
        let store = MemoryHistoryStore::new();
        for age in [30, 20, 10] {
            store
                .append(record(EntityKind::Organization, 4, SyncStatus::Success, age))
                .await
                .unwrap();
        }
        store
            .append(record(EntityKind::Organization, 5, SyncStatus::Success, 1))
            .await
            .unwrap();

        let history = store
            .entity_history(EntityKind::Organization, 4, 2)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].recorded_at >= history[1].recorded_at);
    }
}
