//! # List-Sync Engine
//!
//! Synchronization core between local CRM entities (organizations, persons,
//! system users) and an external email-marketing list service.
//!
//! The engine decides, per record, whether and how to push it outward, pull
//! it inward, which fields map to which remote attributes, and how to record
//! every attempt durably so repeated runs are safe and auditable. Remote
//! access goes through the [`listsync_client::ListClient`] trait; local
//! entity access and history persistence go through the [`EntityStore`] and
//! [`HistoryStore`] traits, so the whole engine is testable against
//! in-memory implementations.
//!
//! ## Sync modes
//!
//! - **Outward** — push eligible local entities to the list as member
//!   upserts, with merge fields from the mapping catalog and tags/segments
//!   from the rule engine.
//! - **Inward** — pull list members, match them to local entities by email,
//!   and write back the inward-mapped field deltas.
//! - **Bidirectional** — outward for every kind, then inward once.
//! - **Scheduled** — the outward-for-all pass behind enable flags and a
//!   minimum-interval gate.
//! - **Real-time** — single-entity fire-and-forget sync driven by local
//!   create/update/delete events.

pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod history;
pub mod mapping;
pub mod result;
pub mod rules;
pub mod trigger;
pub mod types;

pub use config::SyncSettings;
pub use engine::{EntityStore, SyncEngine, SyncEngineBuilder};
pub use entity::{Entity, FieldChange, FieldSnapshot, FieldValue};
pub use error::{EngineError, EngineResult};
pub use history::{
    HistoryStore, MemoryHistoryStore, PgHistoryStore, RecentStats, SyncHistoryRecord,
};
pub use mapping::{FieldMapping, MappingCatalog, MappingDirection, MappingSet, OutwardFields};
pub use result::{
    BidirectionalReport, EntityOutcome, KindReport, OutcomeStatus, RunReport, ScheduledOutcome,
    SingleSyncOutcome, SyncRunResult,
};
pub use rules::{AudienceRule, Condition, RuleOutcome, RuleSet};
pub use trigger::SyncTrigger;
pub use types::{EntityKind, RunStatus, SyncDirection, SyncStatus, SyncTarget, TriggerAction};
