//! Engine settings.
//!
//! Settings are loaded once by the hosting application and passed into the
//! engine by value. The engine never reads ambient global state: each pass
//! sees the snapshot it was constructed with, which is what makes the
//! read-only-during-a-pass guarantee trivial.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::EntityKind;

/// Read-only configuration snapshot for a sync pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// List-service API key.
    pub api_key: String,
    /// List-service data-center prefix.
    pub server_prefix: String,
    /// List to sync against when the caller does not name one.
    pub default_list_id: String,
    /// Master switch; when false every mode reports disabled.
    pub sync_enabled: bool,
    /// Whether scheduled runs are allowed.
    pub auto_sync: bool,
    /// Per-kind enable flags.
    pub organizations_enabled: bool,
    pub persons_enabled: bool,
    pub users_enabled: bool,
    /// Minimum seconds between scheduled runs.
    pub min_sync_interval_secs: i64,
    /// Minutes before a stale pending attempt is timed out.
    pub pending_timeout_minutes: i64,
    /// Days of history kept by the retention purge.
    pub history_retention_days: i64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            server_prefix: String::new(),
            default_list_id: String::new(),
            sync_enabled: true,
            auto_sync: false,
            organizations_enabled: true,
            persons_enabled: true,
            users_enabled: true,
            min_sync_interval_secs: 3600,
            pending_timeout_minutes: 30,
            history_retention_days: 90,
        }
    }
}

impl SyncSettings {
    /// Check whether a kind participates in sync passes.
    #[must_use]
    pub fn enabled_for(&self, kind: EntityKind) -> bool {
        match kind {
            EntityKind::Organization => self.organizations_enabled,
            EntityKind::Person => self.persons_enabled,
            EntityKind::SystemUser => self.users_enabled,
        }
    }

    /// Validate that a pass can run at all.
    pub fn validate(&self) -> EngineResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(EngineError::configuration("API key is not configured"));
        }
        if self.default_list_id.trim().is_empty() {
            return Err(EngineError::configuration(
                "default list id is not configured",
            ));
        }
        Ok(())
    }

    /// Resolve the list a pass should target.
    #[must_use]
    pub fn resolve_list_id<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        match requested {
            Some(id) if !id.trim().is_empty() => id,
            _ => &self.default_list_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SyncSettings {
        SyncSettings {
            api_key: "key".to_string(),
            server_prefix: "us21".to_string(),
            default_list_id: "L1".to_string(),
            ..SyncSettings::default()
        }
    }

    #[test]
    fn test_validate_requires_key_and_list() {
        assert!(settings().validate().is_ok());

        let mut missing_key = settings();
        missing_key.api_key.clear();
        assert!(missing_key.validate().is_err());

        let mut missing_list = settings();
        missing_list.default_list_id.clear();
        assert!(missing_list.validate().is_err());
    }

    #[test]
    fn test_per_kind_flags() {
        let mut s = settings();
        s.persons_enabled = false;
        assert!(s.enabled_for(EntityKind::Organization));
        assert!(!s.enabled_for(EntityKind::Person));
        assert!(s.enabled_for(EntityKind::SystemUser));
    }

    #[test]
    fn test_resolve_list_id() {
        let s = settings();
        assert_eq!(s.resolve_list_id(None), "L1");
        assert_eq!(s.resolve_list_id(Some("")), "L1");
        assert_eq!(s.resolve_list_id(Some("L9")), "L9");
    }
}
