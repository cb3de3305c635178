//! Core vocabulary shared across the engine.

use serde::{Deserialize, Serialize};

/// Local record type eligible for synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A company record.
    Organization,
    /// A contact person attached to a company.
    Person,
    /// An application user account.
    SystemUser,
}

impl EntityKind {
    /// Fixed priority order for inward email matching: first match wins.
    pub const MATCH_PRIORITY: [EntityKind; 3] = [
        EntityKind::Organization,
        EntityKind::Person,
        EntityKind::SystemUser,
    ];

    /// All kinds, in the order passes process them.
    #[must_use]
    pub fn all() -> [EntityKind; 3] {
        Self::MATCH_PRIORITY
    }

    /// Convert to the stable string form used in history and tags.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Organization => "organization",
            EntityKind::Person => "person",
            EntityKind::SystemUser => "user",
        }
    }

    /// The provenance tag applied to every member this kind produces.
    #[must_use]
    pub fn provenance_tag(&self) -> String {
        format!("source:{}", self.as_str())
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "organization" => Ok(EntityKind::Organization),
            "person" => Ok(EntityKind::Person),
            "user" => Ok(EntityKind::SystemUser),
            _ => Err(format!("unknown entity kind: {s}")),
        }
    }
}

/// Direction of a sync pass relative to the local system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Local to remote.
    Outward,
    /// Remote to local.
    Inward,
}

impl SyncDirection {
    /// Convert to the stable string form used in history.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Outward => "outward",
            SyncDirection::Inward => "inward",
        }
    }
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "outward" => Ok(SyncDirection::Outward),
            "inward" => Ok(SyncDirection::Inward),
            _ => Err(format!("unknown sync direction: {s}")),
        }
    }
}

/// Lifecycle status of a sync history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Attempt started; a remote or local write is in flight.
    Pending,
    /// Attempt completed successfully.
    Success,
    /// Attempt failed.
    Error,
    /// An inward email matched more than one entity kind. The
    /// highest-priority kind was still updated; this record makes the
    /// collision observable to operators.
    AmbiguousMatch,
}

impl SyncStatus {
    /// Check whether this status closes a pending attempt.
    ///
    /// `AmbiguousMatch` is informational, not terminal: it accompanies the
    /// terminal record for the kind that was updated.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Success | SyncStatus::Error)
    }

    /// Convert to the stable string form used in history.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Success => "success",
            SyncStatus::Error => "error",
            SyncStatus::AmbiguousMatch => "ambiguous_match",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SyncStatus::Pending),
            "success" => Ok(SyncStatus::Success),
            "error" => Ok(SyncStatus::Error),
            "ambiguous_match" => Ok(SyncStatus::AmbiguousMatch),
            _ => Err(format!("unknown sync status: {s}")),
        }
    }
}

/// What a manual sync should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTarget {
    /// A single entity kind.
    Kind(EntityKind),
    /// All three kinds, sequentially.
    All,
}

impl std::str::FromStr for SyncTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // `thirdparty` and `contact` are the CRM's own module names for
        // organizations and persons; callers pass either vocabulary.
        match s.to_lowercase().as_str() {
            "all" => Ok(SyncTarget::All),
            "thirdparty" => Ok(SyncTarget::Kind(EntityKind::Organization)),
            "contact" => Ok(SyncTarget::Kind(EntityKind::Person)),
            _ => s.parse::<EntityKind>().map(SyncTarget::Kind),
        }
    }
}

/// Mode-level outcome vocabulary for the invocation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run completed without errors.
    Success,
    /// The run completed with at least one error.
    Error,
    /// Synchronization is switched off in configuration.
    Disabled,
    /// The run was not attempted (minimum interval, kind disabled, or an
    /// ineligible entity).
    Skipped,
}

impl RunStatus {
    /// Convert to the stable string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
            RunStatus::Disabled => "disabled",
            RunStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Local mutation event forwarded by the trigger adapter.
///
/// `Delete` carries the email captured before the local row disappeared,
/// because the remote delete is keyed by email and the entity can no longer
/// be looked up by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerAction {
    Create,
    Update,
    Delete { email: String },
}
