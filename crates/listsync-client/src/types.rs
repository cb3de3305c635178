//! Wire types for the list-service API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Subscription status of a list member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Actively subscribed.
    Subscribed,
    /// Opt-in confirmation pending.
    Pending,
    /// Unsubscribed from the list.
    Unsubscribed,
}

impl SubscriptionStatus {
    /// Convert to the wire string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Subscribed => "subscribed",
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Unsubscribed => "unsubscribed",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "subscribed" => Ok(SubscriptionStatus::Subscribed),
            "pending" => Ok(SubscriptionStatus::Pending),
            "unsubscribed" => Ok(SubscriptionStatus::Unsubscribed),
            _ => Err(format!("unknown subscription status: {s}")),
        }
    }
}

/// Payload for an idempotent member upsert.
///
/// `status_if_new` only applies when the upsert creates the member; an
/// existing member keeps whatever status it already has (an unsubscribe
/// must never be reverted by a sync).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberPayload {
    /// Primary email address.
    pub email_address: String,
    /// Status to apply if the member does not exist yet.
    pub status_if_new: SubscriptionStatus,
    /// Remote attribute name to value. An explicit empty string clears the
    /// attribute; omission would leave it unchanged.
    pub merge_fields: HashMap<String, String>,
    /// Tag names to apply.
    pub tags: Vec<String>,
}

impl MemberPayload {
    /// Create a payload with no merge fields or tags.
    pub fn new(email: impl Into<String>, status_if_new: SubscriptionStatus) -> Self {
        Self {
            email_address: email.into(),
            status_if_new,
            merge_fields: HashMap::new(),
            tags: Vec::new(),
        }
    }

    /// Add a merge field.
    #[must_use]
    pub fn with_merge_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.merge_fields.insert(name.into(), value.into());
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Replace the tag list.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// A member record as held by the list service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMember {
    /// Remote-assigned member identifier (the subscriber key).
    pub id: String,
    /// Primary email address.
    pub email_address: String,
    /// Current subscription status.
    pub status: SubscriptionStatus,
    /// Remote attribute name to value.
    #[serde(default)]
    pub merge_fields: HashMap<String, String>,
    /// Tag names currently applied.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RemoteMember {
    /// Get a merge field value, treating a missing field as empty.
    #[must_use]
    pub fn merge_field(&self, name: &str) -> Option<&str> {
        self.merge_fields.get(name).map(String::as_str)
    }
}

/// Pagination parameters for member listing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageRequest {
    /// Maximum number of members per page.
    pub count: u32,
    /// Offset of the first member.
    pub offset: u64,
}

impl PageRequest {
    /// Create a page request starting at the beginning.
    #[must_use]
    pub fn first(count: u32) -> Self {
        Self { count, offset: 0 }
    }

    /// The request for the page following `page`.
    #[must_use]
    pub fn next(&self, page: &MemberPage) -> Self {
        Self {
            count: self.count,
            offset: self.offset + page.members.len() as u64,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(100)
    }
}

/// One page of list members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberPage {
    /// Members in this page.
    pub members: Vec<RemoteMember>,
    /// Total members in the list.
    pub total_items: u64,
    /// Whether more pages follow.
    pub has_more: bool,
}

impl MemberPage {
    /// An empty page.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            members: Vec::new(),
            total_items: 0,
            has_more: false,
        }
    }
}

/// A static audience segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    /// Remote segment identifier.
    pub id: String,
    /// Segment name.
    pub name: String,
    /// Number of members currently in the segment.
    pub member_count: u64,
}

/// Account details returned by a connection test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Account display name.
    pub account_name: String,
    /// Account identifier.
    pub account_id: String,
}
