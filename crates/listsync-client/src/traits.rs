//! List-service client contract.

use async_trait::async_trait;

use crate::error::ClientResult;
use crate::types::{AccountInfo, MemberPage, MemberPayload, PageRequest, RemoteMember, Segment};

/// Stateless facade over the list-service API.
///
/// Implementations hold credentials and an HTTP client but no mutable
/// cross-call state; every method is an independent request. The sync
/// engine only ever talks to this trait, so tests can substitute an
/// in-memory implementation.
#[async_trait]
pub trait ListClient: Send + Sync {
    /// Create or update a member, keyed by the subscriber key derived from
    /// the payload's email address.
    ///
    /// The operation is idempotent: repeating it with the same payload
    /// leaves the member in the same state and never creates a duplicate.
    async fn upsert_member(
        &self,
        list_id: &str,
        payload: &MemberPayload,
    ) -> ClientResult<RemoteMember>;

    /// Fetch one page of list members.
    async fn fetch_members(&self, list_id: &str, page: PageRequest) -> ClientResult<MemberPage>;

    /// Permanently remove a member from the list.
    async fn delete_member(&self, list_id: &str, email: &str) -> ClientResult<()>;

    /// Apply tags to a member.
    async fn add_tags(&self, list_id: &str, email: &str, tags: &[String]) -> ClientResult<()>;

    /// Remove tags from a member.
    async fn remove_tags(&self, list_id: &str, email: &str, tags: &[String]) -> ClientResult<()>;

    /// List the static segments of a list.
    async fn list_segments(&self, list_id: &str) -> ClientResult<Vec<Segment>>;

    /// Create a new static segment.
    async fn create_segment(&self, list_id: &str, name: &str) -> ClientResult<Segment>;

    /// Add a member to a static segment.
    async fn add_to_segment(
        &self,
        list_id: &str,
        segment_id: &str,
        email: &str,
    ) -> ClientResult<()>;

    /// Verify credentials against the service root endpoint.
    async fn test_connection(&self) -> ClientResult<AccountInfo>;
}
