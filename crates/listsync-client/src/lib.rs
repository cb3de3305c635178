//! # List-Service Client
//!
//! Client contract for the external email-marketing list service, plus a
//! REST implementation speaking the service's v3 member API.
//!
//! The crate deliberately knows nothing about local CRM entities: it deals
//! in members, merge fields, tags and segments, keyed by the subscriber
//! key (a stable hash of the lower-cased email address). The sync engine
//! sits on top of the [`ListClient`] trait; tests substitute their own
//! implementations.
//!
//! ## Example
//!
//! ```ignore
//! use listsync_client::{MemberPayload, RestConfig, RestListClient, SubscriptionStatus};
//!
//! let client = RestListClient::new(RestConfig::new("key-us21", "us21"))?;
//! let payload = MemberPayload::new("jane@example.com", SubscriptionStatus::Subscribed)
//!     .with_merge_field("FNAME", "Jane")
//!     .with_tag("source:person");
//! let member = client.upsert_member("a1b2c3", &payload).await?;
//! ```

pub mod error;
pub mod key;
pub mod rest;
pub mod traits;
pub mod types;

pub use error::{ClientError, ClientResult};
pub use key::subscriber_key;
pub use rest::{RestConfig, RestListClient};
pub use traits::ListClient;
pub use types::{
    AccountInfo, MemberPage, MemberPayload, PageRequest, RemoteMember, Segment,
    SubscriptionStatus,
};
