//! The remote directory the reconcilers drive.
//!
//! [`DirectoryClient`] is the whole surface the provider needs from Slack.
//! [`SlackClient`] implements it over the Web API; tests use
//! [`FakeDirectory`](crate::testing::FakeDirectory).

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClientResult;

pub mod slack;

pub use slack::SlackClient;

/// Slack error codes the reconcilers react to.
pub mod codes {
    /// The channel does not exist (or is not visible to the token).
    pub const CHANNEL_NOT_FOUND: &str = "channel_not_found";
    /// Archive of a channel that is already archived.
    pub const ALREADY_ARCHIVED: &str = "already_archived";
    /// Unarchive of a channel that is not archived.
    pub const NOT_ARCHIVED: &str = "not_archived";
    /// Disable of a usergroup that is already disabled.
    pub const ALREADY_DISABLED: &str = "already_disabled";
    /// A channel with the requested name exists.
    pub const NAME_TAKEN: &str = "name_taken";
    /// The invited user is already a member.
    pub const ALREADY_IN_CHANNEL: &str = "already_in_channel";
    /// The token's own user was invited.
    pub const CANT_INVITE_SELF: &str = "cant_invite_self";
    /// No user has the requested email address.
    pub const USERS_NOT_FOUND: &str = "users_not_found";
}

/// A channel as observed remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Opaque channel ID.
    pub id: String,
    /// Channel name.
    pub name: String,
    /// Current topic.
    pub topic: String,
    /// Current purpose.
    pub purpose: String,
    /// User ID of the creator.
    pub creator: String,
    /// Creation time (Unix seconds).
    pub created: i64,
    /// Whether the channel is private.
    pub is_private: bool,
    /// Whether the channel is archived.
    pub is_archived: bool,
    /// Whether the channel is shared.
    pub is_shared: bool,
    /// Whether the channel is shared with another organisation.
    pub is_ext_shared: bool,
    /// Whether the channel is shared across an enterprise org.
    pub is_org_shared: bool,
    /// Whether this is the workspace's general channel.
    pub is_general: bool,
}

/// A usergroup as observed remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usergroup {
    /// Opaque usergroup ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Mention handle.
    pub handle: String,
    /// Description.
    pub description: String,
    /// Default channel IDs.
    pub channels: BTreeSet<String>,
    /// Member user IDs (only populated when listed with members).
    pub users: BTreeSet<String>,
}

/// A user identity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Opaque user ID.
    pub id: String,
    /// Username.
    pub name: String,
    /// Email address, when visible to the token.
    pub email: Option<String>,
}

/// Parameters for creating a usergroup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewUsergroup {
    /// Display name.
    pub name: String,
    /// Mention handle; Slack generates one when unset.
    pub handle: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Default channel IDs.
    pub channels: BTreeSet<String>,
}

/// Fields to change on a usergroup. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsergroupUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New mention handle.
    pub handle: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New default channel IDs.
    pub channels: Option<BTreeSet<String>>,
}

/// Operations the reconcilers and lookups issue against Slack.
///
/// Every call is a single remote request (or a paginated series); none
/// retries.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// User ID the token acts as.
    async fn current_user(&self) -> ClientResult<String>;

    /// Create a channel.
    async fn create_channel(&self, name: &str, is_private: bool) -> ClientResult<Channel>;

    /// Fetch a channel by ID. Fails with `channel_not_found` when absent.
    async fn channel_info(&self, id: &str) -> ClientResult<Channel>;

    /// Find a public or private channel by exact name, archived ones included.
    async fn find_channel_by_name(&self, name: &str) -> ClientResult<Option<Channel>>;

    /// Set a channel's topic.
    async fn set_channel_topic(&self, id: &str, topic: &str) -> ClientResult<()>;

    /// Set a channel's purpose.
    async fn set_channel_purpose(&self, id: &str, purpose: &str) -> ClientResult<()>;

    /// Rename a channel.
    async fn rename_channel(&self, id: &str, name: &str) -> ClientResult<()>;

    /// Archive a channel.
    async fn archive_channel(&self, id: &str) -> ClientResult<()>;

    /// Unarchive a channel.
    async fn unarchive_channel(&self, id: &str) -> ClientResult<()>;

    /// Invite a user to a channel.
    async fn invite_member(&self, channel_id: &str, user_id: &str) -> ClientResult<()>;

    /// Remove a user from a channel.
    async fn kick_member(&self, channel_id: &str, user_id: &str) -> ClientResult<()>;

    /// All member user IDs of a channel.
    async fn channel_members(&self, channel_id: &str) -> ClientResult<BTreeSet<String>>;

    /// Create a usergroup.
    async fn create_usergroup(&self, group: &NewUsergroup) -> ClientResult<Usergroup>;

    /// Enumerate enabled usergroups. Slack offers no fetch-by-ID.
    async fn list_usergroups(&self, include_users: bool) -> ClientResult<Vec<Usergroup>>;

    /// Update a usergroup's attributes.
    async fn update_usergroup(&self, id: &str, update: &UsergroupUpdate) -> ClientResult<()>;

    /// Replace a usergroup's entire membership.
    async fn replace_usergroup_members(
        &self,
        id: &str,
        users: &BTreeSet<String>,
    ) -> ClientResult<()>;

    /// Disable a usergroup.
    async fn disable_usergroup(&self, id: &str) -> ClientResult<()>;

    /// Enumerate all workspace users.
    async fn list_users(&self) -> ClientResult<Vec<User>>;

    /// Look a user up by email address.
    async fn user_by_email(&self, email: &str) -> ClientResult<User>;
}
