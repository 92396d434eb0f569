//! An in-memory Slack workspace implementing [`DirectoryClient`].
//!
//! [`FakeDirectory`] records every call it receives and answers with the
//! same error codes Slack uses, so reconcilers can be tested for both the
//! resulting state and the exact remote calls they issued.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::client::{
    codes, Channel, DirectoryClient, NewUsergroup, User, Usergroup, UsergroupUpdate,
};
use crate::error::{ClientError, ClientResult};

/// Creation timestamp of the first fake channel.
const EPOCH: i64 = 1_700_000_000;

/// A call received by a [`FakeDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `auth.test`
    AuthTest,
    /// `conversations.create`
    CreateChannel {
        /// Requested name.
        name: String,
        /// Requested visibility.
        is_private: bool,
    },
    /// `conversations.info`
    ChannelInfo {
        /// Channel ID.
        channel: String,
    },
    /// `conversations.list`, searching by name.
    FindChannelByName {
        /// Searched name.
        name: String,
    },
    /// `conversations.setTopic`
    SetTopic {
        /// Channel ID.
        channel: String,
        /// New topic.
        topic: String,
    },
    /// `conversations.setPurpose`
    SetPurpose {
        /// Channel ID.
        channel: String,
        /// New purpose.
        purpose: String,
    },
    /// `conversations.rename`
    Rename {
        /// Channel ID.
        channel: String,
        /// New name.
        name: String,
    },
    /// `conversations.archive`
    Archive {
        /// Channel ID.
        channel: String,
    },
    /// `conversations.unarchive`
    Unarchive {
        /// Channel ID.
        channel: String,
    },
    /// `conversations.invite`
    Invite {
        /// Channel ID.
        channel: String,
        /// Invited user.
        user: String,
    },
    /// `conversations.kick`
    Kick {
        /// Channel ID.
        channel: String,
        /// Kicked user.
        user: String,
    },
    /// `conversations.members`
    ChannelMembers {
        /// Channel ID.
        channel: String,
    },
    /// `usergroups.create`
    CreateUsergroup {
        /// Requested name.
        name: String,
    },
    /// `usergroups.list`
    ListUsergroups {
        /// Whether members were requested.
        include_users: bool,
    },
    /// `usergroups.update`
    UpdateUsergroup {
        /// Usergroup ID.
        id: String,
        /// Requested changes.
        update: UsergroupUpdate,
    },
    /// `usergroups.users.update`
    ReplaceUsergroupMembers {
        /// Usergroup ID.
        id: String,
        /// The new membership.
        users: BTreeSet<String>,
    },
    /// `usergroups.disable`
    DisableUsergroup {
        /// Usergroup ID.
        id: String,
    },
    /// `users.list`
    ListUsers,
    /// `users.lookupByEmail`
    UserByEmail {
        /// Searched address.
        email: String,
    },
}

impl Call {
    /// The Slack Web API method this call corresponds to.
    pub fn method(&self) -> &'static str {
        match self {
            Call::AuthTest => "auth.test",
            Call::CreateChannel { .. } => "conversations.create",
            Call::ChannelInfo { .. } => "conversations.info",
            Call::FindChannelByName { .. } => "conversations.list",
            Call::SetTopic { .. } => "conversations.setTopic",
            Call::SetPurpose { .. } => "conversations.setPurpose",
            Call::Rename { .. } => "conversations.rename",
            Call::Archive { .. } => "conversations.archive",
            Call::Unarchive { .. } => "conversations.unarchive",
            Call::Invite { .. } => "conversations.invite",
            Call::Kick { .. } => "conversations.kick",
            Call::ChannelMembers { .. } => "conversations.members",
            Call::CreateUsergroup { .. } => "usergroups.create",
            Call::ListUsergroups { .. } => "usergroups.list",
            Call::UpdateUsergroup { .. } => "usergroups.update",
            Call::ReplaceUsergroupMembers { .. } => "usergroups.users.update",
            Call::DisableUsergroup { .. } => "usergroups.disable",
            Call::ListUsers => "users.list",
            Call::UserByEmail { .. } => "users.lookupByEmail",
        }
    }

    /// Whether the call changes remote state.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Call::AuthTest
                | Call::ChannelInfo { .. }
                | Call::FindChannelByName { .. }
                | Call::ChannelMembers { .. }
                | Call::ListUsergroups { .. }
                | Call::ListUsers
                | Call::UserByEmail { .. }
        )
    }
}

type CallMatcher = Box<dyn Fn(&Call) -> bool + Send + Sync>;

/// A one-shot injected failure.
struct Failure {
    matches: CallMatcher,
    code: String,
}

struct FakeChannel {
    channel: Channel,
    members: BTreeSet<String>,
}

struct FakeUsergroup {
    group: Usergroup,
    disabled: bool,
}

struct Workspace {
    actor: String,
    next_id: u32,
    channels: BTreeMap<String, FakeChannel>,
    usergroups: BTreeMap<String, FakeUsergroup>,
    users: Vec<User>,
    calls: Vec<Call>,
    failures: Vec<Failure>,
}

impl Workspace {
    /// Record `call`, then fail if an injected failure matches it.
    fn record(&mut self, call: Call) -> ClientResult<()> {
        let failure = self
            .failures
            .iter()
            .position(|failure| (failure.matches)(&call));
        self.calls.push(call);
        match failure {
            Some(index) => Err(ClientError::api(self.failures.remove(index).code)),
            None => Ok(()),
        }
    }

    fn next_id(&mut self, prefix: char) -> String {
        self.next_id += 1;
        format!("{}{:04}", prefix, self.next_id)
    }

    fn insert_channel(&mut self, name: &str, is_private: bool, creator: &str) -> Channel {
        let id = self.next_id('C');
        let channel = Channel {
            id: id.clone(),
            name: name.to_string(),
            topic: String::new(),
            purpose: String::new(),
            creator: creator.to_string(),
            created: EPOCH + i64::from(self.next_id),
            is_private,
            is_archived: false,
            is_shared: false,
            is_ext_shared: false,
            is_org_shared: false,
            is_general: false,
        };
        self.channels.insert(
            id,
            FakeChannel {
                channel: channel.clone(),
                members: BTreeSet::from([creator.to_string()]),
            },
        );
        channel
    }

    fn channel(&mut self, id: &str) -> ClientResult<&mut FakeChannel> {
        self.channels
            .get_mut(id)
            .ok_or_else(|| ClientError::api(codes::CHANNEL_NOT_FOUND))
    }

    /// A channel that accepts edits.
    fn open_channel(&mut self, id: &str) -> ClientResult<&mut FakeChannel> {
        let entry = self.channel(id)?;
        if entry.channel.is_archived {
            return Err(ClientError::api("is_archived"));
        }
        Ok(entry)
    }

    fn usergroup(&mut self, id: &str) -> ClientResult<&mut FakeUsergroup> {
        self.usergroups
            .get_mut(id)
            .ok_or_else(|| ClientError::api("no_such_subteam"))
    }

    fn name_taken(&self, name: &str, except: Option<&str>) -> bool {
        self.channels
            .values()
            .any(|entry| entry.channel.name == name && Some(entry.channel.id.as_str()) != except)
    }
}

/// In-memory Slack workspace for tests.
pub struct FakeDirectory {
    workspace: Mutex<Workspace>,
}

impl FakeDirectory {
    /// An empty workspace whose token belongs to `actor`.
    ///
    /// Channels created through the client list `actor` as creator and
    /// first member.
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            workspace: Mutex::new(Workspace {
                actor: actor.into(),
                next_id: 0,
                channels: BTreeMap::new(),
                usergroups: BTreeMap::new(),
                users: Vec::new(),
                calls: Vec::new(),
                failures: Vec::new(),
            }),
        }
    }

    /// Add a user to the workspace directory.
    pub fn with_user(self, id: &str, name: &str, email: Option<&str>) -> Self {
        self.lock().users.push(User {
            id: id.to_string(),
            name: name.to_string(),
            email: email.map(str::to_string),
        });
        self
    }

    fn lock(&self) -> MutexGuard<'_, Workspace> {
        self.workspace.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Seeding and out-of-band changes
    // =========================================================================

    /// Create a channel without recording a call. Returns its ID.
    pub fn seed_channel(&self, name: &str, is_private: bool, creator: &str) -> String {
        self.lock().insert_channel(name, is_private, creator).id
    }

    /// Create an enabled usergroup without recording a call. Returns its ID.
    pub fn seed_usergroup(&self, name: &str, handle: &str, users: &[&str]) -> String {
        let mut workspace = self.lock();
        let id = workspace.next_id('S');
        workspace.usergroups.insert(
            id.clone(),
            FakeUsergroup {
                group: Usergroup {
                    id: id.clone(),
                    name: name.to_string(),
                    handle: handle.to_string(),
                    description: String::new(),
                    channels: BTreeSet::new(),
                    users: users.iter().map(|u| u.to_string()).collect(),
                },
                disabled: false,
            },
        );
        id
    }

    /// Add a member to a channel, as if they joined on their own.
    pub fn add_member(&self, channel_id: &str, user_id: &str) {
        if let Some(entry) = self.lock().channels.get_mut(channel_id) {
            entry.members.insert(user_id.to_string());
        }
    }

    /// Edit a channel out of band.
    pub fn modify_channel(&self, id: &str, change: impl FnOnce(&mut Channel)) {
        if let Some(entry) = self.lock().channels.get_mut(id) {
            change(&mut entry.channel);
        }
    }

    /// Edit a usergroup out of band.
    pub fn modify_usergroup(&self, id: &str, change: impl FnOnce(&mut Usergroup)) {
        if let Some(entry) = self.lock().usergroups.get_mut(id) {
            change(&mut entry.group);
        }
    }

    /// Delete a channel out of band.
    pub fn remove_channel(&self, id: &str) {
        self.lock().channels.remove(id);
    }

    /// Disable a usergroup out of band.
    pub fn disable(&self, id: &str) {
        if let Some(entry) = self.lock().usergroups.get_mut(id) {
            entry.disabled = true;
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// A channel as currently stored.
    pub fn channel(&self, id: &str) -> Option<Channel> {
        self.lock()
            .channels
            .get(id)
            .map(|entry| entry.channel.clone())
    }

    /// Current members of a channel, creator included.
    pub fn members(&self, channel_id: &str) -> BTreeSet<String> {
        self.lock()
            .channels
            .get(channel_id)
            .map(|entry| entry.members.clone())
            .unwrap_or_default()
    }

    /// A usergroup as currently stored, enabled or not.
    pub fn usergroup(&self, id: &str) -> Option<Usergroup> {
        self.lock()
            .usergroups
            .get(id)
            .map(|entry| entry.group.clone())
    }

    /// Whether a usergroup is disabled.
    pub fn is_disabled(&self, id: &str) -> bool {
        self.lock()
            .usergroups
            .get(id)
            .is_some_and(|entry| entry.disabled)
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// The calls that changed remote state, in order.
    pub fn mutations(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    // =========================================================================
    // Failure injection
    // =========================================================================

    /// Fail the next call to `method` with the Slack error `code`.
    pub fn fail_next(&self, method: &'static str, code: &str) {
        self.fail_when(code, move |call| call.method() == method);
    }

    /// Fail the next call accepted by `matches` with the Slack error `code`.
    pub fn fail_when(&self, code: &str, matches: impl Fn(&Call) -> bool + Send + Sync + 'static) {
        self.lock().failures.push(Failure {
            matches: Box::new(matches),
            code: code.to_string(),
        });
    }
}

#[async_trait]
impl DirectoryClient for FakeDirectory {
    async fn current_user(&self) -> ClientResult<String> {
        let mut ws = self.lock();
        ws.record(Call::AuthTest)?;
        Ok(ws.actor.clone())
    }

    async fn create_channel(&self, name: &str, is_private: bool) -> ClientResult<Channel> {
        let mut ws = self.lock();
        ws.record(Call::CreateChannel {
            name: name.to_string(),
            is_private,
        })?;
        if ws.name_taken(name, None) {
            return Err(ClientError::api(codes::NAME_TAKEN));
        }
        let actor = ws.actor.clone();
        Ok(ws.insert_channel(name, is_private, &actor))
    }

    async fn channel_info(&self, id: &str) -> ClientResult<Channel> {
        let mut ws = self.lock();
        ws.record(Call::ChannelInfo {
            channel: id.to_string(),
        })?;
        Ok(ws.channel(id)?.channel.clone())
    }

    async fn find_channel_by_name(&self, name: &str) -> ClientResult<Option<Channel>> {
        let mut ws = self.lock();
        ws.record(Call::FindChannelByName {
            name: name.to_string(),
        })?;
        Ok(ws
            .channels
            .values()
            .find(|entry| entry.channel.name == name)
            .map(|entry| entry.channel.clone()))
    }

    async fn set_channel_topic(&self, id: &str, topic: &str) -> ClientResult<()> {
        let mut ws = self.lock();
        ws.record(Call::SetTopic {
            channel: id.to_string(),
            topic: topic.to_string(),
        })?;
        ws.open_channel(id)?.channel.topic = topic.to_string();
        Ok(())
    }

    async fn set_channel_purpose(&self, id: &str, purpose: &str) -> ClientResult<()> {
        let mut ws = self.lock();
        ws.record(Call::SetPurpose {
            channel: id.to_string(),
            purpose: purpose.to_string(),
        })?;
        ws.open_channel(id)?.channel.purpose = purpose.to_string();
        Ok(())
    }

    async fn rename_channel(&self, id: &str, name: &str) -> ClientResult<()> {
        let mut ws = self.lock();
        ws.record(Call::Rename {
            channel: id.to_string(),
            name: name.to_string(),
        })?;
        if ws.name_taken(name, Some(id)) {
            return Err(ClientError::api(codes::NAME_TAKEN));
        }
        ws.open_channel(id)?.channel.name = name.to_string();
        Ok(())
    }

    async fn archive_channel(&self, id: &str) -> ClientResult<()> {
        let mut ws = self.lock();
        ws.record(Call::Archive {
            channel: id.to_string(),
        })?;
        let entry = ws.channel(id)?;
        if entry.channel.is_archived {
            return Err(ClientError::api(codes::ALREADY_ARCHIVED));
        }
        entry.channel.is_archived = true;
        Ok(())
    }

    async fn unarchive_channel(&self, id: &str) -> ClientResult<()> {
        let mut ws = self.lock();
        ws.record(Call::Unarchive {
            channel: id.to_string(),
        })?;
        let entry = ws.channel(id)?;
        if !entry.channel.is_archived {
            return Err(ClientError::api(codes::NOT_ARCHIVED));
        }
        entry.channel.is_archived = false;
        Ok(())
    }

    async fn invite_member(&self, channel_id: &str, user_id: &str) -> ClientResult<()> {
        let mut ws = self.lock();
        ws.record(Call::Invite {
            channel: channel_id.to_string(),
            user: user_id.to_string(),
        })?;
        if ws.actor == user_id {
            return Err(ClientError::api(codes::CANT_INVITE_SELF));
        }
        let entry = ws.open_channel(channel_id)?;
        if !entry.members.insert(user_id.to_string()) {
            return Err(ClientError::api(codes::ALREADY_IN_CHANNEL));
        }
        Ok(())
    }

    async fn kick_member(&self, channel_id: &str, user_id: &str) -> ClientResult<()> {
        let mut ws = self.lock();
        ws.record(Call::Kick {
            channel: channel_id.to_string(),
            user: user_id.to_string(),
        })?;
        if ws.actor == user_id {
            return Err(ClientError::api("cant_kick_self"));
        }
        let entry = ws.open_channel(channel_id)?;
        if !entry.members.remove(user_id) {
            return Err(ClientError::api("not_in_channel"));
        }
        Ok(())
    }

    async fn channel_members(&self, channel_id: &str) -> ClientResult<BTreeSet<String>> {
        let mut ws = self.lock();
        ws.record(Call::ChannelMembers {
            channel: channel_id.to_string(),
        })?;
        Ok(ws.channel(channel_id)?.members.clone())
    }

    async fn create_usergroup(&self, group: &NewUsergroup) -> ClientResult<Usergroup> {
        let mut ws = self.lock();
        ws.record(Call::CreateUsergroup {
            name: group.name.clone(),
        })?;
        if ws
            .usergroups
            .values()
            .any(|entry| !entry.disabled && entry.group.name == group.name)
        {
            return Err(ClientError::api("name_already_exists"));
        }

        let id = ws.next_id('S');
        let created = Usergroup {
            id: id.clone(),
            name: group.name.clone(),
            handle: group
                .handle
                .clone()
                .unwrap_or_else(|| group.name.to_lowercase().replace(' ', "-")),
            description: group.description.clone().unwrap_or_default(),
            channels: group.channels.clone(),
            users: BTreeSet::new(),
        };
        ws.usergroups.insert(
            id,
            FakeUsergroup {
                group: created.clone(),
                disabled: false,
            },
        );
        Ok(created)
    }

    async fn list_usergroups(&self, include_users: bool) -> ClientResult<Vec<Usergroup>> {
        let mut ws = self.lock();
        ws.record(Call::ListUsergroups { include_users })?;
        Ok(ws
            .usergroups
            .values()
            .filter(|entry| !entry.disabled)
            .map(|entry| {
                let mut group = entry.group.clone();
                if !include_users {
                    group.users.clear();
                }
                group
            })
            .collect())
    }

    async fn update_usergroup(&self, id: &str, update: &UsergroupUpdate) -> ClientResult<()> {
        let mut ws = self.lock();
        ws.record(Call::UpdateUsergroup {
            id: id.to_string(),
            update: update.clone(),
        })?;
        let group = &mut ws.usergroup(id)?.group;
        if let Some(name) = &update.name {
            group.name = name.clone();
        }
        if let Some(handle) = &update.handle {
            group.handle = handle.clone();
        }
        if let Some(description) = &update.description {
            group.description = description.clone();
        }
        if let Some(channels) = &update.channels {
            group.channels = channels.clone();
        }
        Ok(())
    }

    async fn replace_usergroup_members(
        &self,
        id: &str,
        users: &BTreeSet<String>,
    ) -> ClientResult<()> {
        let mut ws = self.lock();
        ws.record(Call::ReplaceUsergroupMembers {
            id: id.to_string(),
            users: users.clone(),
        })?;
        ws.usergroup(id)?.group.users = users.clone();
        Ok(())
    }

    async fn disable_usergroup(&self, id: &str) -> ClientResult<()> {
        let mut ws = self.lock();
        ws.record(Call::DisableUsergroup { id: id.to_string() })?;
        let entry = ws.usergroup(id)?;
        if entry.disabled {
            return Err(ClientError::api(codes::ALREADY_DISABLED));
        }
        entry.disabled = true;
        Ok(())
    }

    async fn list_users(&self) -> ClientResult<Vec<User>> {
        let mut ws = self.lock();
        ws.record(Call::ListUsers)?;
        Ok(ws.users.clone())
    }

    async fn user_by_email(&self, email: &str) -> ClientResult<User> {
        let mut ws = self.lock();
        ws.record(Call::UserByEmail {
            email: email.to_string(),
        })?;
        ws.users
            .iter()
            .find(|user| user.email.as_deref() == Some(email))
            .cloned()
            .ok_or_else(|| ClientError::api(codes::USERS_NOT_FOUND))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_created_channel_has_actor_as_creator_and_member() {
        let fake = FakeDirectory::new("U1");
        let channel = fake.create_channel("eng", true).await.unwrap();

        assert_eq!(channel.creator, "U1");
        assert!(channel.is_private);
        assert_eq!(fake.members(&channel.id), BTreeSet::from(["U1".to_string()]));

        let err = fake.create_channel("eng", false).await.unwrap_err();
        assert!(err.is(codes::NAME_TAKEN));
    }

    #[tokio::test]
    async fn test_mimics_slack_idempotency_errors() {
        let fake = FakeDirectory::new("U1");
        let channel = fake.create_channel("eng", false).await.unwrap();

        assert!(fake
            .unarchive_channel(&channel.id)
            .await
            .unwrap_err()
            .is(codes::NOT_ARCHIVED));
        fake.archive_channel(&channel.id).await.unwrap();
        assert!(fake
            .archive_channel(&channel.id)
            .await
            .unwrap_err()
            .is(codes::ALREADY_ARCHIVED));
        assert!(fake
            .channel_info("C9999")
            .await
            .unwrap_err()
            .is(codes::CHANNEL_NOT_FOUND));

        let group = fake
            .create_usergroup(&NewUsergroup {
                name: "Ops".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        fake.disable_usergroup(&group.id).await.unwrap();
        assert!(fake
            .disable_usergroup(&group.id)
            .await
            .unwrap_err()
            .is(codes::ALREADY_DISABLED));
    }

    #[tokio::test]
    async fn test_invite_errors() {
        let fake = FakeDirectory::new("U1");
        let channel = fake.create_channel("eng", false).await.unwrap();

        assert!(fake
            .invite_member(&channel.id, "U1")
            .await
            .unwrap_err()
            .is(codes::CANT_INVITE_SELF));
        fake.invite_member(&channel.id, "U2").await.unwrap();
        assert!(fake
            .invite_member(&channel.id, "U2")
            .await
            .unwrap_err()
            .is(codes::ALREADY_IN_CHANNEL));
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let fake = FakeDirectory::new("U1");
        fake.fail_next("conversations.create", "restricted_action");

        let err = fake.create_channel("eng", false).await.unwrap_err();
        assert!(err.is("restricted_action"));
        assert!(fake.channel("C0001").is_none());

        fake.create_channel("eng", false).await.unwrap();
        assert_eq!(fake.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_calls_are_recorded_in_order() {
        let fake = FakeDirectory::new("U1");
        let channel = fake.create_channel("eng", false).await.unwrap();
        fake.channel_info(&channel.id).await.unwrap();
        fake.set_channel_topic(&channel.id, "hi").await.unwrap();

        let methods: Vec<_> = fake.calls().iter().map(Call::method).collect();
        assert_eq!(
            methods,
            vec!["conversations.create", "conversations.info", "conversations.setTopic"]
        );
        assert_eq!(fake.mutations().len(), 2);

        fake.clear_calls();
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_usergroups_are_not_listed() {
        let fake = FakeDirectory::new("U1");
        let id = fake.seed_usergroup("Ops", "ops", &["U2"]);

        let listed = fake.list_usergroups(false).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].users.is_empty());

        fake.disable(&id);
        assert!(fake.list_usergroups(true).await.unwrap().is_empty());
        assert!(fake.usergroup(&id).is_some());
    }

    #[tokio::test]
    async fn test_user_lookup() {
        let fake = FakeDirectory::new("U1").with_user("U2", "alice", Some("alice@example.com"));

        assert_eq!(fake.user_by_email("alice@example.com").await.unwrap().id, "U2");
        assert!(fake
            .user_by_email("bob@example.com")
            .await
            .unwrap_err()
            .is(codes::USERS_NOT_FOUND));
        assert_eq!(fake.list_users().await.unwrap().len(), 1);
    }
}
