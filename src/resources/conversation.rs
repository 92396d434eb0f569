//! The `slack_conversation` resource: a public or private channel.
//!
//! Membership is managed as a subset. Only the members listed in
//! `permanent_members` are invited or kicked; the channel creator is never
//! part of the managed set.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::{changed_text, require_id, Resource};
use crate::client::{codes, Channel, DirectoryClient};
use crate::error::ProviderError;
use crate::membership::{self, MembershipDiff};
use crate::schema::{Attribute, Schema};
use crate::types::null_as_default;

/// Type name of the conversation resource.
pub const TYPE_NAME: &str = "slack_conversation";

/// Maximum length Slack accepts for a topic or purpose.
pub const MAX_TEXT_LENGTH: usize = 250;

/// What happens to the channel when the resource is destroyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestroyAction {
    /// Leave the channel as it is.
    None,
    /// Archive the channel.
    #[default]
    Archive,
}

/// What happens to members dropped from `permanent_members` on update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRemovalAction {
    /// Stop tracking them but leave them in the channel.
    None,
    /// Kick them from the channel.
    #[default]
    Kick,
}

/// State of a `slack_conversation`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Channel ID, assigned by Slack.
    #[serde(default)]
    pub id: Option<String>,
    /// Channel name.
    pub name: String,
    /// Channel topic.
    #[serde(default)]
    pub topic: Option<String>,
    /// Channel purpose.
    #[serde(default)]
    pub purpose: Option<String>,
    /// Managed members. `None` leaves membership unmanaged.
    #[serde(default)]
    pub permanent_members: Option<BTreeSet<String>>,
    /// Creation time (Unix seconds).
    #[serde(default)]
    pub created: Option<i64>,
    /// User ID of the creator.
    #[serde(default)]
    pub creator: Option<String>,
    /// Whether the channel is private. Changing it replaces the channel.
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_private: bool,
    /// Whether the channel is archived.
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_archived: bool,
    /// Whether the channel is shared.
    #[serde(default)]
    pub is_shared: Option<bool>,
    /// Whether the channel is shared with another organisation.
    #[serde(default)]
    pub is_ext_shared: Option<bool>,
    /// Whether the channel is shared across an enterprise org.
    #[serde(default)]
    pub is_org_shared: Option<bool>,
    /// Whether this is the workspace's general channel.
    #[serde(default)]
    pub is_general: Option<bool>,
    /// Destroy policy.
    #[serde(default, deserialize_with = "null_as_default")]
    pub action_on_destroy: DestroyAction,
    /// Policy for members dropped from `permanent_members`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub action_on_update_permanent_members: MemberRemovalAction,
    /// Take over a same-named channel instead of failing with `name_taken`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub adopt_existing_channel: bool,
}

impl ConversationState {
    /// Desired state for a new channel.
    pub fn new(name: impl Into<String>, is_private: bool) -> Self {
        Self {
            name: name.into(),
            is_private,
            ..Default::default()
        }
    }

    /// Set the topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the purpose.
    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    /// Manage the given members.
    pub fn with_permanent_members<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permanent_members = Some(members.into_iter().map(Into::into).collect());
        self
    }

    /// Set the destroy policy.
    pub fn with_destroy_action(mut self, action: DestroyAction) -> Self {
        self.action_on_destroy = action;
        self
    }

    /// Set the member removal policy.
    pub fn with_member_removal(mut self, action: MemberRemovalAction) -> Self {
        self.action_on_update_permanent_members = action;
        self
    }

    /// Adopt a same-named channel on create.
    pub fn adopting_existing(mut self) -> Self {
        self.adopt_existing_channel = true;
        self
    }

    /// Project a remote channel onto state, keeping local-only settings.
    fn observed(channel: Channel, members: Option<BTreeSet<String>>, settings: &Self) -> Self {
        let permanent_members = members.map(|mut members| {
            members.remove(&channel.creator);
            members
        });

        Self {
            id: Some(channel.id),
            name: channel.name,
            topic: Some(channel.topic),
            purpose: Some(channel.purpose),
            permanent_members,
            created: Some(channel.created),
            creator: Some(channel.creator),
            is_private: channel.is_private,
            is_archived: channel.is_archived,
            is_shared: Some(channel.is_shared),
            is_ext_shared: Some(channel.is_ext_shared),
            is_org_shared: Some(channel.is_org_shared),
            is_general: Some(channel.is_general),
            action_on_destroy: settings.action_on_destroy,
            action_on_update_permanent_members: settings.action_on_update_permanent_members,
            adopt_existing_channel: settings.adopt_existing_channel,
        }
    }
}

/// Reconciler for `slack_conversation`.
pub struct ConversationResource {
    client: Arc<dyn DirectoryClient>,
}

impl ConversationResource {
    /// Create a reconciler over the given client.
    pub fn new(client: Arc<dyn DirectoryClient>) -> Self {
        Self { client }
    }

    /// Fetch the channel, plus its members when they are managed.
    ///
    /// `Ok(None)` when Slack reports `channel_not_found`.
    async fn observe(
        &self,
        id: &str,
        track_members: bool,
        settings: &ConversationState,
    ) -> Result<Option<ConversationState>, ProviderError> {
        let channel = match self.client.channel_info(id).await {
            Ok(channel) => channel,
            Err(err) if err.is(codes::CHANNEL_NOT_FOUND) => return Ok(None),
            Err(err) => {
                return Err(ProviderError::client(
                    format!("read conversation {}", id),
                    err,
                ))
            },
        };

        let members = if track_members {
            let mut members = self.members(id).await?;
            self.retain_self(&mut members, &channel, settings).await?;
            Some(members)
        } else {
            None
        };

        Ok(Some(ConversationState::observed(channel, members, settings)))
    }

    /// Terminal read after a mutation. The channel must still exist.
    async fn observe_after(
        &self,
        id: &str,
        settings: &ConversationState,
        operation: &str,
    ) -> Result<ConversationState, ProviderError> {
        self.observe(id, settings.permanent_members.is_some(), settings)
            .await?
            .ok_or_else(|| {
                ProviderError::NotFound(format!("conversation {} not found after {}", id, operation))
            })
    }

    async fn members(&self, id: &str) -> Result<BTreeSet<String>, ProviderError> {
        self.client
            .channel_members(id)
            .await
            .map_err(|err| ProviderError::client(format!("get users in conversation {}", id), err))
    }

    async fn current_user(&self) -> Result<String, ProviderError> {
        self.client
            .current_user()
            .await
            .map_err(|err| ProviderError::client("identify the token's user", err))
    }

    /// Slack refuses to invite or kick the token's own user.
    async fn excluding_self(&self, diff: MembershipDiff) -> Result<MembershipDiff, ProviderError> {
        if diff.is_empty() {
            return Ok(diff);
        }
        let actor = self.current_user().await?;
        Ok(diff.excluding(&actor))
    }

    /// Keep the token's user tracked when it is desired but not a member.
    ///
    /// It can never be invited, so dropping it would plan the same invite on
    /// every apply.
    async fn retain_self(
        &self,
        members: &mut BTreeSet<String>,
        channel: &Channel,
        settings: &ConversationState,
    ) -> Result<(), ProviderError> {
        let Some(desired) = &settings.permanent_members else {
            return Ok(());
        };
        let absent: BTreeSet<&str> = desired
            .iter()
            .map(String::as_str)
            .filter(|user| *user != channel.creator && !members.contains(*user))
            .collect();
        if absent.is_empty() {
            return Ok(());
        }
        let actor = self.current_user().await?;
        if absent.contains(actor.as_str()) {
            members.insert(actor);
        }
        Ok(())
    }

    async fn create_or_adopt(
        &self,
        planned: &ConversationState,
    ) -> Result<(Channel, bool), ProviderError> {
        match self.client.create_channel(&planned.name, planned.is_private).await {
            Ok(channel) => {
                debug!(id = %channel.id, "Created channel");
                Ok((channel, false))
            },
            Err(err) if err.is(codes::NAME_TAKEN) && planned.adopt_existing_channel => {
                let channel = self
                    .client
                    .find_channel_by_name(&planned.name)
                    .await
                    .map_err(|err| {
                        ProviderError::client(
                            format!("find existing conversation {}", planned.name),
                            err,
                        )
                    })?
                    .ok_or_else(|| {
                        ProviderError::NotFound(format!(
                            "conversation {} is reported as taken but could not be found",
                            planned.name
                        ))
                    })?;
                info!(id = %channel.id, "Adopting existing conversation");
                Ok((channel, true))
            },
            Err(err) => Err(ProviderError::client(
                format!("create conversation {}", planned.name),
                err,
            )),
        }
    }

    /// Bring a freshly created or adopted channel to the planned state.
    async fn configure(
        &self,
        channel: &Channel,
        adopted: bool,
        planned: &ConversationState,
    ) -> Result<(), ProviderError> {
        let id = channel.id.as_str();

        if channel.is_archived && !planned.is_archived {
            self.set_archived(id, false).await?;
        }
        if adopted && channel.is_private != planned.is_private {
            warn!(
                id,
                is_private = channel.is_private,
                "Adopted conversation differs in visibility; the next plan will replace it"
            );
        }

        if let Some(topic) = changed_text(&planned.topic, &Some(channel.topic.clone())) {
            self.set_topic(id, topic).await?;
        }
        if let Some(purpose) = changed_text(&planned.purpose, &Some(channel.purpose.clone())) {
            self.set_purpose(id, purpose).await?;
        }

        if let Some(desired) = &planned.permanent_members {
            let present = if adopted {
                self.members(id).await?
            } else {
                BTreeSet::new()
            };
            let diff = MembershipDiff::between(desired, &present).excluding(&channel.creator);
            let diff = self.excluding_self(diff).await?;
            self.invite(id, &diff.to_add).await?;
        }

        if planned.is_archived && !channel.is_archived {
            self.set_archived(id, true).await?;
        }
        Ok(())
    }

    async fn set_topic(&self, id: &str, topic: &str) -> Result<(), ProviderError> {
        self.client
            .set_channel_topic(id, topic)
            .await
            .map_err(|err| ProviderError::client(format!("set topic of conversation {}", id), err))?;
        debug!(id, "Set topic");
        Ok(())
    }

    async fn set_purpose(&self, id: &str, purpose: &str) -> Result<(), ProviderError> {
        self.client
            .set_channel_purpose(id, purpose)
            .await
            .map_err(|err| {
                ProviderError::client(format!("set purpose of conversation {}", id), err)
            })?;
        debug!(id, "Set purpose");
        Ok(())
    }

    async fn invite(&self, id: &str, users: &BTreeSet<String>) -> Result<(), ProviderError> {
        for user in users {
            match self.client.invite_member(id, user).await {
                Ok(()) => debug!(id, user = %user, "Invited member"),
                Err(err) if err.is(codes::ALREADY_IN_CHANNEL) || err.is(codes::CANT_INVITE_SELF) => {
                    warn!(id, user = %user, code = %err, "Skipping invite");
                },
                Err(err) => {
                    return Err(ProviderError::client(
                        format!("invite user {} to conversation {}", user, id),
                        err,
                    ))
                },
            }
        }
        Ok(())
    }

    async fn kick(&self, id: &str, users: &BTreeSet<String>) -> Result<(), ProviderError> {
        for user in users {
            self.client.kick_member(id, user).await.map_err(|err| {
                ProviderError::client(format!("kick user {} from conversation {}", user, id), err)
            })?;
            debug!(id, user = %user, "Kicked member");
        }
        Ok(())
    }

    /// Archive or unarchive. Already being in the target state is not an error.
    async fn set_archived(&self, id: &str, archived: bool) -> Result<(), ProviderError> {
        let (result, benign, action) = if archived {
            (
                self.client.archive_channel(id).await,
                codes::ALREADY_ARCHIVED,
                "archive",
            )
        } else {
            (
                self.client.unarchive_channel(id).await,
                codes::NOT_ARCHIVED,
                "unarchive",
            )
        };

        match result {
            Ok(()) => {
                debug!(id, archived, "Changed archive state");
                Ok(())
            },
            Err(err) if err.is(benign) => {
                warn!(id, code = %err, "Archive state already as requested");
                Ok(())
            },
            Err(err) => Err(ProviderError::client(
                format!("{} conversation {}", action, id),
                err,
            )),
        }
    }
}

#[async_trait]
impl Resource for ConversationResource {
    type State = ConversationState;

    const TYPE_NAME: &'static str = TYPE_NAME;

    fn schema() -> Schema {
        Schema::v0()
            .with_description("A Slack public or private channel")
            .with_attribute("id", Attribute::computed_string().with_description("Channel ID"))
            .with_attribute(
                "name",
                Attribute::required_string().with_description("Channel name"),
            )
            .with_attribute(
                "topic",
                Attribute::optional_computed_string().with_max_length(MAX_TEXT_LENGTH),
            )
            .with_attribute(
                "purpose",
                Attribute::optional_computed_string().with_max_length(MAX_TEXT_LENGTH),
            )
            .with_attribute(
                "permanent_members",
                Attribute::optional_string_set()
                    .with_description("User IDs that must always be members"),
            )
            .with_attribute("created", Attribute::computed_int64())
            .with_attribute("creator", Attribute::computed_string())
            .with_attribute(
                "is_private",
                Attribute::required_bool()
                    .with_description("Create a private channel")
                    .with_force_new(),
            )
            .with_attribute(
                "is_archived",
                Attribute::optional_computed_bool().with_default(json!(false)),
            )
            .with_attribute("is_shared", Attribute::computed_bool())
            .with_attribute("is_ext_shared", Attribute::computed_bool())
            .with_attribute("is_org_shared", Attribute::computed_bool())
            .with_attribute("is_general", Attribute::computed_bool())
            .with_attribute(
                "action_on_destroy",
                Attribute::optional_computed_string()
                    .with_allowed_values(["none", "archive"])
                    .with_default(json!("archive")),
            )
            .with_attribute(
                "action_on_update_permanent_members",
                Attribute::optional_computed_string()
                    .with_allowed_values(["none", "kick"])
                    .with_default(json!("kick")),
            )
            .with_attribute(
                "adopt_existing_channel",
                Attribute::optional_computed_bool().with_default(json!(false)),
            )
    }

    #[instrument(skip(self, planned), fields(name = %planned.name))]
    async fn create(&self, planned: ConversationState) -> Result<ConversationState, ProviderError> {
        let (channel, adopted) = self.create_or_adopt(&planned).await?;
        let id = channel.id.clone();

        self.configure(&channel, adopted, &planned)
            .await
            .map_err(|err| ProviderError::partially_applied(&id, err))?;

        let state = self
            .observe_after(&id, &planned, "create")
            .await
            .map_err(|err| ProviderError::partially_applied(&id, err))?;
        info!(id = %id, adopted, "Created conversation");
        Ok(state)
    }

    #[instrument(skip(self, current), fields(id = ?current.id))]
    async fn read(
        &self,
        current: ConversationState,
    ) -> Result<Option<ConversationState>, ProviderError> {
        let id = require_id(current.id.as_deref(), TYPE_NAME)?;
        let state = self
            .observe(id, current.permanent_members.is_some(), &current)
            .await?;
        if state.is_none() {
            warn!("Conversation no longer exists, removing from state");
        }
        Ok(state)
    }

    #[instrument(skip(self, prior, planned), fields(id = ?prior.id))]
    async fn update(
        &self,
        prior: ConversationState,
        planned: ConversationState,
    ) -> Result<ConversationState, ProviderError> {
        let id = require_id(prior.id.as_deref().or(planned.id.as_deref()), TYPE_NAME)?;

        // An archived channel rejects edits: unarchive first, archive last.
        if prior.is_archived && !planned.is_archived {
            self.set_archived(id, false).await?;
        }

        if planned.name != prior.name {
            self.client
                .rename_channel(id, &planned.name)
                .await
                .map_err(|err| ProviderError::client(format!("rename conversation {}", id), err))?;
            debug!(id, name = %planned.name, "Renamed conversation");
        }
        if let Some(topic) = changed_text(&planned.topic, &prior.topic) {
            self.set_topic(id, topic).await?;
        }
        if let Some(purpose) = changed_text(&planned.purpose, &prior.purpose) {
            self.set_purpose(id, purpose).await?;
        }

        let mut released = BTreeSet::new();
        if let Some(diff) = membership::reconcile(
            planned.permanent_members.as_ref(),
            prior.permanent_members.as_ref(),
        ) {
            let diff = diff.excluding(prior.creator.as_deref().unwrap_or_default());
            let diff = self.excluding_self(diff).await?;
            self.invite(id, &diff.to_add).await?;
            match planned.action_on_update_permanent_members {
                MemberRemovalAction::Kick => self.kick(id, &diff.to_remove).await?,
                MemberRemovalAction::None => {
                    if !diff.to_remove.is_empty() {
                        warn!(
                            id,
                            count = diff.to_remove.len(),
                            "Members dropped from permanent_members stay in the conversation"
                        );
                    }
                    released = diff.to_remove;
                },
            }
        }

        if !prior.is_archived && planned.is_archived {
            self.set_archived(id, true).await?;
        }

        let mut state = self.observe_after(id, &planned, "update").await?;
        if let Some(members) = state.permanent_members.as_mut() {
            members.retain(|member| !released.contains(member));
        }
        info!("Updated conversation");
        Ok(state)
    }

    #[instrument(skip(self, current), fields(id = ?current.id))]
    async fn delete(&self, current: ConversationState) -> Result<(), ProviderError> {
        let id = require_id(current.id.as_deref(), TYPE_NAME)?;

        match current.action_on_destroy {
            DestroyAction::None => {
                warn!("action_on_destroy is none, leaving conversation in place");
                Ok(())
            },
            DestroyAction::Archive => match self.client.archive_channel(id).await {
                Ok(()) => {
                    info!("Archived conversation");
                    Ok(())
                },
                Err(err) if err.is(codes::ALREADY_ARCHIVED) || err.is(codes::CHANNEL_NOT_FOUND) => {
                    warn!(code = %err, "Conversation already archived or gone");
                    Ok(())
                },
                Err(err) => Err(ProviderError::client(
                    format!("archive conversation {}", id),
                    err,
                )),
            },
        }
    }

    #[instrument(skip(self))]
    async fn import(&self, id: &str) -> Result<Option<ConversationState>, ProviderError> {
        let settings = ConversationState {
            id: Some(id.to_string()),
            ..Default::default()
        };
        self.observe(id, false, &settings).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeDirectory};
    use crate::validation::{is_valid, validate};

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn setup() -> (Arc<FakeDirectory>, ConversationResource) {
        let fake = Arc::new(FakeDirectory::new("U1"));
        let resource = ConversationResource::new(fake.clone());
        (fake, resource)
    }

    fn invites(fake: &FakeDirectory) -> Vec<String> {
        fake.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Invite { user, .. } => Some(user),
                _ => None,
            })
            .collect()
    }

    fn kicks(fake: &FakeDirectory) -> Vec<String> {
        fake.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Kick { user, .. } => Some(user),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_create_never_invites_creator() {
        let (fake, resource) = setup();

        let planned = ConversationState::new("eng", true).with_permanent_members(["U1", "U2"]);
        let state = resource.create(planned).await.unwrap();

        assert_eq!(invites(&fake), vec!["U2"]);
        assert_eq!(state.permanent_members, Some(set(&["U2"])));
        assert_eq!(state.creator.as_deref(), Some("U1"));
        assert_eq!(state.name, "eng");
        assert!(state.is_private);

        let id = state.id.unwrap();
        assert_eq!(fake.members(&id), set(&["U1", "U2"]));
    }

    #[tokio::test]
    async fn test_create_sets_topic_and_purpose() {
        let (fake, resource) = setup();

        let planned = ConversationState::new("general-chat", false)
            .with_topic("Everything")
            .with_purpose("Talk");
        let state = resource.create(planned).await.unwrap();

        assert_eq!(state.topic.as_deref(), Some("Everything"));
        assert_eq!(state.purpose.as_deref(), Some("Talk"));
        assert_eq!(state.permanent_members, None);
        assert!(fake
            .calls()
            .iter()
            .all(|call| !matches!(call, Call::ChannelMembers { .. })));
    }

    #[tokio::test]
    async fn test_create_skips_empty_topic() {
        let (fake, resource) = setup();

        let state = resource
            .create(ConversationState::new("quiet", false).with_topic(""))
            .await
            .unwrap();

        assert_eq!(state.topic.as_deref(), Some(""));
        assert!(fake
            .calls()
            .iter()
            .all(|call| !matches!(call, Call::SetTopic { .. })));
    }

    #[tokio::test]
    async fn test_create_name_taken_without_adoption() {
        let (fake, resource) = setup();
        fake.seed_channel("eng", false, "U9");

        let err = resource
            .create(ConversationState::new("eng", false))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Client { .. }));
        assert_eq!(err.remote_code(), Some(codes::NAME_TAKEN));
    }

    #[tokio::test]
    async fn test_create_adopts_archived_channel() {
        let (fake, resource) = setup();
        let id = fake.seed_channel("eng", false, "U9");
        fake.add_member(&id, "U2");
        fake.modify_channel(&id, |channel| channel.is_archived = true);

        let planned = ConversationState::new("eng", false)
            .with_permanent_members(["U2", "U3"])
            .adopting_existing();
        let state = resource.create(planned).await.unwrap();

        assert_eq!(state.id.as_deref(), Some(id.as_str()));
        assert!(!state.is_archived);
        assert!(state.adopt_existing_channel);
        assert_eq!(invites(&fake), vec!["U3"]);
        assert_eq!(state.permanent_members, Some(set(&["U2", "U3"])));
        assert!(fake
            .calls()
            .contains(&Call::Unarchive { channel: id.clone() }));
    }

    #[tokio::test]
    async fn test_create_invite_failure_is_partially_applied() {
        let (fake, resource) = setup();
        fake.fail_when("user_not_found", |call| {
            matches!(call, Call::Invite { user, .. } if user == "U3")
        });

        let planned = ConversationState::new("eng", true).with_permanent_members(["U2", "U3"]);
        let err = resource.create(planned).await.unwrap_err();

        match &err {
            ProviderError::PartiallyApplied { id, .. } => {
                assert!(fake.channel(id).is_some());
                assert_eq!(fake.members(id), set(&["U1", "U2"]));
            },
            other => panic!("expected partially applied, got {:?}", other),
        }
        assert_eq!(err.remote_code(), Some("user_not_found"));
    }

    #[tokio::test]
    async fn test_create_tolerates_benign_invite_errors() {
        let (fake, resource) = setup();
        fake.fail_next("conversations.invite", codes::ALREADY_IN_CHANNEL);

        let planned = ConversationState::new("eng", false).with_permanent_members(["U2", "U3"]);
        let state = resource.create(planned).await.unwrap();

        assert_eq!(invites(&fake), vec!["U2", "U3"]);
        assert_eq!(state.permanent_members, Some(set(&["U3"])));
    }

    #[tokio::test]
    async fn test_create_tracks_token_user_without_inviting_it() {
        let (fake, resource) = setup();
        let id = fake.seed_channel("eng", false, "U9");

        let planned = ConversationState::new("eng", false)
            .with_permanent_members(["U1", "U2"])
            .adopting_existing();
        let state = resource.create(planned).await.unwrap();

        assert_eq!(invites(&fake), vec!["U2"]);
        assert_eq!(state.permanent_members, Some(set(&["U1", "U2"])));
        assert_eq!(fake.members(&id), set(&["U9", "U2"]));

        fake.clear_calls();
        let updated = resource.update(state.clone(), state.clone()).await.unwrap();
        assert!(fake.mutations().is_empty(), "{:?}", fake.mutations());
        assert_eq!(updated, state);

        let refreshed = resource.read(state.clone()).await.unwrap().unwrap();
        assert_eq!(refreshed.permanent_members, state.permanent_members);
    }

    #[tokio::test]
    async fn test_update_adding_token_user_settles() {
        let (fake, resource) = setup();
        fake.seed_channel("eng", false, "U9");
        let prior = resource
            .create(
                ConversationState::new("eng", false)
                    .with_permanent_members(["U2"])
                    .adopting_existing(),
            )
            .await
            .unwrap();
        fake.clear_calls();

        let mut planned = prior.clone();
        planned.permanent_members = Some(set(&["U1", "U2"]));
        let state = resource.update(prior, planned.clone()).await.unwrap();

        assert!(invites(&fake).is_empty());
        assert_eq!(state.permanent_members, Some(set(&["U1", "U2"])));

        fake.clear_calls();
        resource.update(state, planned).await.unwrap();
        assert!(fake.mutations().is_empty(), "{:?}", fake.mutations());
    }

    #[tokio::test]
    async fn test_update_tolerates_cant_invite_self() {
        let (fake, resource) = setup();
        let prior = resource
            .create(ConversationState::new("eng", false).with_permanent_members(["U2"]))
            .await
            .unwrap();
        fake.clear_calls();
        fake.fail_next("conversations.invite", codes::CANT_INVITE_SELF);

        let mut planned = prior.clone();
        planned.permanent_members = Some(set(&["U2", "U4"]));
        let state = resource.update(prior, planned).await.unwrap();

        assert_eq!(invites(&fake), vec!["U4"]);
        assert_eq!(state.permanent_members, Some(set(&["U2"])));
    }

    #[tokio::test]
    async fn test_create_tolerates_cant_invite_self() {
        let (fake, resource) = setup();
        fake.fail_next("conversations.invite", codes::CANT_INVITE_SELF);

        let planned = ConversationState::new("eng", true).with_permanent_members(["U2", "U3"]);
        let state = resource.create(planned).await.unwrap();

        assert_eq!(invites(&fake), vec!["U2", "U3"]);
        assert_eq!(state.permanent_members, Some(set(&["U3"])));
    }

    #[tokio::test]
    async fn test_read_missing_channel_is_none() {
        let (fake, resource) = setup();
        let state = resource
            .create(ConversationState::new("eng", false))
            .await
            .unwrap();
        fake.remove_channel(state.id.as_deref().unwrap());

        assert_eq!(resource.read(state).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_reports_drift() {
        let (fake, resource) = setup();
        let state = resource
            .create(ConversationState::new("eng", false).with_permanent_members(["U2"]))
            .await
            .unwrap();
        let id = state.id.clone().unwrap();

        fake.modify_channel(&id, |channel| {
            channel.name = "engineering".to_string();
            channel.topic = "changed elsewhere".to_string();
        });
        fake.add_member(&id, "U7");

        let refreshed = resource.read(state).await.unwrap().unwrap();
        assert_eq!(refreshed.name, "engineering");
        assert_eq!(refreshed.topic.as_deref(), Some("changed elsewhere"));
        assert_eq!(refreshed.permanent_members, Some(set(&["U2", "U7"])));

        // Members added by hand are removed on the next apply.
        fake.clear_calls();
        let mut planned = refreshed.clone();
        planned.permanent_members = Some(set(&["U2"]));
        resource.update(refreshed, planned).await.unwrap();
        assert_eq!(kicks(&fake), vec!["U7"]);
        assert_eq!(fake.members(&id), set(&["U1", "U2"]));
    }

    #[tokio::test]
    async fn test_read_other_errors_propagate() {
        let (fake, resource) = setup();
        let state = resource
            .create(ConversationState::new("eng", false))
            .await
            .unwrap();
        fake.fail_next("conversations.info", "invalid_auth");

        let err = resource.read(state).await.unwrap_err();
        assert_eq!(err.remote_code(), Some("invalid_auth"));
    }

    #[tokio::test]
    async fn test_update_with_no_changes_issues_no_mutations() {
        let (fake, resource) = setup();
        let state = resource
            .create(
                ConversationState::new("eng", true)
                    .with_topic("Engineering")
                    .with_permanent_members(["U2", "U3"]),
            )
            .await
            .unwrap();
        fake.clear_calls();

        let updated = resource.update(state.clone(), state.clone()).await.unwrap();

        assert!(fake.mutations().is_empty(), "{:?}", fake.mutations());
        assert_eq!(updated, state);
    }

    #[tokio::test]
    async fn test_update_swaps_members() {
        let (fake, resource) = setup();
        let prior = resource
            .create(ConversationState::new("eng", false).with_permanent_members(["U2", "U3"]))
            .await
            .unwrap();
        fake.clear_calls();

        let mut planned = prior.clone();
        planned.permanent_members = Some(set(&["U3", "U4"]));
        let state = resource.update(prior, planned).await.unwrap();

        assert_eq!(invites(&fake), vec!["U4"]);
        assert_eq!(kicks(&fake), vec!["U2"]);
        assert_eq!(state.permanent_members, Some(set(&["U3", "U4"])));
    }

    #[tokio::test]
    async fn test_update_without_kick_policy_leaves_members() {
        let (fake, resource) = setup();
        let prior = resource
            .create(
                ConversationState::new("eng", false)
                    .with_permanent_members(["U2", "U3"])
                    .with_member_removal(MemberRemovalAction::None),
            )
            .await
            .unwrap();
        let id = prior.id.clone().unwrap();
        fake.clear_calls();

        let mut planned = prior.clone();
        planned.permanent_members = Some(set(&["U3"]));
        let state = resource.update(prior, planned).await.unwrap();

        assert!(kicks(&fake).is_empty());
        assert_eq!(state.permanent_members, Some(set(&["U3"])));
        assert!(fake.members(&id).contains("U2"));
    }

    #[tokio::test]
    async fn test_update_unset_members_are_not_managed() {
        let (fake, resource) = setup();
        let prior = resource
            .create(ConversationState::new("eng", false).with_permanent_members(["U2"]))
            .await
            .unwrap();
        fake.clear_calls();

        let mut planned = prior.clone();
        planned.permanent_members = None;
        let state = resource.update(prior, planned).await.unwrap();

        assert!(fake.mutations().is_empty());
        assert_eq!(state.permanent_members, None);
    }

    #[tokio::test]
    async fn test_update_empty_members_kicks_everyone_but_creator() {
        let (fake, resource) = setup();
        let prior = resource
            .create(ConversationState::new("eng", false).with_permanent_members(["U2", "U3"]))
            .await
            .unwrap();
        let id = prior.id.clone().unwrap();
        fake.clear_calls();

        let mut planned = prior.clone();
        planned.permanent_members = Some(BTreeSet::new());
        let state = resource.update(prior, planned).await.unwrap();

        assert_eq!(kicks(&fake), vec!["U2", "U3"]);
        assert_eq!(state.permanent_members, Some(BTreeSet::new()));
        assert_eq!(fake.members(&id), set(&["U1"]));
    }

    #[tokio::test]
    async fn test_update_archives_after_other_changes() {
        let (fake, resource) = setup();
        let prior = resource
            .create(ConversationState::new("eng", false))
            .await
            .unwrap();
        let id = prior.id.clone().unwrap();
        fake.clear_calls();

        let mut planned = prior.clone();
        planned.name = "eng-old".to_string();
        planned.is_archived = true;
        let state = resource.update(prior, planned).await.unwrap();

        assert_eq!(
            fake.mutations(),
            vec![
                Call::Rename {
                    channel: id.clone(),
                    name: "eng-old".to_string()
                },
                Call::Archive { channel: id },
            ]
        );
        assert!(state.is_archived);
        assert_eq!(state.name, "eng-old");
    }

    #[tokio::test]
    async fn test_update_unarchives_before_other_changes() {
        let (fake, resource) = setup();
        let mut prior = resource
            .create(ConversationState::new("eng", false))
            .await
            .unwrap();
        let id = prior.id.clone().unwrap();
        fake.modify_channel(&id, |channel| channel.is_archived = true);
        prior.is_archived = true;
        fake.clear_calls();

        let mut planned = prior.clone();
        planned.is_archived = false;
        planned.topic = Some("Back".to_string());
        let state = resource.update(prior, planned).await.unwrap();

        assert_eq!(
            fake.mutations(),
            vec![
                Call::Unarchive {
                    channel: id.clone()
                },
                Call::SetTopic {
                    channel: id,
                    topic: "Back".to_string()
                },
            ]
        );
        assert!(!state.is_archived);
    }

    #[tokio::test]
    async fn test_update_keeps_policies_from_plan() {
        let (_fake, resource) = setup();
        let prior = resource
            .create(ConversationState::new("eng", false))
            .await
            .unwrap();

        let planned = prior.clone().with_destroy_action(DestroyAction::None);
        let state = resource.update(prior, planned).await.unwrap();
        assert_eq!(state.action_on_destroy, DestroyAction::None);
    }

    #[tokio::test]
    async fn test_delete_archives_by_default() {
        let (fake, resource) = setup();
        let state = resource
            .create(ConversationState::new("eng", false))
            .await
            .unwrap();
        let id = state.id.clone().unwrap();

        fake.clear_calls();

        resource.delete(state.clone()).await.unwrap();
        assert_eq!(
            fake.mutations(),
            vec![Call::Archive {
                channel: id.clone()
            }]
        );
        assert!(fake.channel(&id).unwrap().is_archived);

        // The second attempt hits already_archived and still succeeds.
        resource.delete(state).await.unwrap();
        assert_eq!(
            fake.calls(),
            vec![
                Call::Archive {
                    channel: id.clone()
                },
                Call::Archive { channel: id },
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_with_none_policy_makes_no_calls() {
        let (fake, resource) = setup();
        let state = resource
            .create(ConversationState::new("eng", false).with_destroy_action(DestroyAction::None))
            .await
            .unwrap();
        fake.clear_calls();

        resource.delete(state).await.unwrap();
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_other_errors_propagate() {
        let (fake, resource) = setup();
        let state = resource
            .create(ConversationState::new("eng", false))
            .await
            .unwrap();
        fake.fail_next("conversations.archive", "cant_archive_general");

        let err = resource.delete(state).await.unwrap_err();
        assert_eq!(err.remote_code(), Some("cant_archive_general"));
    }

    #[tokio::test]
    async fn test_import() {
        let (fake, resource) = setup();
        let id = fake.seed_channel("random", false, "U9");
        fake.add_member(&id, "U2");

        let state = resource.import(&id).await.unwrap().unwrap();
        assert_eq!(state.name, "random");
        assert_eq!(state.creator.as_deref(), Some("U9"));
        assert_eq!(state.permanent_members, None);
        assert_eq!(state.action_on_destroy, DestroyAction::Archive);

        assert_eq!(resource.import("C404").await.unwrap(), None);
    }

    #[test]
    fn test_state_accepts_host_nulls() {
        let state: ConversationState = serde_json::from_value(json!({
            "id": null,
            "name": "eng",
            "is_private": true,
            "is_archived": null,
            "action_on_destroy": null,
            "action_on_update_permanent_members": "none",
            "adopt_existing_channel": null
        }))
        .unwrap();

        assert!(!state.is_archived);
        assert_eq!(state.action_on_destroy, DestroyAction::Archive);
        assert_eq!(
            state.action_on_update_permanent_members,
            MemberRemovalAction::None
        );
        assert_eq!(
            serde_json::to_value(state.action_on_destroy).unwrap(),
            json!("archive")
        );
    }

    #[test]
    fn test_schema_rejects_bad_policy_and_long_topic() {
        let schema = ConversationResource::schema();
        assert!(is_valid(&schema, &json!({"name": "eng", "is_private": false})));

        let diags = validate(
            &schema,
            &json!({"name": "eng", "is_private": false, "action_on_destroy": "delete"}),
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].attribute.as_deref(), Some("action_on_destroy"));

        let long = "x".repeat(MAX_TEXT_LENGTH + 1);
        assert!(!is_valid(
            &schema,
            &json!({"name": "eng", "is_private": false, "topic": long})
        ));
        assert!(!is_valid(&schema, &json!({"name": "eng"})));
    }
}
