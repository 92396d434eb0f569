//! The `slack_usergroup` resource.
//!
//! Slack has no fetch-by-ID for usergroups, so every read lists the enabled
//! groups (with members) and matches on ID.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{changed_text, require_id, Resource};
use crate::client::{codes, DirectoryClient, NewUsergroup, Usergroup, UsergroupUpdate};
use crate::error::ProviderError;
use crate::membership::MembershipDiff;
use crate::schema::{Attribute, Schema};

/// Type name of the usergroup resource.
pub const TYPE_NAME: &str = "slack_usergroup";

/// State of a `slack_usergroup`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsergroupState {
    /// Usergroup ID, assigned by Slack.
    #[serde(default)]
    pub id: Option<String>,
    /// Display name.
    pub name: String,
    /// Mention handle.
    #[serde(default)]
    pub handle: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Default channel IDs. `None` leaves them unmanaged.
    #[serde(default)]
    pub channels: Option<BTreeSet<String>>,
    /// Member user IDs. `None` leaves membership unmanaged.
    #[serde(default)]
    pub users: Option<BTreeSet<String>>,
}

impl UsergroupState {
    /// Desired state for a new usergroup.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the handle.
    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Manage the default channels.
    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    /// Manage the members.
    pub fn with_users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.users = Some(users.into_iter().map(Into::into).collect());
        self
    }

    /// Project a remote usergroup onto state. Unmanaged sets stay unset.
    fn observed(group: Usergroup, track_channels: bool, track_users: bool) -> Self {
        Self {
            id: Some(group.id),
            name: group.name,
            handle: Some(group.handle),
            description: Some(group.description),
            channels: track_channels.then_some(group.channels),
            users: track_users.then_some(group.users),
        }
    }

    /// The attribute update needed to move from `prior` to `self`, if any.
    ///
    /// Optional attributes only count as changed when set.
    fn update_from(&self, prior: &Self) -> Option<UsergroupUpdate> {
        let changed = self.name != prior.name
            || changed_text(&self.handle, &prior.handle).is_some()
            || (self.description.is_some() && self.description != prior.description)
            || (self.channels.is_some() && self.channels != prior.channels);

        changed.then(|| UsergroupUpdate {
            name: Some(self.name.clone()),
            handle: self.handle.clone().filter(|h| !h.is_empty()),
            description: self.description.clone(),
            channels: self.channels.clone(),
        })
    }
}

/// Reconciler for `slack_usergroup`.
pub struct UsergroupResource {
    client: Arc<dyn DirectoryClient>,
}

impl UsergroupResource {
    /// Create a reconciler over the given client.
    pub fn new(client: Arc<dyn DirectoryClient>) -> Self {
        Self { client }
    }

    async fn find(&self, id: &str) -> Result<Option<Usergroup>, ProviderError> {
        let groups = self
            .client
            .list_usergroups(true)
            .await
            .map_err(|err| ProviderError::client("list usergroups", err))?;
        Ok(groups.into_iter().find(|group| group.id == id))
    }

    async fn observe_after(
        &self,
        id: &str,
        settings: &UsergroupState,
        operation: &str,
    ) -> Result<UsergroupState, ProviderError> {
        let group = self.find(id).await?.ok_or_else(|| {
            ProviderError::NotFound(format!("usergroup {} not found after {}", id, operation))
        })?;
        Ok(UsergroupState::observed(
            group,
            settings.channels.is_some(),
            settings.users.is_some(),
        ))
    }

    async fn replace_members(&self, id: &str, users: &BTreeSet<String>) -> Result<(), ProviderError> {
        self.client
            .replace_usergroup_members(id, users)
            .await
            .map_err(|err| ProviderError::client(format!("update users of usergroup {}", id), err))?;
        debug!(id, count = users.len(), "Replaced usergroup members");
        Ok(())
    }
}

#[async_trait]
impl Resource for UsergroupResource {
    type State = UsergroupState;

    const TYPE_NAME: &'static str = TYPE_NAME;

    fn schema() -> Schema {
        Schema::v0()
            .with_description("A Slack usergroup")
            .with_attribute("id", Attribute::computed_string().with_description("Usergroup ID"))
            .with_attribute("name", Attribute::required_string())
            .with_attribute(
                "handle",
                Attribute::optional_computed_string().with_description("Mention handle"),
            )
            .with_attribute("description", Attribute::optional_computed_string())
            .with_attribute(
                "channels",
                Attribute::optional_string_set().with_description("Default channel IDs"),
            )
            .with_attribute(
                "users",
                Attribute::optional_string_set().with_description("Member user IDs"),
            )
    }

    #[instrument(skip(self, planned), fields(name = %planned.name))]
    async fn create(&self, planned: UsergroupState) -> Result<UsergroupState, ProviderError> {
        let group = self
            .client
            .create_usergroup(&NewUsergroup {
                name: planned.name.clone(),
                handle: planned.handle.clone().filter(|h| !h.is_empty()),
                description: planned.description.clone(),
                channels: planned.channels.clone().unwrap_or_default(),
            })
            .await
            .map_err(|err| {
                ProviderError::client(format!("create usergroup {}", planned.name), err)
            })?;
        let id = group.id;
        debug!(id = %id, "Created usergroup");

        // A new group has no members, so an empty set needs no call.
        if let Some(users) = planned.users.as_ref().filter(|users| !users.is_empty()) {
            self.replace_members(&id, users)
                .await
                .map_err(|err| ProviderError::partially_applied(&id, err))?;
        }

        let state = self
            .observe_after(&id, &planned, "create")
            .await
            .map_err(|err| ProviderError::partially_applied(&id, err))?;
        info!(id = %id, "Created usergroup");
        Ok(state)
    }

    #[instrument(skip(self, current), fields(id = ?current.id))]
    async fn read(&self, current: UsergroupState) -> Result<Option<UsergroupState>, ProviderError> {
        let id = require_id(current.id.as_deref(), TYPE_NAME)?;
        match self.find(id).await? {
            Some(group) => Ok(Some(UsergroupState::observed(
                group,
                current.channels.is_some(),
                current.users.is_some(),
            ))),
            None => {
                warn!("Usergroup no longer exists, removing from state");
                Ok(None)
            },
        }
    }

    #[instrument(skip(self, prior, planned), fields(id = ?prior.id))]
    async fn update(
        &self,
        prior: UsergroupState,
        planned: UsergroupState,
    ) -> Result<UsergroupState, ProviderError> {
        let id = require_id(prior.id.as_deref().or(planned.id.as_deref()), TYPE_NAME)?;

        if let Some(update) = planned.update_from(&prior) {
            self.client
                .update_usergroup(id, &update)
                .await
                .map_err(|err| ProviderError::client(format!("update usergroup {}", id), err))?;
            debug!(id, "Updated usergroup attributes");
        }

        // Membership is replaced wholesale, so only the fact of a change matters.
        if let Some(desired) = &planned.users {
            let changed = match &prior.users {
                Some(observed) => !MembershipDiff::between(desired, observed).is_empty(),
                None => true,
            };
            if changed {
                self.replace_members(id, desired).await?;
            }
        }

        let state = self.observe_after(id, &planned, "update").await?;
        info!("Updated usergroup");
        Ok(state)
    }

    #[instrument(skip(self, current), fields(id = ?current.id))]
    async fn delete(&self, current: UsergroupState) -> Result<(), ProviderError> {
        let id = require_id(current.id.as_deref(), TYPE_NAME)?;
        match self.client.disable_usergroup(id).await {
            Ok(()) => {
                info!("Disabled usergroup");
                Ok(())
            },
            Err(err) if err.is(codes::ALREADY_DISABLED) => {
                warn!("Usergroup already disabled");
                Ok(())
            },
            Err(err) => Err(ProviderError::client(format!("disable usergroup {}", id), err)),
        }
    }

    #[instrument(skip(self))]
    async fn import(&self, id: &str) -> Result<Option<UsergroupState>, ProviderError> {
        Ok(self
            .find(id)
            .await?
            .map(|group| UsergroupState::observed(group, true, true)))
    }
}
