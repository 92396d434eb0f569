//! The `slack_usergroup` lookup, by ID or by name.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{exactly_one_of, DataSource, LookupKey};
use crate::client::{DirectoryClient, Usergroup};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

/// Type name of the usergroup lookup.
pub const TYPE_NAME: &str = "slack_usergroup";

/// Lookup parameters. Exactly one must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UsergroupQuery {
    /// Usergroup ID.
    #[serde(default)]
    pub id: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
}

/// A resolved usergroup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsergroupRecord {
    /// Usergroup ID.
    pub id: String,
    /// Usergroup ID, under the name the lookup schema exposes.
    pub usergroup_id: String,
    /// Display name.
    pub name: String,
    /// Mention handle.
    pub handle: String,
    /// Description.
    pub description: String,
    /// Member user IDs.
    pub users: BTreeSet<String>,
    /// Default channel IDs.
    pub channels: BTreeSet<String>,
}

impl From<Usergroup> for UsergroupRecord {
    fn from(group: Usergroup) -> Self {
        Self {
            usergroup_id: group.id.clone(),
            id: group.id,
            name: group.name,
            handle: group.handle,
            description: group.description,
            users: group.users,
            channels: group.channels,
        }
    }
}

/// Resolver for `slack_usergroup`.
pub struct UsergroupDataSource {
    client: Arc<dyn DirectoryClient>,
}

impl UsergroupDataSource {
    /// Create a resolver over the given client.
    pub fn new(client: Arc<dyn DirectoryClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DataSource for UsergroupDataSource {
    type Query = UsergroupQuery;
    type Record = UsergroupRecord;

    const TYPE_NAME: &'static str = TYPE_NAME;

    fn schema() -> Schema {
        Schema::v0()
            .with_description("Fetches information about a Slack usergroup")
            .with_attribute("id", Attribute::optional_computed_string())
            .with_attribute("name", Attribute::optional_computed_string())
            .with_attribute("usergroup_id", Attribute::computed_string())
            .with_attribute("handle", Attribute::computed_string())
            .with_attribute("description", Attribute::computed_string())
            .with_attribute("users", Attribute::computed_string_set())
            .with_attribute("channels", Attribute::computed_string_set())
            .with_exactly_one_of(["id", "name"])
    }

    #[instrument(skip(self))]
    async fn read(&self, query: UsergroupQuery) -> Result<UsergroupRecord, ProviderError> {
        let key = exactly_one_of(("id", query.id.as_deref()), ("name", query.name.as_deref()))?;

        let groups = self
            .client
            .list_usergroups(true)
            .await
            .map_err(|err| ProviderError::client("list usergroups", err))?;

        let found = groups.into_iter().find(|group| match key {
            LookupKey::First(id) => group.id == id,
            LookupKey::Second(name) => group.name == name,
        });

        let group = found.ok_or_else(|| {
            let (field, value) = match key {
                LookupKey::First(id) => ("ID", id),
                LookupKey::Second(name) => ("name", name),
            };
            ProviderError::NotFound(format!("could not find usergroup with {}: {}", field, value))
        })?;
        debug!(id = %group.id, "Resolved usergroup");
        Ok(group.into())
    }
}
