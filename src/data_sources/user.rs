//! The `slack_user` lookup, by exact username or by email.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{exactly_one_of, DataSource, LookupKey};
use crate::client::{codes, DirectoryClient, User};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

/// Type name of the user lookup.
pub const TYPE_NAME: &str = "slack_user";

/// Lookup parameters. Exactly one must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserQuery {
    /// Exact username.
    #[serde(default)]
    pub name: Option<String>,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
}

impl UserQuery {
    /// Look up by username.
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: None,
        }
    }

    /// Look up by email address.
    pub fn by_email(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: Some(email.into()),
        }
    }
}

/// A resolved user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    /// User ID.
    pub id: String,
    /// Username.
    pub name: String,
    /// Email address, when visible to the token.
    pub email: Option<String>,
}

impl From<User> for UserRecord {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
        }
    }
}

/// Resolver for `slack_user`.
pub struct UserDataSource {
    client: Arc<dyn DirectoryClient>,
}

impl UserDataSource {
    /// Create a resolver over the given client.
    pub fn new(client: Arc<dyn DirectoryClient>) -> Self {
        Self { client }
    }

    /// The single user whose username is exactly `name`.
    pub async fn find_by_name(&self, name: &str) -> Result<User, ProviderError> {
        let users = self
            .client
            .list_users()
            .await
            .map_err(|err| ProviderError::client("get workspace users", err))?;

        let mut matches = users.into_iter().filter(|user| user.name == name);
        match (matches.next(), matches.next()) {
            (Some(user), None) => Ok(user),
            (None, _) => Err(ProviderError::NotFound(format!(
                "no results found for name {}",
                name
            ))),
            (Some(_), Some(_)) => Err(ProviderError::AmbiguousMatch(format!(
                "multiple results found for name {}",
                name
            ))),
        }
    }

    /// The user with the given email address.
    pub async fn find_by_email(&self, email: &str) -> Result<User, ProviderError> {
        match self.client.user_by_email(email).await {
            Ok(user) => Ok(user),
            Err(err) if err.is(codes::USERS_NOT_FOUND) => Err(ProviderError::NotFound(format!(
                "{}: no user with email {}",
                codes::USERS_NOT_FOUND,
                email
            ))),
            Err(err) => Err(ProviderError::client("find user by email", err)),
        }
    }
}

#[async_trait]
impl DataSource for UserDataSource {
    type Query = UserQuery;
    type Record = UserRecord;

    const TYPE_NAME: &'static str = TYPE_NAME;

    fn schema() -> Schema {
        Schema::v0()
            .with_description("Fetches information about a Slack user")
            .with_attribute("id", Attribute::computed_string().with_description("The user ID"))
            .with_attribute(
                "name",
                Attribute::optional_computed_string().with_description("The username"),
            )
            .with_attribute(
                "email",
                Attribute::optional_computed_string().with_description("The user's email address"),
            )
            .with_exactly_one_of(["name", "email"])
    }

    #[instrument(skip(self))]
    async fn read(&self, query: UserQuery) -> Result<UserRecord, ProviderError> {
        let key = exactly_one_of(
            ("name", query.name.as_deref()),
            ("email", query.email.as_deref()),
        )?;
        let user = match key {
            LookupKey::First(name) => self.find_by_name(name).await?,
            LookupKey::Second(email) => self.find_by_email(email).await?,
        };
        debug!(id = %user.id, "Resolved user");
        Ok(user.into())
    }
}
