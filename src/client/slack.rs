//! Slack Web API client.
//!
//! Every method is a form-encoded `POST <api_url>/<method>` with a bearer
//! token. Slack answers HTTP 200 with an envelope whose `ok` flag carries the
//! outcome, and an `error` code when `ok` is false.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use super::{Channel, DirectoryClient, NewUsergroup, User, Usergroup, UsergroupUpdate};
use crate::config::{ResolvedConfig, Token};
use crate::error::{ClientError, ClientResult};

/// Page size requested from cursor-paginated methods.
const PAGE_SIZE: u32 = 200;

/// Slack Web API client.
#[derive(Debug, Clone)]
pub struct SlackClient {
    http_client: reqwest::Client,
    token: Token,
    base_url: String,
    /// The token's user, resolved by the first `auth.test`.
    current_user: Arc<OnceCell<String>>,
}

impl SlackClient {
    /// Creates a new client from resolved provider configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &ResolvedConfig) -> ClientResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            token: config.token.clone(),
            base_url: config.api_url.trim_end_matches('/').to_string(),
            current_user: Arc::new(OnceCell::new()),
        })
    }

    /// Returns the base URL for Web API requests.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Call a Web API method and decode the successful envelope as `T`.
    #[instrument(skip(self, params))]
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&'static str, String)],
    ) -> ClientResult<T> {
        let response = self
            .http_client
            .post(format!("{}/{}", self.base_url, method))
            .bearer_auth(self.token.expose())
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            return Err(ClientError::RateLimited { retry_after_secs });
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::InvalidResponse(format!(
                "HTTP {} from {}: {}",
                status, method, body
            )));
        }

        let value: serde_json::Value = serde_json::from_str(&body)?;
        match value.get("ok").and_then(serde_json::Value::as_bool) {
            Some(true) => Ok(serde_json::from_value(value)?),
            Some(false) => {
                let code = value
                    .get("error")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown_error");
                debug!(method, code, "Slack API returned an error");
                Err(ClientError::api(code))
            },
            None => Err(ClientError::InvalidResponse(format!(
                "{} response has no 'ok' field",
                method
            ))),
        }
    }

    /// Follow `response_metadata.next_cursor` until exhausted.
    async fn collect_pages<P, T, F>(
        &self,
        method: &str,
        params: &[(&'static str, String)],
        mut split: F,
    ) -> ClientResult<Vec<T>>
    where
        P: DeserializeOwned,
        F: FnMut(P) -> (Vec<T>, Option<ResponseMetadata>),
    {
        let mut items = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut page_params = params.to_vec();
            page_params.push(("limit", PAGE_SIZE.to_string()));
            if !cursor.is_empty() {
                page_params.push(("cursor", cursor.clone()));
            }

            let page: P = self.call(method, &page_params).await?;
            let (batch, metadata) = split(page);
            items.extend(batch);

            cursor = metadata.map(|m| m.next_cursor).unwrap_or_default();
            if cursor.is_empty() {
                return Ok(items);
            }
            debug!(method, fetched = items.len(), "Fetching next page");
        }
    }
}

#[async_trait]
impl DirectoryClient for SlackClient {
    async fn current_user(&self) -> ClientResult<String> {
        let user_id = self
            .current_user
            .get_or_try_init(|| async {
                let response: AuthTestResponse = self.call("auth.test", &[]).await?;
                debug!(user_id = %response.user_id, "Resolved token user");
                Ok::<_, ClientError>(response.user_id)
            })
            .await?;
        Ok(user_id.clone())
    }

    async fn create_channel(&self, name: &str, is_private: bool) -> ClientResult<Channel> {
        let response: ChannelResponse = self
            .call(
                "conversations.create",
                &[("name", name.to_string()), ("is_private", is_private.to_string())],
            )
            .await?;
        Ok(response.channel.into())
    }

    async fn channel_info(&self, id: &str) -> ClientResult<Channel> {
        let response: ChannelResponse = self
            .call("conversations.info", &[("channel", id.to_string())])
            .await?;
        Ok(response.channel.into())
    }

    async fn find_channel_by_name(&self, name: &str) -> ClientResult<Option<Channel>> {
        let channels = self
            .collect_pages(
                "conversations.list",
                &[
                    ("types", "public_channel,private_channel".to_string()),
                    ("exclude_archived", "false".to_string()),
                ],
                |page: ChannelsPage| (page.channels, page.response_metadata),
            )
            .await?;
        Ok(channels
            .into_iter()
            .find(|c| c.name == name)
            .map(Channel::from))
    }

    async fn set_channel_topic(&self, id: &str, topic: &str) -> ClientResult<()> {
        self.call::<IgnoredAny>(
            "conversations.setTopic",
            &[("channel", id.to_string()), ("topic", topic.to_string())],
        )
        .await?;
        Ok(())
    }

    async fn set_channel_purpose(&self, id: &str, purpose: &str) -> ClientResult<()> {
        self.call::<IgnoredAny>(
            "conversations.setPurpose",
            &[("channel", id.to_string()), ("purpose", purpose.to_string())],
        )
        .await?;
        Ok(())
    }

    async fn rename_channel(&self, id: &str, name: &str) -> ClientResult<()> {
        self.call::<IgnoredAny>(
            "conversations.rename",
            &[("channel", id.to_string()), ("name", name.to_string())],
        )
        .await?;
        Ok(())
    }

    async fn archive_channel(&self, id: &str) -> ClientResult<()> {
        self.call::<IgnoredAny>("conversations.archive", &[("channel", id.to_string())])
            .await?;
        Ok(())
    }

    async fn unarchive_channel(&self, id: &str) -> ClientResult<()> {
        self.call::<IgnoredAny>("conversations.unarchive", &[("channel", id.to_string())])
            .await?;
        Ok(())
    }

    async fn invite_member(&self, channel_id: &str, user_id: &str) -> ClientResult<()> {
        self.call::<IgnoredAny>(
            "conversations.invite",
            &[("channel", channel_id.to_string()), ("users", user_id.to_string())],
        )
        .await?;
        Ok(())
    }

    async fn kick_member(&self, channel_id: &str, user_id: &str) -> ClientResult<()> {
        self.call::<IgnoredAny>(
            "conversations.kick",
            &[("channel", channel_id.to_string()), ("user", user_id.to_string())],
        )
        .await?;
        Ok(())
    }

    async fn channel_members(&self, channel_id: &str) -> ClientResult<BTreeSet<String>> {
        let members = self
            .collect_pages(
                "conversations.members",
                &[("channel", channel_id.to_string())],
                |page: MembersPage| (page.members, page.response_metadata),
            )
            .await?;
        Ok(members.into_iter().collect())
    }

    async fn create_usergroup(&self, group: &NewUsergroup) -> ClientResult<Usergroup> {
        let mut params = vec![("name", group.name.clone())];
        if let Some(handle) = group.handle.as_ref().filter(|h| !h.is_empty()) {
            params.push(("handle", handle.clone()));
        }
        if let Some(description) = &group.description {
            params.push(("description", description.clone()));
        }
        if !group.channels.is_empty() {
            params.push(("channels", join(&group.channels)));
        }

        let response: UsergroupResponse = self.call("usergroups.create", &params).await?;
        Ok(response.usergroup.into())
    }

    async fn list_usergroups(&self, include_users: bool) -> ClientResult<Vec<Usergroup>> {
        let response: UsergroupsResponse = self
            .call(
                "usergroups.list",
                &[("include_users", include_users.to_string())],
            )
            .await?;
        Ok(response.usergroups.into_iter().map(Usergroup::from).collect())
    }

    async fn update_usergroup(&self, id: &str, update: &UsergroupUpdate) -> ClientResult<()> {
        let mut params = vec![("usergroup", id.to_string())];
        if let Some(name) = &update.name {
            params.push(("name", name.clone()));
        }
        if let Some(handle) = &update.handle {
            params.push(("handle", handle.clone()));
        }
        if let Some(description) = &update.description {
            params.push(("description", description.clone()));
        }
        if let Some(channels) = &update.channels {
            params.push(("channels", join(channels)));
        }

        self.call::<IgnoredAny>("usergroups.update", &params).await?;
        Ok(())
    }

    async fn replace_usergroup_members(
        &self,
        id: &str,
        users: &BTreeSet<String>,
    ) -> ClientResult<()> {
        self.call::<IgnoredAny>(
            "usergroups.users.update",
            &[("usergroup", id.to_string()), ("users", join(users))],
        )
        .await?;
        Ok(())
    }

    async fn disable_usergroup(&self, id: &str) -> ClientResult<()> {
        self.call::<IgnoredAny>("usergroups.disable", &[("usergroup", id.to_string())])
            .await?;
        Ok(())
    }

    async fn list_users(&self) -> ClientResult<Vec<User>> {
        let users = self
            .collect_pages("users.list", &[], |page: UsersPage| {
                (page.members, page.response_metadata)
            })
            .await?;
        Ok(users.into_iter().map(User::from).collect())
    }

    async fn user_by_email(&self, email: &str) -> ClientResult<User> {
        let response: UserResponse = self
            .call("users.lookupByEmail", &[("email", email.to_string())])
            .await?;
        Ok(response.user.into())
    }
}

fn join(ids: &BTreeSet<String>) -> String {
    ids.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

// Wire shapes of the Web API responses.

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    user_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireText {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct WireChannel {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    topic: WireText,
    #[serde(default)]
    purpose: WireText,
    #[serde(default)]
    creator: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    is_archived: bool,
    #[serde(default)]
    is_shared: bool,
    #[serde(default)]
    is_ext_shared: bool,
    #[serde(default)]
    is_org_shared: bool,
    #[serde(default)]
    is_general: bool,
}

impl From<WireChannel> for Channel {
    fn from(wire: WireChannel) -> Self {
        Self {
            id: wire.id,
            name: wire.name,
            topic: wire.topic.value,
            purpose: wire.purpose.value,
            creator: wire.creator,
            created: wire.created,
            is_private: wire.is_private,
            is_archived: wire.is_archived,
            is_shared: wire.is_shared,
            is_ext_shared: wire.is_ext_shared,
            is_org_shared: wire.is_org_shared,
            is_general: wire.is_general,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChannelResponse {
    channel: WireChannel,
}

#[derive(Debug, Deserialize)]
struct ChannelsPage {
    #[serde(default)]
    channels: Vec<WireChannel>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct MembersPage {
    #[serde(default)]
    members: Vec<String>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct WirePrefs {
    #[serde(default)]
    channels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsergroup {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    handle: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    prefs: WirePrefs,
    #[serde(default)]
    users: Vec<String>,
}

impl From<WireUsergroup> for Usergroup {
    fn from(wire: WireUsergroup) -> Self {
        Self {
            id: wire.id,
            name: wire.name,
            handle: wire.handle,
            description: wire.description,
            channels: wire.prefs.channels.into_iter().collect(),
            users: wire.users.into_iter().collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UsergroupResponse {
    usergroup: WireUsergroup,
}

#[derive(Debug, Deserialize)]
struct UsergroupsResponse {
    #[serde(default)]
    usergroups: Vec<WireUsergroup>,
}

#[derive(Debug, Default, Deserialize)]
struct WireProfile {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    profile: WireProfile,
}

impl From<WireUser> for User {
    fn from(wire: WireUser) -> Self {
        Self {
            id: wire.id,
            name: wire.name,
            email: wire.profile.email.filter(|e| !e.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    user: WireUser,
}

#[derive(Debug, Deserialize)]
struct UsersPage {
    #[serde(default)]
    members: Vec<WireUser>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_parsing() {
        let json = r#"{
            "ok": true,
            "channel": {
                "id": "C0123",
                "name": "eng",
                "created": 1700000000,
                "creator": "U1",
                "is_private": true,
                "is_archived": false,
                "is_general": false,
                "topic": {"value": "Build things", "creator": "U1", "last_set": 0},
                "purpose": {"value": "", "creator": "", "last_set": 0}
            }
        }"#;

        let response: ChannelResponse = serde_json::from_str(json).unwrap();
        let channel = Channel::from(response.channel);
        assert_eq!(channel.id, "C0123");
        assert_eq!(channel.topic, "Build things");
        assert_eq!(channel.purpose, "");
        assert!(channel.is_private);
        assert!(!channel.is_shared);
    }

    #[test]
    fn test_usergroup_parsing() {
        let json = r#"{
            "id": "S0123",
            "name": "On-call",
            "handle": "oncall",
            "description": "",
            "prefs": {"channels": ["C1", "C2"], "groups": []},
            "users": ["U2", "U1"]
        }"#;

        let group = Usergroup::from(serde_json::from_str::<WireUsergroup>(json).unwrap());
        assert_eq!(group.handle, "oncall");
        assert_eq!(group.channels.len(), 2);
        assert_eq!(
            group.users.iter().cloned().collect::<Vec<_>>(),
            vec!["U1", "U2"]
        );
    }

    #[test]
    fn test_user_parsing_drops_empty_email() {
        let json = r#"{"id": "U1", "name": "alice", "profile": {"email": ""}}"#;
        let user = User::from(serde_json::from_str::<WireUser>(json).unwrap());
        assert_eq!(user.email, None);
    }

    #[test]
    fn test_join_is_sorted() {
        let ids: BTreeSet<String> = ["U3", "U1", "U2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(join(&ids), "U1,U2,U3");
        assert_eq!(join(&BTreeSet::new()), "");
    }
}
