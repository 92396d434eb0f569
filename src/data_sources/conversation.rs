//! The `slack_conversation` lookup, by channel ID.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::DataSource;
use crate::client::{codes, Channel, DirectoryClient};
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

/// Type name of the conversation lookup.
pub const TYPE_NAME: &str = "slack_conversation";

/// Lookup parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConversationQuery {
    /// Channel ID.
    pub id: String,
}

/// A resolved channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationRecord {
    /// Channel ID.
    pub id: String,
    /// Channel name.
    pub name: String,
    /// Topic.
    pub topic: String,
    /// Purpose.
    pub purpose: String,
    /// Creation time (Unix seconds).
    pub created: i64,
    /// User ID of the creator.
    pub creator: String,
    /// Whether the channel is private.
    pub is_private: bool,
}

impl From<Channel> for ConversationRecord {
    fn from(channel: Channel) -> Self {
        Self {
            id: channel.id,
            name: channel.name,
            topic: channel.topic,
            purpose: channel.purpose,
            created: channel.created,
            creator: channel.creator,
            is_private: channel.is_private,
        }
    }
}

/// Resolver for the `slack_conversation` lookup.
pub struct ConversationDataSource {
    client: Arc<dyn DirectoryClient>,
}

impl ConversationDataSource {
    /// Create a resolver over the given client.
    pub fn new(client: Arc<dyn DirectoryClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DataSource for ConversationDataSource {
    type Query = ConversationQuery;
    type Record = ConversationRecord;

    const TYPE_NAME: &'static str = TYPE_NAME;

    fn schema() -> Schema {
        Schema::v0()
            .with_description("Fetches information about a Slack conversation")
            .with_attribute("id", Attribute::required_string().with_description("Channel ID"))
            .with_attribute("name", Attribute::computed_string())
            .with_attribute("topic", Attribute::computed_string())
            .with_attribute("purpose", Attribute::computed_string())
            .with_attribute("created", Attribute::computed_int64())
            .with_attribute("creator", Attribute::computed_string())
            .with_attribute("is_private", Attribute::computed_bool())
    }

    #[instrument(skip(self))]
    async fn read(&self, query: ConversationQuery) -> Result<ConversationRecord, ProviderError> {
        if query.id.is_empty() {
            return Err(ProviderError::Validation("'id' must not be empty".to_string()));
        }
        match self.client.channel_info(&query.id).await {
            Ok(channel) => Ok(channel.into()),
            Err(err) if err.is(codes::CHANNEL_NOT_FOUND) => Err(ProviderError::NotFound(format!(
                "could not find conversation with ID: {}",
                query.id
            ))),
            Err(err) => Err(ProviderError::client(
                format!("read conversation {}", query.id),
                err,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDirectory;

    #[tokio::test]
    async fn test_lookup_by_id() {
        let fake = Arc::new(FakeDirectory::new("U1"));
        let id = fake.seed_channel("eng", true, "U9");
        fake.modify_channel(&id, |channel| channel.topic = "Engineering".to_string());

        let source = ConversationDataSource::new(fake.clone());
        let record = source.read(ConversationQuery { id: id.clone() }).await.unwrap();

        assert_eq!(record.id, id);
        assert_eq!(record.name, "eng");
        assert_eq!(record.topic, "Engineering");
        assert_eq!(record.creator, "U9");
        assert!(record.is_private);
    }

    #[tokio::test]
    async fn test_missing_channel_is_an_error() {
        let fake = Arc::new(FakeDirectory::new("U1"));
        let source = ConversationDataSource::new(fake.clone());

        let err = source
            .read(ConversationQuery {
                id: "C404".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));

        let err = source
            .read(ConversationQuery { id: String::new() })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
        assert_eq!(fake.calls().len(), 1);
    }
}
