//! Managed resources.
//!
//! Each resource kind implements [`Resource`] once. A reconciler is built per
//! operation around an injected [`DirectoryClient`](crate::client::DirectoryClient);
//! it holds no state between calls.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ProviderError;
use crate::schema::Schema;

pub mod conversation;
pub mod usergroup;

pub use conversation::{ConversationResource, ConversationState, DestroyAction, MemberRemovalAction};
pub use usergroup::{UsergroupResource, UsergroupState};

/// Lifecycle operations of a managed resource.
///
/// Every mutating operation ends with a fresh read; the returned state is
/// what Slack reports, not what was requested.
#[async_trait]
pub trait Resource: Send + Sync {
    /// The state model exchanged with the host.
    type State: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// The resource's type name.
    const TYPE_NAME: &'static str;

    /// The resource schema.
    fn schema() -> Schema;

    /// Create the remote object and return its observed state.
    async fn create(&self, planned: Self::State) -> Result<Self::State, ProviderError>;

    /// Refresh state. `Ok(None)` means the object is gone and should be
    /// dropped from tracked state.
    async fn read(&self, current: Self::State) -> Result<Option<Self::State>, ProviderError>;

    /// Converge the remote object from `prior` to `planned`.
    async fn update(
        &self,
        prior: Self::State,
        planned: Self::State,
    ) -> Result<Self::State, ProviderError>;

    /// Remove (or release) the remote object.
    async fn delete(&self, current: Self::State) -> Result<(), ProviderError>;

    /// Adopt an existing object by ID. `Ok(None)` if it does not exist.
    async fn import(&self, id: &str) -> Result<Option<Self::State>, ProviderError>;
}

/// The ID recorded in state, or an error naming the resource type.
pub(crate) fn require_id<'a>(
    id: Option<&'a str>,
    type_name: &str,
) -> Result<&'a str, ProviderError> {
    id.filter(|id| !id.is_empty()).ok_or_else(|| {
        ProviderError::InvalidRequest(format!("{} state has no id", type_name))
    })
}

/// `Some(new)` when an optional text attribute is set, non-empty and differs
/// from what was last observed.
pub(crate) fn changed_text<'a>(planned: &'a Option<String>, prior: &Option<String>) -> Option<&'a str> {
    planned
        .as_deref()
        .filter(|text| !text.is_empty() && Some(*text) != prior.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_id() {
        assert_eq!(require_id(Some("C1"), "slack_conversation").unwrap(), "C1");

        let err = require_id(None, "slack_conversation").unwrap_err();
        assert_eq!(err.message(), "slack_conversation state has no id");
        assert!(require_id(Some(""), "slack_usergroup").is_err());
    }

    #[test]
    fn test_changed_text() {
        let prior = Some("old".to_string());
        assert_eq!(changed_text(&Some("new".to_string()), &prior), Some("new"));
        assert_eq!(changed_text(&Some("old".to_string()), &prior), None);
        assert_eq!(changed_text(&Some(String::new()), &prior), None);
        assert_eq!(changed_text(&None, &prior), None);
        assert_eq!(changed_text(&Some("first".to_string()), &None), Some("first"));
    }
}
