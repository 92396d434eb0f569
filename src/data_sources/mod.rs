//! Read-only lookups.
//!
//! A data source resolves a query into a record. Queries are validated
//! before any remote call; a lookup that matches nothing is an error.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ProviderError;
use crate::schema::Schema;

pub mod conversation;
pub mod user;
pub mod usergroup;

pub use conversation::{ConversationDataSource, ConversationQuery, ConversationRecord};
pub use user::{UserDataSource, UserQuery, UserRecord};
pub use usergroup::{UsergroupDataSource, UsergroupQuery, UsergroupRecord};

/// A read-only lookup.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// The lookup parameters.
    type Query: DeserializeOwned + Send + 'static;
    /// The resolved record.
    type Record: Serialize + Send;

    /// The data source's type name.
    const TYPE_NAME: &'static str;

    /// The data source schema.
    fn schema() -> Schema;

    /// Resolve `query`.
    async fn read(&self, query: Self::Query) -> Result<Self::Record, ProviderError>;
}

/// Which of two mutually exclusive lookup keys was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKey<'a> {
    /// The first key.
    First(&'a str),
    /// The second key.
    Second(&'a str),
}

/// Require exactly one of two named keys.
pub fn exactly_one_of<'a>(
    first: (&str, Option<&'a str>),
    second: (&str, Option<&'a str>),
) -> Result<LookupKey<'a>, ProviderError> {
    match (first.1, second.1) {
        (Some(value), None) => Ok(LookupKey::First(value)),
        (None, Some(value)) => Ok(LookupKey::Second(value)),
        (None, None) => Err(ProviderError::Validation(format!(
            "Either '{}' or '{}' must be specified",
            first.0, second.0
        ))),
        (Some(_), Some(_)) => Err(ProviderError::Validation(format!(
            "Only one of '{}' or '{}' can be specified, not both",
            first.0, second.0
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_of() {
        assert_eq!(
            exactly_one_of(("id", Some("S1")), ("name", None)).unwrap(),
            LookupKey::First("S1")
        );
        assert_eq!(
            exactly_one_of(("id", None), ("name", Some("ops"))).unwrap(),
            LookupKey::Second("ops")
        );

        let err = exactly_one_of(("id", None), ("name", None)).unwrap_err();
        assert_eq!(err.message(), "Either 'id' or 'name' must be specified");

        let err = exactly_one_of(("id", Some("S1")), ("name", Some("ops"))).unwrap_err();
        assert_eq!(
            err.message(),
            "Only one of 'id' or 'name' can be specified, not both"
        );
    }
}
