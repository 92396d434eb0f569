//! Slack Provider
//!
//! Manages Slack conversations (channels) and usergroups as declarative
//! resources, and resolves users, usergroups and conversations as read-only
//! lookups.
//!
//! # Overview
//!
//! The crate provides:
//!
//! - **Reconcilers**: [`ConversationResource`] and [`UsergroupResource`]
//!   converge remote objects toward a desired state and report what Slack
//!   actually holds afterwards
//! - **Lookups**: user, usergroup and conversation data sources
//! - **Membership differ**: the set arithmetic behind member reconciliation
//! - **ProviderService trait**: the JSON-level surface a host drives, with
//!   [`SlackProvider`] as its implementation
//! - **Slack client**: [`SlackClient`], a Web API client behind the
//!   [`DirectoryClient`] trait
//! - **Logging**: integration with `tracing` for structured logging
//!
//! # Quick Start
//!
//! ```ignore
//! use slack_provider::{init_logging, ProviderService, SlackProvider};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!
//!     let provider = SlackProvider::new();
//!     provider.configure(json!({"token": "xoxb-..."})).await?;
//!
//!     let plan = provider
//!         .plan(
//!             "slack_conversation",
//!             None,
//!             json!({"name": "eng", "is_private": true, "permanent_members": ["U024BE7LH"]}),
//!             json!({}),
//!         )
//!         .await?;
//!     let state = provider.create("slack_conversation", plan.planned_state).await?;
//!     println!("created {}", state["id"]);
//!     Ok(())
//! }
//! ```
//!
//! # Lifecycle Contract
//!
//! - **Create/Update** end with a fresh read; returned state reflects Slack
//! - **Read** returns `None` when the object is gone (the removal signal)
//! - **Delete** is a soft delete: channels are archived (or left alone),
//!   usergroups are disabled
//! - Remote objects created before a later step fails are reported as
//!   [`ProviderError::PartiallyApplied`] with their ID

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod data_sources;
pub mod error;
pub mod logging;
pub mod membership;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod testing;
pub mod types;
pub mod validation;

// Re-export main types at crate root
pub use client::{DirectoryClient, SlackClient};
pub use config::{ProviderConfig, Token};
pub use error::{ClientError, ProviderError};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use membership::MembershipDiff;
pub use provider::{ProviderService, SlackProvider};
pub use resources::{
    ConversationResource, ConversationState, Resource, UsergroupResource, UsergroupState,
};
pub use schema::ProviderSchema;
pub use types::{AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
