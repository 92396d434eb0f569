//! The host-facing provider surface.
//!
//! [`ProviderService`] is the JSON-level contract a host drives: schemas,
//! configuration, planning, and the resource and data source lifecycles.
//! [`SlackProvider`] implements it by dispatching on type name to the
//! reconcilers in [`resources`](crate::resources) and the lookups in
//! [`data_sources`](crate::data_sources).

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::client::{DirectoryClient, SlackClient};
use crate::config::{ProviderConfig, Token};
use crate::data_sources::{
    self, ConversationDataSource, DataSource, UserDataSource, UsergroupDataSource,
};
use crate::error::ProviderError;
use crate::resources::{self, ConversationResource, Resource, UsergroupResource};
use crate::schema::{has_errors, Attribute, AttributeType, Diagnostic, ProviderSchema, Schema};
use crate::types::{AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
use crate::validation::{ensure_valid, validate};

/// Trait that provider implementations must implement.
///
/// Every operation exchanges `serde_json::Value`s shaped by the schema
/// returned from [`schema`](ProviderService::schema).
///
/// # Example
///
/// ```ignore
/// use slack_provider::{ProviderService, SlackProvider};
/// use serde_json::json;
///
/// let provider = SlackProvider::new();
/// provider.configure(json!({"token": "xoxb-..."})).await?;
/// let state = provider
///     .create("slack_conversation", json!({"name": "eng", "is_private": false}))
///     .await?;
/// ```
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Return the provider's schema including all resources and data sources.
    fn schema(&self) -> ProviderSchema;

    /// Return the sorted resource and data source type names.
    /// By default, this is derived from the schema.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        let mut resources: Vec<String> = schema.resources.keys().cloned().collect();
        let mut data_sources: Vec<String> = schema.data_sources.keys().cloned().collect();
        resources.sort();
        data_sources.sort();
        ProviderMetadata {
            resources,
            data_sources,
        }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider configuration before configuring.
    /// Returns diagnostics (errors and warnings).
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Configure the provider with credentials and settings.
    /// Returns diagnostics (errors and warnings).
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Stop the provider gracefully.
    async fn stop(&self) -> Result<(), ProviderError>;

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let schema = self.schema();
        let schema = schema
            .resources
            .get(resource_type)
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))?;
        Ok(validate(schema, &config))
    }

    /// Plan changes for a resource.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a new resource.
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError>;

    /// Read the current state of a resource.
    ///
    /// `Ok(None)` means the resource no longer exists and should be removed
    /// from state.
    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError>;

    /// Update an existing resource.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Import existing infrastructure into management.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError>;

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Validate a data source's configuration.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Read data from an external source.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError>;
}

/// Managed resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceKind {
    Conversation,
    Usergroup,
}

impl ResourceKind {
    fn from_type_name(name: &str) -> Result<Self, ProviderError> {
        match name {
            resources::conversation::TYPE_NAME => Ok(Self::Conversation),
            resources::usergroup::TYPE_NAME => Ok(Self::Usergroup),
            other => Err(ProviderError::UnknownResource(other.to_string())),
        }
    }

    fn schema(self) -> Schema {
        match self {
            Self::Conversation => ConversationResource::schema(),
            Self::Usergroup => UsergroupResource::schema(),
        }
    }
}

/// Lookup kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataSourceKind {
    Conversation,
    User,
    Usergroup,
}

impl DataSourceKind {
    fn from_type_name(name: &str) -> Result<Self, ProviderError> {
        match name {
            data_sources::conversation::TYPE_NAME => Ok(Self::Conversation),
            data_sources::user::TYPE_NAME => Ok(Self::User),
            data_sources::usergroup::TYPE_NAME => Ok(Self::Usergroup),
            other => Err(ProviderError::UnknownResource(other.to_string())),
        }
    }

    fn schema(self) -> Schema {
        match self {
            Self::Conversation => ConversationDataSource::schema(),
            Self::User => UserDataSource::schema(),
            Self::Usergroup => UsergroupDataSource::schema(),
        }
    }
}

/// The Slack provider.
///
/// Holds the configured client and builds a reconciler or lookup around it
/// for every call.
pub struct SlackProvider {
    client: RwLock<Option<Arc<dyn DirectoryClient>>>,
}

impl SlackProvider {
    /// An unconfigured provider. [`configure`](ProviderService::configure)
    /// builds the Slack client.
    pub fn new() -> Self {
        Self {
            client: RwLock::new(None),
        }
    }

    /// A provider that already talks to `client`.
    pub fn with_client(client: Arc<dyn DirectoryClient>) -> Self {
        Self {
            client: RwLock::new(Some(client)),
        }
    }

    /// Whether a client is available.
    pub async fn is_configured(&self) -> bool {
        self.client.read().await.is_some()
    }

    async fn client(&self) -> Result<Arc<dyn DirectoryClient>, ProviderError> {
        self.client.read().await.clone().ok_or_else(|| {
            ProviderError::Configuration(
                "provider is not configured; call configure first".to_string(),
            )
        })
    }

    fn provider_config_schema() -> Schema {
        Schema::v0()
            .with_description("Slack provider configuration")
            .with_attribute(
                "token",
                Attribute::optional_string()
                    .with_description("Slack API token; falls back to the SLACK_TOKEN environment variable")
                    .sensitive(),
            )
            .with_attribute(
                "api_url",
                Attribute::optional_string().with_description("Slack Web API base URL"),
            )
    }
}

impl Default for SlackProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ProviderService for SlackProvider {
    fn schema(&self) -> ProviderSchema {
        ProviderSchema::new()
            .with_provider_config(Self::provider_config_schema())
            .with_resource(ConversationResource::TYPE_NAME, ConversationResource::schema())
            .with_resource(UsergroupResource::TYPE_NAME, UsergroupResource::schema())
            .with_data_source(ConversationDataSource::TYPE_NAME, ConversationDataSource::schema())
            .with_data_source(UserDataSource::TYPE_NAME, UserDataSource::schema())
            .with_data_source(UsergroupDataSource::TYPE_NAME, UsergroupDataSource::schema())
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut diagnostics = validate(&Self::provider_config_schema(), &config);
        if let Some(token) = config.get("token").and_then(Value::as_str) {
            if let Err(err) = Token::parse(token) {
                diagnostics.push(
                    Diagnostic::error("Invalid Slack Token")
                        .with_detail(err.message())
                        .with_attribute("token"),
                );
            }
        }
        Ok(diagnostics)
    }

    #[instrument(skip(self, config))]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let diagnostics = self.validate_provider_config(config.clone()).await?;
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }

        let resolved = match ProviderConfig::from_value(config).and_then(ProviderConfig::resolve) {
            Ok(resolved) => resolved,
            Err(err) => return Ok(vec![Diagnostic::from(&err)]),
        };
        let client = SlackClient::new(&resolved).map_err(|err| {
            ProviderError::Configuration(format!("Unable to build HTTP client: {}", err))
        })?;

        *self.client.write().await = Some(Arc::new(client));
        info!(api_url = %resolved.api_url, "Configured Slack client");
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.client.write().await.take();
        debug!("Released Slack client");
        Ok(())
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let schema = ResourceKind::from_type_name(resource_type)?.schema();
        plan_resource(&schema, prior_state.as_ref(), &proposed_state)
    }

    #[instrument(skip(self, planned_state))]
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let kind = ResourceKind::from_type_name(resource_type)?;
        ensure_valid(&kind.schema(), &planned_state)?;
        let client = self.client().await?;
        match kind {
            ResourceKind::Conversation => {
                create_with(&ConversationResource::new(client), planned_state).await
            },
            ResourceKind::Usergroup => create_with(&UsergroupResource::new(client), planned_state).await,
        }
    }

    #[instrument(skip(self, current_state))]
    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let kind = ResourceKind::from_type_name(resource_type)?;
        let client = self.client().await?;
        match kind {
            ResourceKind::Conversation => {
                read_with(&ConversationResource::new(client), current_state).await
            },
            ResourceKind::Usergroup => read_with(&UsergroupResource::new(client), current_state).await,
        }
    }

    #[instrument(skip(self, prior_state, planned_state))]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let kind = ResourceKind::from_type_name(resource_type)?;
        ensure_valid(&kind.schema(), &planned_state)?;
        let client = self.client().await?;
        match kind {
            ResourceKind::Conversation => {
                update_with(&ConversationResource::new(client), prior_state, planned_state).await
            },
            ResourceKind::Usergroup => {
                update_with(&UsergroupResource::new(client), prior_state, planned_state).await
            },
        }
    }

    #[instrument(skip(self, current_state))]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let kind = ResourceKind::from_type_name(resource_type)?;
        let client = self.client().await?;
        match kind {
            ResourceKind::Conversation => {
                delete_with(&ConversationResource::new(client), current_state).await
            },
            ResourceKind::Usergroup => delete_with(&UsergroupResource::new(client), current_state).await,
        }
    }

    #[instrument(skip(self))]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let kind = ResourceKind::from_type_name(resource_type)?;
        let client = self.client().await?;
        let state = match kind {
            ResourceKind::Conversation => import_with(&ConversationResource::new(client), id).await?,
            ResourceKind::Usergroup => import_with(&UsergroupResource::new(client), id).await?,
        };
        let state = state.ok_or_else(|| {
            ProviderError::NotFound(format!("{} {} does not exist", resource_type, id))
        })?;
        info!(id, "Imported resource");
        Ok(vec![ImportedResource::new(resource_type, state)])
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let schema = DataSourceKind::from_type_name(data_source_type)?.schema();
        Ok(validate(&schema, &config))
    }

    #[instrument(skip(self, config))]
    async fn read_data_source(&self, data_source_type: &str, config: Value) -> Result<Value, ProviderError> {
        let kind = DataSourceKind::from_type_name(data_source_type)?;
        ensure_valid(&kind.schema(), &config)?;
        let client = self.client().await?;
        match kind {
            DataSourceKind::Conversation => {
                lookup_with(&ConversationDataSource::new(client), config).await
            },
            DataSourceKind::User => lookup_with(&UserDataSource::new(client), config).await,
            DataSourceKind::Usergroup => lookup_with(&UsergroupDataSource::new(client), config).await,
        }
    }
}

async fn create_with<R: Resource>(resource: &R, planned: Value) -> Result<Value, ProviderError> {
    let planned: R::State = serde_json::from_value(planned)?;
    Ok(serde_json::to_value(resource.create(planned).await?)?)
}

async fn read_with<R: Resource>(resource: &R, current: Value) -> Result<Option<Value>, ProviderError> {
    let current: R::State = serde_json::from_value(current)?;
    match resource.read(current).await? {
        Some(state) => Ok(Some(serde_json::to_value(state)?)),
        None => Ok(None),
    }
}

async fn update_with<R: Resource>(
    resource: &R,
    prior: Value,
    planned: Value,
) -> Result<Value, ProviderError> {
    let prior: R::State = serde_json::from_value(prior)?;
    let planned: R::State = serde_json::from_value(planned)?;
    Ok(serde_json::to_value(resource.update(prior, planned).await?)?)
}

async fn delete_with<R: Resource>(resource: &R, current: Value) -> Result<(), ProviderError> {
    let current: R::State = serde_json::from_value(current)?;
    resource.delete(current).await
}

async fn import_with<R: Resource>(resource: &R, id: &str) -> Result<Option<Value>, ProviderError> {
    match resource.import(id).await? {
        Some(state) => Ok(Some(serde_json::to_value(state)?)),
        None => Ok(None),
    }
}

async fn lookup_with<D: DataSource>(source: &D, config: Value) -> Result<Value, ProviderError> {
    let query: D::Query = serde_json::from_value(config)?;
    Ok(serde_json::to_value(source.read(query).await?)?)
}

/// Compute the planned state for a resource.
///
/// - A `null` proposal plans destruction.
/// - Unset attributes take their schema default, or keep the prior value
///   when computed.
/// - Changing a force-new attribute requires replacement, and computed
///   values are then left unknown (`null`).
pub fn plan_resource(
    schema: &Schema,
    prior: Option<&Value>,
    proposed: &Value,
) -> Result<PlanResult, ProviderError> {
    let mut names: Vec<&String> = schema.attributes.keys().collect();
    names.sort();

    let proposed = match proposed {
        Value::Object(map) => map,
        Value::Null => {
            let changes = prior
                .map(|prior| {
                    names
                        .iter()
                        .filter_map(|name| {
                            present(prior.get(name.as_str()))
                                .map(|value| AttributeChange::removed(name.as_str(), value.clone()))
                        })
                        .collect()
                })
                .unwrap_or_default();
            return Ok(PlanResult::with_changes(Value::Null, changes, false));
        },
        _ => {
            return Err(ProviderError::InvalidRequest(
                "proposed state must be an object".to_string(),
            ))
        },
    };

    let prior_value = |name: &str| present(prior.and_then(|prior| prior.get(name))).cloned();

    let requires_replace = prior.is_some()
        && names.iter().any(|name| {
            let attr = &schema.attributes[name.as_str()];
            match (attr.force_new, present(proposed.get(name.as_str()))) {
                (true, Some(after)) => {
                    !same_value(&attr.attr_type, prior_value(name.as_str()).as_ref(), Some(after))
                },
                _ => false,
            }
        });

    let mut planned = Map::new();
    let mut changes = Vec::new();
    for name in names {
        let attr = &schema.attributes[name.as_str()];
        let carried = if requires_replace { None } else { prior_value(name.as_str()) };

        let value = if attr.flags.is_computed_only() {
            carried
        } else {
            match present(proposed.get(name.as_str())) {
                Some(value) => Some(value.clone()),
                None => attr
                    .default
                    .clone()
                    .or(if attr.flags.computed { carried } else { None }),
            }
        };

        let before = prior_value(name.as_str());
        if !same_value(&attr.attr_type, before.as_ref(), value.as_ref()) {
            let change = match (before, value.clone()) {
                (None, Some(after)) => AttributeChange::added(name.as_str(), after),
                (Some(before), None) => AttributeChange::removed(name.as_str(), before),
                (before, after) => AttributeChange::new(name.as_str(), before, after),
            };
            changes.push(change);
        }
        planned.insert(name.clone(), value.unwrap_or(Value::Null));
    }

    let planned = Value::Object(planned);
    if changes.is_empty() {
        Ok(PlanResult::no_change(planned))
    } else {
        Ok(PlanResult::with_changes(planned, changes, requires_replace))
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|value| !value.is_null())
}

/// Equality that ignores element order for sets.
fn same_value(attr_type: &AttributeType, a: Option<&Value>, b: Option<&Value>) -> bool {
    match (attr_type, a, b) {
        (AttributeType::Set(_), Some(Value::Array(a)), Some(Value::Array(b))) => {
            let a: BTreeSet<String> = a.iter().map(Value::to_string).collect();
            let b: BTreeSet<String> = b.iter().map(Value::to_string).collect();
            a == b
        },
        _ => a == b,
    }
}
