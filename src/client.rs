//! High-level client: lifecycle and one entry point per resource and action.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use strum::IntoEnumIterator;

use crate::api::{
    Action, OperationRequest, OperationResult, Payload, QueryFilter, ResourceType, Scope,
};
use crate::auth::{
    AccessToken, ClientCredentials, CredentialStore, FileTokenStore, LwaClient, TokenManager,
    TokenStore, TokenStoreConfig, CAMPAIGN_MANAGEMENT_SCOPE,
};
use crate::batch::{BatchReconciler, BulkOptions, QueryOptions};
use crate::config::PpcConfig;
use crate::error::PpcError;
use crate::gateway::{http, RequestGateway};

/// Entry point to the Advertising API for one application and one scope.
///
/// # Example
/// ```no_run
/// use amazon_ppc::prelude::*;
/// use serde_json::json;
///
/// # async fn example() -> amazon_ppc::error::Result<()> {
/// let client = AdsClient::connect(PpcConfig::from_env()?)?;
/// let created = client
///     .campaigns()
///     .create([json!({"name": "Spring sale", "state": "ENABLED"})])
///     .await?;
/// println!("{} created", created.success_count());
/// client.shutdown()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AdsClient {
    config: Arc<PpcConfig>,
    credentials: Arc<CredentialStore>,
    oauth: LwaClient,
    tokens: TokenManager,
    batches: BatchReconciler,
}

impl AdsClient {
    /// Build the credential store, token manager, gateway and reconciler
    /// from `config`. No network traffic happens until the first call.
    pub fn connect(config: PpcConfig) -> Result<Self, PpcError> {
        config.validate()?;
        let http = http::build_client(config.request_timeout())?;

        let client = ClientCredentials {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
        };
        let mut credentials = CredentialStore::new(client, config.refresh_token.clone());
        if config.persist_tokens {
            let dir = config
                .token_dir
                .clone()
                .unwrap_or_else(TokenStoreConfig::default_dir);
            let store: Arc<dyn TokenStore> =
                Arc::new(FileTokenStore::new(TokenStoreConfig::new(dir)));
            credentials = credentials.with_persistence(store);
        }
        credentials.initialize()?;
        let credentials = Arc::new(credentials);

        if credentials.refresh_token().is_none() && credentials.cached_access().is_none() {
            tracing::warn!(
                client_id = %config.client_id,
                "No refresh token configured; authorize with exchange_code before issuing calls"
            );
        }

        let oauth = LwaClient::new(http.clone(), config.region)
            .with_token_url(config.token_url())
            .with_authorize_url(config.authorize_url())
            .with_retry_policy(config.retry_policy());
        let tokens = TokenManager::new(Arc::clone(&credentials), oauth.clone())
            .with_safety_margin(config.token_safety_margin());

        let gateway = RequestGateway::new(
            http,
            config.api_base_url(),
            config.scope.clone(),
            tokens.clone(),
        )
        .with_rate_limits(config.tuning.rate_limit.clone())
        .with_retry_policy(config.retry_policy());

        let mut batches =
            BatchReconciler::new(Arc::new(gateway)).with_concurrency(config.tuning.concurrency);
        for resource in ResourceType::iter() {
            batches = batches.with_batch_size(resource, config.batch_size(resource));
        }

        tracing::info!(
            client_id = %config.client_id,
            scope = %config.scope,
            region = %config.region,
            "Advertising API client ready"
        );
        Ok(Self {
            config: Arc::new(config),
            credentials,
            oauth,
            tokens,
            batches,
        })
    }

    pub fn config(&self) -> &PpcConfig {
        &self.config
    }

    pub fn scope(&self) -> &Scope {
        &self.config.scope
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn batches(&self) -> &BatchReconciler {
        &self.batches
    }

    /// A valid access token, refreshing if necessary.
    pub async fn access_token(&self) -> Result<AccessToken, PpcError> {
        Ok(self.tokens.ensure_valid_token().await?)
    }

    /// Consent URL for the authorization-code flow.
    pub fn authorization_url(&self, state: &str) -> Result<String, PpcError> {
        Ok(self
            .oauth
            .authorization_url(self.credentials.client(), CAMPAIGN_MANAGEMENT_SCOPE, state)?)
    }

    /// Complete the authorization-code flow and install the granted tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<(), PpcError> {
        let grant = self
            .oauth
            .exchange_code(self.credentials.client(), code)
            .await?;
        if grant.refresh_token.is_none() {
            tracing::warn!("Authorization grant carried no refresh token");
        }
        self.credentials.apply_grant(grant);
        tracing::info!(client_id = %self.config.client_id, "Authorization code exchanged");
        Ok(())
    }

    /// Run a logical operation with default options.
    pub async fn execute(&self, request: OperationRequest) -> Result<OperationResult, PpcError> {
        request.validate()?;
        match request.payload {
            Payload::Items(items) => {
                let options = BulkOptions {
                    idempotency_key: request.idempotency_key,
                    ..BulkOptions::default()
                };
                self.batches
                    .submit_bulk(request.resource, request.action, items, &options)
                    .await
            }
            Payload::Filter(filter) => {
                self.batches
                    .query_all(request.resource, &filter, &QueryOptions::default())
                    .await
            }
        }
    }

    pub fn resource(&self, resource: ResourceType) -> ResourceClient<'_> {
        ResourceClient {
            client: self,
            resource,
        }
    }

    pub fn campaigns(&self) -> ResourceClient<'_> {
        self.resource(ResourceType::Campaign)
    }

    pub fn portfolios(&self) -> ResourceClient<'_> {
        self.resource(ResourceType::Portfolio)
    }

    pub fn ad_groups(&self) -> ResourceClient<'_> {
        self.resource(ResourceType::AdGroup)
    }

    pub fn ads(&self) -> ResourceClient<'_> {
        self.resource(ResourceType::Ad)
    }

    pub fn targets(&self) -> ResourceClient<'_> {
        self.resource(ResourceType::Target)
    }

    pub fn ad_associations(&self) -> ResourceClient<'_> {
        self.resource(ResourceType::AdAssociation)
    }

    /// Persist the current token and forget the access token.
    pub fn shutdown(&self) -> Result<(), PpcError> {
        self.credentials.teardown()?;
        tracing::info!(client_id = %self.config.client_id, "Advertising API client shut down");
        Ok(())
    }

    /// Wipe every token, in memory and on disk.
    pub fn revoke(&self) -> Result<(), PpcError> {
        self.credentials.revoke()?;
        tracing::info!(client_id = %self.config.client_id, "Credentials revoked");
        Ok(())
    }
}

/// Operations on one resource type.
#[derive(Debug, Clone, Copy)]
pub struct ResourceClient<'a> {
    client: &'a AdsClient,
    resource: ResourceType,
}

impl ResourceClient<'_> {
    pub fn resource_type(&self) -> ResourceType {
        self.resource
    }

    pub async fn create<I, T>(&self, items: I) -> Result<OperationResult, PpcError>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        self.create_with(items, &BulkOptions::default()).await
    }

    /// Create with an idempotency key, timeout or cancellation.
    pub async fn create_with<I, T>(
        &self,
        items: I,
        options: &BulkOptions,
    ) -> Result<OperationResult, PpcError>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        self.mutate(Action::Create, items, options).await
    }

    pub async fn update<I, T>(&self, items: I) -> Result<OperationResult, PpcError>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        self.update_with(items, &BulkOptions::default()).await
    }

    pub async fn update_with<I, T>(
        &self,
        items: I,
        options: &BulkOptions,
    ) -> Result<OperationResult, PpcError>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        self.mutate(Action::Update, items, options).await
    }

    /// Delete by id; items may be bare ids or entities carrying their id field.
    pub async fn delete<I, T>(&self, ids: I) -> Result<OperationResult, PpcError>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        self.delete_with(ids, &BulkOptions::default()).await
    }

    pub async fn delete_with<I, T>(
        &self,
        ids: I,
        options: &BulkOptions,
    ) -> Result<OperationResult, PpcError>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        self.mutate(Action::Delete, ids, options).await
    }

    /// Every entity matching `filter`, across all pages.
    pub async fn query(&self, filter: QueryFilter) -> Result<OperationResult, PpcError> {
        self.query_with(filter, &QueryOptions::default()).await
    }

    pub async fn query_with(
        &self,
        filter: QueryFilter,
        options: &QueryOptions,
    ) -> Result<OperationResult, PpcError> {
        self.client
            .batches
            .query_all(self.resource, &filter, options)
            .await
    }

    async fn mutate<I, T>(
        &self,
        action: Action,
        items: I,
        options: &BulkOptions,
    ) -> Result<OperationResult, PpcError>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        let items = items
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<Value>, _>>()?;
        self.client
            .batches
            .submit_bulk(self.resource, action, items, options)
            .await
    }
}
