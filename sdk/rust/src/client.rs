//! The typed GraphQL client.
//!
//! A [`Client`] is built once from every operation and fragment the
//! application uses. Building composes and validates all documents, so a
//! spread of an undefined fragment, a fragment cycle or a mismatched
//! operation fails here, never on first use.
//!
//! ```ignore
//! let client = Client::builder(ClientConfig::new("http://localhost:4000/graphql"))
//!     .fragments(include_str!("fragments.graphql"))
//!     .operation::<GetDocumentFull>()
//!     .operation::<CreateDocuments>()
//!     .local_resolvers(LocalResolvers::new().field("Document", "plaintext", decrypt))
//!     .build()?;
//!
//! let response = client
//!     .execute::<GetDocumentFull>(GetDocumentFullVariables { id }, &ExecuteOptions::default())
//!     .await?;
//! ```

use gqlbind_document::{CatalogError, CompiledOperation, OperationCatalog, OperationCatalogBuilder};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cache::{CacheConfig, NormalizedCache};
use crate::error::{ErrorCode, SdkError, SdkResult};
use crate::local::LocalResolvers;
use crate::options::{ErrorPolicy, ExecuteOptions};
use crate::selection::PossibleTypes;
use crate::transport::{HttpTransport, Transport};
use crate::typed::{OperationKind, TypedOperation, TypedResponse};
use crate::wire::{Request, Response};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// URL of the GraphQL endpoint.
    pub url: String,
    /// Timeout of one request attempt.
    pub timeout: Duration,
    /// Maximum retry attempts for retryable transport errors.
    pub max_retries: u32,
    /// Headers sent with every request.
    pub headers: HashMap<String, String>,
    /// Retry delay base in milliseconds, doubled on every attempt.
    pub retry_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            headers: HashMap::new(),
            retry_delay_ms: 100,
        }
    }
}

impl ClientConfig {
    /// Creates a new config with a URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Adds a default header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn retry_delay_ms(mut self, delay: u64) -> Self {
        self.retry_delay_ms = delay;
        self
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor))
    }
}

type BoxFuture = Pin<Box<dyn Future<Output = SdkResult<Response>> + Send>>;

/// Middleware function type.
pub type Middleware = Arc<dyn Fn(Request, Next) -> BoxFuture + Send + Sync>;

/// Next middleware in the chain.
pub type Next = Arc<dyn Fn(Request) -> BoxFuture + Send + Sync>;

/// Errors building a [`Client`].
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{} invalid operation document(s)", .0.len())]
    Catalog(Vec<CatalogError>),

    #[error("operation `{name}` is declared as a {declared} but its document is a {found}")]
    KindMismatch {
        name: String,
        declared: OperationKind,
        found: OperationKind,
    },

    #[error("operation `{name}` does not define an operation of that name")]
    MissingOperation { name: String },

    #[error("failed to create transport: {0}")]
    Transport(#[source] SdkError),
}

/// Builder for a [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    catalog: OperationCatalogBuilder,
    declared: Vec<(&'static str, OperationKind)>,
    resolvers: LocalResolvers,
    cache: CacheConfig,
    transport: Option<Arc<dyn Transport>>,
    middlewares: Vec<Middleware>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            catalog: OperationCatalogBuilder::new(),
            declared: Vec::new(),
            resolvers: LocalResolvers::new(),
            cache: CacheConfig::default(),
            transport: None,
            middlewares: Vec::new(),
        }
    }

    /// Registers every fragment (and operation) defined in `document`.
    pub fn fragments(mut self, document: &str) -> Self {
        self.catalog.add_document_str(document);
        self
    }

    /// Registers one fragment by name.
    pub fn fragment(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.catalog.add_fragment(name, source);
        self
    }

    /// Registers a typed operation.
    pub fn operation<Op: TypedOperation>(mut self) -> Self {
        if self.declared.iter().all(|(name, _)| *name != Op::NAME) {
            self.declared.push((Op::NAME, Op::KIND));
            self.catalog.add_operation(Op::SOURCE);
        }
        self
    }

    pub fn local_resolvers(mut self, resolvers: LocalResolvers) -> Self {
        self.resolvers = resolvers;
        self
    }

    /// Declares the concrete types of an interface or union, for matching
    /// type conditions.
    pub fn possible_types<I, S>(mut self, abstract_type: impl Into<String>, concrete: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache.possible_types.insert(abstract_type, concrete);
        self
    }

    /// Sets the fields identifying objects of `typename` in the cache.
    pub fn key_fields<I, S>(mut self, typename: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache
            .key_fields
            .insert(typename.into(), fields.into_iter().map(Into::into).collect());
        self
    }

    /// Replaces the default HTTP transport.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Adds a middleware. Middlewares run in registration order.
    pub fn middleware<F>(mut self, middleware: F) -> Self
    where
        F: Fn(Request, Next) -> BoxFuture + Send + Sync + 'static,
    {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn build(self) -> Result<Client, BuildError> {
        let catalog = self.catalog.build().map_err(BuildError::Catalog)?;

        for (name, declared) in &self.declared {
            let operation = catalog
                .get(name)
                .ok_or_else(|| BuildError::MissingOperation {
                    name: (*name).to_string(),
                })?;
            let found = OperationKind::from(operation.kind);
            if found != *declared {
                return Err(BuildError::KindMismatch {
                    name: (*name).to_string(),
                    declared: *declared,
                    found,
                });
            }
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config).map_err(BuildError::Transport)?),
        };

        let mut resolvers = self.resolvers;
        resolvers.set_possible_types(self.cache.possible_types.clone());

        tracing::debug!(
            operations = catalog.len(),
            fragments = catalog.fragments().len(),
            "built client"
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                config: self.config,
                catalog: Arc::new(catalog),
                transport,
                resolvers,
                cache: NormalizedCache::new(self.cache),
                middlewares: self.middlewares,
            }),
        })
    }
}

/// The typed GraphQL client. Cloning is cheap and clones share the cache.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.config.url)
            .field("operations", &self.inner.catalog.len())
            .field("resolvers", &self.inner.resolvers)
            .finish_non_exhaustive()
    }
}

struct ClientInner {
    config: ClientConfig,
    catalog: Arc<OperationCatalog>,
    transport: Arc<dyn Transport>,
    resolvers: LocalResolvers,
    cache: NormalizedCache,
    middlewares: Vec<Middleware>,
}

impl Client {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn catalog(&self) -> &Arc<OperationCatalog> {
        &self.inner.catalog
    }

    pub fn cache(&self) -> &NormalizedCache {
        &self.inner.cache
    }

    /// Executes a typed operation once.
    ///
    /// Transport, server-reported (per the error policy) and decode
    /// failures all come back as the `Err` variant. Failed local resolvers
    /// do not fail the execution; see [`TypedResponse::local_errors`].
    pub async fn execute<Op: TypedOperation>(
        &self,
        variables: Op::Variables,
        options: &ExecuteOptions,
    ) -> SdkResult<TypedResponse<Op::Response>> {
        let variables = serde_json::to_value(&variables)
            .map_err(|e| SdkError::serialize(format!("failed to serialize variables: {e}")))?;
        self.execute_value::<Op>(variables, options).await
    }

    /// Executes a typed operation and returns its data.
    pub async fn execute_ok<Op: TypedOperation>(
        &self,
        variables: Op::Variables,
        options: &ExecuteOptions,
    ) -> SdkResult<Op::Response> {
        self.execute::<Op>(variables, options).await?.into_result()
    }

    pub(crate) async fn execute_value<Op: TypedOperation>(
        &self,
        variables: Json,
        options: &ExecuteOptions,
    ) -> SdkResult<TypedResponse<Op::Response>> {
        if options.skip {
            return Ok(TypedResponse::empty());
        }
        self.execute_raw(Op::NAME, variables, options).await?.decode()
    }

    /// Executes a registered operation by name, returning JSON data.
    pub async fn execute_raw(
        &self,
        name: &str,
        variables: Json,
        options: &ExecuteOptions,
    ) -> SdkResult<TypedResponse<Json>> {
        let operation = self
            .inner
            .catalog
            .get(name)
            .ok_or_else(|| SdkError::unknown_operation(name))?;
        let kind = OperationKind::from(operation.kind);
        if kind == OperationKind::Subscription {
            return Err(SdkError::new(
                ErrorCode::UnsupportedOperation,
                format!("subscription `{name}` cannot be executed as a request"),
            ));
        }

        if operation.is_local_only() {
            tracing::debug!(operation = name, "resolving local-only operation");
            return Ok(self.finish(operation, Json::Object(Default::default()), &variables));
        }

        if kind == OperationKind::Query && options.fetch_policy.reads_cache() {
            let cached = self
                .inner
                .cache
                .read(&operation.wire_document, name, &variables)
                .await;
            match cached {
                Some(data) => {
                    tracing::debug!(operation = name, "cache hit");
                    return Ok(self.finish(operation, data, &variables));
                }
                None if options.fetch_policy == crate::options::FetchPolicy::CacheOnly => {
                    return Err(SdkError::new(
                        ErrorCode::CacheMiss,
                        format!("`{name}` is not fully cached"),
                    ));
                }
                None => {}
            }
        }

        let request = Request::new(operation.wire_text.clone())
            .variables(wire_variables(operation, &variables))
            .operation_name(name);
        tracing::debug!(operation = name, kind = %kind, "sending request");
        let response = self.send(request, kind).await?;

        // Data next to errors holds nulls for the failed fields.
        if response.errors.is_empty() && options.fetch_policy.writes_cache() {
            if let Some(data) = &response.data {
                self.inner
                    .cache
                    .write(&operation.wire_document, name, data, &variables)
                    .await;
            }
        }

        let Response { data, errors } = response;
        if !errors.is_empty() {
            match options.error_policy {
                ErrorPolicy::None => return Err(SdkError::graphql(errors)),
                ErrorPolicy::Ignore => {
                    return Ok(data.map_or_else(TypedResponse::empty, |data| {
                        self.finish(operation, data, &variables)
                    }))
                }
                ErrorPolicy::All => {
                    let mut result = data.map_or_else(TypedResponse::empty, |data| {
                        self.finish(operation, data, &variables)
                    });
                    result.errors = errors;
                    return Ok(result);
                }
            }
        }

        match data {
            Some(data) => Ok(self.finish(operation, data, &variables)),
            None => Err(SdkError::new(ErrorCode::NoData, "no data in response")),
        }
    }

    /// Resolves local fields into wire data.
    fn finish(&self, operation: &CompiledOperation, mut data: Json, variables: &Json) -> TypedResponse<Json> {
        let local_errors = self.inner.resolvers.resolve(operation, &mut data, variables);
        TypedResponse {
            data: Some(data),
            errors: Vec::new(),
            local_errors,
        }
    }

    /// Sends a request through the middleware chain.
    async fn send(&self, request: Request, kind: OperationKind) -> SdkResult<Response> {
        if self.inner.middlewares.is_empty() {
            return send_with_retry(&self.inner, request, kind).await;
        }

        let inner = self.inner.clone();
        let final_handler: Next = Arc::new(move |req| {
            let inner = inner.clone();
            Box::pin(async move { send_with_retry(&inner, req, kind).await })
        });

        let mut next = final_handler;
        for middleware in self.inner.middlewares.iter().rev() {
            let mw = middleware.clone();
            let current_next = next;
            next = Arc::new(move |req| {
                let mw = mw.clone();
                let next = current_next.clone();
                Box::pin(async move { mw(req, next).await })
            });
        }

        next(request).await
    }
}

/// Variables declared by the wire operation. Variables only local fields
/// use are not sent.
fn wire_variables(operation: &CompiledOperation, variables: &Json) -> Json {
    let (Json::Object(values), Some(definition)) =
        (variables, operation.wire_document.operation(&operation.name))
    else {
        return variables.clone();
    };
    Json::Object(
        values
            .iter()
            .filter(|(key, _)| definition.variables.iter().any(|var| var.name.value == **key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    )
}

/// True when a failed attempt may be sent again.
///
/// A mutation is only retried when it never reached the server.
fn may_retry(err: &SdkError, kind: OperationKind) -> bool {
    match kind {
        OperationKind::Mutation => err.code == ErrorCode::ConnectionRefused,
        OperationKind::Query | OperationKind::Subscription => err.is_retryable(),
    }
}

/// Sends a request, retrying retryable transport errors with exponential
/// backoff.
async fn send_with_retry(inner: &ClientInner, request: Request, kind: OperationKind) -> SdkResult<Response> {
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            tokio::time::sleep(inner.config.retry_delay(attempt)).await;
        }

        match inner.transport.send(&request).await {
            Ok(response) => return Ok(response),
            Err(err) if may_retry(&err, kind) && attempt < inner.config.max_retries => {
                attempt += 1;
                tracing::warn!(
                    operation = request.operation_name.as_deref().unwrap_or_default(),
                    attempt,
                    error = %err,
                    "retrying request"
                );
            }
            Err(err) => return Err(err),
        }
    }
}
