//! gqlbind SDK
//!
//! A typed GraphQL client built around a validated operation catalog:
//! operations are composed with their fragments once, `@client` fields are
//! stripped from what goes on the wire and resolved locally after decode,
//! and results are merged into a normalized cache.
//!
//! ```ignore
//! use gqlbind_sdk::{operation, Client, ClientConfig, ExecuteOptions, LocalResolvers};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize)]
//! struct GetDocumentVars { id: String }
//!
//! #[derive(Clone, Deserialize)]
//! struct GetDocumentData { document: Option<Document> }
//!
//! operation! {
//!     pub GetDocument: Query(GetDocumentVars) -> GetDocumentData = r#"
//!         query GetDocument($id: String!) {
//!           document(id: $id) { ...DocumentBasicInfo ...DocumentContents }
//!         }
//!     "#;
//! }
//!
//! let client = Client::builder(ClientConfig::new("http://localhost:4000/graphql"))
//!     .fragments(FRAGMENTS)
//!     .operation::<GetDocument>()
//!     .local_resolvers(LocalResolvers::new().field("Document", "plaintext", decrypt))
//!     .build()?;
//!
//! // Deferred: nothing runs until triggered.
//! let lazy = client.lazy::<GetDocument>(ExecuteOptions::default());
//! let response = lazy.trigger(GetDocumentVars { id: "d1".into() }).await?;
//! ```

pub mod batch;
pub mod cache;
pub mod client;
pub mod error;
pub mod handle;
pub mod local;
pub mod options;
mod selection;
pub mod transport;
pub mod typed;
pub mod wire;

pub use batch::{BatchError, BatchResult, BatchResults};
pub use cache::{CacheConfig, NormalizedCache};
pub use client::{BuildError, Client, ClientBuilder, ClientConfig, Middleware, Next};
pub use error::{ErrorCode, SdkError, SdkResult};
pub use handle::{LazyQuery, Mutation, QueryHandle, QueryState};
pub use local::{BoxError, LocalContext, LocalError, LocalResolverFn, LocalResolvers};
pub use options::{ErrorPolicy, ExecuteOptions, FetchPolicy};
pub use selection::PossibleTypes;
pub use transport::{HttpTransport, Transport};
pub use typed::{NoVariables, OperationKind, RawResponse, TypedOperation, TypedResponse};
pub use wire::{GraphQLError, Request, Response};

pub use gqlbind_document::{CatalogError, CompiledOperation, OperationCatalog};
