//! Typed operation bindings.
//!
//! Each operation is a marker type binding a registered document to a
//! variables type and a response type:
//!
//! ```ignore
//! use gqlbind_sdk::{operation, NoVariables};
//!
//! operation! {
//!     /// Loads the signed-in user.
//!     pub CurrentUser: Query(NoVariables) -> CurrentUserData = r#"
//!         query CurrentUser {
//!           currentUser { ...UserInfo isSelected @client }
//!         }
//!     "#;
//! }
//!
//! let response = client.execute::<CurrentUser>(NoVariables, &Default::default()).await?;
//! ```

use gqlbind_syntax::OperationType;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{ErrorCode, SdkError, SdkResult};
use crate::local::LocalError;
use crate::wire::GraphQLError;

/// A GraphQL operation bound to its variables and response types.
///
/// `SOURCE` is the root operation text. Fragments it spreads are resolved
/// against the fragments registered with the client when the client is
/// built, so an undefined spread fails there rather than on first use.
pub trait TypedOperation: Send + Sync + 'static {
    /// The input variables type.
    type Variables: Serialize + Send + Sync + 'static;

    /// The response data type.
    type Response: DeserializeOwned + Send + Sync + 'static;

    /// Operation name, as written in `SOURCE`.
    const NAME: &'static str;

    const KIND: OperationKind;

    /// Root operation text.
    const SOURCE: &'static str;
}

/// The kind of GraphQL operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }
}

impl From<OperationType> for OperationKind {
    fn from(kind: OperationType) -> Self {
        match kind {
            OperationType::Query => Self::Query,
            OperationType::Mutation => Self::Mutation,
            OperationType::Subscription => Self::Subscription,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker type for operations without variables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NoVariables;

/// Response type for operations decoded as raw JSON.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawResponse(pub serde_json::Value);

impl std::ops::Deref for RawResponse {
    type Target = serde_json::Value;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Declares marker types implementing [`TypedOperation`].
///
/// The marker type's name is the operation name.
#[macro_export]
macro_rules! operation {
    ($(
        $(#[$meta:meta])*
        $vis:vis $name:ident : $kind:ident ($vars:ty) -> $response:ty = $source:expr;
    )+) => {$(
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default)]
        $vis struct $name;

        impl $crate::TypedOperation for $name {
            type Variables = $vars;
            type Response = $response;

            const NAME: &'static str = stringify!($name);
            const KIND: $crate::OperationKind = $crate::OperationKind::$kind;
            const SOURCE: &'static str = $source;
        }
    )+};
}

/// A decoded response.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedResponse<T> {
    pub data: Option<T>,
    /// Server-reported errors kept by the error policy.
    pub errors: Vec<GraphQLError>,
    /// Local field resolvers that failed; their fields are `null`.
    pub local_errors: Vec<LocalError>,
}

impl<T> TypedResponse<T> {
    /// A response with no data, as returned for skipped executions.
    pub fn empty() -> Self {
        Self {
            data: None,
            errors: Vec::new(),
            local_errors: Vec::new(),
        }
    }

    /// Returns true if the response has server-reported errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns the data if present and no server errors were kept.
    pub fn into_result(self) -> SdkResult<T> {
        if !self.errors.is_empty() {
            return Err(SdkError::graphql(self.errors));
        }

        self.data
            .ok_or_else(|| SdkError::new(ErrorCode::NoData, "no data in response"))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TypedResponse<U> {
        TypedResponse {
            data: self.data.map(f),
            errors: self.errors,
            local_errors: self.local_errors,
        }
    }
}

impl TypedResponse<serde_json::Value> {
    /// Decodes the JSON data into `T`.
    pub fn decode<T: DeserializeOwned>(self) -> SdkResult<TypedResponse<T>> {
        let data = match self.data {
            Some(value) => Some(serde_json::from_value(value).map_err(|e| {
                SdkError::deserialize(format!("failed to deserialize response: {e}"))
            })?),
            None => None,
        };

        Ok(TypedResponse {
            data,
            errors: self.errors,
            local_errors: self.local_errors,
        })
    }
}
