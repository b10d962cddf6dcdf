//! Typed client errors.
//!
//! Every failure an execution can produce (transport, server-reported,
//! decode, cache) is surfaced as one [`SdkError`] carrying an [`ErrorCode`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::wire::GraphQLError;

/// Typed error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // Transport errors
    NetworkError,
    Timeout,
    ConnectionRefused,
    ServiceUnavailable,

    // Protocol errors
    HttpError,
    TlsError,
    InvalidUrl,
    InvalidHeader,
    InvalidResponse,

    // GraphQL errors
    ExecutionError,
    NoData,

    // Binding errors
    UnknownOperation,
    UnsupportedOperation,
    CacheMiss,

    // Serialization errors
    SerializeError,
    DeserializeError,

    InternalError,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::ConnectionRefused => "CONNECTION_REFUSED",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::HttpError => "HTTP_ERROR",
            Self::TlsError => "TLS_ERROR",
            Self::InvalidUrl => "INVALID_URL",
            Self::InvalidHeader => "INVALID_HEADER",
            Self::InvalidResponse => "INVALID_RESPONSE",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::NoData => "NO_DATA",
            Self::UnknownOperation => "UNKNOWN_OPERATION",
            Self::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            Self::CacheMiss => "CACHE_MISS",
            Self::SerializeError => "SERIALIZE_ERROR",
            Self::DeserializeError => "DESERIALIZE_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Returns true if a request failing with this code may be retried.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::Timeout | Self::ConnectionRefused | Self::ServiceUnavailable
        )
    }

    /// Returns true if the error was reported by the server in a
    /// well-formed GraphQL response.
    pub const fn is_server_reported(&self) -> bool {
        matches!(self, Self::ExecutionError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Client error.
#[derive(Error, Debug, Clone)]
#[error("[{code}] {message}")]
pub struct SdkError {
    pub code: ErrorCode,
    pub message: String,
    /// Server-reported errors, for [`ErrorCode::ExecutionError`].
    pub graphql_errors: Vec<GraphQLError>,
    pub extensions: Option<HashMap<String, serde_json::Value>>,
}

impl SdkError {
    /// Creates a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            graphql_errors: Vec::new(),
            extensions: None,
        }
    }

    /// Adds extension data.
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let extensions = self.extensions.get_or_insert_with(HashMap::new);
        if let Ok(v) = serde_json::to_value(value) {
            extensions.insert(key.into(), v);
        }
        self
    }

    /// Creates an error from server-reported GraphQL errors.
    pub fn graphql(errors: Vec<GraphQLError>) -> Self {
        let message = match errors.as_slice() {
            [] => "server reported an error".to_string(),
            [only] => only.message.clone(),
            [first, rest @ ..] => format!("{} (and {} more)", first.message, rest.len()),
        };
        Self {
            code: ErrorCode::ExecutionError,
            message,
            graphql_errors: errors,
            extensions: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, message)
    }

    pub fn timeout() -> Self {
        Self::new(ErrorCode::Timeout, "request timed out")
    }

    pub fn unknown_operation(name: &str) -> Self {
        Self::new(
            ErrorCode::UnknownOperation,
            format!("operation `{name}` is not registered with this client"),
        )
    }

    pub fn serialize(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SerializeError, message)
    }

    pub fn deserialize(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DeserializeError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// The server-assigned `extensions.code` of the first GraphQL error.
    pub fn graphql_code(&self) -> Option<&str> {
        self.graphql_errors.iter().find_map(GraphQLError::code)
    }
}

impl PartialEq for SdkError {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
            && self.message == other.message
            && self.graphql_errors == other.graphql_errors
    }
}

impl Serialize for SdkError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("SdkError", 4)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        if !self.graphql_errors.is_empty() {
            state.serialize_field("errors", &self.graphql_errors)?;
        }
        if let Some(ref ext) = self.extensions {
            state.serialize_field("extensions", ext)?;
        }
        state.end()
    }
}

/// Type alias for SDK results.
pub type SdkResult<T> = std::result::Result<T, SdkError>;
