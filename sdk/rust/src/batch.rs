//! Per-item results of batch mutations.
//!
//! A batch mutation returns one entry per input, each either a success
//! object or an error object, told apart by `__typename`. Decoding keeps the
//! tag, so one failed item never fails the whole batch.

use std::collections::HashMap;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};

/// The error object of a batch item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchError {
    #[serde(rename = "__typename", default = "BatchError::default_typename")]
    pub typename: String,
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub extensions: Option<HashMap<String, serde_json::Value>>,
}

impl BatchError {
    pub const TYPENAME: &'static str = "BatchError";

    fn default_typename() -> String {
        Self::TYPENAME.to_string()
    }

    /// True for `__typename`s decoded as errors: `BatchError` and any other
    /// type whose name ends in `Error`.
    pub fn is_error_typename(typename: &str) -> bool {
        typename == Self::TYPENAME || typename.ends_with("Error")
    }
}

/// One item of a batch result.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchResult<T> {
    Success(T),
    Error(BatchError),
}

impl<T> BatchResult<T> {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&BatchError> {
        match self {
            Self::Success(_) => None,
            Self::Error(error) => Some(error),
        }
    }

    pub fn into_result(self) -> Result<T, BatchError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Error(error) => Err(error),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for BatchResult<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let typename = value
            .get("__typename")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| D::Error::missing_field("__typename"))?;

        if BatchError::is_error_typename(typename) {
            serde_json::from_value(value)
                .map(Self::Error)
                .map_err(D::Error::custom)
        } else {
            serde_json::from_value(value)
                .map(Self::Success)
                .map_err(D::Error::custom)
        }
    }
}

/// Helpers over a decoded batch.
pub trait BatchResults<T> {
    /// Indexes and values of successful items.
    fn successes(&self) -> Vec<(usize, &T)>;

    /// Indexes and errors of failed items.
    fn errors(&self) -> Vec<(usize, &BatchError)>;
}

impl<T> BatchResults<T> for [BatchResult<T>] {
    fn successes(&self) -> Vec<(usize, &T)> {
        self.iter()
            .enumerate()
            .filter_map(|(index, item)| item.success().map(|value| (index, value)))
            .collect()
    }

    fn errors(&self) -> Vec<(usize, &BatchError)> {
        self.iter()
            .enumerate()
            .filter_map(|(index, item)| item.error().map(|error| (index, error)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct CreatedDocument {
        document: DocumentRef,
    }

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct DocumentRef {
        id: String,
    }

    #[test]
    fn test_partial_batch_keeps_item_tags() {
        let items: Vec<BatchResult<CreatedDocument>> = serde_json::from_value(json!([
            { "__typename": "CreateDocumentSuccess", "document": { "id": "d1" } },
            {
                "__typename": "BatchError",
                "message": "Parent folder not found",
                "code": "NOT_FOUND",
                "extensions": { "index": 1 }
            },
            { "__typename": "CreateDocumentSuccess", "document": { "id": "d3" } }
        ]))
        .unwrap();

        assert!(!items[0].is_error());
        assert!(items[1].is_error());
        assert!(!items[2].is_error());

        let successes: Vec<usize> = items.successes().into_iter().map(|(i, _)| i).collect();
        assert_eq!(successes, vec![0, 2]);

        let errors = items.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, 1);
        assert_eq!(errors[0].1.code.as_deref(), Some("NOT_FOUND"));
        assert_eq!(errors[0].1.extensions.as_ref().unwrap()["index"], 1);
    }

    #[test]
    fn test_error_typename_suffix() {
        let item: BatchResult<CreatedDocument> = serde_json::from_value(json!({
            "__typename": "QuotaExceededError",
            "message": "Storage quota exceeded"
        }))
        .unwrap();

        let error = item.into_result().unwrap_err();
        assert_eq!(error.typename, "QuotaExceededError");
        assert_eq!(error.code, None);
    }

    #[test]
    fn test_missing_typename_is_rejected() {
        let result: Result<BatchResult<CreatedDocument>, _> =
            serde_json::from_value(json!({ "document": { "id": "d1" } }));
        assert!(result.unwrap_err().to_string().contains("__typename"));
    }
}
