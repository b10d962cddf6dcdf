//! Operation catalog.
//!
//! The catalog is built once, validated as a whole, and then shared
//! read-only by every client that executes operations from it.

use gqlbind_core::{diagnostics::codes, Diagnostic};
use gqlbind_syntax::{parse, print_compact, Definition, Document, OperationDefinition, OperationType};
use indexmap::IndexMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::compose::{compose, ComposeError};
use crate::local::{strip_local_fields, LocalField};
use crate::registry::{FragmentRegistry, FragmentRegistryBuilder, RegistryError};

/// An operation composed, parsed and ready to send.
#[derive(Debug, Clone)]
pub struct CompiledOperation {
    pub name: String,
    pub kind: OperationType,
    /// Parsed composed document, local fields included.
    pub document: Document,
    /// Composed document text, local fields included.
    pub text: String,
    /// Parsed wire document, local fields removed.
    pub wire_document: Document,
    /// Compact document actually transmitted, local fields removed.
    pub wire_text: String,
    /// Fragments included in the document, in emission order.
    pub fragments: Vec<String>,
    pub local_fields: Vec<LocalField>,
    local_only: bool,
}

impl CompiledOperation {
    /// The root operation definition.
    pub fn definition(&self) -> Option<&OperationDefinition> {
        self.document.operation(&self.name)
    }

    pub fn has_local_fields(&self) -> bool {
        !self.local_fields.is_empty()
    }

    /// True when every selected field is local and nothing needs fetching.
    pub fn is_local_only(&self) -> bool {
        self.local_only
    }

    /// Hex SHA-256 of the wire document.
    pub fn sha256(&self) -> String {
        hex::encode(Sha256::digest(self.wire_text.as_bytes()))
    }
}

/// Immutable set of compiled operations, keyed by operation name.
#[derive(Debug, Clone, Default)]
pub struct OperationCatalog {
    operations: IndexMap<String, CompiledOperation>,
    fragments: FragmentRegistry,
}

impl OperationCatalog {
    pub fn builder() -> OperationCatalogBuilder {
        OperationCatalogBuilder::new()
    }

    pub fn get(&self, name: &str) -> Option<&CompiledOperation> {
        self.operations.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledOperation> {
        self.operations.values()
    }

    pub fn fragments(&self) -> &FragmentRegistry {
        &self.fragments
    }

    /// Persisted-document manifest: operation name to wire document and hash.
    pub fn manifest(&self) -> Manifest {
        Manifest {
            operations: self
                .operations
                .values()
                .map(|op| {
                    let entry = ManifestEntry {
                        kind: op.kind.as_str().to_string(),
                        document: op.wire_text.clone(),
                        sha256: op.sha256(),
                        local_fields: op.local_fields.clone(),
                    };
                    (op.name.clone(), entry)
                })
                .collect(),
        }
    }
}

/// One manifest entry.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub kind: String,
    pub document: String,
    pub sha256: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub local_fields: Vec<LocalField>,
}

/// Persisted-document manifest.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct Manifest {
    pub operations: IndexMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn get(&self, name: &str) -> Option<&ManifestEntry> {
        self.operations.get(name)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Catalog build errors.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to parse {}: {}", describe(.operation), first_message(.diagnostics))]
    Parse {
        operation: Option<String>,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("invalid operation source: {message}")]
    InvalidOperationSource { message: String },

    #[error("operation must be named: `{source_text}`")]
    AnonymousOperation { source_text: String },

    #[error("duplicate operation definition: `{name}`")]
    DuplicateOperation { name: String },

    #[error("operation `{operation}`: {error}")]
    Compose {
        operation: String,
        #[source]
        error: ComposeError,
    },
}

fn describe(operation: &Option<String>) -> String {
    match operation {
        Some(name) => format!("operation `{name}`"),
        None => "document".to_string(),
    }
}

fn first_message(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .first()
        .map_or_else(|| "unknown error".to_string(), ToString::to_string)
}

impl CatalogError {
    /// Diagnostic code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Registry(err) => err.code(),
            Self::Parse { .. } => codes::INVALID_SYNTAX,
            Self::InvalidOperationSource { .. } => codes::INVALID_OPERATION_SOURCE,
            Self::AnonymousOperation { .. } => codes::ANONYMOUS_OPERATION,
            Self::DuplicateOperation { .. } => codes::DUPLICATE_OPERATION,
            Self::Compose {
                error: ComposeError::UndefinedFragment { .. },
                ..
            } => codes::UNDEFINED_FRAGMENT,
            Self::Compose {
                error: ComposeError::FragmentCycle { .. },
                ..
            } => codes::FRAGMENT_CYCLE,
        }
    }
}

/// Builder for an [`OperationCatalog`].
#[derive(Debug, Default)]
pub struct OperationCatalogBuilder {
    fragments: FragmentRegistryBuilder,
    operations: Vec<String>,
    errors: Vec<CatalogError>,
}

impl OperationCatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one named operation. Fragment spreads are resolved against
    /// the registered fragments at build time.
    pub fn add_operation(&mut self, source: impl Into<String>) -> &mut Self {
        self.operations.push(source.into());
        self
    }

    /// Registers a fragment by name.
    pub fn add_fragment(&mut self, name: impl Into<String>, source: impl Into<String>) -> &mut Self {
        self.fragments.add_fragment(name, source);
        self
    }

    /// Registers every operation and fragment definition of a document.
    pub fn add_document_str(&mut self, text: &str) -> &mut Self {
        let result = parse(text);
        if result.has_errors() {
            self.errors.push(CatalogError::Parse {
                operation: None,
                diagnostics: result.diagnostics.into_vec(),
            });
            return self;
        }

        for def in &result.document.definitions {
            match def {
                Definition::Operation(op) => {
                    self.operations.push(op.span.slice(text).to_string());
                }
                Definition::Fragment(frag) => {
                    self.fragments
                        .add_fragment(frag.name.value.clone(), frag.span.slice(text));
                }
            }
        }
        self
    }

    /// Compiles every registered operation, returning all errors found.
    pub fn build(self) -> Result<OperationCatalog, Vec<CatalogError>> {
        let mut errors = self.errors;

        let registry = match self.fragments.build() {
            Ok(registry) => Some(registry),
            Err(registry_errors) => {
                errors.extend(registry_errors.into_iter().map(CatalogError::Registry));
                None
            }
        };

        let mut operations: IndexMap<String, CompiledOperation> = IndexMap::new();
        for source in &self.operations {
            let (name, kind) = match root_operation(source) {
                Ok(root) => root,
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            };

            if operations.contains_key(&name) {
                errors.push(CatalogError::DuplicateOperation { name });
                continue;
            }

            // Composition needs a valid registry; root checks above still run.
            let Some(registry) = &registry else {
                continue;
            };

            match compile(source, name.clone(), kind, registry) {
                Ok(compiled) => {
                    tracing::debug!(
                        operation = %compiled.name,
                        fragments = compiled.fragments.len(),
                        local_fields = compiled.local_fields.len(),
                        "compiled operation"
                    );
                    operations.insert(name, compiled);
                }
                Err(err) => errors.push(err),
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(OperationCatalog {
            operations,
            fragments: registry.unwrap_or_default(),
        })
    }
}

/// Validates a root source and returns its operation name and kind.
fn root_operation(source: &str) -> Result<(String, OperationType), CatalogError> {
    let result = parse(source);
    if result.has_errors() {
        return Err(CatalogError::Parse {
            operation: None,
            diagnostics: result.diagnostics.into_vec(),
        });
    }

    let document = result.document;
    if document.fragments().next().is_some() {
        return Err(CatalogError::InvalidOperationSource {
            message: "operation sources must not define fragments".to_string(),
        });
    }

    let mut operations = document.operations();
    let (Some(op), None) = (operations.next(), operations.next()) else {
        return Err(CatalogError::InvalidOperationSource {
            message: "expected exactly one operation definition".to_string(),
        });
    };

    match &op.name {
        Some(name) => Ok((name.value.clone(), op.operation)),
        None => Err(CatalogError::AnonymousOperation {
            source_text: source.trim().to_string(),
        }),
    }
}

fn compile(
    source: &str,
    name: String,
    kind: OperationType,
    registry: &FragmentRegistry,
) -> Result<CompiledOperation, CatalogError> {
    let composed = compose(source, registry).map_err(|error| CatalogError::Compose {
        operation: name.clone(),
        error,
    })?;

    let parsed = parse(&composed.text);
    if parsed.has_errors() {
        return Err(CatalogError::Parse {
            operation: Some(name),
            diagnostics: parsed.diagnostics.into_vec(),
        });
    }

    let stripped = strip_local_fields(&parsed.document);
    let local_only = stripped.is_local_only();
    let wire_text = print_compact(&stripped.document);

    Ok(CompiledOperation {
        name,
        kind,
        document: parsed.document,
        text: composed.text,
        wire_document: stripped.document,
        wire_text,
        fragments: composed.fragments,
        local_fields: stripped.local_fields,
        local_only,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
        query GetUser($id: ID!) {
          user(id: $id) { ...UserFields }
        }

        mutation Rename($id: ID!, $name: String!) {
          rename(id: $id, name: $name) { ...UserFields }
        }

        fragment UserFields on User {
          id
          name
          initials @client
        }
    "#;

    fn catalog() -> OperationCatalog {
        let mut builder = OperationCatalog::builder();
        builder.add_document_str(DOCUMENT);
        builder.build().expect("valid catalog")
    }

    #[test]
    fn test_build_catalog_from_document() {
        let catalog = catalog();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.fragments().len(), 1);

        let get_user = catalog.get("GetUser").expect("GetUser");
        assert_eq!(get_user.kind, OperationType::Query);
        assert_eq!(get_user.fragments, vec!["UserFields"]);
        assert!(get_user.has_local_fields());
        assert!(!get_user.is_local_only());
        assert_eq!(
            get_user.wire_text,
            "query GetUser($id: ID!) { user(id: $id) { ...UserFields } } fragment UserFields on User { id name }"
        );
        assert!(get_user.text.contains("initials @client"));
        assert!(get_user.definition().is_some());

        assert_eq!(catalog.get("Rename").expect("Rename").kind, OperationType::Mutation);
    }

    #[test]
    fn test_manifest() {
        let manifest = catalog().manifest();
        let entry = manifest.get("GetUser").expect("entry");

        assert_eq!(entry.kind, "query");
        assert_eq!(entry.sha256.len(), 64);
        assert_eq!(entry.local_fields.len(), 1);

        let json: serde_json::Value =
            serde_json::from_str(&manifest.to_json_pretty().expect("serializes")).expect("json");
        assert_eq!(json["Rename"]["kind"], "mutation");
        assert!(json["GetUser"]["local_fields"].is_array());
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(
            catalog().get("GetUser").expect("op").sha256(),
            catalog().get("GetUser").expect("op").sha256()
        );
    }

    #[test]
    fn test_anonymous_operation_rejected() {
        let mut builder = OperationCatalog::builder();
        builder.add_operation("query { me { id } }");
        let errors = builder.build().expect_err("anonymous");
        assert_eq!(errors[0].code(), codes::ANONYMOUS_OPERATION);
    }

    #[test]
    fn test_duplicate_operation_rejected() {
        let mut builder = OperationCatalog::builder();
        builder
            .add_operation("query Me { me { id } }")
            .add_operation("query Me { me { name } }");
        let errors = builder.build().expect_err("duplicate");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "duplicate operation definition: `Me`");
    }

    #[test]
    fn test_operation_source_with_two_operations_rejected() {
        let mut builder = OperationCatalog::builder();
        builder.add_operation("query A { a } query B { b }");
        let errors = builder.build().expect_err("invalid");
        assert_eq!(errors[0].code(), codes::INVALID_OPERATION_SOURCE);
    }

    #[test]
    fn test_undefined_fragment_is_a_build_error() {
        let mut builder = OperationCatalog::builder();
        builder.add_operation("query Me { me { ...Missing } }");
        let errors = builder.build().expect_err("undefined");
        assert_eq!(errors[0].code(), codes::UNDEFINED_FRAGMENT);
        assert_eq!(
            errors[0].to_string(),
            "operation `Me`: undefined fragment `Missing` spread in the root operation"
        );
    }

    #[test]
    fn test_registry_and_root_errors_reported_together() {
        let mut builder = OperationCatalog::builder();
        builder
            .add_fragment("Loop", "fragment Loop on User { ...Loop }")
            .add_operation("query { anonymous }");
        let errors = builder.build().expect_err("errors");

        let found: Vec<_> = errors.iter().map(CatalogError::code).collect();
        assert_eq!(found, vec![codes::FRAGMENT_CYCLE, codes::ANONYMOUS_OPERATION]);
    }

    #[test]
    fn test_local_only_operation() {
        let mut builder = OperationCatalog::builder();
        builder.add_operation("query Prefs { theme @client }");
        let catalog = builder.build().expect("valid");
        assert!(catalog.get("Prefs").expect("op").is_local_only());
    }
}
