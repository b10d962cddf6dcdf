//! Local field resolution.
//!
//! Fields marked `@client` never reach the server. After a response is
//! decoded, each one is computed by a registered resolver from its parent
//! object and spliced in under its response key, so callers see it exactly
//! like a server field.
//!
//! A resolver that fails, or a field without a resolver, yields `null` and a
//! [`LocalError`]; the rest of the result is kept.

use std::sync::Arc;

use gqlbind_document::{CompiledOperation, CLIENT_DIRECTIVE};
use gqlbind_syntax::ast::{Document, Field, Selection, SelectionSet};
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::selection::{arguments_to_json, effective_variables, is_included, typename, PossibleTypes};

/// Error type returned by local resolvers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A local field resolver.
pub type LocalResolverFn = Arc<dyn Fn(&LocalContext<'_>) -> Result<Json, BoxError> + Send + Sync>;

/// What a resolver sees.
#[derive(Debug)]
pub struct LocalContext<'a> {
    /// The parent object, server fields and earlier local fields included.
    pub parent: &'a Map<String, Json>,
    /// The parent's `__typename`, or the enclosing type condition.
    pub parent_type: Option<&'a str>,
    pub field_name: &'a str,
    pub arguments: Map<String, Json>,
    pub variables: &'a Map<String, Json>,
}

/// A local field that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalError {
    pub message: String,
    /// Response path of the field, like a GraphQL error path.
    pub path: Vec<Json>,
}

impl std::fmt::Display for LocalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path: Vec<String> = self
            .path
            .iter()
            .map(|segment| match segment {
                Json::String(key) => key.clone(),
                other => other.to_string(),
            })
            .collect();
        write!(f, "{}: {}", path.join("."), self.message)
    }
}

/// Resolvers for `@client` fields.
///
/// A resolver is registered for `Type.field`, or for `field` on any type.
/// The typed registration wins when both match.
#[derive(Clone, Default)]
pub struct LocalResolvers {
    resolvers: FxHashMap<String, LocalResolverFn>,
    possible_types: PossibleTypes,
}

impl std::fmt::Debug for LocalResolvers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.resolvers.keys().collect();
        keys.sort();
        f.debug_struct("LocalResolvers")
            .field("resolvers", &keys)
            .finish_non_exhaustive()
    }
}

impl LocalResolvers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resolver for `field` on `type_name`.
    pub fn field<F>(mut self, type_name: &str, field: &str, resolver: F) -> Self
    where
        F: Fn(&LocalContext<'_>) -> Result<Json, BoxError> + Send + Sync + 'static,
    {
        self.resolvers
            .insert(format!("{type_name}.{field}"), Arc::new(resolver));
        self
    }

    /// Registers a resolver for `field` on every type.
    pub fn any_type<F>(mut self, field: &str, resolver: F) -> Self
    where
        F: Fn(&LocalContext<'_>) -> Result<Json, BoxError> + Send + Sync + 'static,
    {
        self.resolvers.insert(field.to_string(), Arc::new(resolver));
        self
    }

    pub(crate) fn set_possible_types(&mut self, possible_types: PossibleTypes) {
        self.possible_types = possible_types;
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Finds the resolver for `field` on `type_name`.
    pub fn lookup(&self, type_name: Option<&str>, field: &str) -> Option<&LocalResolverFn> {
        type_name
            .and_then(|ty| self.resolvers.get(&format!("{ty}.{field}")))
            .or_else(|| self.resolvers.get(field))
    }

    /// Resolves every local field of `operation` into `data`.
    pub fn resolve(
        &self,
        operation: &CompiledOperation,
        data: &mut Json,
        variables: &Json,
    ) -> Vec<LocalError> {
        if !operation.has_local_fields() {
            return Vec::new();
        }
        let Some(definition) = operation.definition() else {
            return Vec::new();
        };

        let variables = effective_variables(Some(definition), variables);
        let mut walk = Walk {
            resolvers: self,
            document: &operation.document,
            variables: &variables,
            path: Vec::new(),
            errors: Vec::new(),
        };
        let root_type = match operation.kind {
            gqlbind_syntax::OperationType::Query => "Query",
            gqlbind_syntax::OperationType::Mutation => "Mutation",
            gqlbind_syntax::OperationType::Subscription => "Subscription",
        };
        walk.value(&definition.selection_set, data, Some(root_type));
        walk.errors
    }
}

struct Walk<'a> {
    resolvers: &'a LocalResolvers,
    document: &'a Document,
    variables: &'a Map<String, Json>,
    path: Vec<Json>,
    errors: Vec<LocalError>,
}

impl Walk<'_> {
    fn value(&mut self, set: &SelectionSet, value: &mut Json, static_type: Option<&str>) {
        match value {
            Json::Object(object) => self.object(set, object, static_type),
            Json::Array(items) => {
                for (index, item) in items.iter_mut().enumerate() {
                    self.path.push(Json::from(index));
                    self.value(set, item, static_type);
                    self.path.pop();
                }
            }
            _ => {}
        }
    }

    fn object(&mut self, set: &SelectionSet, object: &mut Map<String, Json>, static_type: Option<&str>) {
        for selection in &set.selections {
            if !is_included(selection.directives(), self.variables) {
                continue;
            }
            match selection {
                Selection::Field(field) if field.has_directive(CLIENT_DIRECTIVE) => {
                    self.local_field(field, object, static_type);
                }
                Selection::Field(field) => {
                    let Some(sub) = &field.selection_set else {
                        continue;
                    };
                    let key = field.response_key();
                    if let Some(child) = object.get_mut(key) {
                        self.path.push(Json::from(key));
                        self.value(sub, child, None);
                        self.path.pop();
                    }
                }
                Selection::FragmentSpread(spread) => {
                    let Some(fragment) = self.document.fragment(&spread.name.value) else {
                        continue;
                    };
                    let condition = fragment.type_condition.value.as_str();
                    if self.applies(condition, object) {
                        self.object(&fragment.selection_set, object, Some(condition));
                    }
                }
                Selection::InlineFragment(inline) => {
                    let condition = inline.type_condition.as_ref().map(|n| n.value.as_str());
                    if condition.map_or(true, |c| self.applies(c, object)) {
                        self.object(&inline.selection_set, object, condition.or(static_type));
                    }
                }
            }
        }
    }

    fn applies(&self, condition: &str, object: &Map<String, Json>) -> bool {
        self.resolvers
            .possible_types
            .matches(condition, typename(object))
    }

    fn local_field(&mut self, field: &Field, object: &mut Map<String, Json>, static_type: Option<&str>) {
        let key = field.response_key().to_string();
        let field_name = field.name.value.as_str();
        self.path.push(Json::from(key.as_str()));

        let parent_type = typename(object).or(static_type);
        let outcome = match self.resolvers.lookup(parent_type, field_name) {
            Some(resolver) => {
                let ctx = LocalContext {
                    parent: object,
                    parent_type,
                    field_name,
                    arguments: arguments_to_json(&field.arguments, self.variables),
                    variables: self.variables,
                };
                resolver(&ctx).map_err(|e| e.to_string())
            }
            None => Err(format!(
                "no local resolver for `{}`",
                parent_type.map_or_else(|| field_name.to_string(), |ty| format!("{ty}.{field_name}"))
            )),
        };

        let mut value = match outcome {
            Ok(value) => value,
            Err(message) => {
                tracing::warn!(path = ?self.path, %message, "local field resolution failed");
                self.errors.push(LocalError {
                    message,
                    path: self.path.clone(),
                });
                Json::Null
            }
        };

        if let Some(sub) = &field.selection_set {
            self.value(sub, &mut value, None);
        }
        object.insert(key, value);
        self.path.pop();
    }
}
