//! Helpers shared by walks over a selection set and its response data.

use gqlbind_syntax::ast::{Argument, Directive, OperationDefinition, Value};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value as Json};

/// Concrete types of abstract (interface or union) types.
///
/// Type conditions are matched against an object's `__typename`. A
/// condition matches when it names the object's type, when it is an
/// abstract type listing that type, or when the object has no
/// `__typename` to check.
#[derive(Debug, Clone, Default)]
pub struct PossibleTypes {
    types: FxHashMap<String, FxHashSet<String>>,
}

impl PossibleTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the concrete types of an interface or union.
    pub fn insert<I, S>(&mut self, abstract_type: impl Into<String>, concrete: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types
            .entry(abstract_type.into())
            .or_default()
            .extend(concrete.into_iter().map(Into::into));
    }

    pub fn matches(&self, condition: &str, typename: Option<&str>) -> bool {
        let Some(typename) = typename else {
            return true;
        };
        condition == typename
            || self
                .types
                .get(condition)
                .is_some_and(|concrete| concrete.contains(typename))
    }
}

/// Variables of an operation with declared defaults filled in.
pub(crate) fn effective_variables(
    operation: Option<&OperationDefinition>,
    variables: &Json,
) -> Map<String, Json> {
    let mut effective = match variables {
        Json::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Some(operation) = operation {
        for definition in &operation.variables {
            if effective.contains_key(&definition.name.value) {
                continue;
            }
            if let Some(default) = &definition.default_value {
                effective.insert(
                    definition.name.value.clone(),
                    value_to_json(default, &Map::new()),
                );
            }
        }
    }
    effective
}

/// Converts an argument value, substituting variables.
pub(crate) fn value_to_json(value: &Value, variables: &Map<String, Json>) -> Json {
    match value {
        Value::Variable(name) => variables.get(&name.value).cloned().unwrap_or(Json::Null),
        Value::Int(i, _) => Json::from(*i),
        Value::Float(f, _) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::String(s, _) => Json::String(s.clone()),
        Value::Boolean(b, _) => Json::Bool(*b),
        Value::Null(_) => Json::Null,
        Value::Enum(name) => Json::String(name.value.clone()),
        Value::List(items, _) => Json::Array(
            items
                .iter()
                .map(|item| value_to_json(item, variables))
                .collect(),
        ),
        Value::Object(fields, _) => Json::Object(
            fields
                .iter()
                .map(|(name, value)| (name.value.clone(), value_to_json(value, variables)))
                .collect(),
        ),
    }
}

pub(crate) fn arguments_to_json(
    arguments: &[Argument],
    variables: &Map<String, Json>,
) -> Map<String, Json> {
    arguments
        .iter()
        .map(|arg| (arg.name.value.clone(), value_to_json(&arg.value, variables)))
        .collect()
}

/// Evaluates `@skip(if:)` and `@include(if:)`.
pub(crate) fn is_included(directives: &[Directive], variables: &Map<String, Json>) -> bool {
    let condition = |directive: &Directive| {
        directive
            .arguments
            .iter()
            .find(|arg| arg.name.value == "if")
            .map(|arg| value_to_json(&arg.value, variables))
            .and_then(|value| value.as_bool())
    };

    for directive in directives {
        if directive.is("skip") && condition(directive) == Some(true) {
            return false;
        }
        if directive.is("include") && condition(directive) == Some(false) {
            return false;
        }
    }
    true
}

/// Merges `incoming` into `target`, recursing into objects present on both
/// sides. Everything else is replaced.
pub(crate) fn deep_merge(target: &mut Map<String, Json>, incoming: Map<String, Json>) {
    for (key, value) in incoming {
        let Json::Object(object) = value else {
            target.insert(key, value);
            continue;
        };
        if let Some(Json::Object(existing)) = target.get_mut(&key) {
            if !is_reference(existing) && !is_reference(&object) {
                deep_merge(existing, object);
                continue;
            }
        }
        target.insert(key, Json::Object(object));
    }
}

pub(crate) const REFERENCE_KEY: &str = "__ref";

pub(crate) fn is_reference(object: &Map<String, Json>) -> bool {
    object.len() == 1 && object.contains_key(REFERENCE_KEY)
}

pub(crate) fn typename(object: &Map<String, Json>) -> Option<&str> {
    object.get("__typename").and_then(Json::as_str)
}
