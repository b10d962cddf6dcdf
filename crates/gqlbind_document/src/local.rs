//! Removal of `@client` fields from wire documents.
//!
//! A field marked `@client` is resolved on the client after the response
//! is decoded, so it must never reach the server. Stripping it can leave
//! selection sets, inline fragments or whole fragments empty; those are
//! removed as well, together with spreads of removed fragments, fragments no
//! operation reaches anymore and variables only local fields used.

use gqlbind_syntax::ast::*;
use rustc_hash::FxHashSet;
use serde::Serialize;

/// Name of the local-only field directive.
pub const CLIENT_DIRECTIVE: &str = "client";

/// A local-only field removed from a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalField {
    /// Operation or fragment the field is selected in; `None` for an
    /// anonymous operation.
    pub definition: Option<String>,
    /// Response keys from the definition's root down to the field.
    pub path: Vec<String>,
    /// Nearest enclosing type condition, when one is spelled out.
    pub parent_type: Option<String>,
}

impl LocalField {
    /// Response key of the field itself.
    pub fn response_key(&self) -> &str {
        self.path.last().map_or("", String::as_str)
    }
}

/// A document with every local-only field removed.
#[derive(Debug, Clone)]
pub struct StrippedDocument {
    pub document: Document,
    pub local_fields: Vec<LocalField>,
}

impl StrippedDocument {
    /// True when no server field is left to fetch.
    pub fn is_local_only(&self) -> bool {
        let mut operations = self.document.operations().peekable();
        operations.peek().is_some() && operations.all(|op| op.selection_set.is_empty())
    }
}

/// Removes every `@client` field from `document`.
///
/// Local fields of fragments removed for being empty are still recorded.
pub fn strip_local_fields(document: &Document) -> StrippedDocument {
    let empty_fragments = empty_fragments(document);
    let had_operations = document.operations().next().is_some();
    let reachable_before = reachable_fragments(document.definitions.iter());

    let mut stripped: Vec<(Definition, Vec<LocalField>)> = Vec::new();
    let mut emptied_fields = Vec::new();
    for def in &document.definitions {
        let mut stripper = Stripper::new(&empty_fragments, definition_name(def));
        let stripped_def = stripper.strip_definition(def);
        match def {
            Definition::Fragment(frag) if empty_fragments.contains(&frag.name.value) => {
                if !had_operations || reachable_before.contains(&frag.name.value) {
                    emptied_fields.extend(stripper.local_fields);
                }
            }
            _ => stripped.push((stripped_def, stripper.local_fields)),
        }
    }

    let has_operations = stripped
        .iter()
        .any(|(def, _)| matches!(def, Definition::Operation(_)));
    let reachable = reachable_fragments(stripped.iter().map(|(def, _)| def));

    let mut definitions = Vec::with_capacity(stripped.len());
    let mut local_fields = Vec::new();
    for (def, fields) in stripped {
        if let Definition::Fragment(frag) = &def {
            if has_operations && !reachable.contains(&frag.name.value) {
                continue;
            }
        }
        definitions.push(def);
        local_fields.extend(fields);
    }
    local_fields.extend(emptied_fields);

    if !local_fields.is_empty() {
        drop_unused_variables(&mut definitions);
    }

    StrippedDocument {
        document: Document {
            definitions,
            span: document.span,
        },
        local_fields,
    }
}

/// Removes variable definitions no selection of the operation uses anymore.
fn drop_unused_variables(definitions: &mut [Definition]) {
    let used: Vec<Option<FxHashSet<String>>> = definitions
        .iter()
        .map(|def| match def {
            Definition::Operation(op) => Some(used_variables(op, definitions)),
            Definition::Fragment(_) => None,
        })
        .collect();

    for (def, used) in definitions.iter_mut().zip(used) {
        if let (Definition::Operation(op), Some(used)) = (def, used) {
            op.variables.retain(|var| used.contains(&var.name.value));
        }
    }
}

/// Variables referenced by an operation and the fragments it reaches.
fn used_variables<'a>(op: &'a OperationDefinition, definitions: &'a [Definition]) -> FxHashSet<String> {
    let mut used = FxHashSet::default();
    variables_in_directives(&op.directives, &mut used);

    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut sets = vec![&op.selection_set];
    while let Some(set) = sets.pop() {
        variables_in_set(set, &mut used);
        for name in set.fragment_spreads() {
            if !seen.insert(name) {
                continue;
            }
            let fragment = definitions.iter().find_map(|def| match def {
                Definition::Fragment(frag) if frag.name.value == name => Some(frag),
                _ => None,
            });
            if let Some(frag) = fragment {
                variables_in_directives(&frag.directives, &mut used);
                sets.push(&frag.selection_set);
            }
        }
    }
    used
}

fn variables_in_set(set: &SelectionSet, used: &mut FxHashSet<String>) {
    for selection in &set.selections {
        variables_in_directives(selection.directives(), used);
        match selection {
            Selection::Field(field) => {
                for arg in &field.arguments {
                    variables_in_value(&arg.value, used);
                }
                if let Some(sub) = &field.selection_set {
                    variables_in_set(sub, used);
                }
            }
            Selection::FragmentSpread(_) => {}
            Selection::InlineFragment(inline) => variables_in_set(&inline.selection_set, used),
        }
    }
}

fn variables_in_directives(directives: &[Directive], used: &mut FxHashSet<String>) {
    for arg in directives.iter().flat_map(|d| &d.arguments) {
        variables_in_value(&arg.value, used);
    }
}

fn variables_in_value(value: &Value, used: &mut FxHashSet<String>) {
    match value {
        Value::Variable(name) => {
            used.insert(name.value.clone());
        }
        Value::List(items, _) => items.iter().for_each(|item| variables_in_value(item, used)),
        Value::Object(fields, _) => fields.iter().for_each(|(_, item)| variables_in_value(item, used)),
        _ => {}
    }
}

fn definition_name(def: &Definition) -> Option<String> {
    match def {
        Definition::Operation(op) => op.name.as_ref().map(|n| n.value.clone()),
        Definition::Fragment(frag) => Some(frag.name.value.clone()),
    }
}

/// Fragments whose selection set is empty once local fields are gone.
///
/// Emptiness propagates through spreads, so this iterates to a fixpoint.
fn empty_fragments(document: &Document) -> FxHashSet<String> {
    let mut empty = FxHashSet::default();
    loop {
        let next: FxHashSet<String> = document
            .fragments()
            .filter(|frag| {
                let mut stripper = Stripper::new(&empty, None);
                stripper
                    .strip_set(&frag.selection_set, &mut Vec::new(), None)
                    .is_empty()
            })
            .map(|frag| frag.name.value.clone())
            .collect();
        if next == empty {
            return empty;
        }
        empty = next;
    }
}

fn reachable_fragments<'a>(definitions: impl Iterator<Item = &'a Definition> + Clone) -> FxHashSet<String> {
    let mut reachable = FxHashSet::default();
    let mut pending: Vec<String> = definitions
        .clone()
        .filter_map(|def| match def {
            Definition::Operation(op) => Some(op.selection_set.fragment_spreads()),
            Definition::Fragment(_) => None,
        })
        .flatten()
        .map(str::to_string)
        .collect();

    while let Some(name) = pending.pop() {
        if !reachable.insert(name.clone()) {
            continue;
        }
        let fragment = definitions.clone().find_map(|def| match def {
            Definition::Fragment(frag) if frag.name.value == name => Some(frag),
            _ => None,
        });
        if let Some(frag) = fragment {
            pending.extend(
                frag.selection_set
                    .fragment_spreads()
                    .into_iter()
                    .map(str::to_string),
            );
        }
    }

    reachable
}

struct Stripper<'a> {
    empty_fragments: &'a FxHashSet<String>,
    definition: Option<String>,
    local_fields: Vec<LocalField>,
}

impl<'a> Stripper<'a> {
    fn new(empty_fragments: &'a FxHashSet<String>, definition: Option<String>) -> Self {
        Self {
            empty_fragments,
            definition,
            local_fields: Vec::new(),
        }
    }

    fn strip_definition(&mut self, def: &Definition) -> Definition {
        let mut path = Vec::new();
        match def {
            Definition::Operation(op) => Definition::Operation(OperationDefinition {
                selection_set: self.strip_set(&op.selection_set, &mut path, None),
                ..op.clone()
            }),
            Definition::Fragment(frag) => Definition::Fragment(FragmentDefinition {
                selection_set: self.strip_set(
                    &frag.selection_set,
                    &mut path,
                    Some(&frag.type_condition.value),
                ),
                ..frag.clone()
            }),
        }
    }

    fn strip_set(
        &mut self,
        set: &SelectionSet,
        path: &mut Vec<String>,
        parent_type: Option<&str>,
    ) -> SelectionSet {
        let mut selections = Vec::with_capacity(set.selections.len());

        for selection in &set.selections {
            match selection {
                Selection::Field(field) if field.has_directive(CLIENT_DIRECTIVE) => {
                    let mut field_path = path.clone();
                    field_path.push(field.response_key().to_string());
                    self.local_fields.push(LocalField {
                        definition: self.definition.clone(),
                        path: field_path,
                        parent_type: parent_type.map(str::to_string),
                    });
                }
                Selection::Field(field) => {
                    let Some(sub) = &field.selection_set else {
                        selections.push(selection.clone());
                        continue;
                    };
                    path.push(field.response_key().to_string());
                    let stripped = self.strip_set(sub, path, None);
                    path.pop();
                    if stripped.is_empty() && !sub.is_empty() {
                        continue;
                    }
                    selections.push(Selection::Field(Field {
                        selection_set: Some(stripped),
                        ..field.clone()
                    }));
                }
                Selection::FragmentSpread(spread) => {
                    if !self.empty_fragments.contains(&spread.name.value) {
                        selections.push(selection.clone());
                    }
                }
                Selection::InlineFragment(inline) => {
                    let type_condition = inline
                        .type_condition
                        .as_ref()
                        .map(|n| n.value.as_str())
                        .or(parent_type);
                    let stripped = self.strip_set(&inline.selection_set, path, type_condition);
                    if stripped.is_empty() {
                        continue;
                    }
                    selections.push(Selection::InlineFragment(InlineFragment {
                        selection_set: stripped,
                        ..inline.clone()
                    }));
                }
            }
        }

        SelectionSet {
            selections,
            span: set.span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gqlbind_syntax::{parse, print_compact};

    fn strip(source: &str) -> (String, StrippedDocument) {
        let result = parse(source);
        assert!(!result.has_errors());
        let stripped = strip_local_fields(&result.document);
        (print_compact(&stripped.document), stripped)
    }

    #[test]
    fn test_strips_client_field() {
        let (wire, stripped) = strip("query Q { me { id plaintext: decrypted @client } }");

        assert_eq!(wire, "query Q { me { id } }");
        assert_eq!(
            stripped.local_fields,
            vec![LocalField {
                definition: Some("Q".into()),
                path: vec!["me".into(), "plaintext".into()],
                parent_type: None,
            }]
        );
        assert_eq!(stripped.local_fields[0].response_key(), "plaintext");
    }

    #[test]
    fn test_drops_fields_left_empty() {
        let (wire, _) = strip("query Q { me { id } prefs { theme @client } }");
        assert_eq!(wire, "query Q { me { id } }");
    }

    #[test]
    fn test_drops_empty_fragments_and_their_spreads() {
        let (wire, stripped) = strip(
            "query Q { me { id ...Local } } fragment Local on User { decrypted @client }",
        );

        assert_eq!(wire, "query Q { me { id } }");
        assert!(stripped.document.fragment("Local").is_none());
        assert_eq!(
            stripped.local_fields,
            vec![LocalField {
                definition: Some("Local".into()),
                path: vec!["decrypted".into()],
                parent_type: Some("User".into()),
            }]
        );
    }

    #[test]
    fn test_records_fields_of_nested_emptied_fragments() {
        let (_, stripped) = strip(
            "query Q { me { id ...Outer } } fragment Outer on User { ...Inner } fragment Inner on User { x @client } fragment Stray on User { y @client }",
        );
        let keys: Vec<_> = stripped.local_fields.iter().map(LocalField::response_key).collect();
        assert_eq!(keys, vec!["x"]);
    }

    #[test]
    fn test_drops_variables_only_local_fields_use() {
        let (wire, _) = strip(
            "query Q($fmt: String, $id: ID!) { node(id: $id) { id label(format: $fmt) @client } }",
        );
        assert_eq!(wire, "query Q($id: ID!) { node(id: $id) { id } }");
    }

    #[test]
    fn test_keeps_variables_used_in_fragments_and_directives() {
        let (wire, _) = strip(
            "query Q($fmt: String, $full: Boolean!) { me { id ...Info @include(if: $full) label(format: $fmt) @client } } fragment Info on User { name(format: $fmt) }",
        );
        assert_eq!(
            wire,
            "query Q($fmt: String, $full: Boolean!) { me { id ...Info @include(if: $full) } } fragment Info on User { name(format: $fmt) }"
        );
    }

    #[test]
    fn test_empty_fragments_propagate() {
        let (wire, _) = strip(
            "query Q { me { id ...Outer } } fragment Outer on User { ...Inner } fragment Inner on User { x @client }",
        );
        assert_eq!(wire, "query Q { me { id } }");
    }

    #[test]
    fn test_records_fragment_type_condition() {
        let (wire, stripped) = strip(
            "query Q { doc { ...Doc } } fragment Doc on Document { id body @client ... on Sheet { cells @client rows } }",
        );

        assert_eq!(
            wire,
            "query Q { doc { ...Doc } } fragment Doc on Document { id ... on Sheet { rows } }"
        );
        let parents: Vec<_> = stripped
            .local_fields
            .iter()
            .map(|f| f.parent_type.as_deref())
            .collect();
        assert_eq!(parents, vec![Some("Document"), Some("Sheet")]);
    }

    #[test]
    fn test_document_without_local_fields_is_unchanged() {
        let source = "query Q($id: ID!) { node(id: $id) { id ...F } } fragment F on Node { id }";
        let (wire, stripped) = strip(source);
        assert_eq!(wire, print_compact(&parse(source).document));
        assert!(stripped.local_fields.is_empty());
        assert!(!stripped.is_local_only());
    }

    #[test]
    fn test_local_only_operation() {
        let (_, stripped) = strip("query Prefs { theme @client locale @client }");
        assert!(stripped.is_local_only());
        assert_eq!(stripped.local_fields.len(), 2);
    }

    #[test]
    fn test_drops_unreferenced_fragments() {
        let (wire, _) = strip("query Q { me { id } } fragment Unused on User { id }");
        assert_eq!(wire, "query Q { me { id } }");
    }
}
