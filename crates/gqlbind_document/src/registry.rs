//! Fragment registry.
//!
//! Fragments are collected through [`FragmentRegistryBuilder`] and validated
//! as a whole when the registry is built: duplicate names, spreads of
//! undefined fragments and spread cycles are all reported together.

use gqlbind_core::{diagnostics::codes, Diagnostic};
use gqlbind_syntax::parse;
use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::spread::fragment_spreads;

/// A named fragment and the fragments it spreads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub name: String,
    /// Source text as registered: a full `fragment ... on ...` definition or
    /// a bare selection body.
    pub source: String,
    /// Spread names, in first-occurrence order.
    pub spreads: Vec<String>,
}

impl Fragment {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let source = source.into().trim().to_string();
        let spreads = fragment_spreads(&source);
        Self {
            name: name.into(),
            source,
            spreads,
        }
    }
}

/// An immutable, validated set of fragments.
///
/// Iteration follows registration order.
#[derive(Debug, Clone, Default)]
pub struct FragmentRegistry {
    fragments: IndexMap<String, Fragment>,
}

impl FragmentRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Fragment> {
        self.fragments.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fragments.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fragments.keys().map(String::as_str)
    }

    /// Builds a registry without validation.
    #[cfg(test)]
    pub(crate) fn unchecked(fragments: impl IntoIterator<Item = Fragment>) -> Self {
        Self {
            fragments: fragments
                .into_iter()
                .map(|fragment| (fragment.name.clone(), fragment))
                .collect(),
        }
    }
}

/// Builder for a [`FragmentRegistry`].
///
/// ```ignore
/// let mut builder = FragmentRegistryBuilder::new();
/// builder.add_fragment("A", "id");
/// builder.add_fragment("B", "...A\nname");
/// let registry = builder.build()?;
/// ```
#[derive(Debug, Default)]
pub struct FragmentRegistryBuilder {
    fragments: IndexMap<String, Fragment>,
    duplicates: Vec<String>,
}

impl FragmentRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fragment. A second registration of the same name keeps the
    /// first and is reported by [`build`](Self::build).
    pub fn add_fragment(&mut self, name: impl Into<String>, source: impl Into<String>) -> &mut Self {
        let fragment = Fragment::new(name, source);
        if self.fragments.contains_key(&fragment.name) {
            self.duplicates.push(fragment.name);
        } else {
            self.fragments.insert(fragment.name.clone(), fragment);
        }
        self
    }

    /// Parses a document and registers each fragment definition in it.
    ///
    /// Operation definitions are ignored. Returns the number of fragments
    /// found.
    pub fn add_from_document_str(&mut self, text: &str) -> Result<usize, RegistryError> {
        let result = parse(text);
        if result.has_errors() {
            return Err(RegistryError::Parse {
                diagnostics: result.diagnostics.into_vec(),
            });
        }

        let mut count = 0;
        for fragment in result.document.fragments() {
            self.add_fragment(fragment.name.value.clone(), fragment.span.slice(text));
            count += 1;
        }
        Ok(count)
    }

    /// Validates and builds the registry, returning every error found.
    pub fn build(self) -> Result<FragmentRegistry, Vec<RegistryError>> {
        let mut errors: Vec<RegistryError> = self
            .duplicates
            .iter()
            .map(|name| RegistryError::DuplicateFragment { name: name.clone() })
            .collect();

        errors.extend(self.validate_no_cycles());
        errors.extend(self.validate_fragment_references());

        if !errors.is_empty() {
            return Err(errors);
        }

        tracing::debug!(fragments = self.fragments.len(), "built fragment registry");
        Ok(FragmentRegistry {
            fragments: self.fragments,
        })
    }

    /// Depth-first search over spreads. A fragment is finished once every
    /// spread below it has been explored, and is never entered again, so
    /// shared subtrees cost one visit each.
    fn validate_no_cycles(&self) -> Vec<RegistryError> {
        let mut errors = Vec::new();
        let mut marks = FxHashMap::default();
        let mut seen = FxHashSet::default();

        for name in self.fragments.keys() {
            let mut path = Vec::new();
            self.check_cycles(name, &mut path, &mut marks, &mut seen, &mut errors);
        }

        errors
    }

    fn check_cycles<'a>(
        &'a self,
        name: &'a str,
        path: &mut Vec<&'a str>,
        marks: &mut FxHashMap<&'a str, Mark>,
        seen: &mut FxHashSet<Vec<String>>,
        errors: &mut Vec<RegistryError>,
    ) {
        match marks.get(name) {
            Some(Mark::Done) => return,
            Some(Mark::Visiting) => {
                // Only the looping tail of the path is the cycle.
                let start = path.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(ToString::to_string).collect();
                cycle.push(name.to_string());

                if seen.insert(normalize_cycle(&cycle)) {
                    errors.push(RegistryError::FragmentCycle { cycle_path: cycle });
                }
                return;
            }
            None => {}
        }

        let Some(fragment) = self.fragments.get(name) else {
            return;
        };

        path.push(name);
        marks.insert(name, Mark::Visiting);

        for spread in &fragment.spreads {
            self.check_cycles(spread, path, marks, seen, errors);
        }

        path.pop();
        marks.insert(name, Mark::Done);
    }

    fn validate_fragment_references(&self) -> Vec<RegistryError> {
        self.fragments
            .values()
            .flat_map(|fragment| {
                fragment
                    .spreads
                    .iter()
                    .filter(|spread| !self.fragments.contains_key(spread.as_str()))
                    .map(|spread| RegistryError::UndefinedFragment {
                        fragment: fragment.name.clone(),
                        name: spread.clone(),
                    })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Rotates a closed cycle (`[A, B, C, A]`) to start at its smallest name so
/// that rotations of the same cycle compare equal.
fn normalize_cycle(cycle: &[String]) -> Vec<String> {
    let Some((_, open)) = cycle.split_last() else {
        return Vec::new();
    };

    let min_idx = open
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map_or(0, |(idx, _)| idx);

    let mut normalized = Vec::with_capacity(cycle.len());
    normalized.extend_from_slice(&open[min_idx..]);
    normalized.extend_from_slice(&open[..min_idx]);
    if let Some(first) = normalized.first().cloned() {
        normalized.push(first);
    }
    normalized
}

/// Fragment registry errors.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("duplicate fragment definition: `{name}`")]
    DuplicateFragment { name: String },

    #[error("fragment `{fragment}` references undefined fragment `{name}`")]
    UndefinedFragment { fragment: String, name: String },

    #[error("fragment cycle detected: {}", .cycle_path.join(" → "))]
    FragmentCycle { cycle_path: Vec<String> },

    #[error("failed to parse fragment document ({} error(s))", .diagnostics.len())]
    Parse { diagnostics: Vec<Diagnostic> },
}

impl RegistryError {
    /// Diagnostic code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateFragment { .. } => codes::DUPLICATE_FRAGMENT,
            Self::UndefinedFragment { .. } => codes::UNDEFINED_FRAGMENT,
            Self::FragmentCycle { .. } => codes::FRAGMENT_CYCLE,
            Self::Parse { .. } => codes::INVALID_SYNTAX,
        }
    }
}
