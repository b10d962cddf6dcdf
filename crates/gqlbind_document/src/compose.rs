//! Document composition.
//!
//! An operation's wire document is its root text followed by the closure of
//! every fragment it transitively spreads, each fragment exactly once.

use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::registry::FragmentRegistry;
use crate::spread::fragment_spreads;

/// A root operation flattened together with its fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedDocument {
    /// Root text, then one blank-line-separated block per fragment.
    pub text: String,
    /// Emitted fragment names, in emission order.
    pub fragments: Vec<String>,
}

/// Composition errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    #[error("undefined fragment `{name}` spread in {}", referrer(.referenced_by))]
    UndefinedFragment {
        name: String,
        /// The spreading fragment, or `None` for the root.
        referenced_by: Option<String>,
    },

    #[error("fragment cycle detected: {}", .cycle_path.join(" → "))]
    FragmentCycle { cycle_path: Vec<String> },
}

fn referrer(referenced_by: &Option<String>) -> String {
    match referenced_by {
        Some(fragment) => format!("fragment `{fragment}`"),
        None => "the root operation".to_string(),
    }
}

/// Composes `root` with every fragment it transitively spreads.
///
/// Fragments are emitted in depth-first preorder of first reference, so the
/// output depends only on `root` and the registry contents.
pub fn compose(root: &str, registry: &FragmentRegistry) -> Result<ComposedDocument, ComposeError> {
    let mut composer = Composer {
        registry,
        emitted: FxHashSet::default(),
        order: Vec::new(),
        stack: Vec::new(),
    };

    for name in fragment_spreads(root) {
        composer.visit(&name, None)?;
    }

    let root = root.trim();
    let mut text = String::with_capacity(
        root.len()
            + composer
                .order
                .iter()
                .filter_map(|name| registry.get(name))
                .map(|f| f.source.len() + 2)
                .sum::<usize>(),
    );
    text.push_str(root);
    for name in &composer.order {
        if let Some(fragment) = registry.get(name) {
            text.push_str("\n\n");
            text.push_str(&fragment.source);
        }
    }

    Ok(ComposedDocument {
        text,
        fragments: composer.order,
    })
}

struct Composer<'r> {
    registry: &'r FragmentRegistry,
    emitted: FxHashSet<String>,
    order: Vec<String>,
    stack: Vec<String>,
}

impl Composer<'_> {
    fn visit(&mut self, name: &str, referenced_by: Option<&str>) -> Result<(), ComposeError> {
        if let Some(pos) = self.stack.iter().position(|n| n == name) {
            let mut cycle_path = self.stack[pos..].to_vec();
            cycle_path.push(name.to_string());
            return Err(ComposeError::FragmentCycle { cycle_path });
        }
        if self.emitted.contains(name) {
            return Ok(());
        }

        let registry = self.registry;
        let fragment = registry
            .get(name)
            .ok_or_else(|| ComposeError::UndefinedFragment {
                name: name.to_string(),
                referenced_by: referenced_by.map(str::to_string),
            })?;

        self.emitted.insert(name.to_string());
        self.order.push(name.to_string());
        self.stack.push(name.to_string());
        for spread in &fragment.spreads {
            self.visit(spread, Some(name))?;
        }
        self.stack.pop();
        Ok(())
    }
}
