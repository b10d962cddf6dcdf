//! Renders a [`Diagnostic`] against its source text through `miette`.

use crate::diagnostics::{Diagnostic, DiagnosticSeverity};
use miette::{LabeledSpan, NamedSource, Severity, SourceCode};
use std::fmt;

/// A diagnostic bound to the source it was produced from.
///
/// ```ignore
/// let report = Report::new("ops.graphql", source, diagnostic);
/// eprintln!("{:?}", miette::Report::new(report));
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{title}")]
pub struct Report {
    title: String,
    code: String,
    help: Option<String>,
    severity: DiagnosticSeverity,
    labels: Vec<LabeledSpan>,
    source_code: NamedSource<String>,
}

impl Report {
    /// Binds a diagnostic to its source file.
    pub fn new(name: impl AsRef<str>, source: impl Into<String>, diagnostic: Diagnostic) -> Self {
        let labels = diagnostic
            .labels
            .iter()
            .map(|label| LabeledSpan::new_with_span(Some(label.message.clone()), label.span))
            .collect();

        Self {
            title: diagnostic.title,
            code: diagnostic.code,
            help: diagnostic.message,
            severity: diagnostic.severity,
            labels,
            source_code: NamedSource::new(name, source.into()),
        }
    }
}

impl miette::Diagnostic for Report {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(&self.code))
    }

    fn severity(&self) -> Option<Severity> {
        Some(match self.severity {
            DiagnosticSeverity::Error => Severity::Error,
            DiagnosticSeverity::Warning => Severity::Warning,
        })
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.help
            .as_ref()
            .map(|help| Box::new(help) as Box<dyn fmt::Display + 'a>)
    }

    fn source_code(&self) -> Option<&dyn SourceCode> {
        Some(&self.source_code)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        if self.labels.is_empty() {
            return None;
        }
        Some(Box::new(self.labels.iter().cloned()))
    }
}
