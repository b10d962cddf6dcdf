//! Core utilities for gqlbind.
//!
//! This crate provides foundational types used throughout gqlbind:
//! - `span`: Source location tracking
//! - `diagnostics`: Error collection
//! - `report`: Rendering diagnostics against their source text

pub mod diagnostics;
pub mod report;
pub mod span;

pub use diagnostics::{Diagnostic, DiagnosticBag, DiagnosticSeverity, Label};
pub use report::Report;
pub use span::{line_col, Span};
