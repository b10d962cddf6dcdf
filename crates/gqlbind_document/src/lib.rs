//! Operation documents for gqlbind.
//!
//! This crate turns operation and fragment sources into an immutable
//! [`OperationCatalog`]:
//! - `spread`: token-level scanning of fragment spreads
//! - `registry`: validated fragment registry
//! - `compose`: flattening an operation and its fragment closure into one document
//! - `local`: removal of `@client` fields from the wire document
//! - `catalog`: compiled operations and the persisted-document manifest

pub mod catalog;
pub mod compose;
pub mod local;
pub mod registry;
pub mod spread;

pub use catalog::{
    CatalogError, CompiledOperation, Manifest, ManifestEntry, OperationCatalog,
    OperationCatalogBuilder,
};
pub use compose::{compose, ComposeError, ComposedDocument};
pub use local::{strip_local_fields, LocalField, StrippedDocument, CLIENT_DIRECTIVE};
pub use registry::{Fragment, FragmentRegistry, FragmentRegistryBuilder, RegistryError};
pub use spread::{fragment_spreads, scan_spreads, SpreadRef};
