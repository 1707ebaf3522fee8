//! Manifest handling
//!
//! Rendered sources produce a multi-document YAML stream. This module turns
//! that stream into objects, orders them so that dependencies are created
//! first, and creates them in a workspace.

pub mod applier;
pub mod parse;
pub mod sort;

pub use applier::{apply_manifests, object_key};
pub use parse::{parse_manifests, ManifestError};
pub use sort::sort_by_hierarchy;
