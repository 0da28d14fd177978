//! Citation binding between retrieval and answer generation

pub mod citation;

pub use citation::{ReferenceBinder, SanitizedAnswer};
