//! Domain layer types and invariants.

pub mod content_type;
pub mod encoding;
pub mod error;
pub mod options;
