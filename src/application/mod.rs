//! Application layer - use cases and orchestration.
//!
//! This layer holds the optimistic reconciliation client and the
//! output formatting used by the CLI.

pub mod formatter;
pub mod reconciler;

pub use formatter::{
    format_images_json, format_images_table, format_paths, format_summary, OutputFormat,
};
pub use reconciler::Reconciler;
