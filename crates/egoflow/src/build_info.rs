//! Build metadata.

/// Crate version reported by `--version` and `/version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
