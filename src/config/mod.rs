/// Default configuration template and file creation.
pub mod default;

/// Configuration error types.
pub mod error;

/// Configuration file loader.
pub mod loader;

/// TOML configuration schema types.
pub mod schema;

/// Typed runtime settings resolved from the schema.
pub mod settings;

/// XDG Base Directory path resolution utilities.
pub mod xdg;
