//! Descriptor types for cask.
//!
//! A [`Cask`] is the validated, statically-shaped value the engine consumes.
//! It is read from TOML; nothing downstream ever sees raw descriptor text
//! except to save a copy alongside an install.

pub mod arch;
pub mod artifact;
pub mod cask;
pub mod hash;
pub mod types;
pub mod url;

// Re-exports
pub use arch::*;
pub use artifact::*;
pub use cask::{Cask, ConflictsWith, ContainerSpec, DependsOn};
pub use hash::*;
pub use types::*;
pub use url::{SourceUrl, Transport};

/// Errors raised while reading or validating a descriptor.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// A checksum string is not a valid SHA256 digest.
    #[error("invalid sha256 digest: {0}")]
    InvalidDigest(String),

    /// A macOS version or release name could not be parsed.
    #[error("invalid macOS version: {0}")]
    InvalidOsVersion(String),

    /// The descriptor is not valid TOML or does not match the schema.
    #[error("descriptor parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The descriptor could not be rendered back to TOML.
    #[error("descriptor serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The descriptor file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File being read.
        path: std::path::PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The descriptor parsed but is semantically invalid.
    #[error("invalid descriptor '{token}': {reason}")]
    Invalid {
        /// Token of the offending descriptor.
        token: String,
        /// What is wrong.
        reason: String,
    },
}
