pub mod artifact;
pub mod catalog;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod installer;
pub mod io;
pub mod metadata;
pub mod platform;
pub mod resolver;
pub mod rollback;
pub mod upgrade;

pub mod reporter;

pub use catalog::{CaskLoader, DirectoryCatalog, MemoryCatalog};
pub use command::{CommandOutput, CommandRunner, ProcessRunner, SystemCommand};
pub use config::{Config, InstallOptions, USER_AGENT};
pub use context::Context;
pub use error::{CaskError, CommandError, Result};
pub use installer::{Fetched, Installer, Staged};
pub use io::download::{DownloadManager, Fetcher};
pub use metadata::Metadata;
pub use platform::{HostPlatform, Platform};
pub use reporter::{NullReporter, Reporter};
pub use upgrade::upgrade;
