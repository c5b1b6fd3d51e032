//! Reporter trait for dependency injection
//!
//! Core logic reports progress and user-facing notes through this trait so it
//! is not coupled to a terminal implementation.

use cask_schema::Token;

pub trait Reporter: Send + Sync {
    /// A new phase has started (e.g. "Downloading foo").
    fn section(&self, title: &str);

    /// Progress of a download in bytes.
    fn downloading(&self, token: &Token, current: u64, total: Option<u64>);

    /// Caveats text of a cask, shown before it is fetched.
    fn caveats(&self, token: &Token, text: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a success message.
    fn success(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn downloading(&self, token: &Token, current: u64, total: Option<u64>) {
        (**self).downloading(token, current, total);
    }
    fn caveats(&self, token: &Token, text: &str) {
        (**self).caveats(token, text);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn success(&self, msg: &str) {
        (**self).success(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn error(&self, msg: &str) {
        (**self).error(msg);
    }
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn downloading(&self, _: &Token, _: u64, _: Option<u64>) {}
    fn caveats(&self, _: &Token, _: &str) {}
    fn info(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
}
