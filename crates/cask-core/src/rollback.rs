//! Compensating actions for partially applied operations.
//!
//! Each step that mutates the system pushes its undo. On failure the list is
//! unwound most-recent-first; on success it is committed and dropped unused.

use tracing::{info, warn};

use crate::error::Result;
use crate::reporter::Reporter;

type Undo<'a> = Box<dyn FnOnce() -> Result<()> + 'a>;

#[derive(Default)]
pub struct Rollback<'a> {
    steps: Vec<(String, Undo<'a>)>,
}

impl std::fmt::Debug for Rollback<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|(label, _)| label))
            .finish()
    }
}

impl<'a> Rollback<'a> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Record how to undo a step that just succeeded.
    pub fn push(&mut self, label: impl Into<String>, undo: impl FnOnce() -> Result<()> + 'a) {
        self.steps.push((label.into(), Box::new(undo)));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Keep every step.
    pub fn commit(mut self) {
        self.steps.clear();
    }

    /// Run every undo in reverse order. Failures are reported and swallowed
    /// so the error that triggered the unwind stays the one surfaced.
    pub fn unwind(self, reporter: &dyn Reporter) {
        for (label, undo) in self.steps.into_iter().rev() {
            info!(step = %label, "Rolling back");
            if let Err(e) = undo() {
                warn!(step = %label, error = %e, "Rollback step failed");
                reporter.warning(&format!("Could not roll back {label}: {e}"));
            }
        }
    }
}
