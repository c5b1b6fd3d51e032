//! Locating descriptors by token.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cask_schema::{Cask, Token};

use crate::error::{CaskError, Result};

pub trait CaskLoader: Send + Sync {
    /// Load the descriptor for `token`.
    ///
    /// # Errors
    ///
    /// [`CaskError::CaskUnavailable`] when no descriptor exists or it cannot be parsed.
    fn load(&self, token: &Token) -> Result<Cask>;
}

impl<T: CaskLoader + ?Sized> CaskLoader for std::sync::Arc<T> {
    fn load(&self, token: &Token) -> Result<Cask> {
        (**self).load(token)
    }
}

/// Looks for `<dir>/<token>.toml` in each directory, first match wins.
#[derive(Debug, Clone, Default)]
pub struct DirectoryCatalog {
    dirs: Vec<PathBuf>,
}

impl DirectoryCatalog {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Load a descriptor from an explicit file path.
    ///
    /// # Errors
    ///
    /// [`CaskError::CaskUnavailable`] if the file is missing or invalid.
    pub fn load_path(path: &Path) -> Result<Cask> {
        let stem = path.file_stem().unwrap_or_default().to_string_lossy();
        let token = Token::new(&stem);
        Cask::from_file(path).map_err(|e| CaskError::CaskUnavailable {
            token,
            reason: e.to_string(),
        })
    }

    /// Resolve a command-line argument: an existing `.toml` path or a token.
    ///
    /// # Errors
    ///
    /// As [`CaskLoader::load`].
    pub fn load_arg(&self, arg: &str) -> Result<Cask> {
        let path = Path::new(arg);
        if path.extension().is_some_and(|e| e == "toml") && path.is_file() {
            Self::load_path(path)
        } else {
            self.load(&Token::new(arg))
        }
    }
}

impl CaskLoader for DirectoryCatalog {
    fn load(&self, token: &Token) -> Result<Cask> {
        let filename = format!("{token}.toml");
        let path = self
            .dirs
            .iter()
            .map(|d| d.join(&filename))
            .find(|p| p.is_file())
            .ok_or_else(|| CaskError::CaskUnavailable {
                token: token.clone(),
                reason: "no descriptor found".to_string(),
            })?;

        let cask = Self::load_path(&path)?;
        if cask.token != *token {
            return Err(CaskError::CaskUnavailable {
                token: token.clone(),
                reason: format!("{} declares token '{}'", path.display(), cask.token),
            });
        }
        Ok(cask)
    }
}

/// In-memory catalog for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    casks: HashMap<Token, Cask>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cask: Cask) {
        self.casks.insert(cask.token.clone(), cask);
    }

    pub fn with(mut self, cask: Cask) -> Self {
        self.insert(cask);
        self
    }
}

impl CaskLoader for MemoryCatalog {
    fn load(&self, token: &Token) -> Result<Cask> {
        self.casks
            .get(token)
            .cloned()
            .ok_or_else(|| CaskError::CaskUnavailable {
                token: token.clone(),
                reason: "not in catalog".to_string(),
            })
    }
}
