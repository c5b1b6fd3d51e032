//! Zap command

use anyhow::{Context, Result};
use cask_core::Installer;
use cask_core::installer::load_for_removal;

use super::Session;

/// Uninstall each cask and remove the files its zap stanzas name.
pub fn zap(session: &Session, casks: &[String]) -> Result<()> {
    let ctx = &session.ctx;
    for arg in casks {
        let token = session.token(arg);
        let cask = load_for_removal(ctx, &token).with_context(|| format!("zap {token}"))?;
        Installer::new(ctx, cask)
            .zap()
            .with_context(|| format!("zap {token}"))?;
    }
    Ok(())
}
