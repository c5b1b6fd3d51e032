//! Fetch command

use anyhow::{Context, Result};
use cask_core::Installer;

use super::Session;

/// Download and verify each cask into the cache.
pub async fn fetch(session: &Session, casks: &[String]) -> Result<()> {
    let ctx = &session.ctx;
    for arg in casks {
        let cask = session.load(arg).with_context(|| format!("fetch {arg}"))?;
        let token = cask.token.clone();
        let installer = Installer::new(ctx, cask);
        let path = installer
            .download(ctx.options.force)
            .await
            .with_context(|| format!("fetch {token}"))?;
        ctx.reporter
            .success(&format!("Downloaded to: {}", path.display()));
    }
    Ok(())
}
