//! Upgrade command

use anyhow::{Context, Result};
use cask_core::metadata::installed_tokens;
use cask_core::{CaskError, upgrade as upgrade_cask};

use super::Session;

/// Upgrade the named casks, or every installed cask when none are named.
///
/// Installed casks missing from the catalog are skipped when upgrading
/// everything.
pub async fn upgrade(session: &Session, casks: &[String]) -> Result<()> {
    let ctx = &session.ctx;
    let all = casks.is_empty();
    let targets: Vec<String> = if all {
        installed_tokens(&ctx.config.caskroom)
            .context("listing installed casks")?
            .into_iter()
            .map(|t| t.to_string())
            .collect()
    } else {
        casks.to_vec()
    };

    let mut upgraded = 0usize;
    for arg in &targets {
        let cask = match session.load(arg) {
            Ok(cask) => cask,
            Err(CaskError::CaskUnavailable { token, reason }) if all => {
                tracing::debug!(%token, %reason, "Skipping cask missing from catalog");
                continue;
            }
            Err(e) => return Err(e).with_context(|| format!("upgrade {arg}")),
        };
        let token = cask.token.clone();
        if upgrade_cask(ctx, cask)
            .await
            .with_context(|| format!("upgrade {token}"))?
        {
            upgraded += 1;
        }
    }

    if all && upgraded == 0 {
        ctx.reporter.info("No casks to upgrade.");
    }
    Ok(())
}
