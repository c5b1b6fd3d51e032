//! Uninstall command

use anyhow::{Context, Result};
use cask_core::installer::load_for_removal;
use cask_core::{CaskError, Installer, Metadata};

use super::Session;

/// Uninstall each cask.
///
/// Tokens that are not installed produce a warning, not an error. With
/// `--force` whatever is left under the caskroom is removed even when no
/// descriptor can be found.
pub fn uninstall(session: &Session, casks: &[String]) -> Result<()> {
    let ctx = &session.ctx;

    for arg in casks {
        let token = session.token(arg);
        let metadata = Metadata::new(&ctx.config.caskroom, &token);
        let installed = metadata
            .is_installed()
            .with_context(|| format!("uninstall {token}"))?;

        if !installed && !ctx.options.force {
            ctx.reporter
                .warning(&format!("Cask '{token}' is not installed."));
            continue;
        }

        let cask = match load_for_removal(ctx, &token) {
            Ok(cask) => cask,
            Err(CaskError::CaskUnavailable { .. }) if !installed => {
                metadata
                    .purge_caskroom()
                    .with_context(|| format!("uninstall {token}"))?;
                continue;
            }
            Err(e) => return Err(e).with_context(|| format!("uninstall {token}")),
        };

        Installer::new(ctx, cask)
            .uninstall()
            .with_context(|| format!("uninstall {token}"))?;
        if installed {
            ctx.reporter
                .success(&format!("{token} was successfully uninstalled!"));
        }
    }
    Ok(())
}
