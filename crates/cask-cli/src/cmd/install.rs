//! Install and reinstall commands

use anyhow::{Context, Result};
use cask_core::{CaskError, Installer};

use super::Session;

/// Install each cask in turn, stopping at the first failure.
///
/// A cask that is already installed is reported and skipped.
pub async fn install(session: &Session, casks: &[String], reinstall: bool) -> Result<()> {
    let ctx = &session.ctx;
    let phase = if reinstall { "reinstall" } else { "install" };

    for arg in casks {
        let cask = session.load(arg).with_context(|| format!("{phase} {arg}"))?;
        let token = cask.token.clone();

        match Installer::new(ctx, cask).reinstall(reinstall).install().await {
            Ok(()) => {}
            Err(CaskError::AlreadyInstalled { token, version }) => {
                ctx.reporter.warning(&format!(
                    "Cask '{token}' is already installed ({version}). \
                     To re-install it, run `cask reinstall {token}`."
                ));
            }
            Err(e) => return Err(e).with_context(|| format!("{phase} {token}")),
        }
    }
    Ok(())
}
