//! List command

use anyhow::{Context, Result};
use cask_core::Metadata;
use cask_core::metadata::installed_tokens;
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::{Cell, ContentArrangement, Table};
use serde::Serialize;

use super::Session;

#[derive(Debug, Serialize)]
struct Installed {
    token: String,
    version: String,
    path: String,
}

/// List installed casks with their current version.
pub fn list(session: &Session, json: bool) -> Result<()> {
    let caskroom = &session.ctx.config.caskroom;
    let mut rows = Vec::new();
    for token in installed_tokens(caskroom).context("listing installed casks")? {
        let metadata = Metadata::new(caskroom, &token);
        let Some(version) = metadata
            .installed_version()
            .with_context(|| format!("list {token}"))?
        else {
            continue;
        };
        rows.push(Installed {
            path: metadata.staged_path(&version).display().to_string(),
            token: token.to_string(),
            version: version.to_string(),
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No casks installed.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Cask", "Version", "Staged at"]);
    for row in &rows {
        table.add_row(vec![
            Cell::new(&row.token),
            Cell::new(&row.version),
            Cell::new(&row.path),
        ]);
    }
    println!("{table}");
    Ok(())
}
