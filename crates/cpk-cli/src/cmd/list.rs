//! List command

use anyhow::{Context, Result};
use crossterm::style::Stylize;

use super::Session;
use crate::ui::Theme;

/// Print installed packs, optionally filtered by a pack id.
pub fn list(session: &Session, reference: Option<&str>) -> Result<()> {
    let manager = session.open()?;
    let packs = manager
        .list(reference)
        .with_context(|| format!("Invalid filter '{}'", reference.unwrap_or_default()))?;

    if packs.is_empty() {
        println!();
        println!("  No packs installed.");
        println!("  Run 'cpk install <pack file or URL>' to get started.");
        return Ok(());
    }

    let theme = Theme::default();
    println!();
    for listed in &packs {
        let entry = &listed.entry;
        let id = format!("{:<width$}", format!("{}::{}", entry.vendor, entry.name), width = theme.pack_width);
        let version = format!("{:<width$}", entry.version, width = theme.version_width);
        let mut detail = format!("{:<6} {}", listed.scope, entry.url);
        if entry.is_deprecated() {
            detail.push_str(" (deprecated)");
        }
        println!(
            "  {} {} {}",
            id.with(theme.pack),
            version.with(theme.version),
            detail.with(theme.secondary)
        );
    }
    println!();
    let noun = if packs.len() == 1 { "pack" } else { "packs" };
    println!("  {}", format!("{} {noun} installed", packs.len()).dark_grey());
    Ok(())
}
