//! Deps command

use anyhow::{Context, Result};
use cpk_core::PackManager;
use crossterm::style::Stylize;

use super::Session;
use crate::ui::Theme;

/// Print the requirements declared by an installed pack.
pub fn deps(session: &Session, reference: &str) -> Result<()> {
    let manager = session.open()?;
    let deps = manager
        .deps(reference)
        .with_context(|| format!("Cannot read requirements of {reference}"))?;

    if deps.is_empty() {
        println!("  {reference} declares no requirements.");
        return Ok(());
    }

    let theme = Theme::default();
    let mut missing = 0;
    for status in &deps {
        let dep = &status.dependency;
        let id = format!("{:<width$}", format!("{}::{}", dep.vendor, dep.name), width = theme.pack_width);
        let range = format!("{:<width$}", PackManager::describe_range(dep), width = theme.version_width);
        let state = match &status.installed {
            Some(version) => format!("installed {version}").with(theme.success),
            None => {
                missing += 1;
                "missing".to_string().with(theme.error)
            }
        };
        println!("  {} {} {state}", id.with(theme.pack), range.with(theme.version));
    }
    if missing > 0 {
        println!();
        println!("  {}", format!("{missing} requirement(s) not installed").dark_grey());
    }
    Ok(())
}
