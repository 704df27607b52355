//! Index maintenance commands

use anyhow::Result;
use cpk_core::PackError;
use crossterm::style::Stylize;

use super::Session;

/// Report whether the web index is fresh; stale is an error exit.
pub fn check(session: &Session) -> Result<()> {
    let manager = session.open()?;
    let path = manager.web_index().path().display().to_string();
    match manager.check_index() {
        Ok(()) => {
            let stamp = manager.web_index().timestamp().unwrap_or_default();
            println!("  {} {path} ({stamp})", "fresh".green());
            Ok(())
        }
        Err(err @ PackError::StaleIndex(_)) => {
            println!("  {} {path}", "stale".yellow());
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}
