//! Uninstall command

use anyhow::Result;

use super::{Session, finish_batch};

/// Remove every reference from its index; `purge` also clears `.Download`.
pub fn uninstall(session: &Session, refs: &[String], purge: bool) -> Result<()> {
    let manager = session.open()?;
    let outcome = manager.uninstall_all(refs, purge)?;
    finish_batch(&outcome, refs.len())
}
