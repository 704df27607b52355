//! Command implementations.

pub mod deps;
pub mod index;
pub mod install;
pub mod list;
pub mod uninstall;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use cpk_core::{BatchOutcome, Config, PackManager};
use tokio_util::sync::CancellationToken;

use crate::ui::TerminalReporter;

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Pack root override from `-R`/`CPK_PACK_ROOT`.
    pub pack_root: Option<PathBuf>,
    /// Suppress non-failure output.
    pub quiet: bool,
}

impl Session {
    /// Open the pack root with a terminal reporter.
    pub fn open(&self) -> Result<PackManager> {
        let mut config = Config::from_env();
        if let Some(root) = &self.pack_root {
            config.pack_root.clone_from(root);
        }
        let root = config.pack_root.clone();
        PackManager::open(config, Arc::new(TerminalReporter::new(self.quiet)))
            .with_context(|| format!("Failed to open pack root {}", root.display()))
    }
}

/// Cancel `token` on Ctrl-C.
pub fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping");
            token.cancel();
        }
    });
}

/// Turn a batch tally into the command result.
pub fn finish_batch(outcome: &BatchOutcome, total: usize) -> Result<()> {
    if outcome.cancelled {
        bail!("terminated by user");
    }
    if !outcome.failures.is_empty() {
        bail!("{} of {total} references failed", outcome.failures.len());
    }
    Ok(())
}
