//! Install command

use anyhow::Result;

use super::{Session, cancel_on_interrupt, finish_batch};

/// Install every reference, reporting failures and continuing.
pub async fn install(session: &Session, refs: &[String]) -> Result<()> {
    let manager = session.open()?;
    cancel_on_interrupt(manager.cancel_token());

    let outcome = manager.install_all(refs).await?;
    for (reference, err) in &outcome.failures {
        if err.is_fatal() {
            tracing::error!(%reference, "{err}");
        }
    }
    finish_batch(&outcome, refs.len())
}
