//! cpk - device pack manager

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cpk_cli::cmd::{self, Session};
use cpk_cli::{Cli, Commands, IndexCommand};

/// `RUST_LOG` wins; otherwise the verbosity flags pick the level for the
/// cpk crates and everything else stays at `warn`.
fn init_logging(verbose: bool, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose {
            "debug"
        } else if quiet {
            "error"
        } else {
            "info"
        };
        EnvFilter::new(format!(
            "warn,cpk={level},cpk_cli={level},cpk_core={level},cpk_schema={level}"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let session = Session {
        pack_root: cli.pack_root,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Install { refs } => cmd::install::install(&session, &refs).await,
        Commands::Uninstall { purge, refs } => cmd::uninstall::uninstall(&session, &refs, purge),
        Commands::List { reference } => cmd::list::list(&session, reference.as_deref()),
        Commands::Deps { reference } => cmd::deps::deps(&session, &reference),
        Commands::Index { command } => match command {
            IndexCommand::Check => cmd::index::check(&session),
        },
    }
}
