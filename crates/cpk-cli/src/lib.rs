//! cpk - device pack manager
//!
//! Installs vendor pack archives into a pack root and keeps the web and
//! local indices that record them.
//!
//! # Pack root layout
//!
//! ```text
//! <root>/
//! ├── .Web/index.pidx                # packs installed from URLs
//! ├── .Local/local_repository.pidx   # local archives and dev descriptors
//! ├── .Download/                     # cached archives, descriptor copies
//! ├── pack.idx                       # touched on every change
//! └── <Vendor>/<Name>/<Version>/     # extracted pack contents
//! ```
#![allow(missing_docs)]

pub mod cmd;
pub mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "cpk")]
#[command(author, version, about = "cpk - install and track device packs")]
pub struct Cli {
    /// Pack root directory
    #[arg(short = 'R', long, global = true, env = "CPK_PACK_ROOT")]
    pub pack_root: Option<PathBuf>,

    /// Show debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only report failures
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install pack archives (path, URL or pack id) or register .pdsc descriptors
    Install {
        /// Pack files, URLs, pack ids known to the web index, or Vendor.Name.pdsc paths
        #[arg(required = true)]
        refs: Vec<String>,
    },
    /// Remove packs from the index
    #[command(visible_alias = "rm")]
    Uninstall {
        /// Also delete cached archives and descriptor copies
        #[arg(long)]
        purge: bool,
        /// Pack ids (Vendor::Name@1.0.0, Vendor.Name.1.0.0) or files
        #[arg(required = true)]
        refs: Vec<String>,
    },
    /// List installed packs
    List {
        /// Filter by pack id, e.g. ARM::CMSIS@^5.0.0
        reference: Option<String>,
    },
    /// Show the requirements of an installed pack
    Deps {
        /// Pack id
        reference: String,
    },
    /// Index maintenance
    Index {
        #[command(subcommand)]
        command: IndexCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum IndexCommand {
    /// Report whether the web index is older than 24 hours
    Check,
}
