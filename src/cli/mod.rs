//! Command-line interface definitions for the `azrig` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `azrig` binary.
#[derive(Debug, Parser)]
#[command(
    name = "azrig",
    about = "Dry-run reconcile, pause, and delete passes for Azure machines and clusters",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create or update every resource of the target.
    #[command(name = "reconcile", about = "Create or update every resource of the target")]
    Reconcile(PassArgs),
    /// Suspend provider-side reconciliation where supported.
    #[command(name = "pause", about = "Suspend provider-side reconciliation where supported")]
    Pause(PassArgs),
    /// Remove every resource of the target in reverse order.
    #[command(name = "delete", about = "Remove every resource of the target in reverse order")]
    Delete(PassArgs),
}

/// Arguments shared by every pass.
#[derive(Debug, Args)]
pub(crate) struct PassArgs {
    /// Declarative object the pass runs against.
    #[command(flatten)]
    pub(crate) target: Target,
    /// JSON file holding the SKU catalogue for the target's location.
    #[arg(long, value_name = "PATH", env = "AZRIG_SKUS")]
    pub(crate) skus: String,
    /// Seed the in-memory cloud with a silent reconcile before the pass.
    ///
    /// Useful to preview `pause` and `delete` against resources that would
    /// already exist.
    #[arg(long)]
    pub(crate) assume_existing: bool,
}

/// Exactly one machine or cluster JSON file.
#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub(crate) struct Target {
    /// JSON file describing an `AzureMachine` and its cluster.
    #[arg(long, value_name = "PATH")]
    pub(crate) machine: Option<String>,
    /// JSON file describing an `AzureCluster`.
    #[arg(long, value_name = "PATH")]
    pub(crate) cluster: Option<String>,
}
