//! graft cli interface

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Change the work directory
    ///
    /// Can be specified multiple times. Note that all
    /// paths on the way to the final path must exist.
    ///
    /// This is equivalent to running { cd <directory>; graft ... }
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    /// Log debug information to stderr
    ///
    /// GRAFT_LOG takes precedence when set
    #[clap(short = 'v', long = "verbose", global(true))]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Absorb drift from a Terraform plan into a graft manifest
    ///
    /// Resources with "update" actions in the plan have drifted. Overrides making their
    /// configuration match the remote state are written to a manifest.
    ///
    /// Workflow:
    ///   1. terraform plan -out=tfplan
    ///   2. terraform show -json tfplan > plan.json
    ///   3. graft absorb plan.json
    ///   4. graft build
    ///   5. terraform plan (should show zero changes)
    Absorb(AbsorbCommand),

    /// Vendor patched modules and apply overrides
    Build(BuildCommand),

    /// Remove everything created by build
    Clean,

    /// Print the module tree and write a manifest skeleton
    ///
    /// Every target module (all modules without targets) gets an override block listing its
    /// resources as comments. Targets are module keys as in modules.json, e.g. "network.subnets".
    Scaffold(ScaffoldCommand),
}

#[derive(Parser, Debug)]
pub struct AbsorbCommand {
    /// Plan in JSON form (terraform show -json)
    pub plan: PathBuf,

    /// Where to write the manifest
    #[clap(short = 'o', long = "output", default_value = "absorb.graft.hcl")]
    pub output: PathBuf,

    /// Provider schemas (terraform providers schema -json)
    ///
    /// Without it `terraform providers schema -json` is run in the work directory. Absorbing
    /// works without schema, but computed attributes can then not be told apart.
    #[clap(short = 'p', long = "providers-schema")]
    pub providers_schema: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct BuildCommand {
    /// Use this manifest only
    ///
    /// By default all *.graft.hcl files in the work directory are merged in name order
    #[clap(short = 'm', long = "manifest")]
    pub manifest: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct ScaffoldCommand {
    /// Modules to scaffold, including the modules below them
    pub targets: Vec<String>,

    /// Where to write the manifest skeleton, an existing file is never overwritten
    #[clap(short = 'o', long = "output", default_value = "scaffold.graft.hcl")]
    pub output: PathBuf,
}
