use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "vigil",
    about = "vigil keeps watch over your commits and runs your checks on each one.",
    long_about = "vigil runs a configured list of steps against every new commit in an isolated worktree and records each step's outcome in git notes.\n\nStep commands receive VIGIL_COMMIT, VIGIL_STEP and VIGIL_REPO_DIR in their environment.",
    disable_help_subcommand = true
)]
pub(crate) struct Cli {
    /// Load configuration from PATH instead of the nearest vigil.yml.
    #[arg(
        short = 'c',
        long = "config",
        global = true,
        value_name = "PATH",
        conflicts_with = "template"
    )]
    pub(crate) config: Option<PathBuf>,

    /// Use the template in ~/.config/vigil/templates whose file name contains NAME.
    #[arg(short = 't', long = "template", global = true, value_name = "NAME")]
    pub(crate) template: Option<String>,

    /// Log debug output.
    #[arg(long, global = true)]
    pub(crate) debug: bool,

    /// Only log warnings and errors, and do not echo step output.
    #[arg(short = 'q', long, global = true)]
    pub(crate) quiet: bool,

    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub(crate) enum CliCommand {
    /// Write a default vigil.yml in the current directory.
    #[command(visible_alias = "i")]
    Init,

    /// Run all steps (or --step) for the latest commit (or --hash), discarding earlier results.
    #[command(visible_alias = "r")]
    Run(TargetArgs),

    /// Report whether all steps (or --step) succeeded for a commit without running anything.
    #[command(visible_alias = "c")]
    Check(TargetArgs),

    /// Validate new commits as they appear.
    #[command(visible_alias = "w")]
    Watch,

    /// Print recent commits with their step statuses.
    #[command(visible_alias = "l")]
    Log {
        /// Redraw every second.
        #[arg(short = 'f', long)]
        follow: bool,
    },

    /// Open the dashboard and run `watch` in the background.
    #[command(visible_alias = "t")]
    Tui,
}

#[derive(Debug, Clone, Default, Args)]
pub(crate) struct TargetArgs {
    /// Commit to target; defaults to the latest.
    #[arg(long = "hash", value_name = "HASH")]
    pub(crate) hash: Option<String>,

    /// Only this step; defaults to every configured step.
    #[arg(short = 's', long = "step", value_name = "NAME")]
    pub(crate) step: Option<String>,
}
