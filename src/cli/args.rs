// file: src/cli/args.rs
// version: 2.0.0
// guid: f6g7h8i9-j0k1-2345-6789-012345fghijk

//! Command line argument definitions

use crate::config::loader::ConfigOverrides;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "vps-bootstrap")]
#[command(about = "Staged, re-entrant bootstrap of an Ubuntu VPS into a hardened container host")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Log at debug level")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Only print errors on the console")]
    pub quiet: bool,

    #[arg(short, long, global = true, help = "Configuration file (TOML)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Run state file")]
    pub state_file: Option<PathBuf>,

    #[arg(long, global = true, help = "Log file")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every stage that has not completed yet
    Run {
        #[arg(long, help = "Skip the platform identity check")]
        skip_os_check: bool,

        #[arg(long, value_name = "ID", help = "Re-run this stage and every stage after it")]
        force_stage: Option<String>,

        #[arg(long, help = "Show what would be done without changing the host")]
        dry_run: bool,

        #[arg(short, long, help = "Prompt for the admin account name")]
        interactive: bool,

        #[arg(long, value_name = "NAME", help = "Administrative account to create")]
        admin_user: Option<String>,
    },

    /// Show stage completion and run parameters
    Status {
        #[arg(long, help = "Print JSON instead of a table")]
        json: bool,
    },

    /// Delete the run state so the next run starts from the beginning
    Reset {
        #[arg(short, long, help = "Do not ask for confirmation")]
        yes: bool,
    },

    /// Run the host precondition checks only
    Check {
        #[arg(long, help = "Skip the platform identity check")]
        skip_os_check: bool,
    },
}

impl Cli {
    /// Flag values layered over file and environment configuration
    pub fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides {
            state_file: self.state_file.clone(),
            log_file: self.log_file.clone(),
            verbose: self.verbose,
            ..ConfigOverrides::default()
        };

        match &self.command {
            Commands::Run {
                skip_os_check,
                force_stage,
                dry_run,
                interactive,
                admin_user,
            } => {
                overrides.skip_os_check = *skip_os_check;
                overrides.force_stage = force_stage.clone();
                overrides.dry_run = *dry_run;
                overrides.interactive = *interactive;
                overrides.admin_user = admin_user.clone();
            }
            Commands::Check { skip_os_check } => {
                overrides.skip_os_check = *skip_os_check;
            }
            Commands::Status { .. } | Commands::Reset { .. } => {}
        }

        overrides
    }
}
