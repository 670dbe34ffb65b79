mod commands;
mod render;
mod ui;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use crate::commands::{exit_code_for, ErrorReporter};

#[derive(Parser, Debug)]
#[command(name = "cmpack")]
#[command(about = "CMSIS pack manager", long_about = None)]
struct Cli {
    /// Pack root directory (defaults to $CMSIS_PACK_ROOT)
    #[arg(short = 'R', long, global = true)]
    pack_root: Option<PathBuf>,

    /// Download timeout in seconds
    #[arg(short = 'T', long, global = true, default_value_t = 300)]
    timeout: u64,

    /// Emit machine-readable progress lines instead of a progress bar
    #[arg(long, global = true)]
    encoded_progress: bool,

    /// Increase log verbosity (repeatable)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the pack root skeleton, optionally seeding the public index
    Init {
        /// URL of a public index (index.pidx) to cache under .Web/
        index_url: Option<String>,
    },
    /// Install packs by id, file, or URL
    Add {
        #[arg(required = true)]
        packs: Vec<String>,
        /// Agree to embedded licenses without prompting
        #[arg(long)]
        agree_embedded_license: bool,
        /// Extract embedded licenses next to the archive instead of installing
        #[arg(long)]
        extract_embedded_license: bool,
    },
    /// Remove installed packs
    Rm {
        #[arg(required = true)]
        packs: Vec<String>,
        /// Also drop the cached archives and descriptors from .Download/
        #[arg(long)]
        purge: bool,
    },
    /// List installed packs
    List {
        /// List cached archives in .Download/ instead
        #[arg(long)]
        cached: bool,
        /// List public packs known to .Web/ instead
        #[arg(long)]
        public: bool,
    },
    /// Reinstall installed public packs at their latest release
    Update {
        /// Pack ids to update; all installed packs when omitted
        packs: Vec<String>,
    },
    /// Check a pack archive without installing it
    Validate {
        pack: String,
    },
    /// Manage local development descriptors in .Local/
    Pdsc {
        #[command(subcommand)]
        command: PdscCommands,
    },
}

#[derive(Subcommand, Debug)]
enum PdscCommands {
    /// Register a local Vendor.Pack.pdsc
    Add { file: PathBuf },
    /// Remove a registered local descriptor
    Rm { pack_id: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let mut reporter = ErrorReporter::default();
    match commands::run(cli, &mut reporter) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            reporter.report(&err);
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .format_target(false)
        .init();
}

#[cfg(test)]
mod tests;
