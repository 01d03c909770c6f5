use clap::{Parser, Subcommand};
use espmap::{
    cli::{config::Config, map, recon, MapArgs, ReconArgs},
    logging::initialize_logger,
};
use log::{debug, LevelFilter};
use miette::Result;

#[derive(Debug, Parser)]
#[command(about, max_term_width = 100, propagate_version = true, version)]
struct Cli {
    /// Log debug output, including why candidate images and tables were rejected
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    subcommand: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print a map of the bootloader, partition table and application images
    Map(MapArgs),
    /// Split a flash dump into files for reverse engineering
    Recon(ReconArgs),
}

fn main() -> Result<()> {
    miette::set_panic_hook();

    // Attempt to parse any provided command-line arguments, or print the help
    // message and terminate if the invocation is not correct.
    let cli = Cli::parse();

    initialize_logger(if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    debug!("{:#?}", cli.subcommand);

    // Load any user configuration, if present.
    let config = Config::load()?;

    match cli.subcommand {
        Commands::Map(args) => map(args, &config),
        Commands::Recon(args) => recon(args, &config),
    }
}
