use aliasfs::{Config, FilesystemManager, ShareConfig};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount the namespace and serve shares until interrupted
    Mount {
        /// Mount point (overrides the config file)
        mount_point: Option<PathBuf>,
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Directory to share, as path[:alias]; may be repeated
        #[arg(short, long = "share")]
        shares: Vec<ShareConfig>,
        /// Owner reported for the root tree
        #[arg(long)]
        uid: Option<u32>,
        /// Group reported for the root tree
        #[arg(long)]
        gid: Option<u32>,
    },
    /// Print the alias each share descriptor resolves to
    Alias {
        /// Share descriptors, as path[:alias]
        #[arg(required = true)]
        shares: Vec<ShareConfig>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new().filter_level(log_level).init();

    match cli.command {
        Commands::Mount {
            mount_point,
            config,
            shares,
            uid,
            gid,
        } => {
            let mut config = match config {
                Some(path) => Config::load(&path)?,
                None => Config::default(),
            };
            config.shares.extend(shares);
            if uid.is_some() {
                config.permissions.uid = uid;
            }
            if gid.is_some() {
                config.permissions.gid = gid;
            }
            let mount_point = mount_point
                .or_else(|| config.mount_point.clone())
                .context("No mount point given on the command line or in the config file")?;

            info!("Starting aliasfs...");
            let manager = FilesystemManager::from_config(&config)?;
            manager.mount(&mount_point)?;
        }
        Commands::Alias { shares } => {
            for share in shares {
                println!("{} -> {}", share.path.display(), share.alias());
            }
        }
    }

    Ok(())
}
