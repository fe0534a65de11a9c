// src/main.rs

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use starpack::config::{self, RepoConfig};
use starpack::db::InstalledDb;
use starpack::{cache, indexer, info, install, remove, update};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "starpack")]
#[command(author, version, about = "Source-based package manager for .starpack archives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },
    /// Install packages
    Install {
        /// Packages to install
        #[arg(required = true)]
        packages: Vec<String>,
        /// Install root directory (default: /)
        #[arg(long, default_value = "/")]
        installdir: PathBuf,
        /// Skip the confirmation prompt
        #[arg(long)]
        noconfirm: bool,
    },
    /// Remove installed packages
    Remove {
        /// Packages to remove
        #[arg(required = true)]
        packages: Vec<String>,
        /// Install root directory (default: /)
        #[arg(long, default_value = "/")]
        installdir: PathBuf,
        /// Remove even when other packages depend on these
        #[arg(long)]
        force: bool,
    },
    /// Update installed packages (all of them when none are named)
    Update {
        /// Packages to update
        packages: Vec<String>,
        /// Install root directory (default: /)
        #[arg(long, default_value = "/")]
        installdir: PathBuf,
        /// Skip the confirmation prompt
        #[arg(long)]
        noconfirm: bool,
    },
    /// Show package details
    Info {
        /// Package name
        package: String,
    },
    /// List installed packages
    List,
    /// Clean the package cache
    Clean,
    /// This star has spaceship powers
    Spaceship,
}

#[derive(Subcommand)]
enum RepoCommands {
    /// List configured repositories
    List,
    /// Add a repository URL
    Add { url: String },
    /// Remove a repository URL
    Remove { url: String },
    /// Generate a repository index from a directory of archives
    Index { dir: PathBuf },
    /// Add archives missing from an existing repository index
    AddMissing { dir: PathBuf },
}

fn require_root(command: &str) -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        bail!("the '{}' command must be run as root", command);
    }
    Ok(())
}

const SPACESHIP: &str = r#"
           *        .       *
      .        /\
              /  \       *
         .   |    |   .
             | () |          *
       *     |    |
            /| [] |\     .
           / |    | \
    *     |  |    |  |
          |  | [] |  |    .
       .  |  |    |  |
          |_/|    |\_|  *
            /_\  /_\
     *      '||  ||'     .
             ||  ||   burning starlight
            /||  ||\
       ~~~~~ ~~  ~~ ~~~~~
"#;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Repo { command } => match command {
            RepoCommands::List => {
                let config = RepoConfig::load(config::REPOS_CONF)?;
                config.print();
            }
            RepoCommands::Add { url } => {
                let mut config =
                    RepoConfig::load(config::REPOS_CONF).unwrap_or_default();
                config.add_repository(&url)?;
                config.save(config::REPOS_CONF)?;
                println!("Added repository: {}", url);
            }
            RepoCommands::Remove { url } => {
                let mut config = RepoConfig::load(config::REPOS_CONF)?;
                config.remove_repository(&url)?;
                config.save(config::REPOS_CONF)?;
                println!("Removed repository: {}", url);
            }
            RepoCommands::Index { dir } => {
                indexer::build_index(&dir)?;
            }
            RepoCommands::AddMissing { dir } => {
                indexer::augment_index(&dir)?;
            }
        },

        Commands::Install {
            packages,
            installdir,
            noconfirm,
        } => {
            require_root("install")?;
            tracing::info!("Installing: {}", packages.join(", "));
            install::install_packages(&packages, &installdir, !noconfirm)?;
        }

        Commands::Remove {
            packages,
            installdir,
            force,
        } => {
            require_root("remove")?;
            tracing::info!("Removing: {}", packages.join(", "));
            let db = InstalledDb::for_root(&installdir);
            remove::remove_packages(&packages, &db, force, &installdir)?;
        }

        Commands::Update {
            packages,
            installdir,
            noconfirm,
        } => {
            require_root("update")?;
            let db = InstalledDb::for_root(&installdir);
            let targets = if packages.is_empty() {
                db.installed_names()?
            } else {
                packages
            };
            if targets.is_empty() {
                println!("No packages to update.");
            } else {
                update::update_packages(&targets, &installdir, !noconfirm)?;
            }
        }

        Commands::Info { package } => {
            info::show(&package, std::path::Path::new("/"))?;
        }

        Commands::List => {
            require_root("list")?;
            let db = InstalledDb::for_root(std::path::Path::new("/"));
            let names = db.installed_names()?;
            println!("Installed Packages:");
            println!("-------------------");
            if names.is_empty() {
                println!("No packages are installed (what?)");
            } else {
                for name in names {
                    println!("{}", name);
                }
            }
        }

        Commands::Clean => {
            require_root("clean")?;
            cache::clean(std::path::Path::new("/"))?;
        }

        Commands::Spaceship => {
            println!("{}", SPACESHIP);
        }
    }

    Ok(())
}
