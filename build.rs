// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("starpack")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Source-based package manager for .starpack archives")
        .subcommand_required(true)
        .subcommand(
            Command::new("repo")
                .about("Manage repositories")
                .subcommand(Command::new("list").about("List configured repositories"))
                .subcommand(
                    Command::new("add")
                        .about("Add a repository URL")
                        .arg(Arg::new("url").required(true)),
                )
                .subcommand(
                    Command::new("remove")
                        .about("Remove a repository URL")
                        .arg(Arg::new("url").required(true)),
                )
                .subcommand(
                    Command::new("index")
                        .about("Generate a repository index from a directory of archives")
                        .arg(Arg::new("dir").required(true)),
                )
                .subcommand(
                    Command::new("add-missing")
                        .about("Add archives missing from an existing repository index")
                        .arg(Arg::new("dir").required(true)),
                ),
        )
        .subcommand(
            Command::new("install")
                .about("Install packages")
                .arg(Arg::new("packages").required(true).num_args(1..))
                .arg(
                    Arg::new("installdir")
                        .long("installdir")
                        .default_value("/")
                        .help("Install root directory"),
                )
                .arg(
                    Arg::new("noconfirm")
                        .long("noconfirm")
                        .action(clap::ArgAction::SetTrue)
                        .help("Skip the confirmation prompt"),
                ),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove installed packages")
                .arg(Arg::new("packages").required(true).num_args(1..))
                .arg(
                    Arg::new("installdir")
                        .long("installdir")
                        .default_value("/")
                        .help("Install root directory"),
                )
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(clap::ArgAction::SetTrue)
                        .help("Remove even when other packages depend on these"),
                ),
        )
        .subcommand(
            Command::new("update")
                .about("Update installed packages (all of them when none are named)")
                .arg(Arg::new("packages").num_args(0..))
                .arg(
                    Arg::new("installdir")
                        .long("installdir")
                        .default_value("/")
                        .help("Install root directory"),
                )
                .arg(
                    Arg::new("noconfirm")
                        .long("noconfirm")
                        .action(clap::ArgAction::SetTrue)
                        .help("Skip the confirmation prompt"),
                ),
        )
        .subcommand(
            Command::new("info")
                .about("Show package details")
                .arg(Arg::new("package").required(true)),
        )
        .subcommand(Command::new("list").about("List installed packages"))
        .subcommand(Command::new("clean").about("Clean the package cache"))
        .subcommand(Command::new("spaceship").about("This star has spaceship powers"))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("starpack.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
