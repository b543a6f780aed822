//! CLI module; subcommands live here.

use clap::{CommandFactory, Parser, Subcommand};

use crate::Result;

pub mod mount;
pub mod unmount;

#[derive(Debug, Clone)]
pub enum Command {
    Mount(mount::MountArgs),
    Unmount(unmount::UnmountArgs),
    None,
}

#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub command: Command,
}

impl Default for Command {
    fn default() -> Self {
        Command::None
    }
}

pub fn dispatch(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Mount(m) => mount::execute(m),
        Command::Unmount(u) => unmount::execute(u),
        Command::None => Ok(()),
    }
}

#[derive(Parser, Debug)]
#[command(name = "tierfs", version, about = "two-tier union FUSE mount with per-path locks")]
struct Cli {
    #[command(subcommand)]
    command: Option<Subcommands>,
}

#[derive(Subcommand, Debug)]
enum Subcommands {
    /// Mount the union of a primary and a fallback store at a target directory.
    /// Stays in the foreground; Ctrl+C unmounts.
    Mount(mount::MountArgs),
    /// Unmount a previously mounted tierfs target.
    Unmount(unmount::UnmountArgs),
}

/// Parse CLI arguments into internal representation.
pub fn parse_args<I, S>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let argv: Vec<String> = args.into_iter().map(Into::into).collect();
    let cli = Cli::parse_from(argv);
    let command = match cli.command {
        Some(Subcommands::Mount(args)) => Command::Mount(args),
        Some(Subcommands::Unmount(args)) => Command::Unmount(args),
        None => Command::None,
    };

    Ok(CliArgs { command })
}

/// Build the underlying clap `Command` (useful for help/usage contract tests).
pub fn clap_command() -> clap::Command {
    Cli::command()
}
