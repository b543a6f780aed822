use thiserror::Error;

pub mod cli;
pub mod fs;
pub mod lock;
pub mod logging;

pub type Result<T> = anyhow::Result<T>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid mount target directory: {0}")]
    InvalidTargetDir(String),
    #[error("invalid store directory: {0}")]
    InvalidStoreDir(String),
    #[error("no such entry: {0}")]
    NotFound(String),
    #[error("path is busy: {0}")]
    Busy(String),
    #[error("lock table error")]
    Lock(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("target is not mounted: {0}")]
    NotMounted(String),
}

/// Entry point for the library, called by the CLI thin wrapper.
pub fn run<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    // Initialize logging before doing anything else. Defaults to human format for the CLI.
    logging::init_logging(logging::LogFormat::Human)?;

    let cli_args = cli::parse_args(args.into_iter().map(Into::into))?;
    cli::dispatch(cli_args)
}
