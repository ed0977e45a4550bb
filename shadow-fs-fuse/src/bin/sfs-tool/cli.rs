use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Disk image path
    #[arg(long, short)]
    pub image: PathBuf,

    /// Format a fresh image instead of mounting
    #[arg(long, short)]
    pub fresh: bool,

    /// Directory of files to import into the live directory
    #[arg(long, short)]
    pub source: Option<PathBuf>,
}
