pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "apostille")]
#[command(about = "Multi-tenant TUF notary with alternate roots of trust")]
pub struct Args {
    /// Path to the apostille state directory (defaults to ~/.apostille)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
