use crate::build_info;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    about = "THORChain signer block scanner",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
pub struct Cli {
    #[arg(long)]
    /// Start scanning from this height when no scan position is stored
    pub start_height: Option<i64>,

    #[arg(long, default_value_t = false)]
    /// Local development only: do not wait for the node account to be whitelisted
    pub skip_whitelist_wait: bool,

    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
