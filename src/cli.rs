use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use gatehouse_auth::{Claims, NoExtra, TokenCodec};

use crate::bootstrap::{apply_config_center, load_local};

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(version, about = "Gatehouse - role-gated service with pluggable registry backends", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP service
    Serve {
        /// Bootstrap configuration file (yaml, json or toml)
        #[arg(short = 'c', long, default_value = "configs/config.yaml")]
        config: PathBuf,
    },
    /// Mint an access token signed with the service's own jwt settings
    IssueToken {
        /// Bootstrap configuration file the service runs with
        #[arg(short = 'c', long, default_value = "configs/config.yaml")]
        config: PathBuf,

        /// Numeric subject id
        #[arg(short = 's', long)]
        sub: u64,

        /// Display name
        #[arg(short = 'n', long)]
        name: String,

        /// Role: guest, user, operator or admin
        #[arg(short = 'r', long, default_value = "user")]
        role: String,
    },
}

/// Mints a token from the same layered bootstrap `serve` reads, so the
/// running service accepts it.
pub async fn issue_token(config: &Path, sub: u64, name: &str, role: &str) -> anyhow::Result<String> {
    let bootstrap = apply_config_center(config, load_local(config)?).await?;
    if bootstrap.jwt.uses_default_secret() {
        eprintln!("Warning: jwt.secret is not set; signing with the default development secret");
    }

    let codec = TokenCodec::<Claims>::new(&bootstrap.jwt);
    let token = codec.issue(&codec.claims(sub, name, role, NoExtra {}))?;
    Ok(token)
}
