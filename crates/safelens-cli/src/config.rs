//! CLI option parsing and validation, in the `Opts` → `Config::try_from`
//! shape `src/config/mod.rs` uses: `clap::Parser` derives the raw options,
//! then a thin fallible conversion turns them into a validated `Config`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use safelens_rpc::BlockTag;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "safelens", about = "Package and verify Safe multisig evidence packages")]
pub struct Opts {
    #[command(subcommand)]
    pub command: CliCommand,

    /// Execution-layer JSON-RPC endpoint. Required for `package`, ignored by
    /// `verify` (which only reads a package already on disk).
    #[clap(long, env = "SAFELENS_RPC_URL", global = true)]
    pub rpc_url: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Fetch a Safe transaction, prove its on-chain policy, simulate it, and
    /// write an evidence package.
    Package {
        safe_url: String,
        #[clap(long, default_value = "latest")]
        block: String,
        #[clap(long)]
        out: Option<PathBuf>,
        /// Beacon-node REST API base (`/eth/v2/beacon/blocks/finalized`).
        /// Required, alongside `--consensus`, to attach an independently
        /// verifiable consensus proof.
        #[clap(long, env = "SAFELENS_BEACON_API_URL")]
        beacon_api_url: Option<String>,
        /// Attempt to fetch and attach a beacon consensus proof. Off by
        /// default: most chains this tool targets (L2s) have no beacon
        /// chain of their own to query.
        #[clap(long, env = "SAFELENS_ENABLE_CONSENSUS")]
        consensus: bool,
    },
    /// Read an evidence package and print a trust verdict.
    Verify { path: PathBuf },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("`package` requires --rpc-url (or SAFELENS_RPC_URL)")]
    MissingRpcUrl,
    #[error("invalid --rpc-url: {0}")]
    InvalidRpcUrl(String),
    #[error("invalid --block value `{0}`: expected finalized|safe|latest|<number>")]
    InvalidBlockTag(String),
}

pub enum Command {
    Package {
        safe_url: String,
        rpc_url: Url,
        block: BlockTag,
        out: Option<PathBuf>,
        beacon_api_url: Option<String>,
        consensus: bool,
    },
    Verify {
        path: PathBuf,
    },
}

pub struct Config {
    pub command: Command,
}

fn parse_block_tag(raw: &str) -> Result<BlockTag, ConfigError> {
    match raw {
        "finalized" => Ok(BlockTag::Finalized),
        "safe" => Ok(BlockTag::Safe),
        "latest" => Ok(BlockTag::Latest),
        n => n
            .parse::<u64>()
            .map(BlockTag::Number)
            .map_err(|_| ConfigError::InvalidBlockTag(raw.to_string())),
    }
}

impl TryFrom<Opts> for Config {
    type Error = ConfigError;

    fn try_from(opts: Opts) -> Result<Self, Self::Error> {
        let command = match opts.command {
            CliCommand::Package {
                safe_url,
                block,
                out,
                beacon_api_url,
                consensus,
            } => {
                let rpc_url = opts.rpc_url.ok_or(ConfigError::MissingRpcUrl)?;
                let rpc_url: Url = rpc_url
                    .parse()
                    .map_err(|_| ConfigError::InvalidRpcUrl(rpc_url))?;
                let block = parse_block_tag(&block)?;
                Command::Package {
                    safe_url,
                    rpc_url,
                    block,
                    out,
                    beacon_api_url,
                    consensus,
                }
            }
            CliCommand::Verify { path } => Command::Verify { path },
        };
        Ok(Config { command })
    }
}
