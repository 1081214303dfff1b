// SPDX-License-Identifier: Apache-2.0, MIT

//! Command-line surface, matching `SPEC_FULL.md` §6/§10. Every flag also
//! reads from its environment variable (`clap`'s `env` attribute); an
//! optional TOML config file may supply the same keys, with CLI/env always
//! taking precedence (see [`crate::config::load`]).

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "chain-gateway", about = "Load-balancing JSON-RPC gateway")]
pub struct Cli {
    /// Port the HTTP server listens on.
    #[arg(long, env = "GATEWAY_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Directory holding the embedded database file and, optionally, the
    /// whitelist file.
    #[arg(long, env = "GATEWAY_ROOT_DIR", default_value = ".")]
    pub root_dir: PathBuf,

    /// TLS certificate; requires `key_file`. Plain HTTP when absent.
    #[arg(long, env = "GATEWAY_CERT_FILE")]
    pub cert_file: Option<PathBuf>,

    /// TLS private key; requires `cert_file`.
    #[arg(long, env = "GATEWAY_KEY_FILE")]
    pub key_file: Option<PathBuf>,

    /// HMAC signing secret for bearer tokens. Required; the process exits
    /// at startup if this is neither set nor present in the config file.
    #[arg(long, env = "GATEWAY_AUTH_SECRET")]
    pub auth_secret: Option<String>,

    /// Address advertised to nodes for their reverse tunnel.
    #[arg(long, env = "GATEWAY_TUNNEL_SERVER_ADDRESS", default_value = "")]
    pub tunnel_server_address: String,

    /// Enables the node-id allow-list.
    #[arg(long, env = "GATEWAY_WHITELIST_ENABLED", default_value_t = false)]
    pub whitelist_enabled: bool,

    /// Newline-delimited allow-list file, relative to `root_dir` unless
    /// absolute. Required when `whitelist_enabled` is set.
    #[arg(long, env = "GATEWAY_WHITELIST_FILE")]
    pub whitelist_file: Option<PathBuf>,

    /// Payout tick interval, e.g. `24h`. Auto-payout is disabled when absent.
    #[arg(long, env = "GATEWAY_PAYOUT_INTERVAL")]
    pub payout_interval: Option<String>,

    /// Fee address used in the logged payout executor.
    #[arg(long, env = "GATEWAY_PAYOUT_FEE_ADDRESS")]
    pub payout_fee_address: Option<String>,

    /// Optional TOML file merged underneath these flags/env vars.
    #[arg(long, env = "GATEWAY_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Emit logs as JSON instead of the default human-readable format.
    #[arg(long, env = "GATEWAY_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}
