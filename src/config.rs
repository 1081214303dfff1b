// SPDX-License-Identifier: Apache-2.0, MIT

//! Resolves the [`Cli`] into a fully validated [`Config`], merging an
//! optional TOML file underneath CLI/env values (CLI/env always wins; the
//! file only fills gaps clap left as defaults/`None`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::cli::Cli;

#[derive(Debug, Deserialize, Default)]
struct FileOverrides {
    port: Option<u16>,
    root_dir: Option<PathBuf>,
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
    auth_secret: Option<String>,
    tunnel_server_address: Option<String>,
    whitelist_enabled: Option<bool>,
    whitelist_file: Option<PathBuf>,
    payout_interval: Option<String>,
    payout_fee_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PayoutConfig {
    pub interval: Duration,
    pub fee_address: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub root_dir: PathBuf,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub auth_secret: String,
    pub tunnel_server_address: String,
    pub whitelist_enabled: bool,
    pub whitelist_file: Option<PathBuf>,
    pub payout: Option<PayoutConfig>,
    pub log_json: bool,
}

/// `true` when the CLI flag was left at its clap default (i.e. genuinely
/// unset from the caller's perspective), so the file value may apply.
fn is_default_port(cli: &Cli) -> bool {
    cli.port == 8080
}

pub fn load(cli: Cli) -> anyhow::Result<Config> {
    let overrides = match &cli.config_file {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => FileOverrides::default(),
    };

    let port = if is_default_port(&cli) {
        overrides.port.unwrap_or(cli.port)
    } else {
        cli.port
    };

    let root_dir = if cli.root_dir == PathBuf::from(".") {
        overrides.root_dir.unwrap_or(cli.root_dir)
    } else {
        cli.root_dir
    };

    let auth_secret = cli
        .auth_secret
        .or(overrides.auth_secret)
        .context("auth secret must be set via --auth-secret, GATEWAY_AUTH_SECRET, or the config file")?;

    let whitelist_enabled = cli.whitelist_enabled || overrides.whitelist_enabled.unwrap_or(false);
    let whitelist_file = cli.whitelist_file.or(overrides.whitelist_file);
    if whitelist_enabled && whitelist_file.is_none() {
        anyhow::bail!("whitelist is enabled but no whitelist file was provided");
    }

    let tunnel_server_address = if cli.tunnel_server_address.is_empty() {
        overrides.tunnel_server_address.unwrap_or_default()
    } else {
        cli.tunnel_server_address
    };

    let payout = match cli.payout_interval.or(overrides.payout_interval) {
        Some(raw) => {
            let interval = humantime::parse_duration(&raw).context("parsing payout interval")?;
            Some(resolve_payout(
                interval,
                cli.payout_fee_address,
                overrides.payout_fee_address,
            )?)
        }
        None => None,
    };

    Ok(Config {
        port,
        root_dir,
        cert_file: cli.cert_file.or(overrides.cert_file),
        key_file: cli.key_file.or(overrides.key_file),
        auth_secret,
        tunnel_server_address,
        whitelist_enabled,
        whitelist_file,
        payout,
        log_json: cli.log_json,
    })
}

fn resolve_payout(
    interval: Duration,
    cli_fee_address: Option<String>,
    file_fee_address: Option<String>,
) -> anyhow::Result<PayoutConfig> {
    let fee_address = cli_fee_address
        .or(file_fee_address)
        .context("payout interval was set without a fee address")?;
    Ok(PayoutConfig {
        interval,
        fee_address,
    })
}
