// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use chain_gateway::active_checker::ActiveChecker;
use chain_gateway::auth::AuthSecret;
use chain_gateway::cli::Cli;
use chain_gateway::config::{self, Config};
use chain_gateway::http::{self, AppState};
use chain_gateway::models::Payout;
use chain_gateway::payout::{LoggingPayoutExecutor, PayoutScheduler};
use chain_gateway::penalty::PenaltyScheduler;
use chain_gateway::ping::{MetricsController, PingController};
use chain_gateway::recorder::Recorder;
use chain_gateway::repo::sqlite::SqliteStore;
use chain_gateway::repo::{PayoutRepo as _, PingRepo as _};
use chain_gateway::telemetry::Telemetry;
use chain_gateway::whitelist::Whitelist;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const ACTIVE_CHECKER_PERIOD: Duration = Duration::from_secs(10);

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let config = config::load(cli).context("resolving configuration")?;

    if let Err(err) = run(config).await {
        tracing::error!(error = ?err, "fatal startup error");
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let db_path: PathBuf = config.root_dir.join("chain-gateway.db");
    let store = SqliteStore::open(&db_path)
        .await
        .with_context(|| format!("opening database at {}", db_path.display()))?;

    let whitelist = if config.whitelist_enabled {
        let path = config
            .whitelist_file
            .as_ref()
            .expect("validated non-None in config::load");
        Whitelist::load(path).context("loading whitelist file")?
    } else {
        Whitelist::disabled()
    };

    let node_repo = Arc::new(store.node_repo(whitelist.as_set()));
    let ping_repo = Arc::new(store.ping_repo());
    let metrics_repo = Arc::new(store.metrics_repo());
    let downtime_repo = Arc::new(store.downtime_repo());
    let record_repo = Arc::new(store.record_repo());
    let payout_repo = Arc::new(store.payout_repo());
    let fee_repo = Arc::new(store.fee_repo());

    ping_repo
        .reset_all_pings()
        .await
        .context("resetting pings at startup")?;
    if payout_repo.get_all().await.context("reading payouts")?.is_empty() {
        payout_repo
            .save(Payout {
                timestamp: 0,
                payment_details: "initial anchor".to_owned(),
            })
            .await
            .context("seeding initial payout row")?;
    }

    let auth = AuthSecret::new(&config.auth_secret);
    let telemetry = Arc::new(Telemetry::new());

    let penalty = Arc::new(PenaltyScheduler::new(
        node_repo.clone(),
        ping_repo.clone(),
        metrics_repo.clone(),
        telemetry.clone(),
    ));
    penalty
        .rearm_on_boot()
        .await
        .context("re-arming penalized nodes")?;

    let recorder = Recorder::spawn(record_repo.clone(), node_repo.clone(), penalty.clone());

    let active_checker = Arc::new(ActiveChecker::new(
        node_repo.clone(),
        ping_repo.clone(),
        metrics_repo.clone(),
        penalty.clone(),
    ));
    tokio::spawn(active_checker.run_forever(ACTIVE_CHECKER_PERIOD));

    if let Some(payout_cfg) = &config.payout {
        let scheduler = Arc::new(PayoutScheduler::new(
            record_repo.clone(),
            payout_repo.clone(),
            fee_repo.clone(),
            Arc::new(LoggingPayoutExecutor),
        ));
        let interval = payout_cfg.interval;
        info!(?interval, fee_address = %payout_cfg.fee_address, "payout scheduler enabled");
        tokio::spawn(scheduler.run_forever(interval));
    } else {
        warn!("no payoutConfiguration set; automatic payouts are disabled");
    }

    let ping_controller = Arc::new(PingController::new(ping_repo.clone(), downtime_repo.clone()));
    let metrics_controller = Arc::new(MetricsController::new(metrics_repo.clone()));

    let state = Arc::new(AppState::new(
        node_repo,
        auth,
        whitelist,
        config.tunnel_server_address.clone(),
        recorder,
        penalty,
        ping_controller,
        metrics_controller,
        telemetry,
    ));

    let app = http::router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));

    match (&config.cert_file, &config.key_file) {
        (Some(cert), Some(key)) => {
            info!(%addr, "listening (tls)");
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                .await
                .context("loading TLS certificate/key")?;
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await
                .context("server error")?;
        }
        _ => {
            info!(%addr, "listening (plain http)");
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .context("binding listener")?;
            axum::serve(listener, app)
                .await
                .context("server error")?;
        }
    }

    Ok(())
}
