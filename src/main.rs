// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, sync::Arc};

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use flowwallet_server::{
    api::router,
    config::{AppConfig, DEFAULT_LOG_FILTER, LOG_FORMAT_ENV},
    flows::{
        beneficiary::BeneficiaryFlow, offramp::OfframpFlow, onramp::OnrampFlow,
        transfer::TransferFlow, FlowPrivateKey,
    },
    providers::{RampApiClient, UserApiClient, WalletApiClient, WhatsAppClient},
    state::AppState,
    watcher::{JobStore, RetryPolicy, TransactionWatcher},
};

const JOB_STORE_FILE: &str = "jobs.redb";

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|format| format.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = AppConfig::from_env()?;
    let flow_key = FlowPrivateKey::from_pem(
        &config.flow_private_key_pem,
        config.flow_private_key_passphrase.as_deref(),
    )?;

    let wallet = Arc::new(WalletApiClient::new(&config.wallet_api)?);
    let ramp = Arc::new(RampApiClient::new(&config.ramp_api)?);
    let users = Arc::new(UserApiClient::new(&config.user_api)?);
    let messenger = Arc::new(WhatsAppClient::new(&config.whatsapp)?);

    let store = Arc::new(JobStore::open(&config.data_dir.join(JOB_STORE_FILE))?);
    let shutdown = CancellationToken::new();
    let watcher = TransactionWatcher::new(
        wallet.clone(),
        ramp.clone(),
        messenger.clone(),
        Some(store.clone()),
        RetryPolicy {
            poll_interval: config.watcher_poll_interval,
            max_attempts: config.watcher_max_attempts,
        },
        shutdown.clone(),
    );
    let resumed = watcher.resume_pending()?;
    let dead_letters = store.dead_letters()?.len();
    if dead_letters > 0 {
        warn!(dead_letters, "Settlement jobs awaiting manual follow-up");
    }
    info!(resumed, "Settlement watcher started");

    if config.whatsapp.app_secret.is_none() {
        warn!("WHATSAPP_APP_SECRET not set, Flow request signatures are not checked");
    }

    let state = AppState {
        flow_key: Arc::new(flow_key),
        app_secret: config.whatsapp.app_secret.as_deref().map(Arc::from),
        onramp: Arc::new(OnrampFlow::new(
            ramp.clone(),
            users.clone(),
            messenger.clone(),
        )),
        offramp: Arc::new(OfframpFlow::new(
            wallet.clone(),
            users.clone(),
            watcher.clone(),
            config.hot_wallet_address.clone(),
        )),
        transfer: Arc::new(TransferFlow::new(
            wallet,
            users,
            watcher,
            config.transfer_fee.clone(),
        )),
        beneficiary: Arc::new(BeneficiaryFlow::new(
            messenger,
            config.whatsapp.beneficiary_flow_id.clone(),
        )),
        data_dir: Some(config.data_dir.clone()),
    };

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Flow Wallet server listening (docs at /docs)");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Server stopped");
    Ok(())
}
