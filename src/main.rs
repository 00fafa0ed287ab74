//! Gasless Arcade Payment Agent
//!
//! Backend service that:
//! - Issues invoices for premium play and verifies payment tokens
//! - Evaluates payment requests against spending limits
//! - Optionally consults an AI advisory gate for extra scrutiny
//! - Signs EIP-3009 transfer authorizations on the agent wallet's behalf

mod advisor;
mod agent;
mod api;
mod chain;
mod config;
mod payments;
mod signer;

use alloy_primitives::U256;
use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AppState;
use crate::chain::{BalancePoller, ChainClient};
use crate::config::AgentConfig;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .init();

    tracing::info!("Starting Gasless Arcade Payment Agent");

    // Bad signing material must never reach the signer.
    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            std::process::exit(1);
        }
    };

    let state = match AppState::new(&config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize agent");
            std::process::exit(1);
        }
    };
    let agent_address = state.agent.address();

    tracing::info!(address = %agent_address, "agent initialized");
    tracing::info!(
        auto_pay = config.policy.auto_pay_enabled,
        max_payment_per_tx = config.policy.max_payment_per_tx,
        daily_spending_limit = config.policy.daily_spending_limit,
        advisory_mode = ?config.advisory_mode,
        "auto-pay rules"
    );

    // Informational balance read; payment processing does not depend on it.
    let chain = ChainClient::new(config.rpc_url.clone());
    match chain.get_balance(agent_address).await {
        Ok(balance) => {
            tracing::info!(balance_mon = chain::format_native(balance), "agent balance");
            if balance == U256::ZERO {
                tracing::warn!("agent balance is 0, it won't be able to pay invoices");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not read agent balance");
        }
    }

    let mut poller = BalancePoller::new();
    poller.start(chain, agent_address);

    let shared = Arc::new(RwLock::new(state));

    // CORS configuration for local development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        // Health check
        .route("/health", get(api::health_check))
        // Payment endpoints
        .route("/api/payment/requirements", get(api::payment_requirements))
        .route("/api/payment/invoice", post(api::create_invoice))
        .route("/api/payment/verify", post(api::verify_payment))
        .route("/api/payment/history/:address", get(api::payment_history))
        // Agent endpoints
        .route("/api/agent/pay", post(api::agent_pay))
        .route("/api/agent/status", get(api::agent_status))
        .layer(cors)
        .with_state(shared);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, addr = %addr, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!("agent listening on http://{addr}");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server error");
    }
    poller.stop();
}
