//! # checkout-server
//!
//! Cart, order and payment service.
//!
//! ## Usage
//!
//! ```bash
//! # Pricing rules
//! export PRICING_CONFIG=config/pricing.toml
//!
//! # Providers (each one optional)
//! export STRIPE_SECRET_KEY=sk_test_...
//! export STRIPE_PUBLISHABLE_KEY=pk_test_...
//! export STRIPE_WEBHOOK_SECRET=whsec_...
//! export PAYPAL_CLIENT_ID=...
//! export PAYPAL_CLIENT_SECRET=...
//!
//! # Run the server
//! checkout-server
//! ```

use checkout_api::{routes, state::AppState};
use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    print_banner();

    let state = AppState::new()?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!("Pricing: {}", state.config.pricing_config.display());
    info!(
        "Payment providers: {:?}",
        state.coordinator.providers().methods()
    );
    if state.config.operator_api_key.is_none() {
        warn!("OPERATOR_API_KEY not set, operator endpoints disabled");
    }

    spawn_expiry_sweeper(&state);

    let app = routes::create_router(state);

    info!("Checkout server starting on http://{}", addr);

    if !is_prod {
        info!("Health: http://{}/health", addr);
        info!("Orders: POST http://{}/api/v1/orders", addr);
        info!("Webhook: POST http://{}/webhook/stripe", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Checkout server stopped");
    Ok(())
}

/// `LOG_FORMAT=json` switches to structured output
fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

/// Periodically fail payments whose confirmation window has lapsed
fn spawn_expiry_sweeper(state: &AppState) {
    let coordinator = state.coordinator.clone();
    let period = Duration::from_secs(state.config.expiry_sweep_secs.max(1));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let expired = coordinator.expire_stale(Utc::now());
            if !expired.is_empty() {
                info!(count = expired.len(), "Expired unconfirmed payments");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn print_banner() {
    println!(
        r#"
  checkout-rs
  ━━━━━━━━━━━━━━━━━━━━━━━
  Carts, orders, payments
  Version: {}

"#,
        env!("CARGO_PKG_VERSION")
    );
}
