//! Sample web hook server: logs verified presentation and revocation
//! events POSTed by the agent.

use anyhow::{Context, Result};
use axum::{http::StatusCode, routing::post, Json, Router};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

async fn receive(Json(body): Json<Value>) -> StatusCode {
    let data = &body["data"];
    match body["action"].as_str() {
        Some("iss") => {
            info!(
                "Gatekeeper | Valid credential {} with schema {}",
                data["credential"], data["schema"]
            );
        }
        Some("rev") => {
            info!(
                "Gatekeeper | Invalid credential {} with schema {}. Revoked on: {}",
                data["credential"], data["schema"], data["revocationTimestamp"]
            );
        }
        _ => error!("Gatekeeper | Unknown action: {}", body["action"]),
    }
    StatusCode::OK
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let port: u16 = std::env::var("VIGIL_HOOK_PORT")
        .unwrap_or_else(|_| "9923".into())
        .parse()
        .context("Invalid VIGIL_HOOK_PORT")?;

    let app = Router::new().route("/", post(receive));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    info!("Vigil web hook sample listening on {port}");
    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}
