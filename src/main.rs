//! Vigil agent entrypoint: wires the stores, the parser, the escrow
//! pipeline, and the HTTP listener together and runs them.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vigil::api;
use vigil::config::Config;
use vigil::escrow::EscrowDb;
use vigil::mailbox::MailboxDirector;
use vigil::notices::{NoticeIntake, NoticeQueue};
use vigil::parser::FrameParser;
use vigil::pipeline::Pipeline;
use vigil::registry::{RegistryDb, RevocationCues};
use vigil::signing::{KeySigner, Signer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;

    let db = sled::open(config.data_dir.join("db")).context("failed to open agent database")?;
    let cues = Arc::new(RevocationCues::default());
    let registry = Arc::new(RegistryDb::open(&db, cues.clone())?);
    let escrows = EscrowDb::open(&db)?;
    if config.clear_escrows {
        info!("clearing escrows");
        escrows.clear_all()?;
    }

    let signer = Arc::new(KeySigner::load_or_incept(
        &config.data_dir,
        config.incept_file.as_deref(),
    )?);
    info!(
        "using agent {} with public key (base64): {}",
        config.alias,
        URL_SAFE.encode(signer.public_key())
    );
    for mapping in &config.mappings {
        info!(
            "configured mapping of | {} | {}",
            mapping.said,
            mapping.kind.tag()
        );
    }

    let queue = Arc::new(NoticeQueue::default());
    let parser = Arc::new(FrameParser::new(registry.clone(), queue.clone()));

    let pipeline = Pipeline::new(
        escrows.clone(),
        registry.clone(),
        registry.clone(),
        cues,
        signer,
        config.mappings.clone(),
        config.authority.clone(),
        &config.hook_url,
        config.timeout_mins,
        config.retry_secs,
    )?;
    tokio::spawn(pipeline.run());

    let intake = NoticeIntake::new(queue, registry.clone(), parser.clone(), escrows.clone());
    tokio::spawn(intake.run());

    if config.direct {
        info!("adding direct mode HTTP listener");
    } else {
        if config.mailbox_url.is_empty() {
            bail!("indirect mode requires VIGIL_MAILBOX_URL");
        }
        info!("adding indirect mode mailbox listener");
        tokio::spawn(MailboxDirector::new(config.mailbox_url.clone(), parser.clone()).run());
    }

    let router = api::build_router(parser, config.direct);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("failed to bind port {}", config.http_port))?;
    info!("vigil agent listening on {}", config.http_port);
    axum::serve(listener, router)
        .await
        .context("HTTP server failed")?;
    Ok(())
}
