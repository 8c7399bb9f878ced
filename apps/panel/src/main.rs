use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use interslug_panel::cli::Cli;
use interslug_panel::client::{PanelCommand, PanelSession, SessionOptions};
use interslug_panel::config::Config;
use interslug_panel::media::{RtpDrainRendererFactory, WebRtcEngine};
use interslug_panel::session::TracingUi;
use interslug_panel::telemetry::logging;
use interslug_panel::transport::WebSocketTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config()).context("initializing logging")?;

    let mut config = Config::from_env();
    cli.apply(&mut config);
    config.validate()?;
    info!(
        url = %config.signaling_url,
        prefixes = ?config.private_prefixes,
        log_level = cli.logging.level.as_str(),
        "starting panel client"
    );

    let (transport, events) = WebSocketTransport::connect(&config.signaling_url)
        .with_context(|| format!("connecting to {}", config.signaling_url))?;
    let engine = WebRtcEngine::new(&config.webrtc())
        .await
        .context("creating peer connection")?;
    let session = Arc::new(
        PanelSession::start(
            transport,
            Arc::new(engine),
            Arc::new(RtpDrainRendererFactory),
            Arc::new(TracingUi),
            SessionOptions::from_config(&config),
        )
        .await?,
    );

    let input = tokio::spawn(read_commands(Arc::clone(&session)));
    tokio::select! {
        _ = session.run(events) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted; shutting down");
            session.shutdown().await;
        }
    }
    input.abort();
    Ok(())
}

async fn read_commands(session: Arc<PanelSession>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<PanelCommand>() {
            Ok(command) => {
                if let Err(err) = session.execute(command) {
                    warn!(%command, error = %err, "command rejected");
                    eprintln!("{err}");
                }
            }
            Err(err) => eprintln!("{err}"),
        }
    }
}
