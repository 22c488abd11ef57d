//! Streamer demo application
//!
//! Drives one capture session against synthetic camera and display backends
//! and a logging uploader, until Ctrl+C.
//!
//! Usage: `streamer <rtmp-url> [--screen] [--broadcast-id ID]`

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use capture_streamer::{
    capture::{
        synthetic::{SyntheticCameraBackend, SyntheticDisplayBackend},
        ConsentRequest, ConsentResponse, DisplayMetrics, GrantToken,
    },
    config::{AppConfig, PipelineConfig},
    constants::*,
    power::ProcessWakeLock,
    session::{
        CaptureBackends, HostEvent, LaunchRequest, LifecycleCoordinator, SessionController,
        SessionEvent, SourceSelection,
    },
    upload::LoggingUploader,
};

/// Interval between status lines
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

struct Args {
    rtmp_url: Option<String>,
    screen: bool,
    broadcast_id: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        rtmp_url: None,
        screen: false,
        broadcast_id: None,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--screen" => args.screen = true,
            "--broadcast-id" => {
                args.broadcast_id = Some(
                    iter.next()
                        .ok_or_else(|| anyhow!("--broadcast-id needs a value"))?,
                );
            }
            other if other.starts_with("--") => return Err(anyhow!("unknown option {}", other)),
            url => args.rtmp_url = Some(url.to_string()),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting capture streamer");

    let args = parse_args()?;
    let mut config = AppConfig::load_or_default()?;
    if args.screen {
        config.pipeline = PipelineConfig::matching(&config.screen);
    }

    let backends = CaptureBackends::new()
        .with_camera(Arc::new(SyntheticCameraBackend::new(config.camera.fps)))
        .with_display(Arc::new(SyntheticDisplayBackend::new(
            DisplayMetrics {
                width: 1280,
                height: 720,
                density_dpi: 320,
            },
            config.screen.fps,
        )));

    let uploader = Arc::new(LoggingUploader::new());
    let controller = Arc::new(SessionController::new(
        config.clone(),
        backends,
        uploader.clone(),
        Arc::new(ProcessWakeLock::new()),
    ));

    let selection = if args.screen {
        // The synthetic host approves the consent prompt right away
        let request = ConsentRequest::new(CONSENT_REQUEST_ID);
        let response =
            ConsentResponse::granted(CONSENT_REQUEST_ID, GrantToken::new("synthetic-grant"));
        SourceSelection::ScreenMirror(request.resolve(response))
    } else {
        SourceSelection::Camera(config.camera.facing)
    };
    controller.select_source(selection)?;

    let request = LaunchRequest {
        rtmp_url: args.rtmp_url,
        broadcast_id: args.broadcast_id,
    };
    let coordinator = match LifecycleCoordinator::create(controller.clone(), request) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            tracing::warn!(error = %e, "Nothing to do");
            eprintln!("usage: streamer <rtmp-url> [--screen] [--broadcast-id ID]");
            return Ok(());
        }
    };

    let (host_tx, host_rx) = crossbeam_channel::unbounded();
    let lifecycle = coordinator.spawn(host_rx)?;
    host_tx.send(HostEvent::Bound)?;

    tracing::info!("Streaming - press Ctrl+C to stop");

    let events = controller.events();
    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Shutting down...");
                break;
            }
            _ = ticker.tick() => {
                for event in events.try_iter() {
                    match event {
                        SessionEvent::UploaderFailure(e) => tracing::warn!(error = %e, "Uploader failure"),
                        other => tracing::debug!(event = ?other, "Session event"),
                    }
                }

                let status = controller.status();
                tracing::info!("Status: {}", serde_json::to_string(&status)?);
            }
        }
    }

    host_tx.send(HostEvent::Destroy)?;
    let coordinator = tokio::task::spawn_blocking(move || lifecycle.join())
        .await?
        .map_err(|_| anyhow!("lifecycle thread panicked"))?;

    tracing::info!(
        broadcast_id = ?coordinator.end_event(),
        frames = uploader.frames_submitted(),
        bytes = uploader.bytes_submitted(),
        "Session ended"
    );

    Ok(())
}
