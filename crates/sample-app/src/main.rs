//! Sample room client
//!
//! Walks the usual call flow against an in-memory loopback transport:
//! retrieve a token, open the camera, connect, publish the microphone, publish
//! the camera, then render whatever remote tracks show up (here, the echo of
//! our own tracks) until the run time is over or Ctrl-C is pressed.

mod devices;
mod renderer;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use roomlink_media_session::logging::{log_startup, parse_log_level};
use roomlink_media_session::{
    open_camera, open_microphone, setup_logging, CaptureRequest, HttpTokenProvider,
    InMemoryTransport, InMemoryTransportConfig, LoggingConfig, MediaSession, SessionConfig,
    SessionError, SessionEventHandler, SourceAdapter, StaticTokenProvider, TokenProvider,
};
use tracing::{error, info, warn};

use devices::{SyntheticCameraProvider, ToneMicrophoneProvider};
use renderer::ConsoleRenderer;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML session configuration
    #[arg(short, long, env = "ROOMLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Signaling server address
    #[arg(long, env = "ROOMLINK_URL")]
    url: Option<String>,

    /// Token server endpoint
    #[arg(long, env = "ROOMLINK_TOKEN_SERVER_URL")]
    token_server_url: Option<String>,

    /// Sandbox id sent to the token server
    #[arg(long, env = "ROOMLINK_SANDBOX_ID")]
    sandbox_id: Option<String>,

    /// Room to join
    #[arg(short, long, env = "ROOMLINK_ROOM")]
    room: Option<String>,

    /// Capture frame rate
    #[arg(short, long)]
    frame_rate: Option<u32>,

    /// Use this token instead of asking the token server
    #[arg(short, long, env = "ROOMLINK_TOKEN")]
    token: Option<String>,

    /// Screen size the camera request is derived from
    #[arg(long, default_value = "1280x720")]
    screen: String,

    /// Seconds to stay in the room (0 = until Ctrl-C)
    #[arg(long, default_value = "10")]
    run_for: u64,

    #[arg(long, default_value = "info", env = "ROOMLINK_LOG")]
    log_level: String,

    /// Log JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => SessionConfig::default(),
        };
        if let Some(url) = &self.url {
            config = config.with_server_url(url.clone());
        }
        if let Some(url) = &self.token_server_url {
            config = config.with_token_server_url(url.clone());
        }
        if let Some(id) = &self.sandbox_id {
            config = config.with_sandbox_id(id.clone());
        }
        if let Some(room) = &self.room {
            config = config.with_room_name(room.clone());
        }
        if let Some(fps) = self.frame_rate {
            config = config.with_frame_rate(fps);
        }
        config.validate()?;
        Ok(config)
    }

    fn screen_size(&self) -> Result<(u32, u32)> {
        let Some((w, h)) = self.screen.split_once('x') else {
            bail!("screen must look like WIDTHxHEIGHT, got {:?}", self.screen);
        };
        Ok((w.trim().parse()?, h.trim().parse()?))
    }

    fn token_provider(&self, config: &SessionConfig) -> Result<Box<dyn TokenProvider>> {
        if let Some(token) = &self.token {
            return Ok(Box::new(StaticTokenProvider::new(token.clone())));
        }
        if config.sandbox_id.is_some() {
            return Ok(Box::new(HttpTokenProvider::from_config(config)?));
        }
        warn!("No token or sandbox id given; using a local token for the loopback transport");
        Ok(Box::new(StaticTokenProvider::new("loopback-token")))
    }
}

/// Mirrors the status line a UI would show
struct StatusLine;

#[async_trait]
impl SessionEventHandler for StatusLine {
    async fn on_status(&self, text: &str) {
        info!(status = %text, "Status");
    }

    async fn on_error(&self, error: &SessionError) {
        warn!(category = error.category(), recoverable = error.is_recoverable(), "{}", error);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut logging = LoggingConfig::new(parse_log_level(&args.log_level)?, "roomlink-sample");
    if args.json_logs {
        logging = logging.with_json();
    }
    setup_logging(logging)?;

    let config = args.session_config()?;
    log_startup("roomlink-sample", env!("CARGO_PKG_VERSION"), &config);
    let screen = args.screen_size()?;
    let tokens = args.token_provider(&config)?;

    let renderer = Arc::new(ConsoleRenderer::new(config.frame_rate));
    let render_stats = renderer.stats();
    let transport = InMemoryTransport::new(InMemoryTransportConfig {
        room_name: config.room_name.clone(),
        loopback: true,
        ..Default::default()
    });
    let session = MediaSession::new(config.clone(), transport, renderer.clone());
    session.add_handler(Arc::new(StatusLine));

    let outcome = run(
        &session,
        &config,
        tokens.as_ref(),
        renderer.as_ref(),
        screen,
        args.run_for,
    )
    .await;
    if let Err(e) = &outcome {
        error!("Sample failed: {:#}", e);
    }

    if let Ok(stats) = session.registry_stats().await {
        info!(
            subscribed = stats.subscribed,
            unsubscribed = stats.unsubscribed,
            local_published = stats.local_published,
            torn_down = stats.torn_down,
            "Registry totals"
        );
    }
    session.shutdown().await?;
    info!(
        video_frames = render_stats.video_frames.load(Ordering::Relaxed),
        audio_frames = render_stats.audio_frames.load(Ordering::Relaxed),
        outputs_released = render_stats.released.load(Ordering::Relaxed),
        "Rendering totals"
    );
    outcome
}

async fn run(
    session: &MediaSession,
    config: &SessionConfig,
    tokens: &dyn TokenProvider,
    renderer: &ConsoleRenderer,
    screen: (u32, u32),
    run_for: u64,
) -> Result<()> {
    let request = CaptureRequest::for_screen(screen.0, screen.1, config.frame_rate);
    let (camera_device, camera) =
        open_camera(&SyntheticCameraProvider::default(), &request, &config.capture).await?;
    info!(camera = %camera_device.name, "Camera ready");

    let room = session.join(tokens).await?;
    info!(room = %room.name, identity = %room.local_participant.identity, "Joined room");

    let (mic_device, microphone) =
        open_microphone(&ToneMicrophoneProvider, config.audio.sample_rate).await?;
    info!(microphone = %mic_device.name, "Microphone ready");

    // 10 ms audio blocks
    let mic_sid = session
        .publish_local(
            "microphone",
            SourceAdapter::new(microphone, 100.0),
            config.audio_publish_options(),
        )
        .await?;
    info!(sid = %mic_sid, "Microphone published");

    let camera_source =
        SourceAdapter::new(camera, config.frame_rate as f64).with_preview(renderer.preview());
    let camera_sid = session
        .publish_local("camera", camera_source, config.video_publish_options())
        .await?;
    info!(sid = %camera_sid, "Camera published");

    let stay = async {
        if run_for == 0 {
            std::future::pending::<()>().await
        } else {
            tokio::time::sleep(Duration::from_secs(run_for)).await
        }
    };
    tokio::select! {
        _ = stay => info!("Run time elapsed"),
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for Ctrl-C")?;
            info!("Interrupted");
        }
    }

    for track in session.tracks().await? {
        info!(
            sid = %track.track.sid,
            kind = %track.track.kind,
            direction = ?track.track.direction,
            participant = ?track.participant_identity,
            mime = ?track.publication.as_ref().map(|p| p.mime_type.as_str()),
            state = %track.adapter_state,
            "Track"
        );
    }

    session.disconnect().await?;
    Ok(())
}
