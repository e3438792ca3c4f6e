//! Vacuum Map Camera - render vacuum maps and translate vacuum commands
//!
//! Command-line front end over the library: renders map payload files to
//! images, translates service calls into outbound vacuum commands, and
//! follows a stream of map payloads through the coalescing render worker.

use bytes::Bytes;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vacuum_map_camera::camera::{MapCamera, RenderWorker, VacuumStatus};
use vacuum_map_camera::command::CommandDispatcher;
use vacuum_map_camera::config::CameraConfig;
use vacuum_map_camera::encoders::ImageFormat;
use vacuum_map_camera::render::MAX_OBSTACLE_COORD;
use vacuum_map_camera::services::{CameraService, ServiceCall};
use vacuum_map_camera::snapshot;
use vacuum_map_camera::trims;

/// Vacuum Map Camera - map rendering and command translation
#[derive(Parser, Debug)]
#[command(name = "vacuum-map-camera")]
#[command(version)]
#[command(about = "Render robot vacuum maps and translate vacuum commands")]
struct Args {
    /// Camera configuration file (JSON); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render one map payload file to an image
    Render {
        /// Raw map payload (Valetudo JSON or Rand256 binary)
        payload: PathBuf,

        /// Output image; format follows the extension
        #[arg(short, long, default_value = "map.png")]
        output: String,

        /// Vacuum state for the status text
        #[arg(long)]
        state: Option<String>,

        /// Battery level for the status text
        #[arg(long)]
        battery: Option<u8>,

        /// Obstacle marker as X,Y in map units
        #[arg(long, value_parser = parse_point)]
        obstacle: Option<(u32, u32)>,
    },

    /// Translate a service call into its outbound payload
    Command {
        /// Service name, e.g. vacuum_clean_zone
        service: String,

        /// Service data as JSON
        #[arg(default_value = "{}")]
        data: String,
    },

    /// Render payload files listed on stdin, newest wins under load
    Follow {
        /// Where each rendered frame is written
        #[arg(short, long, default_value = "map.png")]
        output: String,
    },

    /// Delete every persisted trim file in the storage directory
    CleanTrims,
}

fn parse_point(s: &str) -> Result<(u32, u32), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got {:?}", s))?;
    let x = x.trim().parse().map_err(|e| format!("bad X: {}", e))?;
    let y = y.trim().parse().map_err(|e| format!("bad Y: {}", e))?;
    Ok((x, y))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        "vacuum_map_camera=debug"
    } else {
        "vacuum_map_camera=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &args.config {
        Some(path) => CameraConfig::load(path)?,
        None => CameraConfig::default(),
    };

    match args.command {
        Command::Render {
            payload,
            output,
            state,
            battery,
            obstacle,
        } => render(config, payload, output, state, battery, obstacle),
        Command::Command { service, data } => translate(config, &service, &data).await,
        Command::Follow { output } => follow(config, output).await,
        Command::CleanTrims => {
            let removed = trims::clean_up_all_trim_files(&config.storage_dir)?;
            println!("Removed {} trim files", removed);
            Ok(())
        }
    }
}

fn render(
    config: CameraConfig,
    payload: PathBuf,
    output: String,
    state: Option<String>,
    battery: Option<u8>,
    obstacle: Option<(u32, u32)>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let camera = MapCamera::new(config)?;
    if let Some(state) = state {
        camera.set_status(Some(VacuumStatus { state, battery }));
    }

    let data = std::fs::read(&payload)
        .map_err(|e| format!("Failed to read payload '{}': {}", payload.display(), e))?;
    camera.render_payload(&data)?;

    if let Some((x, y)) = obstacle {
        let max = MAX_OBSTACLE_COORD as u32;
        camera.handle_service(CameraService::ObstacleView {
            x: x.min(max),
            y: y.min(max),
        })?;
    }

    let frame = camera.latest_frame().ok_or("No frame rendered")?;
    let path = snapshot::export(&frame, &output, &camera.config().entity_id)?;
    let format = ImageFormat::from_path(&path).unwrap_or_default();
    info!(
        "Rendered {} to {} ({})",
        payload.display(),
        path.display(),
        format.content_type()
    );
    Ok(())
}

async fn translate(
    config: CameraConfig,
    service: &str,
    data: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let data: serde_json::Value = serde_json::from_str(data)?;
    let command = match ServiceCall::parse(service, &data) {
        Ok(ServiceCall::Vacuum(command)) => command,
        Ok(ServiceCall::Camera(service)) => {
            return Err(format!("{:?} is a camera service, not a vacuum command", service).into());
        }
        Err(e) => {
            return Err(format!("{} ({})", e, e.translation_key()).into());
        }
    };

    let (dispatcher, mut transport) = CommandDispatcher::new(1);
    dispatcher.dispatch(&config.target(), &command).await?;
    let outbound = transport.recv().await.ok_or("Transport channel closed")?;

    println!("{}", serde_json::to_string_pretty(&outbound)?);
    Ok(())
}

async fn follow(config: CameraConfig, output: String) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let camera = Arc::new(MapCamera::new(config)?);
    let entity_id = camera.config().entity_id;
    let worker = RenderWorker::spawn(camera);

    // Write every published frame
    let mut frames = worker.frames();
    let writer = tokio::spawn(async move {
        while frames.changed().await.is_ok() {
            let frame = frames.borrow_and_update().clone();
            if let Some(frame) = frame {
                if let Err(e) = snapshot::export(&frame, &output, &entity_id) {
                    warn!("Failed to write frame: {}", e);
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let path = line.trim();
                if path.is_empty() {
                    continue;
                }
                match tokio::fs::read(path).await {
                    Ok(data) => worker.submit(Bytes::from(data)),
                    Err(e) => warn!("Failed to read payload '{}': {}", path, e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    worker.shutdown().await;
    writer.await?;
    Ok(())
}
