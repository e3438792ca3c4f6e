//! Camera pipeline
//!
//! [`MapCamera`] owns one camera's state: the active configuration
//! snapshot, the trim store, the last decoded map and the last frame.
//! [`RenderWorker`] drives it from a stream of map payloads, with at most
//! one render in flight and only the newest pending payload kept.
//!
//! Paints are serialized per camera. A paint abandoned at its deadline
//! still holds the paint lock until it finishes, so the next one waits,
//! and only the most recently started paint records detected bounds.

use crate::command::ValidationError;
use crate::config::{CameraConfig, ConfigError};
use crate::encoders::{encode_frame, EncodeError, EncodedImage, ImageFormat};
use crate::layout::{layout, LayoutError, LayoutOptions};
use crate::map::{self, CellRect, DecodeError, DecodedMap, MapPoint};
use crate::palette::Palette;
use crate::render::{render, Frame, Overlays, StatusText, StatusTextOptions};
use crate::services::CameraService;
use crate::snapshot::{self, ExportError};
use crate::trims::{reset_trim_files, TrimAction, TrimError, TrimStore};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pipeline errors
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Trim(#[from] TrimError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("No map has been decoded yet")]
    NoMap,
    #[error("No frame has been rendered yet")]
    NoFrame,
    #[error("Camera is turned off")]
    Disabled,
    #[error("Render exceeded its {0:?} deadline")]
    Timeout(Duration),
    #[error("Render task failed: {0}")]
    Task(String),
}

/// Vacuum state shown in the status text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VacuumStatus {
    pub state: String,
    pub battery: Option<u8>,
}

/// Immutable configuration snapshot used by one render
#[derive(Debug)]
struct Settings {
    config: CameraConfig,
    palette: Palette,
    layout: LayoutOptions,
    status: Option<StatusTextOptions>,
}

impl Settings {
    fn build(config: CameraConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            palette: Palette::from_config(&config.palette),
            layout: config.layout_options()?,
            status: config.status_options(),
            config,
        })
    }
}

/// Result of a camera service call
#[derive(Debug, Clone)]
pub enum ServiceOutcome {
    Done,
    Frame(Arc<Frame>),
    Snapshot(PathBuf),
    /// Whether any trim files were targeted
    TrimsReset(bool),
}

/// One camera instance
pub struct MapCamera {
    settings: RwLock<Arc<Settings>>,
    trims: Mutex<TrimStore>,
    /// Occupied area of the last decoded map
    last_detected: Mutex<Option<CellRect>>,
    /// Held for the whole paint stage
    paint_lock: Mutex<()>,
    /// Number of paints started
    paint_generation: AtomicU64,
    last_map: RwLock<Option<Arc<DecodedMap>>>,
    last_frame: RwLock<Option<Arc<Frame>>>,
    status: RwLock<Option<VacuumStatus>>,
    enabled: AtomicBool,
}

impl MapCamera {
    /// Create a camera, loading its persisted trims
    pub fn new(config: CameraConfig) -> Result<Self, CameraError> {
        let settings = Settings::build(config)?;
        let mut trims = match settings.config.trim_file() {
            Some(path) => TrimStore::load(&path)?,
            None => TrimStore::new(),
        };
        trims.set_margins(&settings.config.floor, settings.config.margins)?;
        info!(
            "Camera {} following {} ({})",
            settings.config.entity_id, settings.config.vacuum.topic, settings.config.vacuum.dialect
        );

        Ok(Self {
            settings: RwLock::new(Arc::new(settings)),
            trims: Mutex::new(trims),
            last_detected: Mutex::new(None),
            paint_lock: Mutex::new(()),
            paint_generation: AtomicU64::new(0),
            last_map: RwLock::new(None),
            last_frame: RwLock::new(None),
            status: RwLock::new(None),
            enabled: AtomicBool::new(true),
        })
    }

    fn settings(&self) -> Arc<Settings> {
        self.settings.read().clone()
    }

    pub fn config(&self) -> CameraConfig {
        self.settings().config.clone()
    }

    /// Swap in a new configuration; on error the old one stays active
    pub fn update_config(&self, config: CameraConfig) -> Result<(), CameraError> {
        let settings = Settings::build(config)?;
        self.trims
            .lock()
            .set_margins(&settings.config.floor, settings.config.margins)?;
        *self.settings.write() = Arc::new(settings);
        info!("Camera configuration updated");
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        info!("Camera turned {}", if enabled { "on" } else { "off" });
    }

    pub fn set_status(&self, status: Option<VacuumStatus>) {
        *self.status.write() = status;
    }

    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.last_frame.read().clone()
    }

    pub fn latest_map(&self) -> Option<Arc<DecodedMap>> {
        self.last_map.read().clone()
    }

    /// Decode stage
    pub fn decode(&self, payload: &[u8]) -> Result<Arc<DecodedMap>, CameraError> {
        Ok(Arc::new(map::decode(payload)?))
    }

    /// Paint stage: crop, lay out and render a decoded map
    pub fn paint(&self, map: &DecodedMap, obstacle: Option<MapPoint>) -> Result<Frame, CameraError> {
        let generation = self.paint_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _painting = self.paint_lock.lock();
        let settings = self.settings();
        let floor = &settings.config.floor;

        let cropped = self.trims.lock().apply(&map.grid, floor);
        if self.paint_generation.load(Ordering::SeqCst) == generation {
            *self.last_detected.lock() = cropped.detected;
        } else {
            debug!("Newer paint pending, detected bounds left as they are");
        }
        let placement = layout(&cropped, &settings.layout)?;

        let mut overlays = Overlays::from_map(map).with_status(self.status_text(&settings));
        if let Some(point) = obstacle {
            overlays = overlays.with_obstacle(point.x, point.y);
        }

        let frame = render(&placement, &settings.palette, &overlays);
        debug!(
            "Rendered {}x{} frame for floor {} (crop {:?})",
            frame.width(),
            frame.height(),
            floor,
            cropped.bounds
        );
        Ok(frame)
    }

    fn status_text(&self, settings: &Settings) -> Option<StatusText> {
        let options = settings.status?;
        let status = self.status.read();
        let (state, battery) = match status.as_ref() {
            Some(s) => (s.state.as_str(), s.battery),
            None => ("unknown", None),
        };
        Some(StatusText::from_status(
            &settings.config.vacuum.name,
            state,
            battery,
            options,
        ))
    }

    /// Make a rendered frame the current one
    pub fn publish(&self, map: Arc<DecodedMap>, frame: Frame) -> Arc<Frame> {
        let frame = Arc::new(frame);
        *self.last_map.write() = Some(map);
        *self.last_frame.write() = Some(frame.clone());

        let settings = self.settings();
        if settings.config.image.enable_snapshots {
            let template = settings
                .config
                .storage_dir
                .join("{{ entity_id.object_id }}.png");
            let template = template.to_string_lossy();
            if let Err(e) = snapshot::export(&frame, &template, &settings.config.entity_id) {
                warn!("Automatic snapshot failed: {}", e);
            }
        }
        frame
    }

    /// Decode, render and publish one payload synchronously
    ///
    /// A decode failure keeps the previous frame.
    pub fn render_payload(&self, payload: &[u8]) -> Result<Arc<Frame>, CameraError> {
        if !self.is_enabled() {
            return Err(CameraError::Disabled);
        }
        let map = self.decode(payload).inspect_err(|e| {
            warn!("Map decode failed, keeping previous frame: {}", e);
        })?;
        let frame = self.paint(&map, None)?;
        Ok(self.publish(map, frame))
    }

    /// Encode the current frame
    pub fn image_bytes(&self, format: ImageFormat) -> Result<EncodedImage, CameraError> {
        let frame = self.latest_frame().ok_or(CameraError::NoFrame)?;
        Ok(encode_frame(&frame, format)?)
    }

    /// Apply a trim action to the active floor and persist the store
    pub fn trim_action(&self, action: TrimAction) -> Result<(), CameraError> {
        let settings = self.settings();
        let detected = *self.last_detected.lock();
        let mut trims = self.trims.lock();

        let mut updated = trims.clone();
        updated.record_action(&settings.config.floor, action, detected)?;
        if let Some(path) = settings.config.trim_file() {
            updated.persist(&path)?;
        }
        *trims = updated;
        Ok(())
    }

    /// Handle a camera-side service call
    pub fn handle_service(&self, service: CameraService) -> Result<ServiceOutcome, CameraError> {
        match service {
            CameraService::Reload => {
                info!("Reload requested, delegated to the platform");
                Ok(ServiceOutcome::Done)
            }
            CameraService::TurnOn => {
                self.set_enabled(true);
                Ok(ServiceOutcome::Done)
            }
            CameraService::TurnOff => {
                self.set_enabled(false);
                Ok(ServiceOutcome::Done)
            }
            CameraService::Snapshot { filename } => {
                let frame = self.latest_frame().ok_or(CameraError::NoFrame)?;
                let entity_id = self.settings().config.entity_id.clone();
                let path = snapshot::export(&frame, &filename, &entity_id)?;
                Ok(ServiceOutcome::Snapshot(path))
            }
            CameraService::ResetTrims { entity_ids } => self.reset_trims(&entity_ids),
            CameraService::ObstacleView { x, y } => {
                let map = self.latest_map().ok_or(CameraError::NoMap)?;
                let frame = self.paint(&map, Some(MapPoint::new(x as f64, y as f64)))?;
                info!("Obstacle view at ({}, {})", x, y);
                Ok(ServiceOutcome::Frame(self.publish(map, frame)))
            }
        }
    }

    fn reset_trims(&self, entity_ids: &[String]) -> Result<ServiceOutcome, CameraError> {
        if entity_ids.is_empty() {
            return Err(ValidationError::NoEntityIdProvided.into());
        }
        let settings = self.settings();
        let removed = reset_trim_files(&settings.config.storage_dir, entity_ids)?;

        if entity_ids.iter().any(|id| *id == settings.config.entity_id) {
            let mut trims = self.trims.lock();
            let floors: Vec<String> = trims.floors().map(str::to_string).collect();
            for floor in floors {
                trims.record_action(&floor, TrimAction::Delete, None)?;
            }
            // Keep configured margins, trims are detected again
            trims.set_margins(&settings.config.floor, settings.config.margins)?;
        }
        Ok(ServiceOutcome::TrimsReset(removed))
    }
}

/// Coalescing render loop for one camera
///
/// Payloads go into a single-slot mailbox: submitting while a render runs
/// replaces any payload still waiting, so intermediate maps are dropped.
pub struct RenderWorker {
    mailbox: watch::Sender<Option<Bytes>>,
    frames: watch::Receiver<Option<Arc<Frame>>>,
    handle: JoinHandle<()>,
}

impl RenderWorker {
    pub fn spawn(camera: Arc<MapCamera>) -> Self {
        let (mailbox, pending) = watch::channel(None);
        let (frames_tx, frames) = watch::channel(camera.latest_frame());
        let handle = tokio::spawn(run_worker(camera, pending, frames_tx));
        Self {
            mailbox,
            frames,
            handle,
        }
    }

    /// Queue a payload, replacing any payload not yet started
    pub fn submit(&self, payload: Bytes) {
        self.mailbox.send_replace(Some(payload));
    }

    /// Receiver that sees every published frame
    pub fn frames(&self) -> watch::Receiver<Option<Arc<Frame>>> {
        self.frames.clone()
    }

    /// Stop accepting payloads and wait for the current render
    pub async fn shutdown(self) {
        drop(self.mailbox);
        if let Err(e) = self.handle.await {
            error!("Render worker panicked: {}", e);
        }
    }
}

async fn run_worker(
    camera: Arc<MapCamera>,
    mut pending: watch::Receiver<Option<Bytes>>,
    frames: watch::Sender<Option<Arc<Frame>>>,
) {
    while pending.changed().await.is_ok() {
        let Some(payload) = pending.borrow_and_update().clone() else {
            continue;
        };
        if !camera.is_enabled() {
            debug!("Camera off, skipping map update");
            continue;
        }

        match render_once(&camera, payload, &pending).await {
            Ok(Some(frame)) => {
                frames.send_replace(Some(frame));
            }
            Ok(None) => debug!("Render superseded by a newer map"),
            Err(CameraError::Decode(e)) => warn!("Map decode failed, keeping previous frame: {}", e),
            Err(CameraError::Timeout(limit)) => {
                warn!("Render abandoned after {:?}, keeping previous frame", limit)
            }
            Err(e) => error!("Render failed: {}", e),
        }
    }
    debug!("Render worker stopped");
}

/// Decode and paint one payload under the render deadline
///
/// Returns `Ok(None)` when a newer payload arrived before painting started.
async fn render_once(
    camera: &Arc<MapCamera>,
    payload: Bytes,
    pending: &watch::Receiver<Option<Bytes>>,
) -> Result<Option<Arc<Frame>>, CameraError> {
    let limit = camera.settings().config.render_timeout();
    let deadline = Instant::now() + limit;

    let decoder = camera.clone();
    let map = run_blocking(limit, move || decoder.decode(&payload)).await?;

    // Checkpoint between decode and paint
    if pending.has_changed().unwrap_or(false) {
        return Ok(None);
    }

    let painter = camera.clone();
    let remaining = deadline.saturating_duration_since(Instant::now());
    let (map, frame) = run_blocking(remaining, move || {
        painter.paint(&map, None).map(|frame| (map, frame))
    })
    .await
    .map_err(|e| match e {
        CameraError::Timeout(_) => CameraError::Timeout(limit),
        other => other,
    })?;

    Ok(Some(camera.publish(map, frame)))
}

async fn run_blocking<T, F>(limit: Duration, work: F) -> Result<T, CameraError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CameraError> + Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(work)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(CameraError::Task(join.to_string())),
        Err(_) => Err(CameraError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::MapClass;
    use crate::trims::trim_file_path;
    use serde_json::json;

    /// 20x10 cell map: floor rows 3-4 from x=2, wall row 2
    fn payload() -> Vec<u8> {
        json!({
            "__class": "ValetudoMap",
            "metaData": { "version": 2 },
            "size": { "x": 100, "y": 50 },
            "pixelSize": 5,
            "layers": [
                { "type": "wall", "compressedPixels": [2, 2, 6] },
                { "type": "floor", "compressedPixels": [2, 3, 6, 2, 4, 6] }
            ],
            "entities": []
        })
        .to_string()
        .into_bytes()
    }

    fn config(dir: &std::path::Path) -> CameraConfig {
        CameraConfig {
            entity_id: "camera.valetudo_robo_kitchen_camera".to_string(),
            storage_dir: dir.to_path_buf(),
            status_text: crate::config::StatusTextConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_render_payload_crops_to_detected() {
        let dir = tempfile::tempdir().unwrap();
        let camera = MapCamera::new(config(dir.path())).unwrap();
        let frame = camera.render_payload(&payload()).unwrap();
        assert_eq!((frame.width(), frame.height()), (6, 3));
        assert!(camera.latest_map().is_some());
    }

    #[test]
    fn test_decode_failure_keeps_frame() {
        let dir = tempfile::tempdir().unwrap();
        let camera = MapCamera::new(config(dir.path())).unwrap();
        let first = camera.render_payload(&payload()).unwrap();

        let result = camera.render_payload(b"garbage");
        assert!(matches!(result, Err(CameraError::Decode(_))));
        assert_eq!(camera.latest_frame().unwrap(), first);
    }

    #[test]
    fn test_turn_off_skips_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let camera = MapCamera::new(config(dir.path())).unwrap();
        camera.handle_service(CameraService::TurnOff).unwrap();
        assert!(matches!(camera.render_payload(&payload()), Err(CameraError::Disabled)));
        camera.handle_service(CameraService::TurnOn).unwrap();
        assert!(camera.render_payload(&payload()).is_ok());
    }

    #[test]
    fn test_save_trims_persists_detected() {
        let dir = tempfile::tempdir().unwrap();
        let camera = MapCamera::new(config(dir.path())).unwrap();
        camera.render_payload(&payload()).unwrap();
        camera.trim_action(TrimAction::Save).unwrap();

        let path = trim_file_path(dir.path(), "camera.valetudo_robo_kitchen_camera").unwrap();
        let store = TrimStore::load(&path).unwrap();
        let trims = store.profile("floor_0").unwrap().trims.unwrap();
        assert_eq!(trims.to_rect(), CellRect::new(2, 2, 8, 5));
    }

    #[test]
    fn test_save_without_detection_leaves_store() {
        let dir = tempfile::tempdir().unwrap();
        let camera = MapCamera::new(config(dir.path())).unwrap();
        let result = camera.trim_action(TrimAction::Save);
        assert!(matches!(result, Err(CameraError::Trim(TrimError::DegenerateBounds { .. }))));
        let path = trim_file_path(dir.path(), "camera.valetudo_robo_kitchen_camera").unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_failed_config_update_keeps_old() {
        let dir = tempfile::tempdir().unwrap();
        let camera = MapCamera::new(config(dir.path())).unwrap();
        let mut bad = config(dir.path());
        bad.image.rotate = 33;
        assert!(camera.update_config(bad).is_err());
        assert_eq!(camera.config().image.rotate, 0);

        let mut rotated = config(dir.path());
        rotated.image.rotate = 90;
        camera.update_config(rotated).unwrap();
        let frame = camera.render_payload(&payload()).unwrap();
        assert_eq!((frame.width(), frame.height()), (3, 6));
    }

    #[test]
    fn test_obstacle_view_needs_map() {
        let dir = tempfile::tempdir().unwrap();
        let camera = MapCamera::new(config(dir.path())).unwrap();
        let result = camera.handle_service(CameraService::ObstacleView { x: 10, y: 10 });
        assert!(matches!(result, Err(CameraError::NoMap)));

        camera.render_payload(&payload()).unwrap();
        // Cell (3, 3) is floor inside the crop
        let outcome = camera
            .handle_service(CameraService::ObstacleView { x: 17, y: 17 })
            .unwrap();
        let ServiceOutcome::Frame(frame) = outcome else {
            panic!("expected a frame");
        };
        let marker = Palette::default().class(MapClass::NoGo).opaque().to_rgba();
        assert_eq!(frame.pixel(1, 1), Some(marker));
    }

    #[test]
    fn test_reset_trims_requires_entities() {
        let dir = tempfile::tempdir().unwrap();
        let camera = MapCamera::new(config(dir.path())).unwrap();
        let result = camera.handle_service(CameraService::ResetTrims { entity_ids: vec![] });
        assert!(matches!(
            result,
            Err(CameraError::Validation(ValidationError::NoEntityIdProvided))
        ));
    }

    #[tokio::test]
    async fn test_worker_publishes_frames() {
        let dir = tempfile::tempdir().unwrap();
        let camera = Arc::new(MapCamera::new(config(dir.path())).unwrap());
        let worker = RenderWorker::spawn(camera.clone());
        let mut frames = worker.frames();

        worker.submit(Bytes::from(payload()));
        frames.changed().await.unwrap();
        let frame = frames.borrow_and_update().clone().unwrap();
        assert_eq!((frame.width(), frame.height()), (6, 3));

        worker.shutdown().await;
        assert_eq!(camera.latest_frame().unwrap(), frame);
    }

    /// Map with floor cells x 1..4 on row 1 only
    fn small_payload() -> Vec<u8> {
        json!({
            "size": { "x": 100, "y": 50 },
            "pixelSize": 5,
            "layers": [{ "type": "floor", "compressedPixels": [1, 1, 3] }],
            "entities": []
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn test_abandoned_paint_does_not_overwrite_newer() {
        let dir = tempfile::tempdir().unwrap();
        let mut slow = config(dir.path());
        slow.render_timeout_ms = 200;
        let camera = Arc::new(MapCamera::new(slow).unwrap());
        let worker = RenderWorker::spawn(camera.clone());
        let mut frames = worker.frames();

        // Stall every paint until released
        let stall = camera.paint_lock.lock();
        worker.submit(Bytes::from(payload()));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(camera.latest_frame().is_none());

        worker.submit(Bytes::from(small_payload()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(stall);

        tokio::time::timeout(Duration::from_secs(5), frames.changed())
            .await
            .unwrap()
            .unwrap();
        let frame = frames.borrow_and_update().clone().unwrap();
        assert_eq!((frame.width(), frame.height()), (3, 1));
        worker.shutdown().await;

        // Wait out the abandoned paint
        drop(camera.paint_lock.lock());
        assert_eq!(*camera.last_detected.lock(), Some(CellRect::new(1, 1, 4, 2)));

        camera.trim_action(TrimAction::Save).unwrap();
        let path = trim_file_path(dir.path(), "camera.valetudo_robo_kitchen_camera").unwrap();
        let store = TrimStore::load(&path).unwrap();
        let trims = store.profile("floor_0").unwrap().trims.unwrap();
        assert_eq!(trims.to_rect(), CellRect::new(1, 1, 4, 2));
    }

    #[tokio::test]
    async fn test_worker_coalesces_bursts() {
        let dir = tempfile::tempdir().unwrap();
        let camera = Arc::new(MapCamera::new(config(dir.path())).unwrap());
        let worker = RenderWorker::spawn(camera.clone());

        // Nothing runs until the test yields, so only the last payload survives
        worker.submit(Bytes::from_static(b"not a map"));
        worker.submit(Bytes::from_static(b"still not a map"));
        worker.submit(Bytes::from(payload()));
        worker.shutdown().await;

        let frame = camera.latest_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (6, 3));
    }
}
