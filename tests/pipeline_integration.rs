//! Camera Pipeline Integration Tests
//!
//! These tests drive a camera end to end through the public API:
//! - Persisted trims crop the frame until they are reset
//! - Snapshots carry exactly the published frame
//! - Failed snapshots leave nothing behind
//! - Overlays reaching far off the map render promptly
//!
//! Run with: `cargo test --test pipeline_integration`

use serde_json::json;
use std::path::Path;
use std::time::{Duration, Instant};
use vacuum_map_camera::camera::{CameraError, MapCamera, ServiceOutcome};
use vacuum_map_camera::config::{CameraConfig, StatusTextConfig};
use vacuum_map_camera::encoders::{decode_frame, is_jpeg, is_png, ImageFormat};
use vacuum_map_camera::map::CellRect;
use vacuum_map_camera::services::{CameraService, ServiceCall};
use vacuum_map_camera::snapshot::ExportError;
use vacuum_map_camera::trims::{trim_file_path, TrimBounds, TrimStore};

// ============================================================================
// Fixtures
// ============================================================================

const ENTITY_ID: &str = "camera.valetudo_robo_hallway_camera";
const FLOOR: &str = "floor_0";

/// 20x10 cell Valetudo map; occupied cells span x 2..8, y 2..5
fn valetudo_payload() -> Vec<u8> {
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

fn camera_config(dir: &Path) -> CameraConfig {
    CameraConfig {
        entity_id: ENTITY_ID.to_string(),
        storage_dir: dir.to_path_buf(),
        status_text: StatusTextConfig {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Persist trims narrower than the detected area
fn persist_narrow_trims(dir: &Path) {
    let mut store = TrimStore::new();
    store
        .set_trims(FLOOR, TrimBounds::from_rect(CellRect::new(2, 2, 5, 4)))
        .unwrap();
    store
        .persist(&trim_file_path(dir, ENTITY_ID).unwrap())
        .unwrap();
}

fn frame_size(camera: &MapCamera) -> (u32, u32) {
    let frame = camera.latest_frame().expect("frame rendered");
    (frame.width(), frame.height())
}

// ============================================================================
// Trims
// ============================================================================

#[test]
fn test_persisted_trims_crop_frame() {
    let dir = tempfile::tempdir().unwrap();
    persist_narrow_trims(dir.path());

    let camera = MapCamera::new(camera_config(dir.path())).unwrap();
    camera.render_payload(&valetudo_payload()).unwrap();
    assert_eq!(frame_size(&camera), (3, 2));
}

#[test]
fn test_reset_trims_restores_detected_bounds() {
    let dir = tempfile::tempdir().unwrap();
    persist_narrow_trims(dir.path());
    let camera = MapCamera::new(camera_config(dir.path())).unwrap();
    camera.render_payload(&valetudo_payload()).unwrap();

    let call = ServiceCall::parse(
        "mqtt_vacuum_camera.reset_trims",
        &json!({ "entity_id": ENTITY_ID }),
    )
    .unwrap();
    let ServiceCall::Camera(service) = call else {
        panic!("reset_trims is a camera service");
    };
    let outcome = camera.handle_service(service).unwrap();
    assert!(matches!(outcome, ServiceOutcome::TrimsReset(true)));
    assert!(!trim_file_path(dir.path(), ENTITY_ID).unwrap().exists());

    camera.render_payload(&valetudo_payload()).unwrap();
    assert_eq!(frame_size(&camera), (6, 3));
}

#[test]
fn test_reset_trims_for_other_camera_keeps_ours() {
    let dir = tempfile::tempdir().unwrap();
    persist_narrow_trims(dir.path());
    let camera = MapCamera::new(camera_config(dir.path())).unwrap();

    let outcome = camera
        .handle_service(CameraService::ResetTrims {
            entity_ids: vec!["camera.valetudo_robo_garage_camera".to_string()],
        })
        .unwrap();
    assert!(matches!(outcome, ServiceOutcome::TrimsReset(true)));

    camera.render_payload(&valetudo_payload()).unwrap();
    assert_eq!(frame_size(&camera), (3, 2));
}

// ============================================================================
// Camera Surface
// ============================================================================

#[test]
fn test_image_bytes_follow_latest_frame() {
    let dir = tempfile::tempdir().unwrap();
    let camera = MapCamera::new(camera_config(dir.path())).unwrap();
    assert!(matches!(camera.image_bytes(ImageFormat::Png), Err(CameraError::NoFrame)));

    camera.render_payload(&valetudo_payload()).unwrap();
    let png = camera.image_bytes(ImageFormat::Png).unwrap();
    assert!(is_png(&png.image_data));
    assert_eq!(png.metadata.content_type, "image/png");
    assert_eq!(
        &decode_frame(&png.image_data).unwrap(),
        camera.latest_frame().unwrap().as_ref()
    );

    let jpeg = camera.image_bytes(ImageFormat::Jpeg).unwrap();
    assert!(is_jpeg(&jpeg.image_data));
    assert_eq!((jpeg.metadata.width, jpeg.metadata.height), (6, 3));
}

#[test]
fn test_far_off_overlays_render_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let camera = MapCamera::new(camera_config(dir.path())).unwrap();
    let payload = json!({
        "size": { "x": 100, "y": 50 },
        "pixelSize": 5,
        "layers": [{ "type": "floor", "compressedPixels": [2, 3, 6] }],
        "entities": [
            { "type": "path", "points": [10, 15, 1e12, 15] },
            { "type": "virtual_wall", "points": [-1e12, -1e12, 1e12, 1e12] }
        ]
    })
    .to_string();

    let started = Instant::now();
    let frame = camera.render_payload(payload.as_bytes()).unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!((frame.width(), frame.height()), (6, 1));
}

// ============================================================================
// Snapshots
// ============================================================================

#[test]
fn test_snapshot_matches_latest_frame() {
    let dir = tempfile::tempdir().unwrap();
    let camera = MapCamera::new(camera_config(dir.path())).unwrap();
    camera.render_payload(&valetudo_payload()).unwrap();

    let template = dir.path().join("{{ entity_id.object_id }}.png");
    let outcome = camera
        .handle_service(CameraService::Snapshot {
            filename: template.to_string_lossy().into_owned(),
        })
        .unwrap();
    let ServiceOutcome::Snapshot(path) = outcome else {
        panic!("expected a snapshot path");
    };
    assert_eq!(path, dir.path().join("valetudo_robo_hallway_camera.png"));

    let written = decode_frame(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(&written, camera.latest_frame().unwrap().as_ref());
}

#[test]
fn test_snapshot_to_missing_directory_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let camera = MapCamera::new(camera_config(dir.path())).unwrap();
    camera.render_payload(&valetudo_payload()).unwrap();

    let target = dir.path().join("missing").join("snap.png");
    let result = camera.handle_service(CameraService::Snapshot {
        filename: target.to_string_lossy().into_owned(),
    });
    assert!(matches!(result, Err(CameraError::Export(ExportError::Io { .. }))));
    assert!(!target.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_snapshot_before_first_frame() {
    let dir = tempfile::tempdir().unwrap();
    let camera = MapCamera::new(camera_config(dir.path())).unwrap();
    let result = camera.handle_service(CameraService::Snapshot {
        filename: dir.path().join("snap.png").to_string_lossy().into_owned(),
    });
    assert!(matches!(result, Err(CameraError::NoFrame)));
}

#[test]
fn test_automatic_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = camera_config(dir.path());
    config.image.enable_snapshots = true;
    let camera = MapCamera::new(config).unwrap();
    camera.render_payload(&valetudo_payload()).unwrap();

    let path = dir.path().join("valetudo_robo_hallway_camera.png");
    let written = decode_frame(&std::fs::read(path).unwrap()).unwrap();
    assert_eq!((written.width(), written.height()), (6, 3));
}
