//! Trim and margin store
//!
//! Keeps one [`TrimProfile`] per floor. A profile holds four margins
//! (padding in frame pixels) and optional persisted trims (crop bounds in
//! cells). Floors without persisted trims are cropped to the auto-detected
//! occupied area on every render; detection results are only persisted
//! through an explicit [`TrimAction::Save`].

use crate::map::{CellRect, MapGrid};
use crate::snapshot::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Maximum margin on any side, in pixels
pub const MAX_MARGIN: u32 = 1000;

/// Maximum trim coordinate, in cells
pub const MAX_TRIM: u32 = 10000;

/// Trim store errors
#[derive(Debug, thiserror::Error)]
pub enum TrimError {
    #[error("Margin {side} = {value} outside 0..={max}", max = MAX_MARGIN)]
    MarginOutOfRange { side: &'static str, value: u32 },
    #[error("Trim {side} = {value} outside 0..={max}", max = MAX_TRIM)]
    TrimOutOfRange { side: &'static str, value: u32 },
    #[error("Detected bounds are degenerate ({width}x{height})")]
    DegenerateBounds { width: u32, height: u32 },
    #[error("Trim file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Trim file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Padding around the cropped map, in frame pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Margins {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

impl Margins {
    pub fn new(top: u32, bottom: u32, left: u32, right: u32) -> Self {
        Self {
            top,
            bottom,
            left,
            right,
        }
    }

    /// Reject out-of-range values instead of clamping them
    pub fn validate(&self) -> Result<(), TrimError> {
        for (side, value) in [
            ("top", self.top),
            ("bottom", self.bottom),
            ("left", self.left),
            ("right", self.right),
        ] {
            if value > MAX_MARGIN {
                return Err(TrimError::MarginOutOfRange { side, value });
            }
        }
        Ok(())
    }

    pub fn horizontal(&self) -> u32 {
        self.left.saturating_add(self.right)
    }

    pub fn vertical(&self) -> u32 {
        self.top.saturating_add(self.bottom)
    }
}

/// Persisted crop bounds in cells, `down`/`right` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimBounds {
    pub up: u32,
    pub down: u32,
    pub left: u32,
    pub right: u32,
}

impl TrimBounds {
    pub fn from_rect(rect: CellRect) -> Self {
        Self {
            up: rect.top,
            down: rect.bottom,
            left: rect.left,
            right: rect.right,
        }
    }

    pub fn to_rect(self) -> CellRect {
        CellRect::new(self.left, self.up, self.right, self.down)
    }

    pub fn validate(&self) -> Result<(), TrimError> {
        for (side, value) in [
            ("up", self.up),
            ("down", self.down),
            ("left", self.left),
            ("right", self.right),
        ] {
            if value > MAX_TRIM {
                return Err(TrimError::TrimOutOfRange { side, value });
            }
        }
        let rect = self.to_rect();
        if rect.is_degenerate() {
            return Err(TrimError::DegenerateBounds {
                width: rect.width(),
                height: rect.height(),
            });
        }
        Ok(())
    }
}

/// Explicit trim actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimAction {
    /// Persist the last detected bounds
    Save,
    /// Drop persisted trims, keep margins
    Reset,
    /// Remove the whole profile
    Delete,
}

/// Per-floor trims and margins
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimProfile {
    pub margins: Margins,
    pub trims: Option<TrimBounds>,
    pub last_action: Option<TrimAction>,
}

/// A grid cropped for one floor, ready for layout
#[derive(Debug, Clone)]
pub struct CroppedMap {
    pub grid: MapGrid,
    /// Crop rectangle in source grid cells
    pub bounds: CellRect,
    pub margins: Margins,
    /// Occupied area detected on the source grid
    pub detected: Option<CellRect>,
    /// Bounds came from detection rather than persisted trims
    pub auto_detected: bool,
}

/// Trim profiles keyed by floor name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrimStore {
    profiles: BTreeMap<String, TrimProfile>,
}

impl TrimStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile(&self, floor: &str) -> Option<&TrimProfile> {
        self.profiles.get(floor)
    }

    pub fn floors(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Crop a decoded grid for a floor
    ///
    /// Uses persisted trims when present (intersected with the grid),
    /// otherwise the detected occupied area. Nothing is persisted here.
    pub fn apply(&self, grid: &MapGrid, floor: &str) -> CroppedMap {
        let detected = grid.occupied_bounds();
        let profile = self.profiles.get(floor);
        let margins = profile.map(|p| p.margins).unwrap_or_default();

        let persisted = profile.and_then(|p| p.trims).and_then(|trims| {
            let rect = trims.to_rect().intersect(&grid.full_rect());
            if rect.is_none() {
                warn!(
                    "Trims for floor {} fall outside the {}x{} map, detecting bounds",
                    floor,
                    grid.width(),
                    grid.height()
                );
            }
            rect
        });

        let (bounds, auto_detected) = match persisted {
            Some(rect) => (rect, false),
            None => (detected.unwrap_or_else(|| grid.full_rect()), true),
        };
        debug!("Floor {} cropped to {:?} (auto={})", floor, bounds, auto_detected);

        CroppedMap {
            grid: grid.crop(&bounds),
            bounds,
            margins,
            detected,
            auto_detected,
        }
    }

    /// Apply an explicit trim action
    ///
    /// A save with missing or degenerate detected bounds leaves the store
    /// unchanged.
    pub fn record_action(
        &mut self,
        floor: &str,
        action: TrimAction,
        detected: Option<CellRect>,
    ) -> Result<(), TrimError> {
        match action {
            TrimAction::Save => {
                let rect = detected.unwrap_or(CellRect::new(0, 0, 0, 0));
                let trims = TrimBounds::from_rect(rect);
                trims.validate()?;
                let profile = self.profiles.entry(floor.to_string()).or_default();
                profile.trims = Some(trims);
                profile.last_action = Some(TrimAction::Save);
                info!("Saved trims for floor {}: {:?}", floor, trims);
            }
            TrimAction::Reset => {
                if let Some(profile) = self.profiles.get_mut(floor) {
                    profile.trims = None;
                    profile.last_action = Some(TrimAction::Reset);
                }
                info!("Reset trims for floor {}", floor);
            }
            TrimAction::Delete => {
                self.profiles.remove(floor);
                info!("Deleted trim profile for floor {}", floor);
            }
        }
        Ok(())
    }

    /// Set margins for a floor, rejecting out-of-range values
    pub fn set_margins(&mut self, floor: &str, margins: Margins) -> Result<(), TrimError> {
        margins.validate()?;
        self.profiles.entry(floor.to_string()).or_default().margins = margins;
        Ok(())
    }

    /// Set trims for a floor directly (configured rather than detected)
    pub fn set_trims(&mut self, floor: &str, trims: TrimBounds) -> Result<(), TrimError> {
        trims.validate()?;
        self.profiles.entry(floor.to_string()).or_default().trims = Some(trims);
        Ok(())
    }

    /// Drop every floor's profile
    pub fn clear(&mut self) {
        self.profiles.clear();
    }

    /// Load a store from disk; a missing file is an empty store
    pub fn load(path: &Path) -> Result<Self, TrimError> {
        match std::fs::read(path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(TrimError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Write the store atomically
    pub fn persist(&self, path: &Path) -> Result<(), TrimError> {
        let data = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &data).map_err(|source| TrimError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Persisted trims to {}", path.display());
        Ok(())
    }
}

/// Core part of a camera entity id
///
/// Strips the `camera.` domain, a leading `valetudo_<name>_` prefix and a
/// trailing `_camera` suffix. Non-camera entities yield `None`.
pub fn core_entity_id(entity_id: &str) -> Option<&str> {
    let rest = entity_id.strip_prefix("camera.")?;
    let rest = match rest.strip_prefix("valetudo_") {
        Some(after) => match after.find('_') {
            Some(i) => &after[i + 1..],
            None => rest,
        },
        None => rest,
    };
    Some(rest.strip_suffix("_camera").unwrap_or(rest))
}

/// Trim file path for a camera entity
pub fn trim_file_path(dir: &Path, entity_id: &str) -> Option<PathBuf> {
    core_entity_id(entity_id).map(|core| dir.join(format!("auto_crop_{}.json", core)))
}

/// Delete the trim files of the listed cameras
///
/// Returns whether any camera entity was targeted. Missing files are fine.
pub fn reset_trim_files(dir: &Path, entity_ids: &[String]) -> Result<bool, TrimError> {
    let paths: Vec<PathBuf> = entity_ids
        .iter()
        .filter_map(|id| trim_file_path(dir, id))
        .collect();
    if paths.is_empty() {
        debug!("No camera entities to reset trims for");
        return Ok(false);
    }

    for path in paths {
        match std::fs::remove_file(&path) {
            Ok(()) => info!("Removed trim file {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Trim file {} not found", path.display())
            }
            Err(source) => return Err(TrimError::Io { path, source }),
        }
    }
    Ok(true)
}

/// Delete every `auto_crop_*.json` file in `dir`
///
/// Returns how many files were removed. A missing directory removes none.
pub fn clean_up_all_trim_files(dir: &Path) -> Result<usize, TrimError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Trim directory {} not found", dir.display());
            return Ok(0);
        }
        Err(source) => {
            return Err(TrimError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|source| TrimError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name();
        let is_trim_file = name
            .to_str()
            .is_some_and(|n| n.starts_with("auto_crop_") && n.ends_with(".json"));
        if !is_trim_file {
            continue;
        }
        let path = entry.path();
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(TrimError::Io { path, source }),
        }
    }
    info!("Removed {} trim files from {}", removed, dir.display());
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{Cell, CellRaster};

    /// 10x8 grid with known cells in columns 2..6, rows 1..5
    fn sample_grid() -> MapGrid {
        let mut raster = CellRaster::new(10, 8);
        for y in 1..5 {
            for x in 2..6 {
                raster.set(x, y, Cell::Floor);
            }
        }
        raster.set(2, 1, Cell::Wall);
        MapGrid::new(raster, 5.0, 0.0, 0.0, false)
    }

    #[test]
    fn test_apply_without_profile_detects() {
        let store = TrimStore::new();
        let cropped = store.apply(&sample_grid(), "floor_0");

        assert!(cropped.auto_detected);
        assert_eq!(cropped.bounds, CellRect::new(2, 1, 6, 5));
        assert_eq!(cropped.grid.width(), 4);
        assert_eq!(cropped.grid.height(), 4);
        assert_eq!(cropped.grid.cell(0, 0), Cell::Wall);
        assert_eq!(cropped.margins, Margins::default());
        // Detection is not persisted
        assert!(store.profile("floor_0").is_none());
    }

    #[test]
    fn test_apply_uses_persisted_trims() {
        let mut store = TrimStore::new();
        store
            .set_trims("floor_0", TrimBounds { up: 0, down: 8, left: 0, right: 10 })
            .unwrap();
        let cropped = store.apply(&sample_grid(), "floor_0");

        assert!(!cropped.auto_detected);
        assert_eq!(cropped.grid.width(), 10);
        assert_eq!(cropped.grid.height(), 8);
    }

    #[test]
    fn test_trims_outside_map_fall_back_to_detection() {
        let mut store = TrimStore::new();
        store
            .set_trims("floor_0", TrimBounds { up: 100, down: 200, left: 100, right: 200 })
            .unwrap();
        let cropped = store.apply(&sample_grid(), "floor_0");
        assert!(cropped.auto_detected);
        assert_eq!(cropped.bounds, CellRect::new(2, 1, 6, 5));
    }

    #[test]
    fn test_save_reset_delete() {
        let mut store = TrimStore::new();
        let grid = sample_grid();
        let detected = store.apply(&grid, "floor_1").detected;

        store.set_margins("floor_1", Margins::new(5, 5, 10, 10)).unwrap();
        store.record_action("floor_1", TrimAction::Save, detected).unwrap();
        let profile = store.profile("floor_1").unwrap();
        assert_eq!(profile.trims, Some(TrimBounds { up: 1, down: 5, left: 2, right: 6 }));
        assert_eq!(profile.last_action, Some(TrimAction::Save));

        store.record_action("floor_1", TrimAction::Reset, None).unwrap();
        let profile = store.profile("floor_1").unwrap();
        assert_eq!(profile.trims, None);
        assert_eq!(profile.margins, Margins::new(5, 5, 10, 10));

        store.record_action("floor_1", TrimAction::Delete, None).unwrap();
        assert!(store.profile("floor_1").is_none());
    }

    #[test]
    fn test_save_degenerate_leaves_profile_unchanged() {
        let mut store = TrimStore::new();
        store
            .set_trims("floor_0", TrimBounds { up: 0, down: 4, left: 0, right: 4 })
            .unwrap();
        let before = store.clone();

        let result = store.record_action("floor_0", TrimAction::Save, Some(CellRect::new(3, 3, 3, 9)));
        assert!(matches!(result, Err(TrimError::DegenerateBounds { width: 0, height: 6 })));
        let result = store.record_action("floor_0", TrimAction::Save, None);
        assert!(matches!(result, Err(TrimError::DegenerateBounds { .. })));
        assert_eq!(store, before);
    }

    #[test]
    fn test_margin_validation_rejects() {
        let mut store = TrimStore::new();
        let result = store.set_margins("floor_0", Margins::new(0, 1001, 0, 0));
        assert!(matches!(
            result,
            Err(TrimError::MarginOutOfRange { side: "bottom", value: 1001 })
        ));
        assert!(store.profile("floor_0").is_none());
        assert!(store.set_margins("floor_0", Margins::new(1000, 0, 0, 0)).is_ok());
    }

    #[test]
    fn test_trim_validation_rejects() {
        let trims = TrimBounds { up: 0, down: 10001, left: 0, right: 10 };
        assert!(matches!(
            trims.validate(),
            Err(TrimError::TrimOutOfRange { side: "down", .. })
        ));
    }

    #[test]
    fn test_core_entity_id() {
        assert_eq!(core_entity_id("camera.valetudo_robot_camera"), Some("camera"));
        assert_eq!(core_entity_id("camera.valetudo_robot_kitchen_camera"), Some("kitchen"));
        assert_eq!(core_entity_id("camera.dreame_camera"), Some("dreame"));
        assert_eq!(core_entity_id("camera.plain"), Some("plain"));
        assert_eq!(core_entity_id("vacuum.robot"), None);
    }

    #[test]
    fn test_persist_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auto_crop_robot.json");

        let mut store = TrimStore::new();
        store.set_margins("floor_0", Margins::new(1, 2, 3, 4)).unwrap();
        store
            .set_trims("floor_0", TrimBounds { up: 1, down: 9, left: 2, right: 8 })
            .unwrap();
        store.persist(&path).unwrap();

        let loaded = TrimStore::load(&path).unwrap();
        assert_eq!(loaded, store);
        assert_eq!(TrimStore::load(&dir.path().join("missing.json")).unwrap(), TrimStore::new());
    }

    #[test]
    fn test_reset_trim_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = trim_file_path(dir.path(), "camera.valetudo_robot_camera").unwrap();
        std::fs::write(&path, b"{}").unwrap();

        let ids = vec!["camera.valetudo_robot_camera".to_string(), "camera.other".to_string()];
        assert!(reset_trim_files(dir.path(), &ids).unwrap());
        assert!(!path.exists());

        assert!(!reset_trim_files(dir.path(), &["sensor.x".to_string()]).unwrap());
    }

    #[test]
    fn test_clean_up_all_trim_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "auto_crop_kitchen.json",
            "auto_crop_garage.json",
            "room_data.json",
            "auto_crop_notes.txt",
        ] {
            std::fs::write(dir.path().join(name), b"{}").unwrap();
        }

        assert_eq!(clean_up_all_trim_files(dir.path()).unwrap(), 2);
        let mut left: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["auto_crop_notes.txt", "room_data.json"]);

        assert_eq!(clean_up_all_trim_files(&dir.path().join("missing")).unwrap(), 0);
    }
}
