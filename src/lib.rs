//! Vacuum Map Camera Library
//!
//! Map rendering and command translation for robot vacuum map cameras:
//! decodes vacuum map payloads, renders them into frames with per-floor
//! trims, palette, rotation and overlays, and translates cleaning intents
//! into outbound commands for Valetudo and Rand256 vacuums.

pub mod camera;
pub mod command;
pub mod config;
pub mod encoders;
pub mod layout;
pub mod map;
pub mod palette;
pub mod render;
pub mod services;
pub mod snapshot;
pub mod trims;

pub use camera::{CameraError, MapCamera, RenderWorker, ServiceOutcome, VacuumStatus};
pub use command::{CommandDispatcher, Dialect, OutboundCommand, VacuumCommand, VacuumTarget, ValidationError};
pub use config::CameraConfig;
pub use render::Frame;
pub use services::{CameraService, ServiceCall};
