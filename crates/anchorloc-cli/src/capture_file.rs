//! Capture sidecar files.
//!
//! A recorded frame is an encoded image plus a JSON sidecar describing how it
//! was captured and which maps the scene holds:
//!
//! ```json
//! {
//!   "image": "frame.png",
//!   "info": {
//!     "width": 1440, "height": 1920,
//!     "intrinsics": { "principal_x": 720.0, "principal_y": 960.0,
//!                     "focal_x": 1450.0, "focal_y": 1450.0 },
//!     "device_pose": { "translation": [0.0, 1.4, 0.0],
//!                      "rotation": [0.0, 0.0, 0.0, 1.0] }
//!   },
//!   "maps": [
//!     { "id": 12345, "position": [0, 0, 0], "rotation": [0, 0, 0, 1],
//!       "scale": [1, 1, 1], "map_to_ecef": [ 13 numbers ] }
//!   ]
//! }
//! ```
//!
//! `image` is resolved relative to the sidecar.  Rotations are `[x, y, z, w]`.

use std::fs;
use std::path::{Path, PathBuf};

use anchorloc_geometry::{MapToEcef, Transform3D};
use anchorloc_runtime::MapOffset;
use anchorloc_types::{CaptureInfo, MapId};
use nalgebra::Vector3;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureFileError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid capture sidecar: {0}")]
    Json(#[from] serde_json::Error),
    #[error("map {0} has an invalid ECEF reference (scale must be positive)")]
    BadEcef(MapId),
}

#[derive(Debug, Deserialize)]
pub struct CaptureFile {
    pub image: PathBuf,
    pub info: CaptureInfo,
    #[serde(default)]
    pub maps: Vec<MapEntry>,
}

#[derive(Debug, Deserialize)]
pub struct MapEntry {
    pub id: MapId,
    #[serde(default)]
    pub position: [f64; 3],
    #[serde(default = "identity_xyzw")]
    pub rotation: [f64; 4],
    #[serde(default = "unit_scale")]
    pub scale: [f64; 3],
    #[serde(default)]
    pub map_to_ecef: Option<[f64; MapToEcef::LEN]>,
}

fn identity_xyzw() -> [f64; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

fn unit_scale() -> [f64; 3] {
    [1.0, 1.0, 1.0]
}

impl MapEntry {
    pub fn offset(&self) -> MapOffset {
        let placement = Transform3D::from_position_xyzw(self.position, self.rotation);
        MapOffset {
            position: placement.translation,
            rotation: placement.rotation,
            scale: Vector3::from(self.scale),
        }
    }

    pub fn map_to_ecef(&self) -> Result<Option<MapToEcef>, CaptureFileError> {
        match &self.map_to_ecef {
            None => Ok(None),
            Some(values) => MapToEcef::from_array(values)
                .map(Some)
                .ok_or(CaptureFileError::BadEcef(self.id)),
        }
    }
}

impl CaptureFile {
    pub fn load(path: &Path) -> Result<Self, CaptureFileError> {
        let raw = fs::read_to_string(path).map_err(|source| CaptureFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Path of the encoded image, relative to the sidecar at `sidecar`.
    pub fn image_path(&self, sidecar: &Path) -> PathBuf {
        match sidecar.parent() {
            Some(dir) if self.image.is_relative() => dir.join(&self.image),
            _ => self.image.clone(),
        }
    }

    pub fn read_image(&self, sidecar: &Path) -> Result<Vec<u8>, CaptureFileError> {
        let path = self.image_path(sidecar);
        fs::read(&path).map_err(|source| CaptureFileError::Io { path, source })
    }

    pub fn map_ids(&self) -> Vec<MapId> {
        self.maps.iter().map(|m| m.id).collect()
    }
}
