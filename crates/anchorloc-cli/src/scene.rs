//! Scene maps loaded from a capture sidecar.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anchorloc_geometry::{FilterSettings, MapToEcef, SmoothingFilter};
use anchorloc_runtime::{MapObject, MapRegistration, MapSpaceRegistry};
use anchorloc_types::MapId;
use tracing::info;

use crate::capture_file::{CaptureFile, CaptureFileError};

/// A map placed in the replayed scene.
pub struct SceneMap {
    id: MapId,
    ecef: Option<MapToEcef>,
    localized: AtomicU64,
}

impl SceneMap {
    pub fn id(&self) -> MapId {
        self.id
    }

    /// Successful localizations applied to this map.
    pub fn localized(&self) -> u64 {
        self.localized.load(Ordering::SeqCst)
    }
}

impl MapObject for SceneMap {
    fn notify_successful_localization(&self, map_id: MapId) {
        let n = self.localized.fetch_add(1, Ordering::SeqCst) + 1;
        info!(%map_id, count = n, "map localized");
    }

    fn map_to_ecef(&self) -> Option<MapToEcef> {
        self.ecef
    }
}

/// Register every map of `capture`, each with its own smoothing filter.
pub fn register_maps(
    capture: &CaptureFile,
    registry: &MapSpaceRegistry,
    filter: FilterSettings,
) -> Result<Vec<Arc<SceneMap>>, CaptureFileError> {
    let mut maps = Vec::with_capacity(capture.maps.len());
    for entry in &capture.maps {
        let map = Arc::new(SceneMap {
            id: entry.id,
            ecef: entry.map_to_ecef()?,
            localized: AtomicU64::new(0),
        });
        registry.register(
            entry.id,
            MapRegistration::new(map.clone())
                .with_offset(entry.offset())
                .with_filter(Box::new(SmoothingFilter::new(filter))),
        );
        maps.push(map);
    }
    Ok(maps)
}
