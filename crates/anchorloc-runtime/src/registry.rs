//! [`MapSpaceRegistry`] – the scene's maps and the spaces they live in.
//!
//! Each registered map owns one [`MapSpace`]: the static offset the map was
//! placed with, the mutable correction transform that fusion writes, and the
//! pose filter smoothing those corrections.  The registry is shared between
//! every localizer in the process; it lives for as long as the scene does and
//! is not tied to any one localizer.

use std::collections::HashMap;
use std::sync::Arc;

use anchorloc_geometry::{MapToEcef, PoseFilter, SmoothingFilter, Transform3D};
use anchorloc_types::MapId;
use nalgebra::{UnitQuaternion, Vector3};
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

/// Scene object a map is attached to.
pub trait MapObject: Send + Sync {
    /// Called after a localization against this map was applied.
    fn notify_successful_localization(&self, map_id: MapId);

    /// ECEF reference of the map, if it was geo-registered.
    fn map_to_ecef(&self) -> Option<MapToEcef> {
        None
    }
}

/// Static placement of a map inside its space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapOffset {
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
    /// Per-axis scale applied to solver positions.
    pub scale: Vector3<f64>,
}

impl Default for MapOffset {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

impl MapOffset {
    /// The offset as a rigid transform (scale left out).
    pub fn without_scale(&self) -> Transform3D {
        Transform3D::new(self.position, self.rotation)
    }
}

/// Mutable per-map state, only reachable through [`MapSpace::lock`].
pub struct MapSpaceEntry {
    map_id: MapId,
    offset: MapOffset,
    space: Transform3D,
    filter: Box<dyn PoseFilter>,
}

impl MapSpaceEntry {
    pub fn map_id(&self) -> MapId {
        self.map_id
    }

    pub fn offset(&self) -> &MapOffset {
        &self.offset
    }

    /// Current correction transform of the space.
    pub fn space(&self) -> Transform3D {
        self.space
    }

    /// Overwrite the space transform with `position` and `rotation`.
    pub fn update(&mut self, position: Vector3<f64>, rotation: UnitQuaternion<f64>) {
        self.space = Transform3D::new(position, rotation);
    }

    /// Feed `candidate` through the filter and apply its estimate.
    pub fn refine(&mut self, candidate: Transform3D) -> Transform3D {
        let refined = self.filter.refine(candidate);
        self.space = refined;
        refined
    }

    pub fn invalidate_history(&mut self) {
        self.filter.invalidate_history();
    }
}

/// Copyable view of a space, for comparisons and reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaceState {
    pub map_id: MapId,
    pub offset: MapOffset,
    pub space: Transform3D,
}

/// Shared handle to one map's space.
#[derive(Clone)]
pub struct MapSpace {
    map_id: MapId,
    map: Arc<dyn MapObject>,
    entry: Arc<Mutex<MapSpaceEntry>>,
}

impl MapSpace {
    pub fn map_id(&self) -> MapId {
        self.map_id
    }

    pub fn map(&self) -> Arc<dyn MapObject> {
        Arc::clone(&self.map)
    }

    /// Lock the entry.  Fusion holds this for the whole read-modify-write.
    pub fn lock(&self) -> MutexGuard<'_, MapSpaceEntry> {
        self.entry.lock()
    }

    pub fn state(&self) -> SpaceState {
        let entry = self.entry.lock();
        SpaceState {
            map_id: entry.map_id,
            offset: entry.offset,
            space: entry.space,
        }
    }
}

/// Everything needed to register a map.
pub struct MapRegistration {
    map: Arc<dyn MapObject>,
    offset: MapOffset,
    filter: Box<dyn PoseFilter>,
}

impl MapRegistration {
    /// Identity offset and a default [`SmoothingFilter`].
    pub fn new(map: Arc<dyn MapObject>) -> Self {
        Self {
            map,
            offset: MapOffset::default(),
            filter: Box::new(SmoothingFilter::default()),
        }
    }

    pub fn with_offset(mut self, offset: MapOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_filter(mut self, filter: Box<dyn PoseFilter>) -> Self {
        self.filter = filter;
        self
    }
}

#[derive(Default)]
pub struct MapSpaceRegistry {
    spaces: RwLock<HashMap<MapId, MapSpace>>,
}

impl MapSpaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `map_id`, replacing any previous registration.
    pub fn register(&self, map_id: MapId, registration: MapRegistration) -> MapSpace {
        let MapRegistration {
            map,
            offset,
            filter,
        } = registration;
        let space = MapSpace {
            map_id,
            map,
            entry: Arc::new(Mutex::new(MapSpaceEntry {
                map_id,
                offset,
                space: Transform3D::identity(),
                filter,
            })),
        };
        if self.spaces.write().insert(map_id, space.clone()).is_some() {
            info!(%map_id, "map re-registered");
        } else {
            info!(%map_id, "map registered");
        }
        space
    }

    pub fn unregister(&self, map_id: MapId) -> bool {
        let removed = self.spaces.write().remove(&map_id).is_some();
        if removed {
            info!(%map_id, "map unregistered");
        }
        removed
    }

    pub fn resolve(&self, map_id: MapId) -> Option<MapSpace> {
        self.spaces.read().get(&map_id).cloned()
    }

    pub fn contains(&self, map_id: MapId) -> bool {
        self.spaces.read().contains_key(&map_id)
    }

    /// Registered ids in ascending order.
    pub fn map_ids(&self) -> Vec<MapId> {
        let mut ids: Vec<MapId> = self.spaces.read().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.spaces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.read().is_empty()
    }

    /// Set the space transform of `map_id`.  Returns `false` for unknown ids.
    pub fn update(
        &self,
        map_id: MapId,
        position: Vector3<f64>,
        rotation: UnitQuaternion<f64>,
    ) -> bool {
        let Some(space) = self.resolve(map_id) else {
            return false;
        };
        space.lock().update(position, rotation);
        debug!(%map_id, "space updated");
        true
    }

    /// Move a map inside its space, keeping its scale.  Returns `false` for
    /// unknown ids.
    pub fn set_offset(
        &self,
        map_id: MapId,
        position: Vector3<f64>,
        rotation: UnitQuaternion<f64>,
    ) -> bool {
        let Some(space) = self.resolve(map_id) else {
            return false;
        };
        let mut entry = space.lock();
        entry.offset.position = position;
        entry.offset.rotation = rotation;
        debug!(%map_id, "map offset updated");
        true
    }

    /// Drop the filter history of every space.
    pub fn invalidate_all_history(&self) {
        // Collect first: entry locks are never taken under the registry lock.
        let spaces: Vec<MapSpace> = self.spaces.read().values().cloned().collect();
        for space in &spaces {
            space.lock().invalidate_history();
        }
        debug!(count = spaces.len(), "filter histories invalidated");
    }
}
