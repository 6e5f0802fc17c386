//! WGS84 / ECEF conversions.
//!
//! Geo-registered maps carry a [`MapToEcef`] reference: the ECEF position of
//! the map origin, the rotation from map axes to ECEF axes and a uniform
//! scale.  A geodetic localization result (latitude, longitude, ellipsoid
//! height and an ENU orientation) is first lifted to ECEF and then brought
//! into map space with that reference.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// WGS84 semi-major axis (metres).
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// First eccentricity squared.
fn wgs84_e2() -> f64 {
    WGS84_F * (2.0 - WGS84_F)
}

/// Convert geodetic coordinates (degrees, metres above the ellipsoid) to
/// ECEF metres.
pub fn wgs84_to_ecef(latitude_deg: f64, longitude_deg: f64, ellipsoid_height: f64) -> Vector3<f64> {
    let (lat, lon) = (latitude_deg.to_radians(), longitude_deg.to_radians());
    let e2 = wgs84_e2();
    let n = WGS84_A / (1.0 - e2 * lat.sin().powi(2)).sqrt();
    Vector3::new(
        (n + ellipsoid_height) * lat.cos() * lon.cos(),
        (n + ellipsoid_height) * lat.cos() * lon.sin(),
        (n * (1.0 - e2) + ellipsoid_height) * lat.sin(),
    )
}

/// Rotation taking local East-North-Up axes at the given location to ECEF
/// axes.
pub fn enu_to_ecef_rotation(latitude_deg: f64, longitude_deg: f64) -> Rotation3<f64> {
    let (lat, lon) = (latitude_deg.to_radians(), longitude_deg.to_radians());
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();
    let east = Vector3::new(-sin_lon, cos_lon, 0.0);
    let north = Vector3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat);
    let up = Vector3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat);
    Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[east, north, up]))
}

/// Lift an orientation expressed in the local ENU frame at the given
/// location into ECEF.
pub fn enu_orientation_to_ecef(
    latitude_deg: f64,
    longitude_deg: f64,
    orientation: &UnitQuaternion<f64>,
) -> UnitQuaternion<f64> {
    UnitQuaternion::from_rotation_matrix(&enu_to_ecef_rotation(latitude_deg, longitude_deg))
        * orientation
}

// ────────────────────────────────────────────────────────────────────────────
// MapToEcef
// ────────────────────────────────────────────────────────────────────────────

/// Georeference of a single map.
///
/// Serialised as 13 doubles: ECEF origin (3), row-major map→ECEF rotation
/// (9), scale (1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapToEcef {
    pub origin: Vector3<f64>,
    pub rotation: Matrix3<f64>,
    pub scale: f64,
}

impl MapToEcef {
    /// Number of doubles in the flat representation.
    pub const LEN: usize = 13;

    /// Parse the flat 13-double form.  Returns `None` for a non-positive or
    /// non-finite scale.
    pub fn from_array(values: &[f64; Self::LEN]) -> Option<Self> {
        let scale = values[12];
        if !scale.is_finite() || scale <= 0.0 {
            return None;
        }
        Some(Self {
            origin: Vector3::new(values[0], values[1], values[2]),
            rotation: Matrix3::from_row_slice(&values[3..12]),
            scale,
        })
    }

    /// Flatten back to the 13-double form.
    pub fn to_array(&self) -> [f64; Self::LEN] {
        let r = &self.rotation;
        [
            self.origin.x, self.origin.y, self.origin.z,
            r[(0, 0)], r[(0, 1)], r[(0, 2)],
            r[(1, 0)], r[(1, 1)], r[(1, 2)],
            r[(2, 0)], r[(2, 1)], r[(2, 2)],
            self.scale,
        ]
    }

    /// ECEF position → map position.
    pub fn ecef_to_map_position(&self, ecef: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.transpose() * (ecef - self.origin) / self.scale
    }

    /// Map position → ECEF position.
    pub fn map_to_ecef_position(&self, map: &Vector3<f64>) -> Vector3<f64> {
        self.origin + self.rotation * map * self.scale
    }

    /// ECEF orientation → map orientation.
    pub fn ecef_to_map_rotation(&self, ecef: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
        UnitQuaternion::from_matrix(&self.rotation).inverse() * ecef
    }
}
