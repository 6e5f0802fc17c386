//! `anchorloc-geometry` – spatial math for the localization pipeline.
//!
//! Everything that turns numbers coming back from a localizer into transforms
//! the tracking space can consume lives here.  Nothing in this crate knows
//! about cameras, maps, or networking.
//!
//! # Modules
//!
//! - [`transform`] – [`Transform3D`][transform::Transform3D]: rigid-body
//!   transform (translation + unit quaternion) with composition, inversion and
//!   conversion from the 3×4 rigid rows returned by a localization server.
//! - [`convention`] – the fixed coordinate-convention correction between the
//!   localizer's camera frame and the tracking space
//!   ([`solver_to_world`][convention::solver_to_world] and its inverse).
//! - [`geodesy`] – WGS84 / ECEF conversions and the
//!   [`MapToEcef`][geodesy::MapToEcef] reference attached to geo-registered
//!   maps.
//! - [`filter`] – [`PoseFilter`][filter::PoseFilter]: temporal smoothing of
//!   space corrections, with the default
//!   [`SmoothingFilter`][filter::SmoothingFilter] sliding-window implementation.

pub mod convention;
pub mod filter;
pub mod geodesy;
pub mod transform;

pub use convention::{solver_to_world, world_to_solver};
pub use filter::{FilterSettings, PoseFilter, SmoothingFilter};
pub use geodesy::MapToEcef;
pub use transform::Transform3D;
