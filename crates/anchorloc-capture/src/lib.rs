//! `anchorloc-capture` – the camera side of the localization pipeline.
//!
//! # Modules
//!
//! - [`provider`] – [`CameraDataProvider`][provider::CameraDataProvider]: the
//!   trait a camera integration implements to hand its most recent frame to a
//!   localizer.
//! - [`plane`] – stride-aware copy of a padded luma plane into a reused
//!   [`PixelBuffer`][anchorloc_types::PixelBuffer].
//! - [`replay`] – [`ReplayProvider`][replay::ReplayProvider]: an in-memory
//!   provider fed with pre-recorded planes or encoded images.
//! - [`shared`] – [`SharedProvider`][shared::SharedProvider]: a clonable
//!   handle that lets a feeder keep submitting frames to a provider owned by
//!   a localizer.

pub mod plane;
pub mod provider;
pub mod replay;
pub mod shared;

pub use plane::{LumaPlane, PlaneError, copy_unpadded};
pub use provider::CameraDataProvider;
pub use replay::ReplayProvider;
pub use shared::SharedProvider;
