//! `anchorloc-runtime` – the localization engine.
//!
//! Takes frames from a [`CameraDataProvider`][anchorloc_capture::CameraDataProvider],
//! solves them with one of three backends, and fuses the answers into the
//! per-map spaces of a shared registry.
//!
//! # Modules
//!
//! - [`localizer`] – [`Localizer`][localizer::Localizer]: the attempt state
//!   machine.  Serializes attempts, keeps the attempt/success counters and
//!   the last localized map, and drives the periodic loop.
//! - [`solver`] – [`Backend`][solver::Backend]: local, server and geo
//!   solvers behind one tagged union, plus the seams
//!   ([`NativeLocalizer`][solver::NativeLocalizer],
//!   [`ServerLocalizer`][solver::ServerLocalizer],
//!   [`GeoConverter`][solver::GeoConverter]) an integration implements.
//! - [`rest`] – [`RestLocalizer`][rest::RestLocalizer]: the HTTP
//!   `ServerLocalizer` posting base64 frames, rate limited with `governor`.
//! - [`registry`] – [`MapSpaceRegistry`][registry::MapSpaceRegistry]: map id →
//!   space lookup, shared by every localizer in the process.
//! - [`fusion`] – [`PoseFusion`][fusion::PoseFusion]: candidate pose → space
//!   correction, filtered or exact.
//! - [`events`] – [`EventHub`][events::EventHub]: synchronous handlers and a
//!   broadcast channel for `PoseFound` / `MapChanged` / `Reset`.
//! - [`config`] – `~/.anchorloc/config.toml` with `ANCHORLOC_*` overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing] with an
//!   optional OTLP span exporter.

pub mod config;
pub mod events;
pub mod fusion;
pub mod localizer;
pub mod registry;
pub mod rest;
pub mod solver;
pub mod telemetry;

pub use config::{ConfigError, LocalizerConfig, ServerConfig};
pub use events::EventHub;
pub use fusion::{Fused, PoseFusion};
pub use localizer::{AttemptPhase, AttemptRequest, Localizer, LocalizerBuilder};
pub use registry::{MapObject, MapOffset, MapRegistration, MapSpace, MapSpaceRegistry, SpaceState};
pub use rest::{RestError, RestLocalizer};
pub use solver::{
    Backend, GeoConverter, GeoPoseReply, MapIdResolver, NativeLocalizer, NativeSolve,
    ServerLocalizer, ServerPose, ServerRequest, Wgs84Converter,
};
pub use telemetry::{TracerProviderGuard, init_tracing};
