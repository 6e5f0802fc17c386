//! Pose solvers – the three localization backends behind one tagged union.
//!
//! | Flavor | Input | Raw answer |
//! |---|---|---|
//! | [`Backend::Local`] | raw luma pixels, on the blocking pool | map handle + map-space pose |
//! | [`Backend::RemoteServer`] | encoded image, over the network | map id + 3×4 rigid rows |
//! | [`Backend::RemoteGeo`] | encoded image, over the network | map id + geodetic pose |
//!
//! Backends only produce a [`Solved`] value; registry lookups, convention
//! correction and fusion happen in the [`Localizer`](crate::Localizer).

use std::sync::Arc;
use std::time::Instant;

use anchorloc_geometry::geodesy::{enu_orientation_to_ecef, wgs84_to_ecef};
use anchorloc_geometry::{MapToEcef, Transform3D};
use anchorloc_types::{
    BackendKind, CompressedFrame, FrameSnapshot, GeoPose, ImageView, Intrinsics, LocalizeError,
    MapHandle, MapId, PixelBuffer, RawPose, SolveResult, Solved,
};
use async_trait::async_trait;
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use tracing::debug;

// ─────────────────────────────────────────────────────────────────────────────
// Backend seams
// ─────────────────────────────────────────────────────────────────────────────

/// What the native localizer returns for one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NativeSolve {
    /// Negative when nothing matched.
    pub handle: MapHandle,
    /// Camera pose in the matched map's space.
    pub pose: Transform3D,
}

/// In-process image localizer.  Called on a blocking worker thread.
pub trait NativeLocalizer: Send + Sync {
    /// `image` is only valid for the duration of the call.
    fn localize_image(
        &self,
        image: ImageView<'_>,
        intrinsics: &Intrinsics,
    ) -> Result<NativeSolve, LocalizeError>;
}

/// Maps the native localizer's session handles to stable map ids.
pub trait MapIdResolver: Send + Sync {
    /// Returns an id ≤ 0 when the handle is unknown.
    fn map_handle_to_id(&self, handle: MapHandle) -> MapId;
}

/// One remote localization request.
#[derive(Debug, Clone, Copy)]
pub struct ServerRequest<'a> {
    /// Encoded (PNG) image bytes.
    pub image: &'a [u8],
    pub intrinsics: Intrinsics,
    /// Maps the server should try, in order.
    pub map_ids: &'a [MapId],
}

/// Answer of the server flavor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerPose {
    pub success: bool,
    pub map_id: MapId,
    /// Row-major 3×4 rigid transform: rotation columns 0–2, position column 3.
    pub rows: [[f64; 4]; 3],
}

/// Answer of the geo flavor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoseReply {
    pub success: bool,
    pub map_id: MapId,
    pub latitude: f64,
    pub longitude: f64,
    pub ellipsoid_height: f64,
    /// ENU orientation as `[w, x, y, z]`.
    pub orientation: [f64; 4],
}

/// Remote localization service.
#[async_trait]
pub trait ServerLocalizer: Send + Sync {
    async fn localize(&self, request: ServerRequest<'_>) -> Result<ServerPose, LocalizeError>;

    async fn geo_pose(&self, request: ServerRequest<'_>) -> Result<GeoPoseReply, LocalizeError>;
}

/// Geodetic conversions used by the geo flavor.
pub trait GeoConverter: Send + Sync {
    fn wgs84_to_ecef(&self, latitude: f64, longitude: f64, ellipsoid_height: f64) -> Vector3<f64>;

    /// Express a geodetic camera pose in the space of the map described by
    /// `reference`.
    fn geo_to_map(&self, geo: &GeoPose, reference: &MapToEcef) -> Transform3D;
}

/// WGS84 ellipsoid conversions.
#[derive(Debug, Default, Clone, Copy)]
pub struct Wgs84Converter;

impl GeoConverter for Wgs84Converter {
    fn wgs84_to_ecef(&self, latitude: f64, longitude: f64, ellipsoid_height: f64) -> Vector3<f64> {
        wgs84_to_ecef(latitude, longitude, ellipsoid_height)
    }

    fn geo_to_map(&self, geo: &GeoPose, reference: &MapToEcef) -> Transform3D {
        let ecef_rotation = enu_orientation_to_ecef(geo.latitude, geo.longitude, &geo.orientation);
        Transform3D::new(
            reference.ecef_to_map_position(&geo.ecef),
            reference.ecef_to_map_rotation(&ecef_rotation),
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Frame handed to [`Backend::solve`].
pub enum SolveInput {
    /// Raw snapshot for the local flavor.
    Raw(FrameSnapshot),
    /// Encoded frame plus candidate maps for the remote flavors.
    Encoded {
        frame: CompressedFrame,
        map_ids: Vec<MapId>,
    },
}

/// Result of [`Backend::solve`], with the lent pixel buffer when there was one.
pub struct SolveReply {
    pub result: Result<Solved, LocalizeError>,
    pub recycled: Option<PixelBuffer>,
}

#[derive(Clone)]
pub enum Backend {
    Local {
        native: Arc<dyn NativeLocalizer>,
        resolver: Arc<dyn MapIdResolver>,
    },
    RemoteServer {
        client: Arc<dyn ServerLocalizer>,
    },
    RemoteGeo {
        client: Arc<dyn ServerLocalizer>,
        converter: Arc<dyn GeoConverter>,
    },
}

impl Backend {
    pub fn local(native: Arc<dyn NativeLocalizer>, resolver: Arc<dyn MapIdResolver>) -> Self {
        Backend::Local { native, resolver }
    }

    pub fn server(client: Arc<dyn ServerLocalizer>) -> Self {
        Backend::RemoteServer { client }
    }

    /// Geo flavor with the default [`Wgs84Converter`].
    pub fn geo(client: Arc<dyn ServerLocalizer>) -> Self {
        Backend::RemoteGeo {
            client,
            converter: Arc::new(Wgs84Converter),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Local { .. } => BackendKind::Local,
            Backend::RemoteServer { .. } => BackendKind::RemoteServer,
            Backend::RemoteGeo { .. } => BackendKind::RemoteGeo,
        }
    }

    /// Run the solver on `input`.
    pub async fn solve(&self, input: SolveInput) -> SolveReply {
        match (self, input) {
            (Backend::Local { native, resolver }, SolveInput::Raw(snapshot)) => {
                solve_local(Arc::clone(native), resolver.as_ref(), snapshot).await
            }
            (Backend::RemoteServer { client }, SolveInput::Encoded { frame, map_ids }) => {
                SolveReply {
                    result: solve_server(client.as_ref(), &frame, &map_ids).await,
                    recycled: None,
                }
            }
            (
                Backend::RemoteGeo { client, converter },
                SolveInput::Encoded { frame, map_ids },
            ) => SolveReply {
                result: solve_geo(client.as_ref(), converter.as_ref(), &frame, &map_ids).await,
                recycled: None,
            },
            (backend, input) => SolveReply {
                result: Err(LocalizeError::Transport(format!(
                    "{} backend cannot consume this frame",
                    backend.kind()
                ))),
                recycled: match input {
                    SolveInput::Raw(snapshot) => Some(snapshot.pixels),
                    SolveInput::Encoded { .. } => None,
                },
            },
        }
    }

    /// Express a raw answer in map space.  Geodetic answers need the map's
    /// ECEF reference; `None` when it is missing.
    pub fn to_map_space(&self, raw: &RawPose, reference: Option<&MapToEcef>) -> Option<Transform3D> {
        match raw {
            RawPose::MapSpace(pose) => Some(*pose),
            RawPose::Geodetic(geo) => {
                let reference = reference?;
                let pose = match self {
                    Backend::RemoteGeo { converter, .. } => converter.geo_to_map(geo, reference),
                    _ => Wgs84Converter.geo_to_map(geo, reference),
                };
                Some(pose)
            }
        }
    }
}

async fn solve_local(
    native: Arc<dyn NativeLocalizer>,
    resolver: &dyn MapIdResolver,
    snapshot: FrameSnapshot,
) -> SolveReply {
    let started = Instant::now();
    let joined = tokio::task::spawn_blocking(move || {
        let result = native.localize_image(snapshot.view(), &snapshot.info.intrinsics);
        (result, snapshot.pixels)
    })
    .await;
    let elapsed = started.elapsed();

    let (result, pixels) = match joined {
        Ok(done) => done,
        Err(e) => {
            return SolveReply {
                result: Err(LocalizeError::WorkerFailed(e.to_string())),
                recycled: None,
            };
        }
    };
    let result = result.map(|solve| {
        if solve.handle.0 < 0 {
            return Solved::NoMatch { elapsed };
        }
        let map_id = resolver.map_handle_to_id(solve.handle);
        if !map_id.is_valid() {
            debug!(handle = solve.handle.0, "map handle did not resolve to an id");
            return Solved::NoMatch { elapsed };
        }
        Solved::Match(SolveResult {
            map_id,
            raw: RawPose::MapSpace(solve.pose),
            elapsed,
        })
    });
    SolveReply {
        result,
        recycled: Some(pixels),
    }
}

async fn solve_server(
    client: &dyn ServerLocalizer,
    frame: &CompressedFrame,
    map_ids: &[MapId],
) -> Result<Solved, LocalizeError> {
    let started = Instant::now();
    let reply = client
        .localize(ServerRequest {
            image: &frame.encoded,
            intrinsics: frame.info.intrinsics,
            map_ids,
        })
        .await?;
    let elapsed = started.elapsed();

    if !reply.success || !reply.map_id.is_valid() {
        return Ok(Solved::NoMatch { elapsed });
    }
    Ok(Solved::Match(SolveResult {
        map_id: reply.map_id,
        raw: RawPose::MapSpace(Transform3D::from_rigid_rows(&reply.rows)),
        elapsed,
    }))
}

async fn solve_geo(
    client: &dyn ServerLocalizer,
    converter: &dyn GeoConverter,
    frame: &CompressedFrame,
    map_ids: &[MapId],
) -> Result<Solved, LocalizeError> {
    let started = Instant::now();
    let reply = client
        .geo_pose(ServerRequest {
            image: &frame.encoded,
            intrinsics: frame.info.intrinsics,
            map_ids,
        })
        .await?;
    let elapsed = started.elapsed();

    if !reply.success || !reply.map_id.is_valid() {
        return Ok(Solved::NoMatch { elapsed });
    }
    let [w, x, y, z] = reply.orientation;
    let orientation = UnitQuaternion::new_normalize(Quaternion::new(w, x, y, z));
    let ecef = converter.wgs84_to_ecef(reply.latitude, reply.longitude, reply.ellipsoid_height);
    Ok(Solved::Match(SolveResult {
        map_id: reply.map_id,
        raw: RawPose::Geodetic(GeoPose {
            latitude: reply.latitude,
            longitude: reply.longitude,
            ellipsoid_height: reply.ellipsoid_height,
            orientation,
            ecef,
        }),
        elapsed,
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anchorloc_types::{CaptureInfo, Distortion};
    use nalgebra::Matrix3;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn calibrated_info() -> CaptureInfo {
        CaptureInfo {
            width: 2,
            height: 2,
            intrinsics: Intrinsics::new(1.0, 1.0, 2.0, 2.0),
            distortion: Distortion::default(),
            device_pose: Transform3D::identity(),
        }
    }

    /// Native localizer returning a fixed answer and counting calls.
    pub(crate) struct FixedNative {
        pub answer: Result<NativeSolve, LocalizeError>,
        pub calls: AtomicUsize,
    }

    impl FixedNative {
        pub(crate) fn matching(handle: i32, pose: Transform3D) -> Self {
            Self {
                answer: Ok(NativeSolve {
                    handle: MapHandle(handle),
                    pose,
                }),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl NativeLocalizer for FixedNative {
        fn localize_image(
            &self,
            image: ImageView<'_>,
            _intrinsics: &Intrinsics,
        ) -> Result<NativeSolve, LocalizeError> {
            assert!(!image.pixels.is_empty());
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    /// Resolver mapping handle `h` to id `h + offset`.
    pub(crate) struct OffsetResolver(pub i32);

    impl MapIdResolver for OffsetResolver {
        fn map_handle_to_id(&self, handle: MapHandle) -> MapId {
            MapId(handle.0 + self.0)
        }
    }

    /// Remote localizer with canned replies; records the map ids it was sent.
    pub(crate) struct CannedServer {
        pub pose: Result<ServerPose, LocalizeError>,
        pub geo: Result<GeoPoseReply, LocalizeError>,
        pub requested: Mutex<Vec<Vec<MapId>>>,
    }

    impl CannedServer {
        pub(crate) fn new(pose: ServerPose, geo: GeoPoseReply) -> Self {
            Self {
                pose: Ok(pose),
                geo: Ok(geo),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ServerLocalizer for CannedServer {
        async fn localize(&self, request: ServerRequest<'_>) -> Result<ServerPose, LocalizeError> {
            self.requested.lock().push(request.map_ids.to_vec());
            self.pose.clone()
        }

        async fn geo_pose(&self, request: ServerRequest<'_>) -> Result<GeoPoseReply, LocalizeError> {
            self.requested.lock().push(request.map_ids.to_vec());
            self.geo.clone()
        }
    }

    #[rustfmt::skip]
    pub(crate) const TRANSLATE_X: [[f64; 4]; 3] = [
        [1.0, 0.0, 0.0, 1.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
    ];

    pub(crate) fn server_pose(map_id: i32) -> ServerPose {
        ServerPose {
            success: true,
            map_id: MapId(map_id),
            rows: TRANSLATE_X,
        }
    }

    pub(crate) fn geo_reply(map_id: i32) -> GeoPoseReply {
        GeoPoseReply {
            success: true,
            map_id: MapId(map_id),
            latitude: 0.0,
            longitude: 0.0,
            ellipsoid_height: 0.0,
            orientation: [1.0, 0.0, 0.0, 0.0],
        }
    }

    fn encoded(map_ids: Vec<MapId>) -> SolveInput {
        SolveInput::Encoded {
            frame: CompressedFrame {
                info: calibrated_info(),
                encoded: vec![1, 2, 3],
            },
            map_ids,
        }
    }

    fn raw() -> SolveInput {
        SolveInput::Raw(FrameSnapshot {
            info: calibrated_info(),
            pixels: PixelBuffer::from_vec(vec![7; 4]),
        })
    }

    #[tokio::test]
    async fn local_match_resolves_id_and_recycles_pixels() {
        let pose = Transform3D::new(Vector3::new(1.0, 2.0, 3.0), UnitQuaternion::identity());
        let native = Arc::new(FixedNative::matching(0, pose));
        let backend = Backend::local(native.clone(), Arc::new(OffsetResolver(5)));
        let reply = backend.solve(raw()).await;
        match reply.result.unwrap() {
            Solved::Match(r) => {
                assert_eq!(r.map_id, MapId(5));
                assert_eq!(r.raw, RawPose::MapSpace(pose));
            }
            other => panic!("expected match, got {other:?}"),
        }
        assert_eq!(reply.recycled.unwrap().as_slice(), &[7; 4]);
        assert_eq!(native.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn negative_handle_is_no_match() {
        let native = Arc::new(FixedNative::matching(-1, Transform3D::identity()));
        let backend = Backend::local(native, Arc::new(OffsetResolver(100)));
        let reply = backend.solve(raw()).await;
        assert!(matches!(reply.result, Ok(Solved::NoMatch { .. })));
        assert!(reply.recycled.is_some());
    }

    #[tokio::test]
    async fn unresolvable_handle_is_no_match() {
        let native = Arc::new(FixedNative::matching(3, Transform3D::identity()));
        let backend = Backend::local(native, Arc::new(OffsetResolver(-10)));
        let reply = backend.solve(raw()).await;
        assert!(matches!(reply.result, Ok(Solved::NoMatch { .. })));
    }

    #[tokio::test]
    async fn native_error_is_propagated() {
        let native = Arc::new(FixedNative {
            answer: Err(LocalizeError::Transport("plugin crashed".into())),
            calls: AtomicUsize::new(0),
        });
        let backend = Backend::local(native, Arc::new(OffsetResolver(0)));
        let reply = backend.solve(raw()).await;
        assert_eq!(
            reply.result,
            Err(LocalizeError::Transport("plugin crashed".into()))
        );
        assert!(reply.recycled.is_some());
    }

    #[tokio::test]
    async fn server_rows_become_map_space_pose() {
        let client = Arc::new(CannedServer::new(server_pose(42), geo_reply(42)));
        let backend = Backend::server(client.clone());
        let reply = backend.solve(encoded(vec![MapId(42), MapId(43)])).await;
        match reply.result.unwrap() {
            Solved::Match(r) => {
                assert_eq!(r.map_id, MapId(42));
                let RawPose::MapSpace(pose) = r.raw else {
                    panic!("expected map-space pose");
                };
                assert!((pose.translation - Vector3::x()).norm() < 1e-12);
            }
            other => panic!("expected match, got {other:?}"),
        }
        assert_eq!(*client.requested.lock(), vec![vec![MapId(42), MapId(43)]]);
    }

    #[tokio::test]
    async fn server_failure_flag_is_no_match() {
        let mut pose = server_pose(42);
        pose.success = false;
        let backend = Backend::server(Arc::new(CannedServer::new(pose, geo_reply(42))));
        let reply = backend.solve(encoded(vec![])).await;
        assert!(matches!(reply.result, Ok(Solved::NoMatch { .. })));
    }

    #[tokio::test]
    async fn geo_reply_is_lifted_to_ecef() {
        let backend = Backend::geo(Arc::new(CannedServer::new(server_pose(1), geo_reply(9))));
        let reply = backend.solve(encoded(vec![MapId(9)])).await;
        let Ok(Solved::Match(r)) = reply.result else {
            panic!("expected match");
        };
        let RawPose::Geodetic(geo) = r.raw else {
            panic!("expected geodetic pose");
        };
        assert!((geo.ecef - Vector3::new(anchorloc_geometry::geodesy::WGS84_A, 0.0, 0.0)).norm() < 1e-6);
    }

    #[tokio::test]
    async fn mismatched_input_is_rejected_and_pixels_returned() {
        let backend = Backend::server(Arc::new(CannedServer::new(server_pose(1), geo_reply(1))));
        let reply = backend.solve(raw()).await;
        assert!(matches!(reply.result, Err(LocalizeError::Transport(_))));
        assert!(reply.recycled.is_some());
    }

    #[test]
    fn geodetic_pose_needs_reference() {
        let backend = Backend::geo(Arc::new(CannedServer::new(server_pose(1), geo_reply(1))));
        let geo = GeoPose {
            latitude: 0.0,
            longitude: 0.0,
            ellipsoid_height: 0.0,
            orientation: UnitQuaternion::identity(),
            ecef: wgs84_to_ecef(0.0, 0.0, 0.0),
        };
        assert!(backend.to_map_space(&RawPose::Geodetic(geo), None).is_none());

        // A map whose origin sits at the geodetic point, axes aligned with ECEF.
        let reference = MapToEcef {
            origin: geo.ecef,
            rotation: Matrix3::identity(),
            scale: 1.0,
        };
        let pose = backend
            .to_map_space(&RawPose::Geodetic(geo), Some(&reference))
            .unwrap();
        assert!(pose.translation.norm() < 1e-9);
    }

    #[test]
    fn map_space_pose_passes_through() {
        let backend = Backend::server(Arc::new(CannedServer::new(server_pose(1), geo_reply(1))));
        let t = Transform3D::new(Vector3::new(4.0, 5.0, 6.0), UnitQuaternion::identity());
        assert_eq!(backend.to_map_space(&RawPose::MapSpace(t), None), Some(t));
    }
}
