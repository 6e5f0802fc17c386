//! [`RestLocalizer`] – HTTP client for the remote localization service.
//!
//! Both flavors post the encoded frame as base64 JSON:
//!
//! | Flavor | Endpoint | Answer |
//! |---|---|---|
//! | server | `POST {base}/localizeb64` | map id + `px,py,pz` + `r00..r22` |
//! | geo | `POST {base}/geoposeb64` | map id + latitude/longitude/ellipsoidHeight + `quaternion [w,x,y,z]` |
//!
//! A response whose `error` field is anything but `"none"` is a transport
//! failure; `success: false` is an ordinary no-match.

use std::num::NonZeroU32;

use anchorloc_types::{Intrinsics, LocalizeError, MapId};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::config::ServerConfig;
use crate::solver::{GeoPoseReply, ServerLocalizer, ServerPose, ServerRequest};

const LOCALIZE_ENDPOINT: &str = "localizeb64";
const GEOPOSE_ENDPOINT: &str = "geoposeb64";

#[derive(Error, Debug)]
pub enum RestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The service answered but reported an error.
    #[error("server error: {0}")]
    Server(String),
}

impl From<RestError> for LocalizeError {
    fn from(e: RestError) -> Self {
        LocalizeError::Transport(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, PartialEq)]
struct MapIdEntry {
    id: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LocalizeRequest<'a> {
    token: &'a str,
    fx: f64,
    fy: f64,
    ox: f64,
    oy: f64,
    b64: String,
    map_ids: Vec<MapIdEntry>,
}

impl<'a> LocalizeRequest<'a> {
    fn new(token: &'a str, intrinsics: &Intrinsics, image: &[u8], map_ids: &[MapId]) -> Self {
        Self {
            token,
            fx: intrinsics.focal_x,
            fy: intrinsics.focal_y,
            ox: intrinsics.principal_x,
            oy: intrinsics.principal_y,
            b64: BASE64.encode(image),
            map_ids: map_ids.iter().map(|m| MapIdEntry { id: m.0 }).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LocalizeResponse {
    error: String,
    success: bool,
    map: i32,
    px: f64,
    py: f64,
    pz: f64,
    r00: f64,
    r01: f64,
    r02: f64,
    r10: f64,
    r11: f64,
    r12: f64,
    r20: f64,
    r21: f64,
    r22: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GeoPoseResponse {
    error: String,
    success: bool,
    map: i32,
    latitude: f64,
    longitude: f64,
    ellipsoid_height: f64,
    quaternion: Vec<f64>,
}

fn check_error(error: &str) -> Result<(), RestError> {
    if error.is_empty() || error == "none" {
        Ok(())
    } else {
        Err(RestError::Server(error.to_string()))
    }
}

impl LocalizeResponse {
    fn into_pose(self) -> Result<ServerPose, RestError> {
        check_error(&self.error)?;
        #[rustfmt::skip]
        let rows = [
            [self.r00, self.r01, self.r02, self.px],
            [self.r10, self.r11, self.r12, self.py],
            [self.r20, self.r21, self.r22, self.pz],
        ];
        Ok(ServerPose {
            success: self.success,
            map_id: MapId(self.map),
            rows,
        })
    }
}

impl GeoPoseResponse {
    fn into_reply(self) -> Result<GeoPoseReply, RestError> {
        check_error(&self.error)?;
        let orientation = match self.quaternion.as_slice() {
            [w, x, y, z] => [*w, *x, *y, *z],
            _ if !self.success => [1.0, 0.0, 0.0, 0.0],
            other => {
                return Err(RestError::Server(format!(
                    "expected 4 quaternion components, got {}",
                    other.len()
                )));
            }
        };
        Ok(GeoPoseReply {
            success: self.success,
            map_id: MapId(self.map),
            latitude: self.latitude,
            longitude: self.longitude,
            ellipsoid_height: self.ellipsoid_height,
            orientation,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RestLocalizer
// ─────────────────────────────────────────────────────────────────────────────

/// An async client for the remote localization service.
///
/// Construct once and share it between the server and geo backends.
pub struct RestLocalizer {
    base_url: String,
    token: Zeroizing<String>,
    client: reqwest::Client,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl std::fmt::Debug for RestLocalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestLocalizer")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

impl RestLocalizer {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: Zeroizing::new(token.into()),
            client: reqwest::Client::new(),
            limiter: None,
        }
    }

    pub fn from_config(cfg: &ServerConfig) -> Self {
        Self::new(cfg.base_url.clone(), cfg.token.clone())
            .with_rate_limit(cfg.max_requests_per_second)
    }

    /// Cap outgoing requests per second.  `0` removes the cap.
    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.limiter = NonZeroU32::new(per_second).map(|n| RateLimiter::direct(Quota::per_second(n)));
        self
    }

    /// Use a preconfigured client (timeouts, proxies).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn post<R: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &LocalizeRequest<'_>,
    ) -> Result<R, RestError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        let url = self.url(endpoint);
        debug!(%url, bytes = body.b64.len(), "posting frame");
        Ok(self
            .client
            .post(&url)
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

#[async_trait]
impl ServerLocalizer for RestLocalizer {
    #[instrument(skip_all, fields(maps = request.map_ids.len()))]
    async fn localize(&self, request: ServerRequest<'_>) -> Result<ServerPose, LocalizeError> {
        let body =
            LocalizeRequest::new(&self.token, &request.intrinsics, request.image, request.map_ids);
        let response: LocalizeResponse = self.post(LOCALIZE_ENDPOINT, &body).await?;
        Ok(response.into_pose()?)
    }

    #[instrument(skip_all, fields(maps = request.map_ids.len()))]
    async fn geo_pose(&self, request: ServerRequest<'_>) -> Result<GeoPoseReply, LocalizeError> {
        let body =
            LocalizeRequest::new(&self.token, &request.intrinsics, request.image, request.map_ids);
        let response: GeoPoseResponse = self.post(GEOPOSE_ENDPOINT, &body).await?;
        Ok(response.into_reply()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn request_uses_wire_field_names() {
        let intrinsics = Intrinsics::new(320.0, 240.0, 500.0, 501.0);
        let body = LocalizeRequest::new("tok", &intrinsics, b"png", &[MapId(7), MapId(8)]);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["token"], "tok");
        assert_eq!(json["fx"], 500.0);
        assert_eq!(json["fy"], 501.0);
        assert_eq!(json["ox"], 320.0);
        assert_eq!(json["oy"], 240.0);
        assert_eq!(json["b64"], "cG5n");
        assert_eq!(json["mapIds"], serde_json::json!([{ "id": 7 }, { "id": 8 }]));
    }

    #[test]
    fn localize_response_becomes_rigid_rows() {
        let response: LocalizeResponse = serde_json::from_str(
            r#"{"error":"none","success":true,"map":12,"px":1.0,"py":2.0,"pz":3.0,
                "r00":1.0,"r01":0.0,"r02":0.0,"r10":0.0,"r11":1.0,"r12":0.0,
                "r20":0.0,"r21":0.0,"r22":1.0}"#,
        )
        .unwrap();
        let pose = response.into_pose().unwrap();
        assert!(pose.success);
        assert_eq!(pose.map_id, MapId(12));
        assert_eq!(pose.rows[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(pose.rows[2][3], 3.0);
    }

    #[test]
    fn failed_localization_is_not_an_error() {
        let response: LocalizeResponse =
            serde_json::from_str(r#"{"error":"none","success":false}"#).unwrap();
        let pose = response.into_pose().unwrap();
        assert!(!pose.success);
        assert!(!pose.map_id.is_valid());
    }

    #[test]
    fn server_error_field_is_reported() {
        let response: LocalizeResponse =
            serde_json::from_str(r#"{"error":"invalid token","success":false}"#).unwrap();
        let err = response.into_pose().unwrap_err();
        assert!(matches!(err, RestError::Server(ref m) if m == "invalid token"));
        let localize_err: LocalizeError = err.into();
        assert!(matches!(localize_err, LocalizeError::Transport(m) if m.contains("invalid token")));
    }

    #[test]
    fn geo_response_parses() {
        let response: GeoPoseResponse = serde_json::from_str(
            r#"{"error":"none","success":true,"map":5,"latitude":60.1,"longitude":24.9,
                "ellipsoidHeight":30.5,"quaternion":[1.0,0.0,0.0,0.0]}"#,
        )
        .unwrap();
        let reply = response.into_reply().unwrap();
        assert_eq!(reply.map_id, MapId(5));
        assert_eq!(reply.ellipsoid_height, 30.5);
        assert_eq!(reply.orientation, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn geo_response_with_bad_quaternion_is_rejected() {
        let response: GeoPoseResponse = serde_json::from_str(
            r#"{"error":"none","success":true,"map":5,"quaternion":[1.0,0.0]}"#,
        )
        .unwrap();
        assert!(response.into_reply().is_err());
    }

    #[test]
    fn debug_redacts_token() {
        let client = RestLocalizer::new("http://localhost:1234/", "secret-token");
        let debug_str = format!("{client:?}");
        assert!(!debug_str.contains("secret-token"));
        assert_eq!(client.base_url(), "http://localhost:1234");
        assert_eq!(client.url(LOCALIZE_ENDPOINT), "http://localhost:1234/localizeb64");
    }

    #[test]
    fn zero_rate_disables_limiter() {
        let client = RestLocalizer::new("http://localhost", "").with_rate_limit(0);
        assert!(client.limiter.is_none());
        let client = client.with_rate_limit(5);
        assert!(client.limiter.is_some());
    }

    fn direct_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    /// Serve one HTTP request with `body` and hand back the raw request.
    async fn serve_once(body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&raw).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn localize_round_trip_over_http() {
        let (base, server) = serve_once(
            r#"{"error":"none","success":true,"map":3,"px":0.5,"py":0.0,"pz":0.0,"r00":1.0,"r11":1.0,"r22":1.0}"#,
        )
        .await;
        let client = RestLocalizer::new(base, "tok").with_client(direct_client());
        let pose = client
            .localize(ServerRequest {
                image: b"png",
                intrinsics: Intrinsics::new(1.0, 1.0, 2.0, 2.0),
                map_ids: &[MapId(3)],
            })
            .await
            .unwrap();
        assert_eq!(pose.map_id, MapId(3));
        assert_eq!(pose.rows[0][3], 0.5);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /localizeb64"));
        assert!(request.contains(r#""mapIds":[{"id":3}]"#));
    }

    #[tokio::test]
    async fn unreachable_server_is_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let client = RestLocalizer::new(format!("http://{addr}"), "tok").with_client(direct_client());
        let err = client
            .geo_pose(ServerRequest {
                image: b"png",
                intrinsics: Intrinsics::new(1.0, 1.0, 2.0, 2.0),
                map_ids: &[],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LocalizeError::Transport(_)));
    }
}
