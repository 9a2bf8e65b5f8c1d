//! Per-camera ONVIF device/media SOAP façade.
//!
//! One `DeviceFacade` is constructed per camera config and owns everything a
//! response needs: resolved quality profiles, the prebuilt profile XML and
//! identity-derived device information. The façade is stateless between
//! requests; only wall-clock dependent fields are recomputed per call.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike, Utc};
use sha1::{Digest, Sha1};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{AuthConfig, CameraConfig, QualityProfile};
use crate::errors::{Result, ServerError};
use crate::soap;
use crate::templates;
use crate::templates::DateTimeParts;
use crate::wsse;

pub const MAIN_STREAM_TOKEN: &str = "main_stream";
pub const SUB_STREAM_TOKEN: &str = "sub_stream";

static SNAPSHOT_PLACEHOLDER: &[u8] = include_bytes!("../resources/snapshot.png");

/// Device identity fields, derived once from the camera's own uuid, mac and
/// channel so no two cameras in a fleet report identical information.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub model: String,
    pub firmware_version: String,
    pub serial_number: String,
    pub hardware_id: String,
}

impl DeviceInfo {
    fn derive(config: &CameraConfig) -> Self {
        let digest = Sha1::digest(format!("{}-{}", config.uuid, config.channel).as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        let mac_flat = config.mac.replace(':', "");

        Self {
            manufacturer: format!("CamVendor{}", config.channel),
            model: format!("ProCam-{}", &hex[..6]),
            firmware_version: format!("{}.0.{}", config.channel, &hex[..2]),
            serial_number: config.uuid.to_string(),
            hardware_id: format!("HW-{}-{}", mac_flat, &hex[..6]),
        }
    }
}

pub struct DeviceFacade {
    config: CameraConfig,
    hostname: String,
    auth: Option<AuthConfig>,
    high: QualityProfile,
    low: Option<QualityProfile>,
    profiles_xml: String,
    device_info: DeviceInfo,
}

impl DeviceFacade {
    pub fn new(config: CameraConfig, hostname: String, auth: Option<AuthConfig>) -> Self {
        let high = config.high_quality.resolve(config.channel);
        let low = config.low_quality.as_ref().map(|q| q.resolve(config.channel));

        let mut profiles_xml = templates::profile_xml(
            MAIN_STREAM_TOKEN,
            "MainStream",
            "encoder_hq_config_token",
            "HqCameraConfiguration",
            high.width,
            high.height,
            high.width,
            high.height,
            high.framerate,
            high.bitrate,
            high.quality,
        );
        if let Some(ref lq) = low {
            profiles_xml.push_str(&templates::profile_xml(
                SUB_STREAM_TOKEN,
                "SubStream",
                "encoder_lq_config_token",
                "LqCameraConfiguration",
                high.width,
                high.height,
                lq.width,
                lq.height,
                lq.framerate,
                lq.bitrate,
                lq.quality,
            ));
        }

        let device_info = DeviceInfo::derive(&config);

        Self {
            config,
            hostname,
            auth,
            high,
            low,
            profiles_xml,
            device_info,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn server_port(&self) -> u16 {
        self.config.ports.server
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    fn device_xaddr(&self) -> String {
        format!(
            "http://{}:{}/onvif/device_service",
            self.hostname, self.config.ports.server
        )
    }

    fn media_xaddr(&self) -> String {
        format!(
            "http://{}:{}/onvif/media_service",
            self.hostname, self.config.ports.server
        )
    }

    /// Dispatch one device-service request body to its operation.
    pub fn handle_device_service(&self, body: &str) -> String {
        let Some(action) = soap::extract_action(body) else {
            return templates::fault("ter:WellFormed", "Malformed SOAP body");
        };
        debug!(camera = %self.config.name, action = %action, "DeviceService request");

        match action.as_str() {
            "GetSystemDateAndTime" => self.get_system_date_and_time(),
            "GetCapabilities" => self.get_capabilities(soap::extract_category(body)),
            "GetServices" => templates::get_services_response(
                &self.device_xaddr(),
                &self.media_xaddr(),
            ),
            "GetDeviceInformation" => templates::get_device_information_response(
                &self.device_info.manufacturer,
                &self.device_info.model,
                &self.device_info.firmware_version,
                &self.device_info.serial_number,
                &self.device_info.hardware_id,
            ),
            _ => templates::fault(
                "ter:ActionNotSupported",
                &format!("Unknown action: {}", action),
            ),
        }
    }

    /// Dispatch one media-service request body to its operation.
    pub fn handle_media_service(&self, body: &str) -> String {
        let Some(action) = soap::extract_action(body) else {
            return templates::fault("ter:WellFormed", "Malformed SOAP body");
        };
        debug!(camera = %self.config.name, action = %action, "MediaService request");

        match action.as_str() {
            "GetProfiles" => templates::get_profiles_response(&self.profiles_xml),
            "GetVideoSources" => templates::get_video_sources_response(
                self.high.width,
                self.high.height,
                self.high.framerate,
            ),
            "GetSnapshotUri" => self.get_snapshot_uri(soap::extract_profile_token(body)),
            "GetStreamUri" => self.get_stream_uri(soap::extract_profile_token(body)),
            _ => templates::fault(
                "ter:ActionNotSupported",
                &format!("Unknown action: {}", action),
            ),
        }
    }

    fn get_system_date_and_time(&self) -> String {
        let utc = Utc::now();
        let local = Local::now();
        templates::get_system_date_and_time_response(
            &posix_timezone(local.offset().local_minus_utc()),
            is_dst_observed(&local),
            &date_time_parts(&utc),
            &date_time_parts(&local),
        )
    }

    fn get_capabilities(&self, category: Option<String>) -> String {
        let (device, media) = match category.as_deref() {
            None | Some("All") => (true, true),
            Some("Device") => (true, false),
            Some("Media") => (false, true),
            Some(_) => (true, true),
        };
        let profile_count = if self.low.is_some() { 2 } else { 1 };
        // Minor version varies per camera so fleet-wide responses differ.
        templates::get_capabilities_response(
            &self.device_xaddr(),
            &self.media_xaddr(),
            self.config.channel,
            profile_count,
            device,
            media,
        )
    }

    fn get_snapshot_uri(&self, profile_token: Option<String>) -> String {
        let want_sub = profile_token.as_deref() == Some(SUB_STREAM_TOKEN);
        let low_snapshot = self
            .low
            .as_ref()
            .and_then(|q| q.snapshot.as_deref())
            .filter(|_| want_sub);

        let uri = if let Some(path) = low_snapshot {
            format!("http://{}:{}{}", self.hostname, self.config.ports.snapshot, path)
        } else if let Some(ref path) = self.high.snapshot {
            // sub_stream without a low-quality snapshot falls back here.
            format!("http://{}:{}{}", self.hostname, self.config.ports.snapshot, path)
        } else {
            format!(
                "http://{}:{}/snapshot.png",
                self.hostname, self.config.ports.server
            )
        };
        templates::get_snapshot_uri_response(&uri)
    }

    fn get_stream_uri(&self, profile_token: Option<String>) -> String {
        let path = match (profile_token.as_deref(), &self.low) {
            (Some(SUB_STREAM_TOKEN), Some(low)) => &low.rtsp,
            _ => &self.high.rtsp,
        };
        let uri = format!("rtsp://{}:{}{}", self.hostname, self.config.ports.rtsp, path);
        templates::get_stream_uri_response(&uri)
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/onvif/device_service", post(device_service_handler))
            .route("/onvif/media_service", post(media_service_handler))
            .route("/snapshot.png", get(snapshot_handler))
            .fallback(not_found_handler)
            .with_state(self)
    }
}

fn date_time_parts<Tz: TimeZone>(dt: &DateTime<Tz>) -> DateTimeParts {
    DateTimeParts {
        year: dt.year(),
        month: dt.month(),
        day: dt.day(),
        hour: dt.hour(),
        minute: dt.minute(),
        second: dt.second(),
    }
}

/// POSIX-style timezone string ("UTC-2" for two hours east of UTC).
fn posix_timezone(offset_east_secs: i32) -> String {
    let total_minutes = -offset_east_secs / 60;
    let sign = if total_minutes < 0 { '-' } else { '+' };
    let abs = total_minutes.abs();
    if abs % 60 == 0 {
        format!("UTC{}{}", sign, abs / 60)
    } else {
        format!("UTC{}{}:{}", sign, abs / 60, abs % 60)
    }
}

/// DST is observed when the current UTC offset is ahead of the smaller of
/// the January/July offsets for this year.
fn is_dst_observed(now: &DateTime<Local>) -> bool {
    let year = now.year();
    let jan = Local.with_ymd_and_hms(year, 1, 1, 12, 0, 0).single();
    let jul = Local.with_ymd_and_hms(year, 7, 1, 12, 0, 0).single();
    match (jan, jul) {
        (Some(jan), Some(jul)) => {
            let standard = jan
                .offset()
                .local_minus_utc()
                .min(jul.offset().local_minus_utc());
            now.offset().local_minus_utc() > standard
        }
        _ => false,
    }
}

const SOAP_CONTENT_TYPE: (&str, &str) = ("Content-Type", "application/soap+xml");

fn check_auth(facade: &DeviceFacade, body: &str) -> std::result::Result<(), Response> {
    let Some(ref credentials) = facade.auth else {
        return Ok(());
    };
    if let Err(e) = wsse::authenticate(body, credentials) {
        warn!(camera = %facade.config.name, "Authentication failed: {}", e);
        return Err((
            StatusCode::UNAUTHORIZED,
            [SOAP_CONTENT_TYPE],
            templates::auth_fault("Authentication failed"),
        )
            .into_response());
    }
    Ok(())
}

fn log_request(facade: &DeviceFacade, service: &str, headers: &HeaderMap) {
    info!(camera = %facade.config.name, "HTTP POST /onvif/{}", service);
    if headers.contains_key("authorization") {
        debug!(camera = %facade.config.name, "HTTP Auth header present");
    }
}

async fn device_service_handler(
    State(facade): State<Arc<DeviceFacade>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    log_request(&facade, "device_service", &headers);
    if let Err(response) = check_auth(&facade, &body) {
        return response;
    }
    let xml = facade.handle_device_service(&body);
    (StatusCode::OK, [SOAP_CONTENT_TYPE], xml).into_response()
}

async fn media_service_handler(
    State(facade): State<Arc<DeviceFacade>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    log_request(&facade, "media_service", &headers);
    if let Err(response) = check_auth(&facade, &body) {
        return response;
    }
    let xml = facade.handle_media_service(&body);
    (StatusCode::OK, [SOAP_CONTENT_TYPE], xml).into_response()
}

async fn snapshot_handler(State(facade): State<Arc<DeviceFacade>>) -> Response {
    info!(camera = %facade.config.name, "HTTP GET /snapshot.png");
    (
        StatusCode::OK,
        [("Content-Type", "image/png")],
        Bytes::from_static(SNAPSHOT_PLACEHOLDER),
    )
        .into_response()
}

async fn not_found_handler(State(facade): State<Arc<DeviceFacade>>, uri: Uri) -> Response {
    warn!(camera = %facade.config.name, path = %uri.path(), "Unknown path requested");
    (StatusCode::NOT_FOUND, "404 Not Found\n").into_response()
}

/// Bind the façade's HTTP listener on the camera's own address and serve it
/// on a background task. Bind failure is fatal for this camera only.
pub async fn spawn(facade: Arc<DeviceFacade>) -> Result<(tokio::task::JoinHandle<()>, SocketAddr)> {
    let addr = format!("{}:{}", facade.hostname, facade.config.ports.server);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        ServerError::bind(format!(
            "Camera '{}' server port {}: {}",
            facade.config.name, addr, e
        ))
    })?;
    let local_addr = listener.local_addr()?;
    let name = facade.config.name.clone();
    let app = facade.router();

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(camera = %name, "ONVIF server error: {}", e);
        }
    });
    Ok((handle, local_addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CameraPorts, TargetConfig, TargetPorts};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn camera_config(name: &str, channel: u16, port_base: u16) -> CameraConfig {
        CameraConfig {
            mac: format!("02:42:ac:11:00:{:02x}", channel),
            name: name.to_string(),
            uuid: Uuid::new_v4(),
            hostname: Some("192.168.1.10".to_string()),
            channel,
            ports: CameraPorts {
                server: port_base,
                rtsp: port_base + 1,
                snapshot: port_base + 2,
            },
            high_quality: QualityProfile {
                rtsp: "/live/ch{channel}/main".to_string(),
                snapshot: Some("/snap/ch{channel}.jpg".to_string()),
                width: 2592,
                height: 1944,
                framerate: 15,
                bitrate: 3072,
                quality: 4,
            },
            low_quality: Some(QualityProfile {
                rtsp: "/live/ch{channel}/sub".to_string(),
                snapshot: None,
                width: 640,
                height: 480,
                framerate: 15,
                bitrate: 512,
                quality: 1,
            }),
            target: TargetConfig {
                hostname: "10.0.0.5".to_string(),
                ports: TargetPorts { rtsp: 554, snapshot: 80 },
            },
        }
    }

    fn facade(name: &str, channel: u16, port_base: u16) -> DeviceFacade {
        DeviceFacade::new(camera_config(name, channel, port_base), "192.168.1.10".to_string(), None)
    }

    fn soap_request(body: &str) -> String {
        format!(
            r#"<?xml version="1.0"?><s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body>{}</s:Body></s:Envelope>"#,
            body
        )
    }

    #[test]
    fn device_information_is_pairwise_distinct() {
        let a = facade("Channel1", 1, 8081);
        let b = facade("Channel2", 2, 8091);
        let c = facade("Channel3", 3, 8101);
        assert_ne!(a.device_info(), b.device_info());
        assert_ne!(b.device_info(), c.device_info());
        assert_ne!(a.device_info(), c.device_info());
        // Even same-channel cameras differ through their uuid.
        let d = facade("Channel1b", 1, 8111);
        assert_ne!(a.device_info(), d.device_info());
    }

    #[test]
    fn capabilities_xaddr_points_at_own_address() {
        let f = facade("Channel1", 1, 8081);
        let xml = f.handle_device_service(&soap_request("<GetCapabilities/>"));
        assert!(xml.contains("http://192.168.1.10:8081/onvif/device_service"));
        assert!(xml.contains("http://192.168.1.10:8081/onvif/media_service"));

        let media_only = f.handle_device_service(&soap_request(
            "<GetCapabilities><Category>Media</Category></GetCapabilities>",
        ));
        assert!(!media_only.contains("<tt:Device>"));
        assert!(media_only.contains("<tt:Media>"));
    }

    #[test]
    fn services_xaddr_points_at_own_address() {
        let f = facade("Channel2", 2, 8091);
        let xml = f.handle_device_service(&soap_request("<GetServices/>"));
        assert!(xml.contains("http://192.168.1.10:8091/onvif/device_service"));
        assert!(xml.contains("http://192.168.1.10:8091/onvif/media_service"));
    }

    #[test]
    fn get_profiles_is_idempotent() {
        let f = facade("Channel1", 1, 8081);
        let first = f.handle_media_service(&soap_request("<GetProfiles/>"));
        let second = f.handle_media_service(&soap_request("<GetProfiles/>"));
        assert_eq!(first, second);
        assert!(first.contains("token=\"main_stream\""));
        assert!(first.contains("token=\"sub_stream\""));
    }

    #[test]
    fn stream_uri_substitutes_channel() {
        let f = facade("Channel3", 3, 8081);
        let main = f.handle_media_service(&soap_request(
            "<GetStreamUri><ProfileToken>main_stream</ProfileToken></GetStreamUri>",
        ));
        assert!(main.contains("rtsp://192.168.1.10:8082/live/ch3/main"));

        let sub = f.handle_media_service(&soap_request(
            "<GetStreamUri><ProfileToken>sub_stream</ProfileToken></GetStreamUri>",
        ));
        assert!(sub.contains("rtsp://192.168.1.10:8082/live/ch3/sub"));
    }

    #[test]
    fn snapshot_uri_sub_stream_falls_back_to_high_quality() {
        // low_quality has no snapshot path configured
        let f = facade("Channel1", 1, 8081);
        let xml = f.handle_media_service(&soap_request(
            "<GetSnapshotUri><ProfileToken>sub_stream</ProfileToken></GetSnapshotUri>",
        ));
        assert!(xml.contains("http://192.168.1.10:8083/snap/ch1.jpg"));
    }

    #[test]
    fn snapshot_uri_placeholder_without_configured_paths() {
        let mut config = camera_config("Channel1", 1, 8081);
        config.high_quality.snapshot = None;
        config.low_quality = None;
        let f = DeviceFacade::new(config, "192.168.1.10".to_string(), None);
        let xml = f.handle_media_service(&soap_request("<GetSnapshotUri/>"));
        assert!(xml.contains("http://192.168.1.10:8081/snapshot.png"));
    }

    #[test]
    fn unknown_action_returns_fault() {
        let f = facade("Channel1", 1, 8081);
        let xml = f.handle_device_service(&soap_request("<Reboot/>"));
        assert!(xml.contains("ter:ActionNotSupported"));
        let xml = f.handle_media_service("not xml");
        assert!(xml.contains("ter:WellFormed"));
    }

    #[test]
    fn system_date_and_time_always_succeeds() {
        let f = facade("Channel1", 1, 8081);
        let xml = f.handle_device_service(&soap_request("<GetSystemDateAndTime/>"));
        assert!(xml.contains("<tt:DateTimeType>NTP</tt:DateTimeType>"));
        assert!(xml.contains("<tt:UTCDateTime>"));
        assert!(xml.contains("<tt:LocalDateTime>"));
    }

    #[test]
    fn posix_timezone_formatting() {
        assert_eq!(posix_timezone(0), "UTC+0");
        assert_eq!(posix_timezone(2 * 3600), "UTC-2");
        assert_eq!(posix_timezone(-5 * 3600), "UTC+5");
        assert_eq!(posix_timezone(5 * 3600 + 30 * 60), "UTC-5:30");
    }

    #[tokio::test]
    async fn http_unknown_path_is_404() {
        let f = Arc::new(facade("Channel1", 1, 8081));
        let response = f
            .router()
            .oneshot(Request::builder().uri("/admin").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn http_snapshot_is_png() {
        let f = Arc::new(facade("Channel1", 1, 8081));
        let response = f
            .router()
            .oneshot(
                Request::builder()
                    .uri("/snapshot.png")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "image/png"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[tokio::test]
    async fn http_rejects_unauthenticated_request_when_auth_enabled() {
        let auth = AuthConfig {
            username: "admin".to_string(),
            password: "secret".to_string(),
        };
        let f = Arc::new(DeviceFacade::new(
            camera_config("Channel1", 1, 8081),
            "192.168.1.10".to_string(),
            Some(auth),
        ));
        let response = f
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/onvif/device_service")
                    .body(Body::from(soap_request("<GetDeviceInformation/>")))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("ter:NotAuthorized"));
    }
}
