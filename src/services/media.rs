//! Media service (C8): fixed profile set, stream-URI cache, snapshot URIs, and
//! per-profile multicast toggles.
//!
//! Grounded on the teacher's `get_profiles_response`/`get_stream_uri_response`
//! templates, generalized so `GetStreamUri` is backed by an actual cache instead of
//! a single hardcoded RTSP string, per the documented cache-hit latency property.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::dispatcher::{HandlerTable, ServiceRegistry, ServiceType};
use crate::error::CoreError;
use crate::platform::Platform;
use crate::soap::extract_tag_content;

pub const PATH_PREFIX: &str = "/onvif/media_service";

const PROFILE_TOKENS: [&str; 2] = ["MainProfile", "SubProfile"];
const STREAM_URI_TIMEOUT_SECONDS: u32 = 60;

#[derive(Debug, Clone)]
struct CachedStreamUri {
    uri: String,
    timeout: u32,
}

struct ProfileRecord {
    token: &'static str,
    name: &'static str,
    path_suffix: &'static str,
}

pub struct MediaService {
    platform: Arc<dyn Platform>,
    profiles: Vec<ProfileRecord>,
    stream_uri_cache: Mutex<HashMap<(String, String), CachedStreamUri>>,
    multicast_active: Mutex<HashMap<String, bool>>,
}

impl MediaService {
    pub fn new(platform: Arc<dyn Platform>) -> Arc<Self> {
        Arc::new(MediaService {
            platform,
            profiles: vec![
                ProfileRecord { token: "MainProfile", name: "MainProfile", path_suffix: "vs0" },
                ProfileRecord { token: "SubProfile", name: "SubProfile", path_suffix: "vs1" },
            ],
            stream_uri_cache: Mutex::new(HashMap::new()),
            multicast_active: Mutex::new(HashMap::new()),
        })
    }

    pub fn register(self: &Arc<Self>, registry: &ServiceRegistry) {
        let mut table = HandlerTable::new();

        let s = Arc::clone(self);
        table.register("GetProfiles", Box::new(move |_body| s.handle_get_profiles()));

        let s = Arc::clone(self);
        table.register("GetStreamUri", Box::new(move |body| s.handle_get_stream_uri(body)));

        let s = Arc::clone(self);
        table.register("GetSnapshotUri", Box::new(move |body| s.handle_get_snapshot_uri(body)));

        let s = Arc::clone(self);
        table.register(
            "GetVideoSources",
            Box::new(move |_body| s.handle_get_video_sources()),
        );

        let s = Arc::clone(self);
        table.register(
            "GetServiceCapabilities",
            Box::new(move |_body| s.handle_get_service_capabilities()),
        );

        let s = Arc::clone(self);
        table.register(
            "StartMulticastStreaming",
            Box::new(move |body| s.handle_set_multicast(body, true)),
        );

        let s = Arc::clone(self);
        table.register(
            "StopMulticastStreaming",
            Box::new(move |body| s.handle_set_multicast(body, false)),
        );

        registry.register(ServiceType::Media, PATH_PREFIX, table);
    }

    fn find_profile(&self, token: &str) -> Result<&ProfileRecord, CoreError> {
        self.profiles
            .iter()
            .find(|p| p.token == token)
            .ok_or_else(|| CoreError::not_found(format!("unknown media profile '{token}'")))
    }

    fn handle_get_profiles(&self) -> Result<String, CoreError> {
        let profiles: String = self
            .profiles
            .iter()
            .map(|p| {
                format!(
                    "<trt:Profiles token=\"{token}\" fixed=\"true\"><tt:Name xmlns:tt=\"http://www.onvif.org/ver10/schema\">{name}</tt:Name></trt:Profiles>",
                    token = p.token,
                    name = p.name,
                )
            })
            .collect();
        Ok(format!(
            "<trt:GetProfilesResponse xmlns:trt=\"http://www.onvif.org/ver10/media/wsdl\">{profiles}</trt:GetProfilesResponse>"
        ))
    }

    fn handle_get_stream_uri(&self, body: &str) -> Result<String, CoreError> {
        let token = extract_tag_content(body, "ProfileToken")
            .ok_or_else(|| CoreError::invalid_argument("GetStreamUri requires ProfileToken"))?;
        let protocol = extract_tag_content(body, "Protocol").unwrap_or_else(|| "RTSP".to_string());

        let profile = self.find_profile(&token)?;
        if !matches!(protocol.as_str(), "RTSP" | "RTP-Unicast" | "RTP-Multicast") {
            return Err(CoreError::not_found(format!("unsupported stream protocol '{protocol}'")));
        }

        let cache_key = (token.clone(), protocol.clone());
        if let Some(cached) = self.stream_uri_cache.lock().unwrap().get(&cache_key) {
            return Ok(render_stream_uri_response(&cached.uri, cached.timeout));
        }

        let uri = self.platform.rtsp_url(profile.path_suffix);
        self.stream_uri_cache.lock().unwrap().insert(
            cache_key,
            CachedStreamUri { uri: uri.clone(), timeout: STREAM_URI_TIMEOUT_SECONDS },
        );
        Ok(render_stream_uri_response(&uri, STREAM_URI_TIMEOUT_SECONDS))
    }

    fn handle_get_snapshot_uri(&self, body: &str) -> Result<String, CoreError> {
        let token = extract_tag_content(body, "ProfileToken")
            .ok_or_else(|| CoreError::invalid_argument("GetSnapshotUri requires ProfileToken"))?;
        self.find_profile(&token)?;
        let uri = self.platform.snapshot_url(&token);
        Ok(format!(
            "<trt:GetSnapshotUriResponse xmlns:trt=\"http://www.onvif.org/ver10/media/wsdl\"><trt:MediaUri><tt:Uri xmlns:tt=\"http://www.onvif.org/ver10/schema\">{uri}</tt:Uri></trt:MediaUri></trt:GetSnapshotUriResponse>"
        ))
    }

    fn handle_get_video_sources(&self) -> Result<String, CoreError> {
        Ok(
            "<trt:GetVideoSourcesResponse xmlns:trt=\"http://www.onvif.org/ver10/media/wsdl\">\
<trt:VideoSources token=\"VideoSource_1\">\
<tt:Framerate xmlns:tt=\"http://www.onvif.org/ver10/schema\">30</tt:Framerate>\
<tt:Resolution xmlns:tt=\"http://www.onvif.org/ver10/schema\"><tt:Width>1920</tt:Width><tt:Height>1080</tt:Height></tt:Resolution>\
</trt:VideoSources>\
</trt:GetVideoSourcesResponse>"
                .to_string(),
        )
    }

    fn handle_get_service_capabilities(&self) -> Result<String, CoreError> {
        Ok(format!(
            "<trt:GetServiceCapabilitiesResponse xmlns:trt=\"http://www.onvif.org/ver10/media/wsdl\">\
<trt:Capabilities>\
<tt:ProfileCapabilities xmlns:tt=\"http://www.onvif.org/ver10/schema\"><tt:MaximumNumberOfProfiles>{}</tt:MaximumNumberOfProfiles></tt:ProfileCapabilities>\
<tt:StreamingCapabilities xmlns:tt=\"http://www.onvif.org/ver10/schema\"><tt:RTPMulticast>false</tt:RTPMulticast><tt:RTP_TCP>true</tt:RTP_TCP><tt:RTP_RTSP_TCP>true</tt:RTP_RTSP_TCP></tt:StreamingCapabilities>\
</trt:Capabilities>\
</trt:GetServiceCapabilitiesResponse>",
            self.profiles.len()
        ))
    }

    fn handle_set_multicast(&self, body: &str, active: bool) -> Result<String, CoreError> {
        let token = extract_tag_content(body, "ProfileToken")
            .ok_or_else(|| CoreError::invalid_argument("multicast control requires ProfileToken"))?;
        self.find_profile(&token)?;
        self.multicast_active.lock().unwrap().insert(token, active);
        let tag = if active { "StartMulticastStreamingResponse" } else { "StopMulticastStreamingResponse" };
        Ok(format!(
            "<trt:{tag} xmlns:trt=\"http://www.onvif.org/ver10/media/wsdl\"/>"
        ))
    }
}

fn render_stream_uri_response(uri: &str, timeout: u32) -> String {
    format!(
        "<trt:GetStreamUriResponse xmlns:trt=\"http://www.onvif.org/ver10/media/wsdl\">\
<trt:MediaUri>\
<tt:Uri xmlns:tt=\"http://www.onvif.org/ver10/schema\">{uri}</tt:Uri>\
<tt:InvalidAfterConnect>false</tt:InvalidAfterConnect>\
<tt:InvalidAfterReboot>false</tt:InvalidAfterReboot>\
<tt:Timeout>PT{timeout}S</tt:Timeout>\
</trt:MediaUri>\
</trt:GetStreamUriResponse>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedPlatform;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct CountingPlatform {
        inner: SimulatedPlatform,
        rtsp_url_calls: AtomicUsize,
    }

    impl crate::platform::Platform for CountingPlatform {
        fn device_info(&self) -> Result<crate::platform::DeviceInfo, CoreError> {
            self.inner.device_info()
        }
        fn set_brightness(&self, v: i32) -> Result<(), CoreError> { self.inner.set_brightness(v) }
        fn set_contrast(&self, v: i32) -> Result<(), CoreError> { self.inner.set_contrast(v) }
        fn set_saturation(&self, v: i32) -> Result<(), CoreError> { self.inner.set_saturation(v) }
        fn set_sharpness(&self, v: i32) -> Result<(), CoreError> { self.inner.set_sharpness(v) }
        fn set_hue(&self, v: i32) -> Result<(), CoreError> { self.inner.set_hue(v) }
        fn set_day_night_mode(&self, a: bool) -> Result<(), CoreError> { self.inner.set_day_night_mode(a) }
        fn init_ir_led(&self) -> Result<(), CoreError> { self.inner.init_ir_led() }
        fn ptz_absolute_move(&self, p: crate::platform::PtzPosition) -> Result<(), CoreError> { self.inner.ptz_absolute_move(p) }
        fn ptz_relative_move(&self, p: crate::platform::PtzPosition) -> Result<(), CoreError> { self.inner.ptz_relative_move(p) }
        fn ptz_continuous_move(&self, p: crate::platform::PtzPosition) -> Result<(), CoreError> { self.inner.ptz_continuous_move(p) }
        fn ptz_stop(&self) -> Result<(), CoreError> { self.inner.ptz_stop() }
        fn rtsp_url(&self, path_suffix: &str) -> String {
            self.rtsp_url_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.rtsp_url(path_suffix)
        }
        fn snapshot_url(&self, token: &str) -> String { self.inner.snapshot_url(token) }
        fn capture_snapshot(&self) -> Result<Vec<u8>, CoreError> { self.inner.capture_snapshot() }
        fn system_telemetry(&self) -> Result<crate::platform::SystemTelemetry, CoreError> { self.inner.system_telemetry() }
        fn schedule_reboot(&self, d: std::time::Duration) { self.inner.schedule_reboot(d) }
    }

    #[test]
    fn stream_uri_is_cached_after_first_call() {
        let platform = Arc::new(CountingPlatform {
            inner: SimulatedPlatform::new("127.0.0.1", 8080, "cam"),
            rtsp_url_calls: AtomicUsize::new(0),
        });
        let svc = MediaService::new(platform.clone());
        let body = "<trt:GetStreamUri><trt:ProfileToken>MainProfile</trt:ProfileToken><trt:StreamSetup><trt:Transport><trt:Protocol>RTSP</trt:Protocol></trt:Transport></trt:StreamSetup></trt:GetStreamUri>";

        let first_start = Instant::now();
        let first = svc.handle_get_stream_uri(body).unwrap();
        let first_elapsed = first_start.elapsed();

        let second_start = Instant::now();
        let second = svc.handle_get_stream_uri(body).unwrap();
        let second_elapsed = second_start.elapsed();

        assert_eq!(first, second);
        assert!(first.contains("rtsp://127.0.0.1:8080/vs0"));
        assert_eq!(platform.rtsp_url_calls.load(Ordering::SeqCst), 1);
        assert!(second_elapsed <= first_elapsed + std::time::Duration::from_millis(5));
    }

    #[test]
    fn unknown_profile_is_not_found() {
        let svc = MediaService::new(Arc::new(SimulatedPlatform::new("127.0.0.1", 8080, "cam")));
        let body = "<trt:ProfileToken>Bogus</trt:ProfileToken>";
        let err = svc.handle_get_stream_uri(body).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn stop_multicast_on_inactive_profile_is_idempotent() {
        let svc = MediaService::new(Arc::new(SimulatedPlatform::new("127.0.0.1", 8080, "cam")));
        let body = "<trt:ProfileToken>MainProfile</trt:ProfileToken>";
        svc.handle_set_multicast(body, false).unwrap();
        svc.handle_set_multicast(body, false).unwrap();
    }
}
