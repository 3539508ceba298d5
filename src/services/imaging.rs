//! Imaging service (C10): a cached set of VPSS effects, applied to the platform only
//! for fields that actually changed since the last call (the diff-based batching
//! invariant tested in §8).

use std::sync::{Arc, Mutex};

use crate::dispatcher::{HandlerTable, ServiceRegistry, ServiceType};
use crate::error::CoreError;
use crate::platform::Platform;
use crate::soap::extract_tag_content;

pub const PATH_PREFIX: &str = "/onvif/imaging_service";

const RANGE_MIN: i32 = -100;
const RANGE_MAX: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ImagingSettings {
    brightness: i32,
    contrast: i32,
    saturation: i32,
    sharpness: i32,
    hue: i32,
    day_night_mode: bool,
}

impl Default for ImagingSettings {
    fn default() -> Self {
        ImagingSettings {
            brightness: 0, contrast: 0, saturation: 0, sharpness: 0, hue: 0,
            day_night_mode: false,
        }
    }
}

pub struct ImagingService {
    platform: Arc<dyn Platform>,
    cache: Mutex<Option<ImagingSettings>>,
}

impl ImagingService {
    pub fn new(platform: Arc<dyn Platform>) -> Arc<Self> {
        if let Err(e) = platform.init_ir_led() {
            tracing::warn!(error = %e, "IR-LED initialization failed");
        }
        Arc::new(ImagingService { platform, cache: Mutex::new(None) })
    }

    pub fn register(self: &Arc<Self>, registry: &ServiceRegistry) {
        let mut table = HandlerTable::new();

        let s = Arc::clone(self);
        table.register(
            "SetImagingSettings",
            Box::new(move |body| s.handle_set_imaging_settings(body)),
        );

        let s = Arc::clone(self);
        table.register(
            "GetImagingSettings",
            Box::new(move |_body| s.handle_get_imaging_settings()),
        );

        registry.register(ServiceType::Imaging, PATH_PREFIX, table);
    }

    fn handle_set_imaging_settings(&self, body: &str) -> Result<String, CoreError> {
        let parsed = parse_imaging_settings(body)?;
        validate_range(parsed.brightness, "Brightness")?;
        validate_range(parsed.contrast, "Contrast")?;
        validate_range(parsed.saturation, "Saturation")?;
        validate_range(parsed.sharpness, "Sharpness")?;
        validate_range(parsed.hue, "Hue")?;

        let mut cache = self.cache.lock().unwrap();
        let previous = (*cache).unwrap_or_default();

        // IrCutFilter is optional on the wire; an omitted tag means "leave day/night
        // mode alone", not "turn it off" (unlike Hue, which ONVIF clients always send).
        let new_settings = ImagingSettings {
            brightness: parsed.brightness,
            contrast: parsed.contrast,
            saturation: parsed.saturation,
            sharpness: parsed.sharpness,
            hue: parsed.hue,
            day_night_mode: parsed.day_night_mode.unwrap_or(previous.day_night_mode),
        };

        let mut applied = previous;
        let mut first_failure: Option<CoreError> = None;

        if new_settings.brightness != previous.brightness {
            match self.platform.set_brightness(new_settings.brightness) {
                Ok(()) => applied.brightness = new_settings.brightness,
                Err(e) => { first_failure.get_or_insert(e); }
            }
        }
        if new_settings.contrast != previous.contrast {
            match self.platform.set_contrast(new_settings.contrast) {
                Ok(()) => applied.contrast = new_settings.contrast,
                Err(e) => { first_failure.get_or_insert(e); }
            }
        }
        if new_settings.saturation != previous.saturation {
            match self.platform.set_saturation(new_settings.saturation) {
                Ok(()) => applied.saturation = new_settings.saturation,
                Err(e) => { first_failure.get_or_insert(e); }
            }
        }
        if new_settings.sharpness != previous.sharpness {
            match self.platform.set_sharpness(new_settings.sharpness) {
                Ok(()) => applied.sharpness = new_settings.sharpness,
                Err(e) => { first_failure.get_or_insert(e); }
            }
        }
        if new_settings.hue != previous.hue {
            match self.platform.set_hue(new_settings.hue) {
                Ok(()) => applied.hue = new_settings.hue,
                Err(e) => { first_failure.get_or_insert(e); }
            }
        }
        if new_settings.day_night_mode != previous.day_night_mode {
            match self.platform.set_day_night_mode(new_settings.day_night_mode) {
                Ok(()) => applied.day_night_mode = new_settings.day_night_mode,
                Err(e) => { first_failure.get_or_insert(e); }
            }
        }

        *cache = Some(applied);

        if let Some(err) = first_failure {
            return Err(err);
        }
        Ok(
            "<timg:SetImagingSettingsResponse xmlns:timg=\"http://www.onvif.org/ver20/imaging/wsdl\"/>"
                .to_string(),
        )
    }

    fn handle_get_imaging_settings(&self) -> Result<String, CoreError> {
        let settings = *self.cache.lock().unwrap().get_or_insert_with(ImagingSettings::default);
        Ok(format!(
            "<timg:GetImagingSettingsResponse xmlns:timg=\"http://www.onvif.org/ver20/imaging/wsdl\">\
<timg:ImagingSettings>\
<tt:Brightness xmlns:tt=\"http://www.onvif.org/ver10/schema\">{}</tt:Brightness>\
<tt:Contrast xmlns:tt=\"http://www.onvif.org/ver10/schema\">{}</tt:Contrast>\
<tt:ColorSaturation xmlns:tt=\"http://www.onvif.org/ver10/schema\">{}</tt:ColorSaturation>\
<tt:Sharpness xmlns:tt=\"http://www.onvif.org/ver10/schema\">{}</tt:Sharpness>\
<tt:IrCutFilter xmlns:tt=\"http://www.onvif.org/ver10/schema\">{}</tt:IrCutFilter>\
</timg:ImagingSettings>\
</timg:GetImagingSettingsResponse>",
            settings.brightness, settings.contrast, settings.saturation, settings.sharpness,
            if settings.day_night_mode { "AUTO" } else { "OFF" },
        ))
    }
}

fn validate_range(value: i32, field: &str) -> Result<(), CoreError> {
    if !(RANGE_MIN..=RANGE_MAX).contains(&value) {
        return Err(CoreError::invalid_argument(format!(
            "{field} value {value} is out of range [{RANGE_MIN}, {RANGE_MAX}]"
        )));
    }
    Ok(())
}

/// Mirrors `ImagingSettings` except `day_night_mode`, which stays `None` when the
/// request omits `IrCutFilter` so the caller can fall back to the cached value instead
/// of silently resetting it.
struct ParsedImagingSettings {
    brightness: i32,
    contrast: i32,
    saturation: i32,
    sharpness: i32,
    hue: i32,
    day_night_mode: Option<bool>,
}

fn parse_imaging_settings(body: &str) -> Result<ParsedImagingSettings, CoreError> {
    let field = |name: &str| -> Result<i32, CoreError> {
        extract_tag_content(body, name)
            .ok_or_else(|| CoreError::invalid_argument(format!("SetImagingSettings requires {name}")))?
            .parse::<i32>()
            .map_err(|_| CoreError::invalid_argument(format!("{name} is not a valid integer")))
    };
    Ok(ParsedImagingSettings {
        brightness: field("Brightness")?,
        contrast: field("Contrast")?,
        saturation: field("ColorSaturation")?,
        sharpness: field("Sharpness")?,
        hue: extract_tag_content(body, "Hue").and_then(|v| v.parse().ok()).unwrap_or(0),
        day_night_mode: extract_tag_content(body, "IrCutFilter")
            .map(|v| matches!(v.as_str(), "ON" | "AUTO")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{DeviceInfo, PtzPosition, SystemTelemetry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPlatform {
        apply_calls: AtomicUsize,
    }

    impl Platform for CountingPlatform {
        fn device_info(&self) -> Result<DeviceInfo, CoreError> {
            Ok(DeviceInfo {
                manufacturer: "x".into(), model: "x".into(), firmware_version: "x".into(),
                serial_number: "x".into(), hardware_id: "x".into(),
            })
        }
        fn set_brightness(&self, _v: i32) -> Result<(), CoreError> { self.apply_calls.fetch_add(1, Ordering::SeqCst); Ok(()) }
        fn set_contrast(&self, _v: i32) -> Result<(), CoreError> { self.apply_calls.fetch_add(1, Ordering::SeqCst); Ok(()) }
        fn set_saturation(&self, _v: i32) -> Result<(), CoreError> { self.apply_calls.fetch_add(1, Ordering::SeqCst); Ok(()) }
        fn set_sharpness(&self, _v: i32) -> Result<(), CoreError> { self.apply_calls.fetch_add(1, Ordering::SeqCst); Ok(()) }
        fn set_hue(&self, _v: i32) -> Result<(), CoreError> { self.apply_calls.fetch_add(1, Ordering::SeqCst); Ok(()) }
        fn set_day_night_mode(&self, _a: bool) -> Result<(), CoreError> { self.apply_calls.fetch_add(1, Ordering::SeqCst); Ok(()) }
        fn init_ir_led(&self) -> Result<(), CoreError> { Ok(()) }
        fn ptz_absolute_move(&self, _p: PtzPosition) -> Result<(), CoreError> { Ok(()) }
        fn ptz_relative_move(&self, _p: PtzPosition) -> Result<(), CoreError> { Ok(()) }
        fn ptz_continuous_move(&self, _p: PtzPosition) -> Result<(), CoreError> { Ok(()) }
        fn ptz_stop(&self) -> Result<(), CoreError> { Ok(()) }
        fn rtsp_url(&self, _p: &str) -> String { String::new() }
        fn snapshot_url(&self, _t: &str) -> String { String::new() }
        fn capture_snapshot(&self) -> Result<Vec<u8>, CoreError> { Ok(Vec::new()) }
        fn system_telemetry(&self) -> Result<SystemTelemetry, CoreError> {
            Ok(SystemTelemetry { cpu_percent: 0.0, memory_percent: 0.0, uptime_seconds: 0, temperature_celsius: 0.0 })
        }
        fn schedule_reboot(&self, _d: std::time::Duration) {}
    }

    fn body(brightness: i32, contrast: i32, saturation: i32, sharpness: i32, hue: i32) -> String {
        format!(
            "<timg:SetImagingSettings><timg:ImagingSettings><tt:Brightness>{brightness}</tt:Brightness><tt:Contrast>{contrast}</tt:Contrast><tt:ColorSaturation>{saturation}</tt:ColorSaturation><tt:Sharpness>{sharpness}</tt:Sharpness><tt:Hue>{hue}</tt:Hue></timg:ImagingSettings></timg:SetImagingSettings>"
        )
    }

    fn body_with_ir_cut(brightness: i32, contrast: i32, saturation: i32, sharpness: i32, hue: i32, ir_cut: &str) -> String {
        format!(
            "<timg:SetImagingSettings><timg:ImagingSettings><tt:Brightness>{brightness}</tt:Brightness><tt:Contrast>{contrast}</tt:Contrast><tt:ColorSaturation>{saturation}</tt:ColorSaturation><tt:Sharpness>{sharpness}</tt:Sharpness><tt:Hue>{hue}</tt:Hue><tt:IrCutFilter>{ir_cut}</tt:IrCutFilter></timg:ImagingSettings></timg:SetImagingSettings>"
        )
    }

    #[test]
    fn identical_settings_applied_twice_issue_zero_calls_the_second_time() {
        let platform = Arc::new(CountingPlatform { apply_calls: AtomicUsize::new(0) });
        let svc = ImagingService::new(platform.clone());
        let b = body(50, 50, 0, -10, 5);

        svc.handle_set_imaging_settings(&b).unwrap();
        let after_first = platform.apply_calls.load(Ordering::SeqCst);
        assert_eq!(after_first, 5);

        svc.handle_set_imaging_settings(&b).unwrap();
        let after_second = platform.apply_calls.load(Ordering::SeqCst);
        assert_eq!(after_second, after_first);
    }

    #[test]
    fn only_changed_fields_are_applied() {
        let platform = Arc::new(CountingPlatform { apply_calls: AtomicUsize::new(0) });
        let svc = ImagingService::new(platform.clone());
        svc.handle_set_imaging_settings(&body(10, 10, 10, 10, 10)).unwrap();
        assert_eq!(platform.apply_calls.load(Ordering::SeqCst), 5);

        svc.handle_set_imaging_settings(&body(20, 10, 10, 10, 10)).unwrap();
        assert_eq!(platform.apply_calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn out_of_range_value_is_invalid_argument() {
        let platform = Arc::new(CountingPlatform { apply_calls: AtomicUsize::new(0) });
        let svc = ImagingService::new(platform);
        let err = svc.handle_set_imaging_settings(&body(500, 0, 0, 0, 0)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn day_night_mode_change_triggers_a_platform_apply() {
        let platform = Arc::new(CountingPlatform { apply_calls: AtomicUsize::new(0) });
        let svc = ImagingService::new(platform.clone());
        svc.handle_set_imaging_settings(&body(0, 0, 0, 0, 0)).unwrap();
        assert_eq!(platform.apply_calls.load(Ordering::SeqCst), 0);

        svc.handle_set_imaging_settings(&body_with_ir_cut(0, 0, 0, 0, 0, "AUTO")).unwrap();
        assert_eq!(platform.apply_calls.load(Ordering::SeqCst), 1);

        let xml = svc.handle_get_imaging_settings().unwrap();
        assert!(xml.contains("<tt:IrCutFilter xmlns:tt=\"http://www.onvif.org/ver10/schema\">AUTO</tt:IrCutFilter>"));

        svc.handle_set_imaging_settings(&body_with_ir_cut(0, 0, 0, 0, 0, "AUTO")).unwrap();
        assert_eq!(platform.apply_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn omitting_ir_cut_filter_preserves_the_previous_day_night_mode() {
        let platform = Arc::new(CountingPlatform { apply_calls: AtomicUsize::new(0) });
        let svc = ImagingService::new(platform.clone());

        svc.handle_set_imaging_settings(&body_with_ir_cut(0, 0, 0, 0, 0, "AUTO")).unwrap();
        assert_eq!(platform.apply_calls.load(Ordering::SeqCst), 1);

        // A later partial update that changes only Brightness and omits IrCutFilter
        // must not flip day/night mode back off.
        svc.handle_set_imaging_settings(&body(10, 0, 0, 0, 0)).unwrap();
        assert_eq!(platform.apply_calls.load(Ordering::SeqCst), 2);

        let xml = svc.handle_get_imaging_settings().unwrap();
        assert!(xml.contains("<tt:IrCutFilter xmlns:tt=\"http://www.onvif.org/ver10/schema\">AUTO</tt:IrCutFilter>"));
    }
}
