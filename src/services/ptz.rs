//! PTZ service (C9): absolute/relative/continuous move, a bounded preset table, and a
//! background reaper that stops continuous moves once their timeout elapses.
//!
//! The reaper is new relative to the teacher (which has no PTZ timeout concept at
//! all); it is grounded on the same `thread::spawn` + shared-mutex idiom the teacher
//! uses for its WS-Discovery listener thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::dispatcher::{HandlerTable, ServiceRegistry, ServiceType};
use crate::error::CoreError;
use crate::platform::{Platform, PtzPosition};
use crate::soap::{extract_attribute, extract_tag_content};

pub const PATH_PREFIX: &str = "/onvif/ptz_service";
pub const PRESET_CAPACITY: usize = 32;

const REAPER_POLL_INTERVAL: Duration = Duration::from_millis(500);

struct PresetEntry {
    token: String,
    name: String,
    position: PtzPosition,
}

struct ContinuousMoveEntry {
    start: Instant,
    timeout: Duration,
}

struct PtzState {
    presets: Mutex<Vec<PresetEntry>>,
    continuous_moves: Mutex<HashMap<String, ContinuousMoveEntry>>,
    current_position: Mutex<PtzPosition>,
}

pub struct PtzService {
    platform: Arc<dyn Platform>,
    state: Arc<PtzState>,
    reaper_stop: Arc<AtomicBool>,
    reaper_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PtzService {
    pub fn new(platform: Arc<dyn Platform>) -> Arc<Self> {
        let state = Arc::new(PtzState {
            presets: Mutex::new(Vec::new()),
            continuous_moves: Mutex::new(HashMap::new()),
            current_position: Mutex::new(PtzPosition { pan: 0, tilt: 0, zoom: 0 }),
        });
        let reaper_stop = Arc::new(AtomicBool::new(false));

        let reaper_platform = Arc::clone(&platform);
        let reaper_state = Arc::clone(&state);
        let reaper_stop_flag = Arc::clone(&reaper_stop);
        let reaper_handle = std::thread::spawn(move || {
            reap_continuous_moves(reaper_platform, reaper_state, reaper_stop_flag);
        });

        Arc::new(PtzService {
            platform,
            state,
            reaper_stop,
            reaper_handle: Mutex::new(Some(reaper_handle)),
        })
    }

    pub fn register(self: &Arc<Self>, registry: &ServiceRegistry) {
        let mut table = HandlerTable::new();

        let s = Arc::clone(self);
        table.register("AbsoluteMove", Box::new(move |body| s.handle_absolute_move(body)));

        let s = Arc::clone(self);
        table.register("RelativeMove", Box::new(move |body| s.handle_relative_move(body)));

        let s = Arc::clone(self);
        table.register("ContinuousMove", Box::new(move |body| s.handle_continuous_move(body)));

        let s = Arc::clone(self);
        table.register("Stop", Box::new(move |body| s.handle_stop(body)));

        let s = Arc::clone(self);
        table.register("SetPreset", Box::new(move |body| s.handle_set_preset(body)));

        let s = Arc::clone(self);
        table.register("GotoPreset", Box::new(move |body| s.handle_goto_preset(body)));

        let s = Arc::clone(self);
        table.register("RemovePreset", Box::new(move |body| s.handle_remove_preset(body)));

        registry.register(ServiceType::Ptz, PATH_PREFIX, table);
    }

    /// Number of times the reaper (or a client `Stop`) has invoked the platform stop
    /// call; exposed for tests, not part of the wire protocol.
    pub fn continuous_move_count(&self) -> usize {
        self.state.continuous_moves.lock().unwrap().len()
    }

    fn handle_absolute_move(&self, body: &str) -> Result<String, CoreError> {
        let position = parse_position(body)?;
        self.platform.ptz_absolute_move(position)?;
        *self.state.current_position.lock().unwrap() = position;
        Ok("<tptz:AbsoluteMoveResponse xmlns:tptz=\"http://www.onvif.org/ver20/ptz/wsdl\"/>".to_string())
    }

    fn handle_relative_move(&self, body: &str) -> Result<String, CoreError> {
        let delta = parse_position(body)?;
        self.platform.ptz_relative_move(delta)?;
        let mut current = self.state.current_position.lock().unwrap();
        current.pan += delta.pan;
        current.tilt += delta.tilt;
        current.zoom += delta.zoom;
        Ok("<tptz:RelativeMoveResponse xmlns:tptz=\"http://www.onvif.org/ver20/ptz/wsdl\"/>".to_string())
    }

    fn handle_continuous_move(&self, body: &str) -> Result<String, CoreError> {
        let velocity = parse_position(body)?;
        let profile = extract_tag_content(body, "ProfileToken").unwrap_or_else(|| "MainProfile".to_string());
        let timeout = extract_tag_content(body, "Timeout")
            .and_then(|iso| parse_iso8601_duration_seconds(&iso))
            .unwrap_or(0);

        self.platform.ptz_continuous_move(velocity)?;
        self.state.continuous_moves.lock().unwrap().insert(
            profile,
            ContinuousMoveEntry { start: Instant::now(), timeout: Duration::from_secs(timeout) },
        );
        Ok("<tptz:ContinuousMoveResponse xmlns:tptz=\"http://www.onvif.org/ver20/ptz/wsdl\"/>".to_string())
    }

    fn handle_stop(&self, body: &str) -> Result<String, CoreError> {
        let profile = extract_tag_content(body, "ProfileToken").unwrap_or_else(|| "MainProfile".to_string());
        self.state.continuous_moves.lock().unwrap().remove(&profile);
        self.platform.ptz_stop()?;
        Ok("<tptz:StopResponse xmlns:tptz=\"http://www.onvif.org/ver20/ptz/wsdl\"/>".to_string())
    }

    fn handle_set_preset(&self, body: &str) -> Result<String, CoreError> {
        let token = extract_tag_content(body, "PresetToken").filter(|t| !t.is_empty());
        let name = extract_tag_content(body, "PresetName").unwrap_or_default();
        let position = *self.state.current_position.lock().unwrap();

        let mut presets = self.state.presets.lock().unwrap();
        if let Some(existing_token) = &token {
            if let Some(entry) = presets.iter_mut().find(|p| &p.token == existing_token) {
                entry.name = name;
                entry.position = position;
                return Ok(render_set_preset_response(existing_token));
            }
        }

        if presets.len() >= PRESET_CAPACITY {
            return Err(CoreError::capacity_exceeded(
                "preset capacity reached; remove a preset before adding another",
            ));
        }
        let new_token = token.unwrap_or_else(|| format!("Preset{}", presets.len() + 1));
        presets.push(PresetEntry { token: new_token.clone(), name, position });
        Ok(render_set_preset_response(&new_token))
    }

    fn handle_goto_preset(&self, body: &str) -> Result<String, CoreError> {
        let token = extract_tag_content(body, "PresetToken")
            .ok_or_else(|| CoreError::invalid_argument("GotoPreset requires PresetToken"))?;
        let position = {
            let presets = self.state.presets.lock().unwrap();
            presets
                .iter()
                .find(|p| p.token == token)
                .map(|p| p.position)
                .ok_or_else(|| CoreError::not_found(format!("unknown preset '{token}'")))?
        };
        self.platform.ptz_absolute_move(position)?;
        *self.state.current_position.lock().unwrap() = position;
        Ok("<tptz:GotoPresetResponse xmlns:tptz=\"http://www.onvif.org/ver20/ptz/wsdl\"/>".to_string())
    }

    fn handle_remove_preset(&self, body: &str) -> Result<String, CoreError> {
        let token = extract_tag_content(body, "PresetToken")
            .ok_or_else(|| CoreError::invalid_argument("RemovePreset requires PresetToken"))?;
        let mut presets = self.state.presets.lock().unwrap();
        let before = presets.len();
        presets.retain(|p| p.token != token);
        if presets.len() == before {
            return Err(CoreError::not_found(format!("unknown preset '{token}'")));
        }
        Ok("<tptz:RemovePresetResponse xmlns:tptz=\"http://www.onvif.org/ver20/ptz/wsdl\"/>".to_string())
    }
}

impl Drop for PtzService {
    fn drop(&mut self) {
        self.reaper_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reaper_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn reap_continuous_moves(platform: Arc<dyn Platform>, state: Arc<PtzState>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(REAPER_POLL_INTERVAL);
        let expired: Vec<String> = {
            let moves = state.continuous_moves.lock().unwrap();
            moves
                .iter()
                .filter(|(_, entry)| entry.start.elapsed() >= entry.timeout)
                .map(|(token, _)| token.clone())
                .collect()
        };
        for token in expired {
            // Best-effort: the original caller already received success when the
            // move started, so a platform stop failure here is only logged.
            if let Err(err) = platform.ptz_stop() {
                tracing::warn!(profile = %token, error = %err, "reaper stop call failed");
            }
            state.continuous_moves.lock().unwrap().remove(&token);
        }
    }
}

fn parse_position(body: &str) -> Result<PtzPosition, CoreError> {
    let pan = extract_attribute(body, "PanTilt", "x").and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
    let tilt = extract_attribute(body, "PanTilt", "y").and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
    let zoom = extract_attribute(body, "Zoom", "x").and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
    Ok(PtzPosition {
        pan: (pan * 1000.0) as i32,
        tilt: (tilt * 1000.0) as i32,
        zoom: (zoom * 1000.0) as i32,
    })
}

fn render_set_preset_response(token: &str) -> String {
    format!(
        "<tptz:SetPresetResponse xmlns:tptz=\"http://www.onvif.org/ver20/ptz/wsdl\"><tptz:PresetToken>{token}</tptz:PresetToken></tptz:SetPresetResponse>"
    )
}

/// Parses a small subset of ISO-8601 durations (`PT<seconds>S`) since that is the only
/// form ONVIF clients send for PTZ timeouts.
fn parse_iso8601_duration_seconds(iso: &str) -> Option<u64> {
    let rest = iso.strip_prefix("PT")?;
    let seconds_str = rest.strip_suffix('S')?;
    seconds_str.parse::<u64>().ok()
}
