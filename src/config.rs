//! The two-layer configuration surface (§4.11): a `clap`-derived CLI struct plus an
//! optional INI file, merged with CLI > INI > built-in default precedence.
//!
//! Grounded on the teacher's `Config` (itself a `clap::Parser`); the INI reader is new,
//! hand-rolled the same way the teacher hand-rolls its WS-Discovery XML rather than
//! pulling in a config crate for a handful of `[section] key = value` lines.

use std::collections::HashMap;
use std::net::IpAddr;

use clap::Parser;

/// Raw command-line arguments. Every field is optional so the merge step can tell
/// "not supplied" apart from "supplied but equal to the default".
#[derive(Debug, Clone, Parser)]
#[command(name = "onvif-camera-daemon")]
#[command(about = "ONVIF services daemon for an embedded IP camera")]
pub struct CliArgs {
    /// RTSP stream URL the platform collaborator captures snapshots from
    #[arg(short = 'r', long)]
    pub rtsp_stream_url: Option<String>,

    /// Port for the ONVIF service
    #[arg(short = 'P', long)]
    pub onvif_port: Option<u16>,

    /// Device name for ONVIF identification
    #[arg(short = 'n', long)]
    pub device_name: Option<String>,

    /// Username for ONVIF Basic authentication
    #[arg(short = 'u', long)]
    pub onvif_username: Option<String>,

    /// Password for ONVIF Basic authentication
    #[arg(short = 'p', long)]
    pub onvif_password: Option<String>,

    /// Container/interface IP address for WS-Discovery and XAddr generation
    #[arg(long = "container-ip", short = 'i')]
    pub container_ip: Option<String>,

    /// Enable WS-Discovery service for automatic device discovery
    #[arg(long = "ws-discovery-enabled", short = 'w', action = clap::ArgAction::SetTrue)]
    pub ws_discovery_enabled: bool,

    /// Enable debug mode with verbose request logging (NOT FOR PRODUCTION USE)
    #[arg(short = 'd', long = "debug", action = clap::ArgAction::SetTrue)]
    pub debug: bool,

    /// Path to an optional INI file supplying `[onvif]`/`[logging]`/`[main_stream]`/
    /// `[sub_stream]`/`[imaging]` sections
    #[arg(short = 'c', long = "config-file")]
    pub config_file: Option<String>,
}

/// A minimal INI reader: `[section]` headers, `key = value` lines, `;`/`#` comments.
#[derive(Debug, Clone, Default)]
struct IniConfig {
    values: HashMap<(String, String), String>,
}

impl IniConfig {
    fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let text = std::fs::read_to_string(path)?;
        let mut values = HashMap::new();
        let mut section = String::new();
        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                section = name.trim().to_string();
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                values.insert(
                    (section.clone(), key.trim().to_string()),
                    value.trim().to_string(),
                );
            }
        }
        Ok(IniConfig { values })
    }

    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.values
            .get(&(section.to_string(), key.to_string()))
            .map(String::as_str)
    }
}

/// The merged configuration surface every component reads from.
#[derive(Debug, Clone)]
pub struct Config {
    pub rtsp_stream_url: String,
    pub onvif_port: u16,
    pub device_name: String,
    pub onvif_username: String,
    pub onvif_password: String,
    pub container_ip: String,
    pub ws_discovery_enabled: bool,
    pub debug: bool,

    pub auth_enabled: bool,
    pub realm: String,
    pub http_verbose: bool,
    pub main_stream_fps: u32,
    pub main_stream_kbps: u32,
    pub sub_stream_fps: u32,
    pub sub_stream_kbps: u32,
    pub imaging_default_brightness: i32,
    pub imaging_default_contrast: i32,
    pub imaging_default_saturation: i32,
    pub imaging_default_sharpness: i32,

    ini: IniConfig,
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let cli = CliArgs::parse();
        Self::from_cli(cli)
    }

    pub fn from_cli(cli: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        let ini = match &cli.config_file {
            Some(path) => IniConfig::load(path)?,
            None => IniConfig::default(),
        };

        let rtsp_stream_url = cli
            .rtsp_stream_url
            .or_else(|| ini.get("onvif", "rtsp_stream_url").map(str::to_string))
            .unwrap_or_else(|| "rtsp://127.0.0.1:8554/stream".to_string());

        let onvif_port = cli
            .onvif_port
            .or_else(|| ini.get("onvif", "http_port").and_then(|v| v.parse().ok()))
            .unwrap_or(8080);

        let device_name = cli
            .device_name
            .or_else(|| ini.get("onvif", "device_name").map(str::to_string))
            .unwrap_or_else(|| "ONVIF-Camera".to_string());

        let onvif_username = cli
            .onvif_username
            .or_else(|| ini.get("onvif", "username").map(str::to_string))
            .unwrap_or_else(|| "admin".to_string());

        let onvif_password = cli
            .onvif_password
            .or_else(|| ini.get("onvif", "password").map(str::to_string))
            .unwrap_or_else(|| "onvif-rust".to_string());

        let container_ip = cli
            .container_ip
            .or_else(|| ini.get("onvif", "container_ip").map(str::to_string))
            .unwrap_or_else(|| "127.0.0.1".to_string());

        let auth_enabled = ini
            .get("onvif", "auth_enabled")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);

        let realm = ini
            .get("onvif", "realm")
            .map(str::to_string)
            .unwrap_or_else(|| "ONVIF Camera".to_string());

        let http_verbose = ini
            .get("logging", "http_verbose")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(cli.debug);

        let main_stream_fps = ini.get("main_stream", "fps").and_then(|v| v.parse().ok()).unwrap_or(30);
        let main_stream_kbps = ini.get("main_stream", "kbps").and_then(|v| v.parse().ok()).unwrap_or(8000);
        let sub_stream_fps = ini.get("sub_stream", "fps").and_then(|v| v.parse().ok()).unwrap_or(15);
        let sub_stream_kbps = ini.get("sub_stream", "kbps").and_then(|v| v.parse().ok()).unwrap_or(1024);

        let imaging_default_brightness = ini.get("imaging", "brightness").and_then(|v| v.parse().ok()).unwrap_or(0);
        let imaging_default_contrast = ini.get("imaging", "contrast").and_then(|v| v.parse().ok()).unwrap_or(0);
        let imaging_default_saturation = ini.get("imaging", "saturation").and_then(|v| v.parse().ok()).unwrap_or(0);
        let imaging_default_sharpness = ini.get("imaging", "sharpness").and_then(|v| v.parse().ok()).unwrap_or(0);

        if container_ip.is_empty() {
            return Err("container_ip cannot be empty".into());
        }
        if container_ip.parse::<IpAddr>().is_err() {
            return Err(format!("container_ip '{container_ip}' is not a valid IP address").into());
        }
        if !rtsp_stream_url.starts_with("rtsp://") {
            return Err(format!("rtsp_stream_url must start with 'rtsp://', got: {rtsp_stream_url}").into());
        }

        Ok(Config {
            rtsp_stream_url,
            onvif_port,
            device_name,
            onvif_username,
            onvif_password,
            container_ip,
            ws_discovery_enabled: cli.ws_discovery_enabled,
            debug: cli.debug,
            auth_enabled,
            realm,
            http_verbose,
            main_stream_fps,
            main_stream_kbps,
            sub_stream_fps,
            sub_stream_kbps,
            imaging_default_brightness,
            imaging_default_contrast,
            imaging_default_saturation,
            imaging_default_sharpness,
            ini,
        })
    }

    /// Raw (section, key) lookup against the INI layer, bypassing the typed fields
    /// above. Exposed for components that read a section this struct doesn't
    /// pre-resolve.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.ini.get(section, key)
    }

    pub fn get_or<'a>(&'a self, section: &str, key: &str, default: &'a str) -> &'a str {
        self.get(section, key).unwrap_or(default)
    }

    pub fn display(&self) {
        tracing::info!(
            rtsp_stream_url = %self.rtsp_stream_url,
            onvif_port = self.onvif_port,
            device_name = %self.device_name,
            onvif_username = %self.onvif_username,
            container_ip = %self.container_ip,
            ws_discovery_enabled = self.ws_discovery_enabled,
            debug = self.debug,
            auth_enabled = self.auth_enabled,
            "daemon configuration loaded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(config_file: Option<String>) -> CliArgs {
        CliArgs {
            rtsp_stream_url: None,
            onvif_port: None,
            device_name: None,
            onvif_username: None,
            onvif_password: None,
            container_ip: None,
            ws_discovery_enabled: false,
            debug: false,
            config_file,
        }
    }

    #[test]
    fn defaults_apply_when_nothing_is_supplied() {
        let config = Config::from_cli(cli(None)).unwrap();
        assert_eq!(config.onvif_port, 8080);
        assert_eq!(config.device_name, "ONVIF-Camera");
        assert!(config.auth_enabled);
    }

    #[test]
    fn cli_flags_take_precedence_over_defaults() {
        let mut args = cli(None);
        args.onvif_port = Some(9999);
        args.device_name = Some("Lobby-Camera".to_string());
        let config = Config::from_cli(args).unwrap();
        assert_eq!(config.onvif_port, 9999);
        assert_eq!(config.device_name, "Lobby-Camera");
    }

    #[test]
    fn ini_values_fill_in_when_cli_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera.ini");
        std::fs::write(
            &path,
            "[onvif]\nhttp_port = 8443\ndevice_name = Gate-Camera\n\n[main_stream]\nfps = 25\n",
        )
        .unwrap();

        let config = Config::from_cli(cli(Some(path.to_string_lossy().to_string()))).unwrap();
        assert_eq!(config.onvif_port, 8443);
        assert_eq!(config.device_name, "Gate-Camera");
        assert_eq!(config.main_stream_fps, 25);
    }

    #[test]
    fn rejects_a_non_rtsp_stream_url() {
        let mut args = cli(None);
        args.rtsp_stream_url = Some("http://example.com/stream".to_string());
        assert!(Config::from_cli(args).is_err());
    }
}
