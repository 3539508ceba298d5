use onvif_camera_daemon::config::{CliArgs, Config};
use onvif_camera_daemon::server::ServiceStatus;

fn cli_with(config_file: Option<String>) -> CliArgs {
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
fn defaults_produce_a_valid_config() {
    let config = Config::from_cli(cli_with(None)).unwrap();
    assert_eq!(config.onvif_port, 8080);
    assert_eq!(config.device_name, "ONVIF-Camera");
    assert_eq!(config.onvif_username, "admin");
    assert!(config.rtsp_stream_url.starts_with("rtsp://"));
    assert!(config.auth_enabled);
}

#[test]
fn cli_overrides_win_over_defaults() {
    let mut args = cli_with(None);
    args.onvif_port = Some(9443);
    args.container_ip = Some("10.0.0.5".to_string());
    args.ws_discovery_enabled = true;

    let config = Config::from_cli(args).unwrap();
    assert_eq!(config.onvif_port, 9443);
    assert_eq!(config.container_ip, "10.0.0.5");
    assert!(config.ws_discovery_enabled);
}

#[test]
fn ini_file_supplies_values_cli_does_not() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("camera.ini");
    std::fs::write(
        &path,
        "[onvif]\nhttp_port = 8555\nrealm = Lobby Camera\n\n[imaging]\nbrightness = 10\n",
    )
    .unwrap();

    let config = Config::from_cli(cli_with(Some(path.to_string_lossy().to_string()))).unwrap();
    assert_eq!(config.onvif_port, 8555);
    assert_eq!(config.realm, "Lobby Camera");
    assert_eq!(config.imaging_default_brightness, 10);
}

#[test]
fn malformed_container_ip_is_rejected() {
    let mut args = cli_with(None);
    args.container_ip = Some("not-an-ip".to_string());
    assert!(Config::from_cli(args).is_err());
}

#[test]
fn non_rtsp_stream_url_is_rejected() {
    let mut args = cli_with(None);
    args.rtsp_stream_url = Some("http://example.com/video".to_string());
    assert!(Config::from_cli(args).is_err());
}

#[test]
fn service_status_tracks_shutdown_and_health() {
    let status = ServiceStatus::new();
    assert!(!status.is_shutdown_requested());
    assert!(!status.is_healthy());

    status.mark_healthy();
    assert!(status.is_healthy());

    status.request_shutdown();
    assert!(status.is_shutdown_requested());
}
