use onvif_camera_daemon::config::Config;

fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = onvif_camera_daemon::run(config) {
        eprintln!("onvif-camera-daemon exited with an error: {e}");
        std::process::exit(1);
    }
}
