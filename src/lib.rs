//! ONVIF camera services daemon: library surface.
//!
//! `run()` is the single entry point a binary needs: it loads configuration, wires the
//! platform collaborator, registers every service with the process-wide
//! [`dispatcher::ServiceRegistry`], and drives the HTTP accept loop until a shutdown
//! signal arrives.

pub mod buffer_pool;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod logging;
pub mod memory_tracker;
pub mod platform;
pub mod server;
pub mod services;
pub mod soap;
pub mod thread_pool;
pub mod ws_discovery;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use config::Config;
use dispatcher::ServiceRegistry;
use http::AuthConfig;
use platform::{Platform, ProcessPlatform};
use rand::Rng;
use server::{ServerContext, ServiceStatus};
use services::{
    device::DeviceService, imaging::ImagingService, media::MediaService, ptz::PtzService,
    snapshot::SnapshotService,
};
use thread_pool::ThreadPool;

const DEFAULT_THREAD_POOL_SIZE: usize = 16;

/// Builds every service collaborator, registers them with the global registry, and runs
/// the HTTP server and (optionally) the WS-Discovery responder until shutdown.
pub fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    config.display();

    let process_platform = ProcessPlatform::new(
        config.rtsp_stream_url.clone(),
        &config.container_ip,
        config.onvif_port,
        &config.device_name,
    );
    let process_platform = Arc::new(process_platform);
    // Runs off the startup path: ffprobe can take several seconds to time out against an
    // unreachable camera, and the ONVIF endpoints don't depend on the stream being up yet.
    let validation_handle = Arc::clone(&process_platform);
    std::thread::spawn(move || {
        if let Err(e) = validation_handle.validate_stream_connectivity() {
            tracing::warn!(error = %e, "RTSP stream validation failed at startup; continuing anyway");
        }
    });
    let platform: Arc<dyn Platform> = process_platform;

    let registry: &'static ServiceRegistry = ServiceRegistry::global();
    let device_service = DeviceService::new(Arc::clone(&platform), &config.container_ip, config.onvif_port);
    let media_service = MediaService::new(Arc::clone(&platform));
    let ptz_service = PtzService::new(Arc::clone(&platform));
    let imaging_service = ImagingService::new(Arc::clone(&platform));
    let snapshot_service = SnapshotService::new(Arc::clone(&platform));

    let mut salt = [0u8; 16];
    rand::thread_rng().fill(&mut salt);
    device_service.seed_user(
        &config.onvif_username,
        &AuthConfig::make_credential_record(&config.onvif_password, &salt),
    );

    device_service.register(registry);
    media_service.register(registry);
    ptz_service.register(registry);
    imaging_service.register(registry);
    snapshot_service.register(registry);

    let service_status = ServiceStatus::new();
    server::setup_signal_handlers(Arc::clone(&service_status));

    let ws_discovery_stop = Arc::new(AtomicBool::new(false));
    let ws_discovery_handle = if config.ws_discovery_enabled {
        Some(spawn_ws_discovery(&config, Arc::clone(&ws_discovery_stop)))
    } else {
        None
    };

    let context = Arc::new(ServerContext {
        registry,
        device_service: Arc::clone(&device_service),
        snapshot_service: Arc::clone(&snapshot_service),
        buffer_pool: Arc::new(buffer_pool::BufferPool::with_defaults()),
        memory_tracker: Arc::new(memory_tracker::MemoryTracker::new()),
        auth_enabled: config.auth_enabled,
        realm: config.realm.clone(),
    });

    let pool = Arc::new(ThreadPool::new(DEFAULT_THREAD_POOL_SIZE));
    let result = server::run(&config, context, pool, Arc::clone(&service_status));

    ws_discovery_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = ws_discovery_handle {
        let _ = handle.join();
    }

    // PtzService and MediaService/ImagingService are dropped here; PtzService's Drop
    // joins its reaper thread before the process exits.
    result
}

fn spawn_ws_discovery(config: &Config, stop: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
    let device_info = ws_discovery::DeviceInfo {
        endpoint_reference: format!("urn:uuid:{}", uuid::Uuid::new_v4()),
        types: "tdn:NetworkVideoTransmitter".to_string(),
        scopes: format!(
            "onvif://www.onvif.org/type/video_encoder onvif://www.onvif.org/name/{}",
            config.device_name
        ),
        xaddrs: format!(
            "http://{}:{}/onvif/device_service",
            config.container_ip, config.onvif_port
        ),
        manufacturer: "Rust ONVIF Camera Project".to_string(),
        model_name: config.device_name.clone(),
        friendly_name: config.device_name.clone(),
        firmware_version: env!("CARGO_PKG_VERSION").to_string(),
        serial_number: config.device_name.clone(),
    };

    let interface_addr = config.container_ip.clone();
    let debug = config.debug;

    std::thread::spawn(move || {
        match ws_discovery::WSDiscoveryServer::new(device_info, &interface_addr, debug, stop) {
            Ok(mut server) => {
                if let Err(e) = server.start() {
                    tracing::error!(error = %e, "WS-Discovery server exited with an error");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to start WS-Discovery server");
            }
        }
    })
}
