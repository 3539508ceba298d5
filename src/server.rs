//! HTTP server loop (C12): accept, submit to the thread pool, and run the full
//! parse -> auth -> route -> handler -> serialize -> write pipeline per connection.
//!
//! Grounded on the teacher's `start_onvif_service_with_shutdown` (non-blocking accept
//! loop polling a shutdown flag) and `handle_onvif_request` (per-connection pipeline),
//! generalized to submit jobs to a bounded [`crate::thread_pool::ThreadPool`] instead
//! of spawning one thread per connection, and to route through the
//! [`crate::dispatcher::ServiceRegistry`] instead of an if/else chain.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::buffer_pool::BufferPool;
use crate::config::Config;
use crate::dispatcher::ServiceRegistry;
use crate::http::{self, AuthConfig, AuthOutcome, HttpResponse, ParseError};
use crate::memory_tracker::MemoryTracker;
use crate::services::device::DeviceService;
use crate::services::snapshot::SnapshotService;
use crate::soap::{self, SoapResponseBuilder};
use crate::thread_pool::ThreadPool;

const READ_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tracks whether the process should keep serving, independent of any single
/// connection. Shared between the signal handler thread and the accept loop.
pub struct ServiceStatus {
    healthy: AtomicBool,
    shutdown_requested: AtomicBool,
}

impl ServiceStatus {
    pub fn new() -> Arc<Self> {
        Arc::new(ServiceStatus {
            healthy: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
        })
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn mark_healthy(&self) {
        self.healthy.store(true, Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

#[cfg(unix)]
pub fn setup_signal_handlers(service_status: Arc<ServiceStatus>) {
    use signal_hook::iterator::Signals;

    match Signals::new([signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM]) {
        Ok(mut signals) => {
            std::thread::spawn(move || {
                for sig in signals.forever() {
                    tracing::info!(signal = sig, "received termination signal");
                    service_status.request_shutdown();
                }
            });
            tracing::info!("signal handlers registered for graceful shutdown");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to set up signal handlers");
        }
    }
}

#[cfg(windows)]
pub fn setup_signal_handlers(_service_status: Arc<ServiceStatus>) {
    tracing::warn!("signal handling is limited on Windows - use Ctrl+C to terminate");
}

/// Collaborators the connection pipeline needs on every request.
pub struct ServerContext {
    pub registry: &'static ServiceRegistry,
    pub device_service: Arc<DeviceService>,
    pub snapshot_service: Arc<SnapshotService>,
    pub buffer_pool: Arc<BufferPool>,
    pub memory_tracker: Arc<MemoryTracker>,
    pub auth_enabled: bool,
    pub realm: String,
}

/// Runs the accept loop until `service_status` reports a shutdown request. Every
/// accepted connection is submitted to `pool`; if the pool is saturated and refuses
/// the job, the connection is served inline rather than dropped.
pub fn run(
    config: &Config,
    context: Arc<ServerContext>,
    pool: Arc<ThreadPool>,
    service_status: Arc<ServiceStatus>,
) -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr = format!("0.0.0.0:{}", config.onvif_port);
    let listener = TcpListener::bind(&bind_addr).map_err(|e| {
        format!("failed to bind ONVIF port {}: {e}", config.onvif_port)
    })?;
    listener.set_nonblocking(true)?;
    tracing::info!(bind_addr, "ONVIF HTTP server listening");
    service_status.mark_healthy();

    let mut connection_count = 0u64;
    while !service_status.is_shutdown_requested() {
        match listener.accept() {
            Ok((stream, addr)) => {
                connection_count += 1;
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::warn!(error = %e, "failed to set TCP_NODELAY");
                }
                tracing::debug!(connection_count, %addr, "accepted connection");

                let context = Arc::clone(&context);
                let job = move || {
                    if let Err(e) = handle_connection(stream, &context) {
                        tracing::warn!(error = %e, "error handling connection");
                    }
                };
                if pool.execute(job).is_err() {
                    tracing::warn!("thread pool saturated; connection dropped");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                tracing::error!(error = %e, "error accepting connection");
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }

    tracing::info!("shutdown requested, draining in-flight connections");
    std::thread::sleep(Duration::from_secs(1));
    Ok(())
}

fn handle_connection(mut stream: TcpStream, context: &ServerContext) -> Result<(), Box<dyn std::error::Error>> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

    let pooled = context.buffer_pool.acquire();
    // Read the result before releasing so a pooled buffer goes back to the pool even
    // when read_request fails (timeout, reset) instead of leaking out of circulation.
    let raw_result = match &pooled {
        Some(p) => {
            let mut guard = context.buffer_pool.buffer_mut(p);
            read_request(&mut stream, &mut guard)
        }
        None => {
            context.memory_tracker.record_alloc(crate::buffer_pool::DEFAULT_BUFFER_SIZE as u64);
            let mut chunk = vec![0u8; crate::buffer_pool::DEFAULT_BUFFER_SIZE];
            let result = read_request(&mut stream, &mut chunk);
            context.memory_tracker.record_free(crate::buffer_pool::DEFAULT_BUFFER_SIZE as u64);
            result
        }
    };
    if let Some(p) = pooled {
        context.buffer_pool.release(p);
    }
    let raw = raw_result?;

    let response = match raw {
        Ok(bytes) => build_response(&bytes, context),
        Err(ParseError::Malformed) => HttpResponse::new(400, "Bad Request"),
        Err(ParseError::TooLarge) => HttpResponse::new(413, "Payload Too Large"),
    };

    stream.write_all(&response.serialize())?;
    stream.flush()?;
    Ok(())
}

/// Reads until the header/body boundary is found, then reads the remaining
/// `Content-Length` bytes. `scratch` is the pool- or heap-backed chunk buffer reused
/// across `read` calls.
fn read_request(stream: &mut TcpStream, scratch: &mut [u8]) -> Result<Result<Vec<u8>, ParseError>, std::io::Error> {
    let mut accumulated = Vec::new();
    loop {
        let n = stream.read(scratch)?;
        if n == 0 {
            break;
        }
        accumulated.extend_from_slice(&scratch[..n]);
        if accumulated.len() > http::MAX_BODY_BYTES + (1 << 16) {
            return Ok(Err(ParseError::TooLarge));
        }
        if find_header_boundary(&accumulated).is_some() {
            break;
        }
    }

    let header_end = match find_header_boundary(&accumulated) {
        Some(i) => i,
        None => return Ok(Err(ParseError::Malformed)),
    };

    let declared_len = declared_content_length(&accumulated[..header_end]);
    if let Some(len) = declared_len {
        while accumulated.len() < header_end + 4 + len {
            let n = stream.read(scratch)?;
            if n == 0 {
                break;
            }
            accumulated.extend_from_slice(&scratch[..n]);
            if accumulated.len() > http::MAX_BODY_BYTES + (1 << 16) {
                return Ok(Err(ParseError::TooLarge));
            }
        }
    }

    Ok(Ok(accumulated))
}

fn find_header_boundary(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn declared_content_length(header_bytes: &[u8]) -> Option<usize> {
    let header_text = std::str::from_utf8(header_bytes).ok()?;
    header_text
        .split("\r\n")
        .find_map(|line| line.split_once(':').filter(|(name, _)| name.trim().eq_ignore_ascii_case("content-length")))
        .and_then(|(_, value)| value.trim().parse().ok())
}

fn build_response(raw: &[u8], context: &ServerContext) -> HttpResponse {
    let request = match http::parse_request(raw) {
        Ok(r) => r,
        Err(ParseError::Malformed) => return HttpResponse::new(400, "Bad Request"),
        Err(ParseError::TooLarge) => return HttpResponse::new(413, "Payload Too Large"),
    };

    let auth_config = AuthConfig {
        enabled: context.auth_enabled,
        realm: context.realm.clone(),
        credentials: context.device_service.auth_config(context.auth_enabled, &context.realm).credentials,
    };

    match http::validate_basic_auth(&request, &auth_config) {
        AuthOutcome::Success => {}
        AuthOutcome::ErrNoHeader | AuthOutcome::Unauthenticated => {
            let mut response = HttpResponse::new(401, "Unauthorized");
            response.set_header("WWW-Authenticate", &http::www_authenticate_header(&context.realm));
            return response;
        }
        AuthOutcome::ErrInvalid | AuthOutcome::ErrParseFailed => {
            return HttpResponse::new(400, "Bad Request");
        }
    }

    // The snapshot URL handed out by GetSnapshotUri is a raw GET, not a SOAP call - a
    // JPEG body doesn't fit inside a SOAP envelope, so it's special-cased ahead of the
    // operation dispatch below.
    if request.method.eq_ignore_ascii_case("GET") && request.path.starts_with("/snapshot") {
        return build_snapshot_response(context);
    }

    let body = request.body_str();
    let operation_name = match soap::extract_operation_name(&body) {
        Ok(name) => name,
        Err(err) => {
            tracing::warn!(correlation_id = %err.correlation_id, error = %err.message, "malformed SOAP request");
            return HttpResponse::ok_soap(soap::build_fault(&err).into_bytes());
        }
    };

    match context.registry.route(&request.path, &operation_name, &body) {
        Ok(inner) => {
            let mut builder = SoapResponseBuilder::new();
            builder.set_body(&inner);
            HttpResponse::ok_soap(builder.build().into_bytes())
        }
        Err(err) => {
            tracing::warn!(
                correlation_id = %err.correlation_id,
                kind = ?err.kind,
                operation = %operation_name,
                "operation failed"
            );
            HttpResponse::ok_soap(soap::build_fault(&err).into_bytes())
        }
    }
}

fn build_snapshot_response(context: &ServerContext) -> HttpResponse {
    match context.snapshot_service.capture() {
        Ok(jpeg) => {
            let mut response = HttpResponse::new(200, "OK");
            response.set_header("Content-Type", "image/jpeg");
            response.body = jpeg;
            response
        }
        Err(err) => {
            tracing::warn!(correlation_id = %err.correlation_id, error = %err.message, "snapshot capture failed");
            HttpResponse::new(502, "Bad Gateway")
        }
    }
}
