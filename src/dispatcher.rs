//! Process-wide service registry mapping a service type and path prefix to its handler
//! table (C6). Register/deregister are mutex-serialized; lookups and routing are
//! read-only and can run concurrently with each other.
//!
//! Grounded on the teacher's `onvif::soap` operation-name match chain, generalized from
//! a single hardcoded if/else-if ladder into a data-driven table so adding an operation
//! doesn't require touching the dispatch function itself.

use std::sync::{Mutex, OnceLock};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    Device,
    Media,
    Ptz,
    Imaging,
    Snapshot,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Device => "device",
            ServiceType::Media => "media",
            ServiceType::Ptz => "ptz",
            ServiceType::Imaging => "imaging",
            ServiceType::Snapshot => "snapshot",
        }
    }
}

/// A single operation handler: given the raw SOAP body, returns the SOAP body to wrap
/// in a response envelope, or a `CoreError` to be rendered as a SOAP Fault.
pub type OperationHandler = Box<dyn Fn(&str) -> Result<String, CoreError> + Send + Sync>;

/// Operation-name -> handler pairs, scanned linearly (per-service operation counts stay
/// under 30, so a `Vec` scan is simpler and just as fast as a `HashMap` here).
pub struct HandlerTable {
    operations: Vec<(String, OperationHandler)>,
}

impl HandlerTable {
    pub fn new() -> Self {
        HandlerTable { operations: Vec::new() }
    }

    pub fn register(&mut self, operation_name: &str, handler: OperationHandler) {
        self.operations.push((operation_name.to_string(), handler));
    }

    pub fn dispatch(&self, operation_name: &str, body: &str) -> Result<String, CoreError> {
        for (name, handler) in &self.operations {
            if name == operation_name {
                return handler(body);
            }
        }
        Err(CoreError::not_found(format!(
            "operation '{operation_name}' is not supported by this service"
        )))
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

struct ServiceEntry {
    service_type: ServiceType,
    path_prefix: String,
    handlers: HandlerTable,
}

/// Process-wide registry. Services register themselves once at startup; the HTTP
/// server consults `route` per request.
pub struct ServiceRegistry {
    entries: Mutex<Vec<ServiceEntry>>,
}

impl ServiceRegistry {
    fn new() -> Self {
        ServiceRegistry { entries: Mutex::new(Vec::new()) }
    }

    pub fn global() -> &'static ServiceRegistry {
        static REGISTRY: OnceLock<ServiceRegistry> = OnceLock::new();
        REGISTRY.get_or_init(ServiceRegistry::new)
    }

    pub fn register(&self, service_type: ServiceType, path_prefix: &str, handlers: HandlerTable) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|e| e.service_type != service_type);
        entries.push(ServiceEntry {
            service_type,
            path_prefix: path_prefix.to_string(),
            handlers,
        });
    }

    pub fn deregister(&self, service_type: ServiceType) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|e| e.service_type != service_type);
    }

    /// Finds the service whose path prefix matches `path`, then dispatches
    /// `operation_name` against its handler table.
    pub fn route(&self, path: &str, operation_name: &str, body: &str) -> Result<String, CoreError> {
        let entries = self.entries.lock().unwrap();
        let entry = entries
            .iter()
            .find(|e| path.starts_with(e.path_prefix.as_str()))
            .ok_or_else(|| CoreError::not_found(format!("no service bound to path '{path}'")))?;
        entry.handlers.dispatch(operation_name, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_to_the_registered_operation() {
        let registry = ServiceRegistry::new();
        let mut table = HandlerTable::new();
        table.register("GetDeviceInformation", Box::new(|_body| Ok("<ok/>".to_string())));
        registry.register(ServiceType::Device, "/onvif/device_service", table);

        let result = registry
            .route("/onvif/device_service", "GetDeviceInformation", "")
            .unwrap();
        assert_eq!(result, "<ok/>");
    }

    #[test]
    fn unknown_operation_is_not_found() {
        let registry = ServiceRegistry::new();
        let table = HandlerTable::new();
        registry.register(ServiceType::Device, "/onvif/device_service", table);

        let err = registry
            .route("/onvif/device_service", "Nonexistent", "")
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn unknown_path_is_not_found() {
        let registry = ServiceRegistry::new();
        let err = registry.route("/unbound/path", "GetDeviceInformation", "").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn reregistering_a_service_replaces_its_handler_table() {
        let registry = ServiceRegistry::new();
        let mut first = HandlerTable::new();
        first.register("Op", Box::new(|_| Ok("first".to_string())));
        registry.register(ServiceType::Media, "/onvif/media_service", first);

        let mut second = HandlerTable::new();
        second.register("Op", Box::new(|_| Ok("second".to_string())));
        registry.register(ServiceType::Media, "/onvif/media_service", second);

        let result = registry.route("/onvif/media_service", "Op", "").unwrap();
        assert_eq!(result, "second");
    }
}
