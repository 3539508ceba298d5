//! Snapshot service (part of the Profile S/T surface alongside Device/Media/PTZ/Imaging):
//! a SOAP `GetSnapshotUri` entry point registered at its own path, distinct from Media's.
//! The bytes behind that URL are served by a raw (non-SOAP) GET, wired directly into
//! `server::build_response` since a JPEG body doesn't fit inside a SOAP envelope.

use std::sync::Arc;

use crate::dispatcher::{HandlerTable, ServiceRegistry, ServiceType};
use crate::error::CoreError;
use crate::platform::Platform;
use crate::soap::extract_tag_content;

pub const PATH_PREFIX: &str = "/onvif/snapshot_service";

pub struct SnapshotService {
    platform: Arc<dyn Platform>,
}

impl SnapshotService {
    pub fn new(platform: Arc<dyn Platform>) -> Arc<Self> {
        Arc::new(SnapshotService { platform })
    }

    pub fn register(self: &Arc<Self>, registry: &ServiceRegistry) {
        let mut table = HandlerTable::new();

        let s = Arc::clone(self);
        table.register("GetSnapshotUri", Box::new(move |body| s.handle_get_snapshot_uri(body)));

        registry.register(ServiceType::Snapshot, PATH_PREFIX, table);
    }

    fn handle_get_snapshot_uri(&self, body: &str) -> Result<String, CoreError> {
        let token = extract_tag_content(body, "ProfileToken")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CoreError::invalid_argument("GetSnapshotUri requires ProfileToken"))?;
        let uri = self.platform.snapshot_url(&token);
        Ok(format!(
            "<trt:GetSnapshotUriResponse xmlns:trt=\"http://www.onvif.org/ver10/media/wsdl\"><trt:MediaUri><tt:Uri xmlns:tt=\"http://www.onvif.org/ver10/schema\">{uri}</tt:Uri></trt:MediaUri></trt:GetSnapshotUriResponse>"
        ))
    }

    /// Captures a still frame from the platform. Called by the raw `/snapshot` GET
    /// handler in `server.rs`, not through the SOAP dispatch path.
    pub fn capture(&self) -> Result<Vec<u8>, CoreError> {
        self.platform.capture_snapshot()
    }
}
