//! Device service (C7): device info, capabilities, services list, system clock,
//! reboot, and user management.
//!
//! Grounded on the teacher's `get_device_info_response`/`get_capabilities_response`
//! templates in `onvif_responses.rs`, generalized from hardcoded strings into
//! `format!`-rendered fragments driven by the platform collaborator and a mutable
//! credential table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;

use crate::dispatcher::{HandlerTable, ServiceRegistry, ServiceType};
use crate::error::CoreError;
use crate::http::AuthConfig;
use crate::platform::Platform;
use crate::soap::{extract_tag_blocks, extract_tag_content};

pub const PATH_PREFIX: &str = "/onvif/device_service";

pub struct DeviceService {
    platform: Arc<dyn Platform>,
    host: String,
    port: u16,
    users: Mutex<HashMap<String, String>>,
}

impl DeviceService {
    pub fn new(platform: Arc<dyn Platform>, host: impl Into<String>, port: u16) -> Arc<Self> {
        Arc::new(DeviceService {
            platform,
            host: host.into(),
            port,
            users: Mutex::new(HashMap::new()),
        })
    }

    /// Seeds the credential table from the configured Basic-auth user, so
    /// `CreateUsers`/`SetUser` operate against the same record `http::AuthConfig` reads.
    pub fn seed_user(&self, username: &str, credential_record: &str) {
        self.users
            .lock()
            .unwrap()
            .insert(username.to_string(), credential_record.to_string());
    }

    pub fn auth_config(&self, enabled: bool, realm: &str) -> AuthConfig {
        AuthConfig {
            enabled,
            realm: realm.to_string(),
            credentials: self.users.lock().unwrap().clone(),
        }
    }

    pub fn register(self: &Arc<Self>, registry: &ServiceRegistry) {
        let mut table = HandlerTable::new();

        let s = Arc::clone(self);
        table.register(
            "GetDeviceInformation",
            Box::new(move |_body| s.handle_get_device_information()),
        );

        let s = Arc::clone(self);
        table.register("GetCapabilities", Box::new(move |body| s.handle_get_capabilities(body)));

        let s = Arc::clone(self);
        table.register("GetServices", Box::new(move |_body| s.handle_get_services()));

        let s = Arc::clone(self);
        table.register(
            "GetSystemDateAndTime",
            Box::new(move |_body| s.handle_get_system_date_and_time()),
        );

        let s = Arc::clone(self);
        table.register("SystemReboot", Box::new(move |_body| s.handle_system_reboot()));

        let s = Arc::clone(self);
        table.register("CreateUsers", Box::new(move |body| s.handle_create_users(body)));

        let s = Arc::clone(self);
        table.register("DeleteUsers", Box::new(move |body| s.handle_delete_users(body)));

        let s = Arc::clone(self);
        table.register("SetUser", Box::new(move |body| s.handle_set_user(body)));

        registry.register(ServiceType::Device, PATH_PREFIX, table);
    }

    fn handle_get_device_information(&self) -> Result<String, CoreError> {
        let info = self.platform.device_info()?;
        Ok(format!(
            "<tds:GetDeviceInformationResponse xmlns:tds=\"http://www.onvif.org/ver10/device/wsdl\">\n\
<tds:Manufacturer>{}</tds:Manufacturer>\n\
<tds:Model>{}</tds:Model>\n\
<tds:FirmwareVersion>{}</tds:FirmwareVersion>\n\
<tds:SerialNumber>{}</tds:SerialNumber>\n\
<tds:HardwareId>{}</tds:HardwareId>\n\
</tds:GetDeviceInformationResponse>",
            info.manufacturer, info.model, info.firmware_version, info.serial_number, info.hardware_id
        ))
    }

    fn handle_get_capabilities(&self, body: &str) -> Result<String, CoreError> {
        if let Some(category) = extract_tag_content(body, "Category") {
            let known = ["All", "Device", "Media", "PTZ", "Imaging", "Events", "Analytics"];
            if !category.is_empty() && !known.contains(&category.as_str()) {
                return Err(CoreError::invalid_argument(format!(
                    "unknown capability category '{category}'"
                )));
            }
        }
        Ok(format!(
            "<tds:GetCapabilitiesResponse xmlns:tds=\"http://www.onvif.org/ver10/device/wsdl\">\n\
<tds:Capabilities>\n\
<tt:Device xmlns:tt=\"http://www.onvif.org/ver10/schema\"><tt:XAddr>{device_addr}</tt:XAddr></tt:Device>\n\
<tt:Media xmlns:tt=\"http://www.onvif.org/ver10/schema\"><tt:XAddr>{media_addr}</tt:XAddr></tt:Media>\n\
<tt:PTZ xmlns:tt=\"http://www.onvif.org/ver10/schema\"><tt:XAddr>{ptz_addr}</tt:XAddr></tt:PTZ>\n\
<tt:Imaging xmlns:tt=\"http://www.onvif.org/ver10/schema\"><tt:XAddr>{imaging_addr}</tt:XAddr></tt:Imaging>\n\
</tds:Capabilities>\n\
</tds:GetCapabilitiesResponse>",
            device_addr = self.xaddr("device_service"),
            media_addr = self.xaddr("media_service"),
            ptz_addr = self.xaddr("ptz_service"),
            imaging_addr = self.xaddr("imaging_service"),
        ))
    }

    fn handle_get_services(&self) -> Result<String, CoreError> {
        let rows = [
            ("http://www.onvif.org/ver10/device/wsdl", self.xaddr("device_service")),
            ("http://www.onvif.org/ver10/media/wsdl", self.xaddr("media_service")),
            ("http://www.onvif.org/ver20/ptz/wsdl", self.xaddr("ptz_service")),
            ("http://www.onvif.org/ver20/imaging/wsdl", self.xaddr("imaging_service")),
            ("http://www.onvif.org/ver10/media/wsdl/snapshot", self.xaddr("snapshot_service")),
        ];
        let services: String = rows
            .iter()
            .map(|(ns, addr)| {
                format!(
                    "<tds:Service><tds:Namespace>{ns}</tds:Namespace><tds:XAddr>{addr}</tds:XAddr><tds:Version><tt:Major>2</tt:Major><tt:Minor>60</tt:Minor></tds:Version></tds:Service>"
                )
            })
            .collect();
        Ok(format!(
            "<tds:GetServicesResponse xmlns:tds=\"http://www.onvif.org/ver10/device/wsdl\" xmlns:tt=\"http://www.onvif.org/ver10/schema\">{services}</tds:GetServicesResponse>"
        ))
    }

    fn handle_get_system_date_and_time(&self) -> Result<String, CoreError> {
        let now = Utc::now();
        Ok(format!(
            "<tds:GetSystemDateAndTimeResponse xmlns:tds=\"http://www.onvif.org/ver10/device/wsdl\" xmlns:tt=\"http://www.onvif.org/ver10/schema\">\n\
<tds:SystemDateAndTime>\n\
<tt:DateTimeType>Manual</tt:DateTimeType>\n\
<tt:DaylightSavings>false</tt:DaylightSavings>\n\
<tt:TimeZone><tt:TZ>UTC0</tt:TZ></tt:TimeZone>\n\
<tt:UTCDateTime>\n\
<tt:Time><tt:Hour>{}</tt:Hour><tt:Minute>{}</tt:Minute><tt:Second>{}</tt:Second></tt:Time>\n\
<tt:Date><tt:Year>{}</tt:Year><tt:Month>{}</tt:Month><tt:Day>{}</tt:Day></tt:Date>\n\
</tt:UTCDateTime>\n\
</tds:SystemDateAndTime>\n\
</tds:GetSystemDateAndTimeResponse>",
            now.format("%H"), now.format("%M"), now.format("%S"),
            now.format("%Y"), now.format("%m"), now.format("%d"),
        ))
    }

    fn handle_system_reboot(&self) -> Result<String, CoreError> {
        // Respond first; the platform schedules the actual reboot after a short delay
        // (see DESIGN.md Open Question decision on SystemReboot ordering).
        self.platform.schedule_reboot(Duration::from_secs(2));
        Ok(
            "<tds:SystemRebootResponse xmlns:tds=\"http://www.onvif.org/ver10/device/wsdl\">\
<tds:Message>Rebooting in 2 seconds</tds:Message>\
</tds:SystemRebootResponse>"
                .to_string(),
        )
    }

    fn handle_create_users(&self, body: &str) -> Result<String, CoreError> {
        let blocks = extract_tag_blocks(body, "User");
        if blocks.is_empty() {
            return Err(CoreError::invalid_argument("CreateUsers requires at least one User"));
        }
        let mut users = self.users.lock().unwrap();
        for block in &blocks {
            let username = extract_tag_content(block, "Username")
                .ok_or_else(|| CoreError::invalid_argument("User is missing Username"))?;
            if users.contains_key(&username) {
                return Err(CoreError::invalid_argument(format!(
                    "user '{username}' already exists"
                )));
            }
            let password = extract_tag_content(block, "Password").unwrap_or_default();
            let mut salt = [0u8; 16];
            rand::thread_rng().fill(&mut salt);
            users.insert(username, AuthConfig::make_credential_record(&password, &salt));
        }
        Ok("<tds:CreateUsersResponse xmlns:tds=\"http://www.onvif.org/ver10/device/wsdl\"/>".to_string())
    }

    fn handle_delete_users(&self, body: &str) -> Result<String, CoreError> {
        let usernames = extract_tag_blocks(body, "Username");
        if usernames.is_empty() {
            return Err(CoreError::invalid_argument("DeleteUsers requires at least one Username"));
        }
        let mut users = self.users.lock().unwrap();
        for username in &usernames {
            if users.remove(username).is_none() {
                return Err(CoreError::not_found(format!("user '{username}' does not exist")));
            }
        }
        Ok("<tds:DeleteUsersResponse xmlns:tds=\"http://www.onvif.org/ver10/device/wsdl\"/>".to_string())
    }

    fn handle_set_user(&self, body: &str) -> Result<String, CoreError> {
        let blocks = extract_tag_blocks(body, "User");
        let block = blocks
            .first()
            .ok_or_else(|| CoreError::invalid_argument("SetUser requires a User element"))?;
        let username = extract_tag_content(block, "Username")
            .ok_or_else(|| CoreError::invalid_argument("User is missing Username"))?;
        let mut users = self.users.lock().unwrap();
        if !users.contains_key(&username) {
            return Err(CoreError::not_found(format!("user '{username}' does not exist")));
        }
        if let Some(password) = extract_tag_content(block, "Password") {
            let mut salt = [0u8; 16];
            rand::thread_rng().fill(&mut salt);
            users.insert(username, AuthConfig::make_credential_record(&password, &salt));
        }
        Ok("<tds:SetUserResponse xmlns:tds=\"http://www.onvif.org/ver10/device/wsdl\"/>".to_string())
    }

    fn xaddr(&self, service_path: &str) -> String {
        format!("http://{}:{}/onvif/{}", self.host, self.port, service_path)
    }
}
