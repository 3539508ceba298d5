//! The ONVIF service handlers (C7-C10 plus Snapshot), each owning its own state and
//! registering its operation table with the process-wide [`crate::dispatcher::ServiceRegistry`].

pub mod device;
pub mod imaging;
pub mod media;
pub mod ptz;
pub mod snapshot;
