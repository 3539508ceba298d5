//! Domain error taxonomy shared by every service and by the HTTP/SOAP pipeline.

use std::fmt;
use uuid::Uuid;

/// Domain-level error kind. Distinct from any wire encoding; the pipeline maps each
/// kind to a SOAP fault code or connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Unauthenticated,
    CapacityExceeded,
    PlatformFailure,
    Malformed,
    Timeout,
    Internal,
}

impl ErrorKind {
    /// SOAP `faultcode` category this kind maps to. `None` for kinds that never reach
    /// the SOAP layer (e.g. `Timeout`, which closes the connection instead).
    pub fn fault_code(&self) -> Option<&'static str> {
        match self {
            ErrorKind::InvalidArgument
            | ErrorKind::NotFound
            | ErrorKind::Malformed
            | ErrorKind::Unauthenticated => Some("s:Sender"),
            ErrorKind::PlatformFailure | ErrorKind::Internal | ErrorKind::CapacityExceeded => {
                Some("s:Receiver")
            }
            ErrorKind::Timeout => None,
        }
    }
}

/// A structured error carrying a kind, a short sanitized message, and a correlation id
/// that is echoed in both the log line and the SOAP fault detail.
#[derive(Debug, Clone)]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    pub correlation_id: String,
}

const MAX_FAULT_MESSAGE: usize = 512;
const MAX_LOG_MESSAGE: usize = 1024;

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        CoreError {
            kind,
            message: sanitize(&message.into(), MAX_LOG_MESSAGE),
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, message)
    }

    pub fn capacity_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CapacityExceeded, message)
    }

    pub fn platform_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PlatformFailure, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malformed, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Message truncated to the SOAP fault length cap, with sanitization re-applied.
    pub fn fault_message(&self) -> String {
        sanitize(&self.message, MAX_FAULT_MESSAGE)
    }

    pub fn fault_code(&self) -> &'static str {
        self.kind.fault_code().unwrap_or("s:Receiver")
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {} (cid={})", self.kind, self.message, self.correlation_id)
    }
}

impl std::error::Error for CoreError {}

/// Strip control characters, validate UTF-8 (already guaranteed by `String`), and cap
/// length with a truncation marker.
pub fn sanitize(input: &str, max_len: usize) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_control() || *c == ' ')
        .collect();
    if cleaned.chars().count() > max_len {
        let mut truncated: String = cleaned.chars().take(max_len.saturating_sub(3)).collect();
        truncated.push_str("...");
        truncated
    } else {
        cleaned
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_code_maps_client_errors_to_sender() {
        assert_eq!(ErrorKind::NotFound.fault_code(), Some("s:Sender"));
        assert_eq!(ErrorKind::InvalidArgument.fault_code(), Some("s:Sender"));
        assert_eq!(ErrorKind::Unauthenticated.fault_code(), Some("s:Sender"));
    }

    #[test]
    fn fault_code_maps_server_errors_to_receiver() {
        assert_eq!(ErrorKind::PlatformFailure.fault_code(), Some("s:Receiver"));
        assert_eq!(ErrorKind::CapacityExceeded.fault_code(), Some("s:Receiver"));
    }

    #[test]
    fn timeout_has_no_fault_code() {
        assert_eq!(ErrorKind::Timeout.fault_code(), None);
    }

    #[test]
    fn sanitize_strips_control_characters() {
        let s = sanitize("hello\x07world\n", 1024);
        assert!(!s.contains('\x07'));
    }

    #[test]
    fn sanitize_truncates_and_marks() {
        let long = "a".repeat(600);
        let s = sanitize(&long, 512);
        assert_eq!(s.chars().count(), 512);
        assert!(s.ends_with("..."));
    }

    #[test]
    fn every_error_carries_a_correlation_id() {
        let e = CoreError::not_found("no such profile");
        assert_eq!(e.correlation_id.len(), 36);
    }
}
