//! Request-line/headers/body parsing, response builder, and Basic-auth validator (C4).
//!
//! The parser works on a string/byte-slice the way the teacher's `handle_onvif_request`
//! reads a fixed-size buffer off the socket, but here it is pulled out into a pure,
//! testable function instead of being inlined into the connection handler.

use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};

pub const MAX_HEADERS: usize = 64;
pub const MAX_BODY_BYTES: usize = 1 << 20; // 1 MiB

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        // If the handler sets status-code 0 on an error return, substitute 500.
        let status_code = if status_code == 0 { 500 } else { status_code };
        HttpResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn ok_soap(body: impl Into<Vec<u8>>) -> Self {
        let mut response = HttpResponse::new(200, "OK");
        response.set_header("Content-Type", "application/soap+xml; charset=utf-8");
        response.body = body.into();
        response
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status_code, self.status_text
        )
        .into_bytes();
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", self.body.len()).as_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    Malformed,
    TooLarge,
}

/// Parses a complete HTTP/1.1 request out of `raw`. Callers are expected to have
/// already read `Content-Length` bytes of body (the server loop handles that); this
/// function is pure so it is straightforward to unit test.
pub fn parse_request(raw: &[u8]) -> Result<HttpRequest, ParseError> {
    let header_end = find_subslice(raw, b"\r\n\r\n").ok_or(ParseError::Malformed)?;
    let header_bytes = &raw[..header_end];
    let body = raw[header_end + 4..].to_vec();

    let header_text = std::str::from_utf8(header_bytes).map_err(|_| ParseError::Malformed)?;
    let mut lines = header_text.split("\r\n");

    let request_line = lines.next().ok_or(ParseError::Malformed)?;
    let mut parts = request_line.splitn(3, ' ');
    let method = parts.next().ok_or(ParseError::Malformed)?.to_string();
    let path = parts.next().ok_or(ParseError::Malformed)?.to_string();
    let version = parts.next().ok_or(ParseError::Malformed)?.to_string();
    if method.is_empty() || path.is_empty() || version.is_empty() {
        return Err(ParseError::Malformed);
    }

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(ParseError::TooLarge);
        }
        let (name, value) = line.split_once(':').ok_or(ParseError::Malformed)?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    if body.len() > MAX_BODY_BYTES {
        return Err(ParseError::TooLarge);
    }

    if let Some(len_str) = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .map(|(_, v)| v.as_str())
    {
        let declared: usize = len_str.parse().map_err(|_| ParseError::Malformed)?;
        if declared > MAX_BODY_BYTES {
            return Err(ParseError::TooLarge);
        }
    }

    Ok(HttpRequest {
        method,
        path,
        version,
        headers,
        body,
    })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Success,
    ErrNoHeader,
    ErrInvalid,
    ErrParseFailed,
    Unauthenticated,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    pub realm: String,
    /// username -> "saltHex$hashHex"
    pub credentials: std::collections::HashMap<String, String>,
}

impl AuthConfig {
    pub fn disabled() -> Self {
        AuthConfig {
            enabled: false,
            realm: String::new(),
            credentials: std::collections::HashMap::new(),
        }
    }

    /// Builds a `salt$hash` credential record for a username/password pair, using a
    /// caller-supplied 16-byte salt (random in production, fixed in tests).
    pub fn make_credential_record(password: &str, salt: &[u8; 16]) -> String {
        let hash = sha256_with_salt(password, salt);
        format!("{}${}", hex::encode(salt), hex::encode(hash))
    }
}

fn sha256_with_salt(password: &str, salt: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt);
    hasher.finalize().into()
}

/// Hand-rolled hex encode/decode, since the only other place this daemon would need a
/// hex crate is this one call site.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn decode(s: &str) -> Option<Vec<u8>> {
        if s.len() % 2 != 0 {
            return None;
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
            .collect()
    }
}

pub fn validate_basic_auth(request: &HttpRequest, config: &AuthConfig) -> AuthOutcome {
    if !config.enabled {
        return AuthOutcome::Success;
    }

    let header = match request.header("Authorization") {
        Some(h) => h,
        None => return AuthOutcome::ErrNoHeader,
    };

    let encoded = match header.strip_prefix("Basic ") {
        Some(e) => e.trim(),
        None => return AuthOutcome::ErrInvalid,
    };

    let decoded_bytes = match general_purpose::STANDARD.decode(encoded) {
        Ok(bytes) => bytes,
        Err(_) => return AuthOutcome::ErrParseFailed,
    };
    let decoded = match String::from_utf8(decoded_bytes) {
        Ok(s) => s,
        Err(_) => return AuthOutcome::ErrParseFailed,
    };
    let (username, password) = match decoded.split_once(':') {
        Some(pair) => pair,
        None => return AuthOutcome::ErrParseFailed,
    };

    let record = match config.credentials.get(username) {
        Some(r) => r,
        None => return AuthOutcome::Unauthenticated,
    };
    let (salt_hex, hash_hex) = match record.split_once('$') {
        Some(pair) => pair,
        None => return AuthOutcome::Unauthenticated,
    };
    let salt = match hex::decode(salt_hex) {
        Some(s) => s,
        None => return AuthOutcome::Unauthenticated,
    };
    let expected_hash = match hex::decode(hash_hex) {
        Some(h) => h,
        None => return AuthOutcome::Unauthenticated,
    };

    let actual_hash = sha256_with_salt(password, &salt);
    if constant_time_eq(&actual_hash, &expected_hash) {
        AuthOutcome::Success
    } else {
        AuthOutcome::Unauthenticated
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub fn www_authenticate_header(realm: &str) -> String {
    format!("Basic realm=\"{realm}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_request() {
        let raw = b"POST /onvif/device_service HTTP/1.1\r\nHost: 127.0.0.1\r\nContent-Length: 5\r\n\r\nhello";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/onvif/device_service");
        assert_eq!(req.body, b"hello");
        assert_eq!(req.header("host"), Some("127.0.0.1"));
    }

    #[test]
    fn rejects_malformed_request_line() {
        let raw = b"GARBAGE\r\n\r\n";
        assert_eq!(parse_request(raw).unwrap_err(), ParseError::Malformed);
    }

    #[test]
    fn rejects_oversized_content_length() {
        let raw = format!(
            "POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            MAX_BODY_BYTES + 1
        );
        assert_eq!(
            parse_request(raw.as_bytes()).unwrap_err(),
            ParseError::TooLarge
        );
    }

    #[test]
    fn response_status_zero_substitutes_500() {
        let resp = HttpResponse::new(0, "");
        assert_eq!(resp.status_code, 500);
    }

    #[test]
    fn basic_auth_disabled_always_succeeds() {
        let req = parse_request(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(
            validate_basic_auth(&req, &AuthConfig::disabled()),
            AuthOutcome::Success
        );
    }

    #[test]
    fn basic_auth_missing_header_errs() {
        let req = parse_request(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let mut config = AuthConfig::disabled();
        config.enabled = true;
        assert_eq!(validate_basic_auth(&req, &config), AuthOutcome::ErrNoHeader);
    }

    #[test]
    fn basic_auth_matching_credential_succeeds() {
        let salt = [7u8; 16];
        let record = AuthConfig::make_credential_record("secret", &salt);
        let mut credentials = std::collections::HashMap::new();
        credentials.insert("admin".to_string(), record);
        let config = AuthConfig {
            enabled: true,
            realm: "ONVIF Camera".to_string(),
            credentials,
        };

        let encoded = general_purpose::STANDARD.encode("admin:secret");
        let raw = format!("GET / HTTP/1.1\r\nAuthorization: Basic {encoded}\r\n\r\n");
        let req = parse_request(raw.as_bytes()).unwrap();
        assert_eq!(validate_basic_auth(&req, &config), AuthOutcome::Success);
    }

    #[test]
    fn basic_auth_wrong_password_is_unauthenticated() {
        let salt = [7u8; 16];
        let record = AuthConfig::make_credential_record("secret", &salt);
        let mut credentials = std::collections::HashMap::new();
        credentials.insert("admin".to_string(), record);
        let config = AuthConfig {
            enabled: true,
            realm: "ONVIF Camera".to_string(),
            credentials,
        };

        let encoded = general_purpose::STANDARD.encode("admin:wrong");
        let raw = format!("GET / HTTP/1.1\r\nAuthorization: Basic {encoded}\r\n\r\n");
        let req = parse_request(raw.as_bytes()).unwrap();
        assert_eq!(
            validate_basic_auth(&req, &config),
            AuthOutcome::Unauthenticated
        );
    }

    #[test]
    fn basic_auth_malformed_base64_is_parse_failed() {
        let mut config = AuthConfig::disabled();
        config.enabled = true;
        let raw = "GET / HTTP/1.1\r\nAuthorization: Basic not-base64!!\r\n\r\n";
        let req = parse_request(raw.as_bytes()).unwrap();
        assert_eq!(
            validate_basic_auth(&req, &config),
            AuthOutcome::ErrParseFailed
        );
    }
}
