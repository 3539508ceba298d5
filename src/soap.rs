//! Extract the operation name from a SOAP envelope, build SOAP Fault bodies, and
//! provide the typed-response envelope builder every service module renders through.
//!
//! Grounded on the teacher's `onvif::soap::SoapResponseBuilder`. Operation-name
//! extraction follows the teacher's own string-scanning idiom (`str::find`), extended
//! to require the element actually sits inside `<...:Body>` rather than matching the
//! first occurrence of the operation name anywhere in the request.

use crate::error::CoreError;

/// Locates the SOAP Body's first child element and returns its local name (namespace
/// prefix stripped), e.g. `GetDeviceInformation`.
pub fn extract_operation_name(body: &str) -> Result<String, CoreError> {
    let body_open = find_body_open_tag(body).ok_or_else(|| {
        CoreError::malformed("SOAP envelope is missing a Body element")
    })?;
    let body_close = body
        .find("</")
        .filter(|_| true)
        .and_then(|_| find_body_close_tag(body))
        .ok_or_else(|| CoreError::malformed("SOAP envelope Body element is not closed"))?;

    if body_close <= body_open {
        return Err(CoreError::malformed("SOAP envelope Body element is malformed"));
    }

    let inner = &body[body_open..body_close];
    let trimmed = inner.trim_start();
    if trimmed.is_empty() || !trimmed.starts_with('<') {
        return Err(CoreError::malformed("SOAP envelope Body has no operation element"));
    }

    let tag_end = trimmed[1..]
        .find(|c: char| c == '>' || c == ' ' || c == '/')
        .map(|i| i + 1)
        .ok_or_else(|| CoreError::malformed("SOAP envelope operation element is unterminated"))?;
    let tag = &trimmed[1..tag_end];
    let local_name = tag.rsplit(':').next().unwrap_or(tag);
    if local_name.is_empty() {
        return Err(CoreError::malformed("SOAP envelope operation element has no name"));
    }
    Ok(local_name.to_string())
}

fn find_body_open_tag(body: &str) -> Option<usize> {
    for needle in ["<soap:Body>", "<s:Body>", "<SOAP-ENV:Body>", "<Body>"] {
        if let Some(pos) = body.find(needle) {
            return Some(pos + needle.len());
        }
    }
    None
}

fn find_body_close_tag(body: &str) -> Option<usize> {
    for needle in ["</soap:Body>", "</s:Body>", "</SOAP-ENV:Body>", "</Body>"] {
        if let Some(pos) = body.find(needle) {
            return Some(pos);
        }
    }
    None
}

/// Builds full SOAP envelopes the way `onvif::soap::SoapResponseBuilder` does, with
/// namespace declarations accumulated per call.
pub struct SoapResponseBuilder {
    header_content: String,
    body_content: String,
    namespaces: Vec<(String, String)>,
}

impl SoapResponseBuilder {
    pub fn new() -> Self {
        Self {
            header_content: String::new(),
            body_content: String::new(),
            namespaces: vec![(
                "soap".to_string(),
                "http://www.w3.org/2003/05/soap-envelope".to_string(),
            )],
        }
    }

    pub fn add_namespace(&mut self, prefix: &str, uri: &str) -> &mut Self {
        self.namespaces.push((prefix.to_string(), uri.to_string()));
        self
    }

    pub fn set_header(&mut self, content: &str) -> &mut Self {
        self.header_content = content.to_string();
        self
    }

    pub fn set_body(&mut self, content: &str) -> &mut Self {
        self.body_content = content.to_string();
        self
    }

    pub fn build(&self) -> String {
        let mut namespaces_str = String::new();
        for (prefix, uri) in &self.namespaces {
            namespaces_str.push_str(&format!(" xmlns:{prefix}=\"{uri}\""));
        }

        let header_section = if self.header_content.is_empty() {
            String::new()
        } else {
            format!("<soap:Header>{}</soap:Header>", self.header_content)
        };

        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<soap:Envelope{namespaces_str}>\n{header_section}\n<soap:Body>\n{}\n</soap:Body>\n</soap:Envelope>",
            self.body_content
        )
    }
}

impl Default for SoapResponseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders a domain error as a SOAP Fault envelope per §4.3/§7's fault policy.
pub fn build_fault(error: &CoreError) -> String {
    let fault_string = escape_xml(&error.fault_message());
    let mut builder = SoapResponseBuilder::new();
    builder.set_body(&format!(
        "<soap:Fault>\n<soap:Code><soap:Value>{}</soap:Value></soap:Code>\n<soap:Reason><soap:Text xml:lang=\"en\">{fault_string}</soap:Text></soap:Reason>\n<soap:Detail><CorrelationId>{}</CorrelationId></soap:Detail>\n</soap:Fault>",
        error.fault_code(),
        error.correlation_id,
    ));
    builder.build()
}

/// Finds the first `<...TagName ...>content</...TagName>` occurrence (namespace prefix
/// on either the open or close tag is ignored) and returns its text content. Used by
/// service handlers as a minimal request-parameter reader, the same string-scanning
/// idiom the teacher's dispatch code already relies on rather than pulling in a full
/// XML parser for a handful of leaf fields.
pub fn extract_tag_content(xml: &str, tag_local_name: &str) -> Option<String> {
    let open_start = find_tag_start(xml, tag_local_name, 0)?;
    let open_tag_end = xml[open_start..].find('>')? + open_start;
    if xml.as_bytes()[open_tag_end - 1] == b'/' {
        return Some(String::new());
    }
    let content_start = open_tag_end + 1;

    let mut search_from = content_start;
    loop {
        let rel = xml[search_from..].find('<')?;
        let abs = search_from + rel;
        if xml[abs..].starts_with("</") {
            let local = xml[abs + 2..].split('>').next().unwrap_or("");
            let local_name = local.rsplit(':').next().unwrap_or(local);
            if local_name == tag_local_name {
                return Some(xml[content_start..abs].trim().to_string());
            }
        }
        search_from = abs + 1;
    }
}

/// Returns the raw inner XML of every top-level occurrence of `tag_local_name`,
/// e.g. every `<tds:User>...</tds:User>` block in a `CreateUsers` request.
pub fn extract_tag_blocks(xml: &str, tag_local_name: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut from = 0;
    while let Some(open_start) = find_tag_start(xml, tag_local_name, from) {
        let open_tag_end = match xml[open_start..].find('>') {
            Some(i) => open_start + i,
            None => break,
        };
        if xml.as_bytes()[open_tag_end - 1] == b'/' {
            blocks.push(String::new());
            from = open_tag_end + 1;
            continue;
        }
        let content_start = open_tag_end + 1;
        let mut search_from = content_start;
        let mut found_close = None;
        while let Some(rel) = xml[search_from..].find('<') {
            let abs = search_from + rel;
            if xml[abs..].starts_with("</") {
                let local = xml[abs + 2..].split('>').next().unwrap_or("");
                let local_name = local.rsplit(':').next().unwrap_or(local);
                if local_name == tag_local_name {
                    found_close = Some(abs);
                    break;
                }
            }
            search_from = abs + 1;
        }
        match found_close {
            Some(close_start) => {
                blocks.push(xml[content_start..close_start].to_string());
                from = match xml[close_start..].find('>') {
                    Some(i) => close_start + i + 1,
                    None => break,
                };
            }
            None => break,
        }
    }
    blocks
}

/// Reads an attribute value off the first occurrence of `tag_local_name`, e.g. the
/// `x` in `<tt:PanTilt x="0.5" y="0.25"/>`.
pub fn extract_attribute(xml: &str, tag_local_name: &str, attr_name: &str) -> Option<String> {
    let open_start = find_tag_start(xml, tag_local_name, 0)?;
    let open_tag_end = xml[open_start..].find('>')? + open_start;
    let tag_text = &xml[open_start..open_tag_end];
    let needle = format!("{attr_name}=\"");
    let attr_start = tag_text.find(&needle)? + needle.len();
    let attr_end = tag_text[attr_start..].find('"')? + attr_start;
    Some(tag_text[attr_start..attr_end].to_string())
}

fn find_tag_start(xml: &str, tag_local_name: &str, from: usize) -> Option<usize> {
    let mut search_from = from;
    loop {
        let rel = xml[search_from..].find('<')?;
        let abs = search_from + rel;
        if xml[abs..].starts_with("</") {
            search_from = abs + 1;
            continue;
        }
        let rest = &xml[abs + 1..];
        let tag_end = rest.find(|c: char| c == '>' || c == ' ' || c == '/')?;
        let tag = &rest[..tag_end];
        let local_name = tag.rsplit(':').next().unwrap_or(tag);
        if local_name == tag_local_name {
            return Some(abs);
        }
        search_from = abs + 1;
    }
}

fn escape_xml(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_operation_name_from_plain_body() {
        let body = "<soap:Envelope><soap:Body><GetDeviceInformation/></soap:Body></soap:Envelope>";
        assert_eq!(extract_operation_name(body).unwrap(), "GetDeviceInformation");
    }

    #[test]
    fn extracts_operation_name_with_namespace_prefix() {
        let body = "<soap:Envelope><soap:Body><tds:GetCapabilities><tds:Category>All</tds:Category></tds:GetCapabilities></soap:Body></soap:Envelope>";
        assert_eq!(extract_operation_name(body).unwrap(), "GetCapabilities");
    }

    #[test]
    fn missing_body_is_malformed() {
        let body = "<soap:Envelope></soap:Envelope>";
        assert!(extract_operation_name(body).is_err());
    }

    #[test]
    fn empty_body_is_malformed() {
        let body = "<soap:Envelope><soap:Body></soap:Body></soap:Envelope>";
        assert!(extract_operation_name(body).is_err());
    }

    #[test]
    fn extract_tag_content_reads_a_namespaced_leaf() {
        let body = "<tptz:ProfileToken>MainProfile</tptz:ProfileToken>";
        assert_eq!(
            extract_tag_content(body, "ProfileToken").as_deref(),
            Some("MainProfile")
        );
    }

    #[test]
    fn extract_tag_content_returns_none_when_absent() {
        let body = "<tptz:ProfileToken>MainProfile</tptz:ProfileToken>";
        assert_eq!(extract_tag_content(body, "PresetToken"), None);
    }

    #[test]
    fn extract_tag_content_handles_self_closing_tags() {
        let body = "<tt:GetDeviceInformation/>";
        assert_eq!(
            extract_tag_content(body, "GetDeviceInformation").as_deref(),
            Some("")
        );
    }

    #[test]
    fn extract_tag_blocks_finds_every_repeated_element() {
        let body = "<tds:User><tds:Username>alice</tds:Username></tds:User><tds:User><tds:Username>bob</tds:Username></tds:User>";
        let blocks = extract_tag_blocks(body, "User");
        assert_eq!(blocks.len(), 2);
        assert_eq!(extract_tag_content(&blocks[0], "Username").as_deref(), Some("alice"));
        assert_eq!(extract_tag_content(&blocks[1], "Username").as_deref(), Some("bob"));
    }

    #[test]
    fn extract_attribute_reads_a_value_off_a_self_closing_tag() {
        let body = "<tt:PanTilt x=\"0.5\" y=\"0.25\"/>";
        assert_eq!(extract_attribute(body, "PanTilt", "x").as_deref(), Some("0.5"));
        assert_eq!(extract_attribute(body, "PanTilt", "y").as_deref(), Some("0.25"));
    }

    #[test]
    fn fault_carries_code_reason_and_correlation_id() {
        let error = CoreError::not_found("unknown profile token");
        let xml = build_fault(&error);
        assert!(xml.contains("s:Sender"));
        assert!(xml.contains("unknown profile token"));
        assert!(xml.contains(&error.correlation_id));
    }
}
