//! Vendor XML response parsing
//!
//! Run-report responses look like:
//!
//! ```xml
//! <ReportResponse xmlns="http://www.collaboratemd.com/api/v1/">
//!   <Status>SUCCESS</Status>
//!   <Identifier>1234567</Identifier>
//!   <StatusMessage>Report generation started</StatusMessage>
//! </ReportResponse>
//! ```
//!
//! Only direct children of the root in the API namespace are read. `Status`
//! and `Identifier` must be present; a missing `StatusMessage` reads as "".

use crate::error::{ReportError, ReportResult};
use crate::models::{ReportStatus, ReportStatusResponse};
use base64::{engine::general_purpose::STANDARD, Engine};
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;

/// Namespace of CollaborateMD API documents
pub const API_NAMESPACE: &str = "http://www.collaboratemd.com/api/v1/";

#[derive(Clone, Copy)]
enum Field {
    Status,
    Identifier,
    StatusMessage,
}

impl Field {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"Status" => Some(Field::Status),
            b"Identifier" => Some(Field::Identifier),
            b"StatusMessage" => Some(Field::StatusMessage),
            _ => None,
        }
    }
}

fn in_api_namespace(ns: &ResolveResult) -> bool {
    matches!(ns, ResolveResult::Bound(Namespace(uri)) if *uri == API_NAMESPACE.as_bytes())
}

#[derive(Default)]
struct Slots {
    status: Option<String>,
    identifier: Option<String>,
    status_message: Option<String>,
}

impl Slots {
    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Status => &mut self.status,
            Field::Identifier => &mut self.identifier,
            Field::StatusMessage => &mut self.status_message,
        }
    }

    /// First occurrence wins, like an element lookup on the root
    fn open(&mut self, field: Field) -> bool {
        let slot = self.slot(field);
        if slot.is_some() {
            return false;
        }
        *slot = Some(String::new());
        true
    }
}

/// Parse a run-report response body
pub fn parse_status_response(xml: &str) -> ReportResult<ReportStatusResponse> {
    let mut reader = NsReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut slots = Slots::default();
    let mut depth = 0usize;
    let mut current: Option<Field> = None;

    loop {
        match reader.read_resolved_event() {
            Ok((ns, Event::Start(e))) => {
                depth += 1;
                current = None;
                if depth == 2 && in_api_namespace(&ns) {
                    if let Some(field) = Field::from_local_name(e.local_name().as_ref()) {
                        if slots.open(field) {
                            current = Some(field);
                        }
                    }
                }
            }
            Ok((ns, Event::Empty(e))) => {
                if depth == 1 && in_api_namespace(&ns) {
                    if let Some(field) = Field::from_local_name(e.local_name().as_ref()) {
                        slots.open(field);
                    }
                }
            }
            Ok((_, Event::Text(text))) => {
                if let Some(field) = current {
                    let text = text
                        .unescape()
                        .map_err(|e| ReportError::Parse(format!("Invalid text content: {}", e)))?;
                    if let Some(value) = slots.slot(field) {
                        value.push_str(&text);
                    }
                }
            }
            Ok((_, Event::CData(data))) => {
                if let Some(field) = current {
                    let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    if let Some(value) = slots.slot(field) {
                        value.push_str(&text);
                    }
                }
            }
            Ok((_, Event::End(_))) => {
                depth = depth.saturating_sub(1);
                current = None;
            }
            Ok((_, Event::Eof)) => break,
            Ok(_) => {}
            Err(e) => return Err(ReportError::Parse(format!("Malformed XML: {}", e))),
        }
    }

    if depth != 0 {
        return Err(ReportError::Parse("Unexpected end of document".to_string()));
    }

    let status = slots
        .status
        .ok_or_else(|| ReportError::Parse("Response has no Status element".to_string()))?;
    let identifier = slots
        .identifier
        .ok_or_else(|| ReportError::Parse("Response has no Identifier element".to_string()))?;

    Ok(ReportStatusResponse {
        status: ReportStatus::from_raw(status.trim()),
        identifier: identifier.trim().to_string(),
        status_message: slots.status_message.unwrap_or_default(),
    })
}

/// Extract the ZIP archive carried in a results response
///
/// The archive is the base64 text of the root's `Data` child (any
/// namespace). Returns `None` when there is no `Data` element or it is empty.
pub fn parse_results_payload(xml: &str) -> ReportResult<Option<Vec<u8>>> {
    let mut reader = NsReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut depth = 0usize;
    let mut in_data = false;
    let mut encoded: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                in_data = depth == 2 && encoded.is_none() && e.local_name().as_ref() == b"Data";
                if in_data {
                    encoded = Some(String::new());
                }
            }
            Ok(Event::Text(text)) if in_data => {
                let text = text
                    .unescape()
                    .map_err(|e| ReportError::Parse(format!("Invalid Data content: {}", e)))?;
                if let Some(buf) = encoded.as_mut() {
                    buf.push_str(&text);
                }
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
                in_data = false;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ReportError::Parse(format!("Malformed XML: {}", e))),
        }
    }

    let encoded: String = match encoded {
        Some(text) => text.chars().filter(|c| !c.is_ascii_whitespace()).collect(),
        None => return Ok(None),
    };
    if encoded.is_empty() {
        return Ok(None);
    }

    STANDARD
        .decode(encoded.as_bytes())
        .map(Some)
        .map_err(|e| ReportError::Archive(format!("Base64 decode failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_xml(status: &str, identifier: &str, message: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ns1:ReportResponse xmlns:ns1="{}">
  <ns1:Status>{}</ns1:Status>
  <ns1:Identifier>{}</ns1:Identifier>
  <ns1:StatusMessage>{}</ns1:StatusMessage>
</ns1:ReportResponse>"#,
            API_NAMESPACE, status, identifier, message
        )
    }

    #[test]
    fn test_parse_prefixed_namespace() {
        let parsed = parse_status_response(&status_xml("SUCCESS", "12345", "Done")).unwrap();
        assert_eq!(parsed.status, ReportStatus::Success);
        assert_eq!(parsed.identifier, "12345");
        assert_eq!(parsed.status_message, "Done");
    }

    #[test]
    fn test_parse_default_namespace() {
        let xml = format!(
            r#"<Response xmlns="{}"><Status>REPORT RUNNING</Status><Identifier>9</Identifier><StatusMessage>Report is still running</StatusMessage></Response>"#,
            API_NAMESPACE
        );
        let parsed = parse_status_response(&xml).unwrap();
        assert_eq!(parsed.status, ReportStatus::ReportRunning);
        assert_eq!(parsed.status_message, "Report is still running");
    }

    #[test]
    fn test_missing_status_message_is_empty() {
        let xml = format!(
            r#"<Response xmlns="{}"><Status>SUCCESS</Status><Identifier>7</Identifier></Response>"#,
            API_NAMESPACE
        );
        let parsed = parse_status_response(&xml).unwrap();
        assert_eq!(parsed.status_message, "");
    }

    #[test]
    fn test_empty_identifier_element() {
        let xml = format!(
            r#"<Response xmlns="{}"><Status>ERROR</Status><Identifier/><StatusMessage>Bad filter</StatusMessage></Response>"#,
            API_NAMESPACE
        );
        let parsed = parse_status_response(&xml).unwrap();
        assert_eq!(parsed.identifier, "");
        assert_eq!(parsed.status, ReportStatus::Other("ERROR".to_string()));
    }

    #[test]
    fn test_escaped_text() {
        let parsed = parse_status_response(&status_xml("SUCCESS", "1", "A &amp; B")).unwrap();
        assert_eq!(parsed.status_message, "A & B");
    }

    #[test]
    fn test_missing_required_elements() {
        let xml = format!(
            r#"<Response xmlns="{}"><Identifier>7</Identifier></Response>"#,
            API_NAMESPACE
        );
        let err = parse_status_response(&xml).unwrap_err();
        assert!(matches!(err, ReportError::Parse(ref m) if m.contains("Status")));

        let xml = format!(
            r#"<Response xmlns="{}"><Status>SUCCESS</Status></Response>"#,
            API_NAMESPACE
        );
        let err = parse_status_response(&xml).unwrap_err();
        assert!(matches!(err, ReportError::Parse(ref m) if m.contains("Identifier")));
    }

    #[test]
    fn test_wrong_namespace_is_missing() {
        let xml = r#"<Response xmlns="http://example.com/other"><Status>SUCCESS</Status><Identifier>1</Identifier></Response>"#;
        assert!(matches!(parse_status_response(xml), Err(ReportError::Parse(_))));

        let unqualified =
            r#"<Response><Status>SUCCESS</Status><Identifier>1</Identifier></Response>"#;
        assert!(matches!(parse_status_response(unqualified), Err(ReportError::Parse(_))));
    }

    #[test]
    fn test_nested_elements_ignored() {
        let xml = format!(
            r#"<Response xmlns="{ns}"><Details><Status>ERROR</Status></Details><Status>SUCCESS</Status><Identifier>5</Identifier></Response>"#,
            ns = API_NAMESPACE
        );
        let parsed = parse_status_response(&xml).unwrap();
        assert_eq!(parsed.status, ReportStatus::Success);
    }

    #[test]
    fn test_malformed_xml() {
        assert!(matches!(parse_status_response("<Response><Status>"), Err(ReportError::Parse(_))));
        assert!(matches!(parse_status_response("not xml at all"), Err(ReportError::Parse(_))));
        assert!(matches!(parse_status_response(""), Err(ReportError::Parse(_))));
    }

    #[test]
    fn test_results_payload_decodes_data() {
        let encoded = STANDARD.encode(b"PK\x03\x04zipbytes");
        let xml = format!(
            "<ReportResults><Status>SUCCESS</Status><Data>\n{}\n</Data></ReportResults>",
            encoded
        );
        let payload = parse_results_payload(&xml).unwrap().unwrap();
        assert_eq!(payload, b"PK\x03\x04zipbytes");
    }

    #[test]
    fn test_results_payload_missing_or_empty() {
        for xml in [
            "<ReportResults><Status>FAIL</Status></ReportResults>",
            "<ReportResults><Data></Data></ReportResults>",
            "<ReportResults><Data/></ReportResults>",
        ] {
            assert_eq!(parse_results_payload(xml).unwrap(), None, "{}", xml);
        }
    }

    #[test]
    fn test_results_payload_bad_base64() {
        let err =
            parse_results_payload("<ReportResults><Data>@@@</Data></ReportResults>").unwrap_err();
        assert!(matches!(err, ReportError::Archive(_)));
    }
}
