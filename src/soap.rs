//! SOAP request parsing helpers.
//!
//! ONVIF clients vary in their namespace prefixes, so all matching is done
//! on local element names with a streaming reader.

use quick_xml::events::Event;
use quick_xml::Reader;

/// Extract the operation name from a SOAP request body: the first element
/// inside `Body`. Returns `None` for malformed XML or an empty body.
pub fn extract_action(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut in_body = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let local_name = e.local_name();
                let name = String::from_utf8_lossy(local_name.as_ref()).to_string();

                if name == "Body" {
                    in_body = true;
                    continue;
                }
                if in_body && name != "Envelope" {
                    return Some(name);
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"Body" {
                    return None;
                }
            }
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
    }
}

/// Text content of the first element with the given local name.
pub fn element_text(xml: &str, local: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut capture = false;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == local.as_bytes() {
                    capture = true;
                }
            }
            Ok(Event::Text(t)) if capture => {
                if let Ok(s) = t.unescape() {
                    text.push_str(&s);
                }
            }
            Ok(Event::End(e)) => {
                if capture && e.local_name().as_ref() == local.as_bytes() {
                    let trimmed = text.trim();
                    if trimmed.is_empty() {
                        return None;
                    }
                    return Some(trimmed.to_string());
                }
            }
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
    }
}

/// Whether an element with the given local name exists anywhere in the
/// document.
pub fn has_element(xml: &str, local: &str) -> bool {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == local.as_bytes() {
                    return true;
                }
            }
            Ok(Event::Eof) => return false,
            Err(_) => return false,
            _ => {}
        }
    }
}

pub fn extract_profile_token(xml: &str) -> Option<String> {
    element_text(xml, "ProfileToken")
}

pub fn extract_category(xml: &str) -> Option<String> {
    element_text(xml, "Category")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
            xmlns:trt="http://www.onvif.org/ver10/media/wsdl">
  <s:Body>{}</s:Body>
</s:Envelope>"#,
            body
        )
    }

    #[test]
    fn action_from_start_element() {
        let xml = request("<trt:GetProfiles/>");
        assert_eq!(extract_action(&xml).as_deref(), Some("GetProfiles"));
    }

    #[test]
    fn action_ignores_namespace_prefix() {
        let xml = request("<tds:GetDeviceInformation xmlns:tds=\"http://www.onvif.org/ver10/device/wsdl\"></tds:GetDeviceInformation>");
        assert_eq!(extract_action(&xml).as_deref(), Some("GetDeviceInformation"));
    }

    #[test]
    fn no_action_in_empty_body() {
        let xml = request("");
        assert_eq!(extract_action(&xml), None);
    }

    #[test]
    fn no_action_in_garbage() {
        assert_eq!(extract_action("not xml at all"), None);
        assert_eq!(extract_action("<unclosed"), None);
    }

    #[test]
    fn profile_token_extraction() {
        let xml = request(
            "<trt:GetStreamUri><trt:ProfileToken>sub_stream</trt:ProfileToken></trt:GetStreamUri>",
        );
        assert_eq!(extract_profile_token(&xml).as_deref(), Some("sub_stream"));
        assert_eq!(extract_profile_token(&request("<trt:GetStreamUri/>")), None);
    }

    #[test]
    fn category_extraction() {
        let xml = request("<tds:GetCapabilities><tds:Category>Media</tds:Category></tds:GetCapabilities>");
        assert_eq!(extract_category(&xml).as_deref(), Some("Media"));
    }

    #[test]
    fn element_presence() {
        let xml = request("<d:Probe xmlns:d=\"http://schemas.xmlsoap.org/ws/2005/04/discovery\"/>");
        assert!(has_element(&xml, "Probe"));
        assert!(!has_element(&xml, "Resolve"));
    }
}
