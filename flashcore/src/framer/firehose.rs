// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Firehose framing: vendor-XML over USB bulk.
//!
//! A command is one `<?xml?><data>...</data>` document, NUL-padded to the
//! next 512-byte boundary. Responses are streams of `<log>` and
//! `<response>` elements. The documents are tiny and attribute-only, so
//! they are built and scanned by hand the way the corpus flashers do it.

use crate::error::FrameError;

/// One scanned XML element: its tag name and attributes in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attrs: Vec<(String, String)>,
}

impl XmlElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Build one command document: `<data><{name} {attrs}/></data>`, padded.
pub fn build_command(name: &str, attrs: &[(&str, String)]) -> Vec<u8> {
    let mut doc = String::from("<?xml version=\"1.0\" ?><data><");
    doc.push_str(name);
    for (k, v) in attrs {
        doc.push(' ');
        doc.push_str(k);
        doc.push_str("=\"");
        doc.push_str(&escape(v));
        doc.push('"');
    }
    doc.push_str(" /></data>");

    let mut out = doc.into_bytes();
    // Always at least one NUL terminator, then up to the 512 boundary.
    let pad = 512 - out.len() % 512;
    out.resize(out.len() + pad, 0);
    out
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Scan every element in `xml` except the `<data>` wrapper and the XML
/// declaration. Tolerates NUL padding between documents.
pub fn scan_elements(xml: &str) -> Result<Vec<XmlElement>, FrameError> {
    let bytes = xml.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }
        i += 1;
        if i >= bytes.len() || bytes[i] == b'?' || bytes[i] == b'/' {
            continue;
        }
        let name_start = i;
        while i < bytes.len() && !matches!(bytes[i], b' ' | b'\t' | b'\r' | b'\n' | b'>' | b'/') {
            i += 1;
        }
        let name = xml[name_start..i].to_string();
        let mut attrs = Vec::new();
        loop {
            while i < bytes.len() && matches!(bytes[i], b' ' | b'\t' | b'\r' | b'\n') {
                i += 1;
            }
            if i >= bytes.len() {
                return Err(FrameError::Truncated {
                    need: i + 1,
                    have: bytes.len(),
                });
            }
            if bytes[i] == b'>' {
                i += 1;
                break;
            }
            if bytes[i] == b'/' {
                i += 1;
                continue;
            }
            let key_start = i;
            while i < bytes.len() && bytes[i] != b'=' {
                i += 1;
            }
            let key = xml[key_start..i].trim().to_string();
            i += 1; // '='
            if i >= bytes.len() || bytes[i] != b'"' {
                return Err(FrameError::Truncated {
                    need: i + 1,
                    have: bytes.len(),
                });
            }
            i += 1; // opening quote
            let val_start = i;
            while i < bytes.len() && bytes[i] != b'"' {
                i += 1;
            }
            if i >= bytes.len() {
                return Err(FrameError::Truncated {
                    need: i + 1,
                    have: bytes.len(),
                });
            }
            let value = unescape(&xml[val_start..i]);
            i += 1; // closing quote
            attrs.push((key, value));
        }
        if name != "data" {
            out.push(XmlElement { name, attrs });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_padded_to_512() {
        let cmd = build_command(
            "configure",
            &[
                ("MemoryName", "emmc".to_string()),
                ("MaxPayloadSizeToTargetInBytes", "1048576".to_string()),
            ],
        );
        assert_eq!(cmd.len() % 512, 0);
        assert!(cmd.len() >= 512);
        let text = std::str::from_utf8(&cmd[..cmd.iter().position(|&b| b == 0).unwrap()]).unwrap();
        assert!(text.starts_with("<?xml version=\"1.0\" ?><data><configure "));
        assert!(text.ends_with(" /></data>"));
        assert!(cmd[text.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn scans_interleaved_logs_and_response() {
        let xml = "<?xml version=\"1.0\" encoding=\"UTF-8\" ?><data>\n\
                   <log value=\"INFO: device &quot;ready&quot;\" /></data>\
                   <?xml version=\"1.0\" ?><data>\
                   <response value=\"ACK\" rawmode=\"true\" /></data>\u{0}\u{0}";
        let elements = scan_elements(xml).unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].name, "log");
        assert_eq!(elements[0].attr("value"), Some("INFO: device \"ready\""));
        assert_eq!(elements[1].name, "response");
        assert_eq!(elements[1].attr("value"), Some("ACK"));
        assert_eq!(elements[1].attr("rawmode"), Some("true"));
    }

    #[test]
    fn attribute_escaping_roundtrips() {
        let cmd = build_command("program", &[("label", "a\"<&>b".to_string())]);
        let end = cmd.iter().position(|&b| b == 0).unwrap();
        let elements = scan_elements(std::str::from_utf8(&cmd[..end]).unwrap()).unwrap();
        assert_eq!(elements[0].attr("label"), Some("a\"<&>b"));
    }
}
