//! Wire-format XML for the object service.
//!
//! Request bodies are built as plain strings; responses are parsed with a
//! streaming reader.

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::client::{BlobItem, ListSegment, Metadata};
use crate::error::{StorageError, StorageResult};

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// BlockList request body. Every id is sent as `Latest`, which resolves
/// against the uncommitted set first and the committed list second, which is
/// what re-sending a full map of old and new ids needs.
pub fn serialize_block_list(block_ids: &[String]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="utf-8"?><BlockList>"#);
    for id in block_ids {
        xml.push_str("<Latest>");
        xml.push_str(&xml_escape(id));
        xml.push_str("</Latest>");
    }
    xml.push_str("</BlockList>");
    xml
}

/// Parses a GetBlockList response into committed `(id, size)` pairs.
/// Uncommitted blocks are ignored; they are not part of the object yet.
pub fn parse_committed_block_list(xml: &str) -> StorageResult<Vec<(String, u64)>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut blocks = Vec::new();
    let mut buf = Vec::new();
    let mut in_committed = false;
    let mut current_element: Option<String> = None;
    let mut name = String::new();
    let mut size = 0u64;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let element = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if element == "CommittedBlocks" {
                    in_committed = true;
                }
                current_element = Some(element);
            }
            Ok(Event::End(e)) => {
                match e.name().as_ref() {
                    b"CommittedBlocks" => in_committed = false,
                    b"Block" if in_committed => {
                        blocks.push((std::mem::take(&mut name), size));
                        size = 0;
                    }
                    _ => {}
                }
                current_element = None;
            }
            Ok(Event::Text(e)) => {
                if !in_committed {
                    continue;
                }
                let text = e
                    .unescape()
                    .map_err(|_| StorageError::io("malformed block list response"))?;
                match current_element.as_deref() {
                    Some("Name") => name = text.to_string(),
                    Some("Size") => {
                        size = text
                            .parse()
                            .map_err(|_| StorageError::io("malformed block size"))?
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(StorageError::io("malformed block list response")),
            _ => {}
        }
        buf.clear();
    }

    Ok(blocks)
}

fn parse_http_date(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parses an EnumerationResults listing response: blob items with their
/// properties and metadata, common prefixes, and the continuation marker.
pub fn parse_list_segment(xml: &str) -> StorageResult<ListSegment> {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut segment = ListSegment::default();
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut current_text = String::new();

    let mut item_name = String::new();
    let mut item_size = 0u64;
    let mut item_modified: Option<DateTime<Utc>> = None;
    let mut item_created: Option<DateTime<Utc>> = None;
    let mut item_md5: Option<Vec<u8>> = None;
    let mut item_metadata = Metadata::new();
    let mut in_prefix = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let element = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if element == "BlobPrefix" {
                    in_prefix = true;
                }
                path.push(element);
                current_text.clear();
            }
            Ok(Event::End(e)) => {
                let element = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let depth: Vec<&str> = path.iter().map(|s| s.as_str()).collect();

                match element.as_str() {
                    "Name" if in_prefix => segment.prefixes.push(current_text.clone()),
                    "Name" if depth.ends_with(&["Blob", "Name"]) => {
                        item_name = current_text.clone();
                    }
                    "Content-Length" => item_size = current_text.parse().unwrap_or(0),
                    "Last-Modified" => item_modified = parse_http_date(&current_text),
                    "Creation-Time" => item_created = parse_http_date(&current_text),
                    "Content-MD5" => {
                        item_md5 = if current_text.is_empty() {
                            None
                        } else {
                            BASE64.decode(current_text.as_bytes()).ok()
                        };
                    }
                    "NextMarker" => {
                        if !current_text.is_empty() {
                            segment.next_marker = Some(current_text.clone());
                        }
                    }
                    "BlobPrefix" => in_prefix = false,
                    "Blob" => {
                        let modified = item_modified.take().unwrap_or_else(Utc::now);
                        segment.items.push(BlobItem {
                            name: std::mem::take(&mut item_name),
                            size: item_size,
                            last_modified: modified,
                            created_on: item_created.take().unwrap_or(modified),
                            content_md5: item_md5.take(),
                            metadata: std::mem::take(&mut item_metadata),
                        });
                        item_size = 0;
                    }
                    _ => {
                        // Inside <Metadata> every child element is a user key.
                        if depth.len() >= 2 && depth[depth.len() - 2] == "Metadata" {
                            item_metadata.insert(element, current_text.clone());
                        }
                    }
                }

                path.pop();
                current_text.clear();
            }
            Ok(Event::Text(e)) => {
                current_text = e
                    .unescape()
                    .map_err(|_| StorageError::io("malformed listing response"))?
                    .to_string();
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(StorageError::io("malformed listing response")),
            _ => {}
        }
        buf.clear();
    }

    Ok(segment)
}

/// Parses a service-level container listing into container names.
pub fn parse_container_names(xml: &str) -> StorageResult<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut names = Vec::new();
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut current_text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                path.push(String::from_utf8_lossy(e.name().as_ref()).to_string());
                current_text.clear();
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"Name"
                    && path.len() >= 2
                    && path[path.len() - 2] == "Container"
                {
                    names.push(current_text.clone());
                }
                path.pop();
                current_text.clear();
            }
            Ok(Event::Text(e)) => {
                current_text = e
                    .unescape()
                    .map_err(|_| StorageError::io("malformed container listing"))?
                    .to_string();
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(StorageError::io("malformed container listing")),
            _ => {}
        }
        buf.clear();
    }

    Ok(names)
}
