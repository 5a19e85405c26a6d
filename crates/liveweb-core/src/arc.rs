//! Decoder for single ARC records as returned by a live-fetch proxy.
//!
//! Record layout:
//!
//! ```text
//! <url> <ip> <yyyyMMddHHmmss> <mime> <length>\n
//! <length bytes of captured HTTP response>
//! ```
//!
//! Version 2 headers carry extra fields between the mime type and the
//! length; only the first four and the last field are read.

use std::io::Read;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::DecodeError;
use crate::models::{Resource, ResourceHeaders};
use crate::traits::ContainerDecoder;

/// Minimum number of fields in an ARC record header line.
const MIN_HEADER_FIELDS: usize = 5;

/// [`ContainerDecoder`] for uncompressed ARC records carrying an HTTP response.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArcDecoder;

impl ArcDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl ContainerDecoder for ArcDecoder {
    fn decode(&self, stream: &mut dyn Read, record_id: &str) -> Result<Resource, DecodeError> {
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw)?;
        parse_record(&raw, record_id)
    }
}

fn parse_record(raw: &[u8], record_id: &str) -> Result<Resource, DecodeError> {
    let mut pos = 0;
    while raw[pos..].starts_with(b"\r\n") || raw[pos..].starts_with(b"\n") {
        pos += if raw[pos] == b'\r' { 2 } else { 1 };
    }

    let Some((header_line, content_start)) = next_line(raw, pos) else {
        return Err(DecodeError::Malformed(format!("{record_id}: empty record")));
    };
    if content_start == raw.len() && !raw.ends_with(b"\n") {
        return Err(DecodeError::Malformed(format!(
            "{record_id}: record header is not terminated"
        )));
    }

    let header = std::str::from_utf8(header_line).map_err(|_| {
        DecodeError::Malformed(format!("{record_id}: record header is not valid UTF-8"))
    })?;
    let fields: Vec<&str> = header.split_whitespace().collect();
    if fields.len() < MIN_HEADER_FIELDS {
        return Err(DecodeError::Malformed(format!(
            "{record_id}: record header has {} fields, expected at least {MIN_HEADER_FIELDS}",
            fields.len()
        )));
    }

    let declared = fields[fields.len() - 1];
    let length: usize = declared.parse().map_err(|_| {
        DecodeError::Malformed(format!("{record_id}: invalid record length '{declared}'"))
    })?;
    let available = raw.len() - content_start;
    if available < length {
        return Err(DecodeError::Malformed(format!(
            "{record_id}: record declares {length} bytes but only {available} are present"
        )));
    }
    let content = &raw[content_start..content_start + length];

    let mut resource = parse_http_response(content, record_id)?;
    resource.record_url = Some(fields[0].to_string());
    resource.remote_ip = Some(fields[1].to_string());
    resource.capture_date = parse_arc_date(fields[2]);
    resource.mime_type = Some(fields[3].to_string());
    Ok(resource)
}

fn parse_http_response(content: &[u8], record_id: &str) -> Result<Resource, DecodeError> {
    let not_http =
        || DecodeError::Unavailable(format!("{record_id}: record does not hold an HTTP response"));

    let (status_line, mut pos) = next_line(content, 0).ok_or_else(not_http)?;
    let status_line = String::from_utf8_lossy(status_line);
    let mut parts = status_line.split_whitespace();
    let version = parts.next().ok_or_else(not_http)?;
    if !version.starts_with("HTTP/") {
        return Err(not_http());
    }
    let status_code: u16 = parts
        .next()
        .filter(|code| code.len() == 3 && code.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| *code >= 100)
        .ok_or_else(|| {
            DecodeError::Malformed(format!("{record_id}: bad status line '{status_line}'"))
        })?;

    let mut headers = ResourceHeaders::new();
    let mut body_start = content.len();
    while let Some((line, next)) = next_line(content, pos) {
        pos = next;
        if line.is_empty() {
            body_start = next;
            break;
        }
        let line = String::from_utf8_lossy(line);
        match line.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                headers.insert(name.trim(), value.trim());
            }
            _ => tracing::debug!(record = %record_id, line = %line, "Skipping malformed header line"),
        }
    }

    Ok(Resource::new(
        status_code,
        headers,
        content[body_start..].to_vec(),
    ))
}

/// Next line starting at `pos`, without its terminator, plus the offset just
/// past the terminator. The final line may be unterminated.
fn next_line(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    if pos >= buf.len() {
        return None;
    }
    let rest = &buf[pos..];
    match rest.iter().position(|&b| b == b'\n') {
        Some(nl) => {
            let line = rest[..nl].strip_suffix(b"\r").unwrap_or(&rest[..nl]);
            Some((line, pos + nl + 1))
        }
        None => Some((rest, buf.len())),
    }
}

/// Parse a 14-digit ARC timestamp (`yyyyMMddHHmmss`).
fn parse_arc_date(raw: &str) -> Option<NaiveDateTime> {
    if raw.len() != 14 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let num = |range: std::ops::Range<usize>| raw[range].parse::<u32>().ok();
    let year = raw[0..4].parse::<i32>().ok()?;
    NaiveDate::from_ymd_opt(year, num(4..6)?, num(6..8)?)?.and_hms_opt(
        num(8..10)?,
        num(10..12)?,
        num(12..14)?,
    )
}
