//! Authoring timestamps embedded inside structured documents.
//!
//! Two container families are understood:
//!
//! - **OLE compound files** (`.hwp`, `.doc`, `.xls`, ...): the summary
//!   property set stream (`\x05SummaryInformation`, or
//!   `\x05HwpSummaryInformation` for HWP 5.x) carries `PIDSI_CREATE_DTM`
//!   and `PIDSI_LASTSAVE_DTM` as `VT_FILETIME` values.
//! - **OOXML packages** (`.docx`, `.xlsx`, `.pptx`): `docProps/core.xml`
//!   carries `dcterms:created` and `dcterms:modified`.
//!
//! A file that is neither is not an error: [`read_embedded_times`] returns
//! `Ok(None)`. A file that looks like one of these containers but cannot be
//! decoded returns [`DocPropsError`], which callers log and ignore.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::DateTime;
use thiserror::Error;

const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

const SUMMARY_STREAMS: [&str; 2] = ["/\u{5}SummaryInformation", "/\u{5}HwpSummaryInformation"];

const PIDSI_CREATE_DTM: u32 = 0x0C;
const PIDSI_LASTSAVE_DTM: u32 = 0x0D;
const VT_FILETIME: u16 = 0x0040;

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_EPOCH_OFFSET: i64 = 11_644_473_600;

const MAX_CORE_XML_BYTES: u64 = 1024 * 1024;

#[derive(Error, Debug)]
pub enum DocPropsError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed property set: {0}")]
    PropertySet(String),
    #[error("malformed OOXML package: {0}")]
    Ooxml(String),
}

/// Timestamps found inside a document, as Unix seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbeddedTimes {
    pub created: Option<i64>,
    pub last_saved: Option<i64>,
}

impl EmbeddedTimes {
    pub fn is_empty(&self) -> bool {
        self.created.is_none() && self.last_saved.is_none()
    }

    /// The later of the two timestamps, whichever are present.
    pub fn latest(&self) -> Option<i64> {
        match (self.created, self.last_saved) {
            (Some(c), Some(s)) => Some(c.max(s)),
            (c, s) => c.or(s),
        }
    }
}

pub fn read_embedded_times(path: &Path) -> Result<Option<EmbeddedTimes>, DocPropsError> {
    let mut magic = [0u8; 8];
    let read = File::open(path)?.read(&mut magic)?;

    if read == 8 && magic == OLE_MAGIC {
        return read_ole_times(path);
    }
    if read >= 4 && magic[..4] == ZIP_MAGIC {
        return read_ooxml_times(path);
    }
    Ok(None)
}

fn read_ole_times(path: &Path) -> Result<Option<EmbeddedTimes>, DocPropsError> {
    let mut comp = cfb::open(path)?;

    for stream_path in SUMMARY_STREAMS {
        if !comp.is_stream(stream_path) {
            continue;
        }
        let mut stream = comp.open_stream(stream_path)?;
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf)?;
        let times = parse_summary_property_set(&buf)?;
        return Ok(Some(times));
    }

    // A compound file without a summary stream is ordinary.
    Ok(None)
}

/// Decode the first property set of a summary information stream.
pub fn parse_summary_property_set(buf: &[u8]) -> Result<EmbeddedTimes, DocPropsError> {
    if read_u16(buf, 0)? != 0xFFFE {
        return Err(DocPropsError::PropertySet("bad byte order mark".into()));
    }
    let num_sets = read_u32(buf, 24)?;
    if num_sets == 0 {
        return Ok(EmbeddedTimes::default());
    }

    // FMTID0 (16 bytes) at 28, Offset0 at 44.
    let set_start = read_u32(buf, 44)? as usize;
    let num_props = read_u32(buf, set_start + 4)? as usize;

    let mut times = EmbeddedTimes::default();
    for i in 0..num_props {
        let entry = set_start + 8 + i * 8;
        let prop_id = read_u32(buf, entry)?;
        let value_offset = set_start + read_u32(buf, entry + 4)? as usize;

        if prop_id != PIDSI_CREATE_DTM && prop_id != PIDSI_LASTSAVE_DTM {
            continue;
        }
        if read_u16(buf, value_offset)? != VT_FILETIME {
            continue;
        }
        let low = read_u32(buf, value_offset + 4)? as u64;
        let high = read_u32(buf, value_offset + 8)? as u64;
        let ts = filetime_to_unix((high << 32) | low);

        match prop_id {
            PIDSI_CREATE_DTM => times.created = ts,
            _ => times.last_saved = ts,
        }
    }
    Ok(times)
}

/// FILETIME is 100ns ticks since 1601. Zero means "unset".
fn filetime_to_unix(ticks: u64) -> Option<i64> {
    if ticks == 0 {
        return None;
    }
    let secs = (ticks / 10_000_000) as i64 - FILETIME_EPOCH_OFFSET;
    (secs > 0).then_some(secs)
}

fn read_u16(buf: &[u8], at: usize) -> Result<u16, DocPropsError> {
    buf.get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| DocPropsError::PropertySet(format!("truncated at offset {}", at)))
}

fn read_u32(buf: &[u8], at: usize) -> Result<u32, DocPropsError> {
    buf.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| DocPropsError::PropertySet(format!("truncated at offset {}", at)))
}

fn read_ooxml_times(path: &Path) -> Result<Option<EmbeddedTimes>, DocPropsError> {
    let file = File::open(path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| DocPropsError::Ooxml(e.to_string()))?;

    let mut xml = Vec::new();
    match archive.by_name("docProps/core.xml") {
        Ok(entry) => {
            entry.take(MAX_CORE_XML_BYTES).read_to_end(&mut xml)?;
        }
        // Plain zip archives have no core properties.
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(DocPropsError::Ooxml(e.to_string())),
    }

    parse_core_properties(&xml).map(Some)
}

/// Read `dcterms:created` / `dcterms:modified` from `docProps/core.xml`.
pub fn parse_core_properties(xml: &[u8]) -> Result<EmbeddedTimes, DocPropsError> {
    let mut times = EmbeddedTimes::default();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let slot = match e.local_name().as_ref() {
                    b"created" => Some(true),
                    b"modified" => Some(false),
                    _ => None,
                };
                if let Some(is_created) = slot {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        let raw = te.unescape().unwrap_or_default().to_string();
                        let ts = DateTime::parse_from_rfc3339(raw.trim())
                            .ok()
                            .map(|dt| dt.timestamp());
                        if is_created {
                            times.created = ts;
                        } else {
                            times.last_saved = ts;
                        }
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(DocPropsError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(times)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filetime(unix: i64) -> u64 {
        ((unix + FILETIME_EPOCH_OFFSET) as u64) * 10_000_000
    }

    /// Build a minimal one-set property stream holding the given FILETIMEs.
    fn property_stream(props: &[(u32, u64)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0xFFFEu16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&48u32.to_le_bytes());

        let header_len = 8 + props.len() * 8;
        let size = header_len + props.len() * 12;
        out.extend_from_slice(&(size as u32).to_le_bytes());
        out.extend_from_slice(&(props.len() as u32).to_le_bytes());
        for (i, (id, _)) in props.iter().enumerate() {
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(&((header_len + i * 12) as u32).to_le_bytes());
        }
        for (_, ft) in props {
            out.extend_from_slice(&VT_FILETIME.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&((*ft & 0xFFFF_FFFF) as u32).to_le_bytes());
            out.extend_from_slice(&((*ft >> 32) as u32).to_le_bytes());
        }
        out
    }

    #[test]
    fn test_summary_property_set_timestamps() {
        let created = 1_704_067_200; // 2024-01-01T00:00:00Z
        let saved = 1_735_689_600; // 2025-01-01T00:00:00Z
        let buf = property_stream(&[
            (PIDSI_CREATE_DTM, filetime(created)),
            (PIDSI_LASTSAVE_DTM, filetime(saved)),
        ]);
        let times = parse_summary_property_set(&buf).unwrap();
        assert_eq!(times.created, Some(created));
        assert_eq!(times.last_saved, Some(saved));
        assert_eq!(times.latest(), Some(saved));
    }

    #[test]
    fn test_summary_property_set_ignores_zero_filetime() {
        let buf = property_stream(&[(PIDSI_LASTSAVE_DTM, 0)]);
        let times = parse_summary_property_set(&buf).unwrap();
        assert!(times.is_empty());
    }

    #[test]
    fn test_truncated_property_set_is_error() {
        let mut buf = property_stream(&[(PIDSI_CREATE_DTM, filetime(1_000_000_000))]);
        buf.truncate(52);
        assert!(parse_summary_property_set(&buf).is_err());
    }

    #[test]
    fn test_core_properties() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties"
  xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <dcterms:created xsi:type="dcterms:W3CDTF">2024-03-01T09:00:00Z</dcterms:created>
  <dcterms:modified xsi:type="dcterms:W3CDTF">2024-06-15T12:30:00Z</dcterms:modified>
</cp:coreProperties>"#;
        let times = parse_core_properties(xml).unwrap();
        assert_eq!(times.created, Some(1_709_283_600));
        assert_eq!(times.last_saved, Some(1_718_454_600));
    }

    #[test]
    fn test_plain_text_file_is_not_a_container() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "just text").unwrap();
        assert_eq!(read_embedded_times(&path).unwrap(), None);
    }
}
