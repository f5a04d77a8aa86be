//! Structured payloads carried inside frames.
//!
//! Field names are PascalCase on the wire so peers written against the same
//! JSON shapes in other languages interoperate.

use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::Metadata;

use crate::error::Result;

/// One file in the shared folder, as reported by LIST.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(rename = "FileName")]
    pub name: String,
    #[serde(rename = "FileSize")]
    pub size: u64,
    #[serde(rename = "LastModified", with = "timestamp")]
    pub modified_at: DateTime<Local>,
}

impl FileEntry {
    pub fn from_metadata(name: String, md: &Metadata) -> Self {
        let modified_at = md
            .modified()
            .map(DateTime::<Local>::from)
            .unwrap_or_else(|_| Local::now());
        Self {
            name,
            size: md.len(),
            modified_at,
        }
    }

    pub fn formatted_size(&self) -> String {
        format_size(self.size)
    }
}

/// Declares name and exact byte count before an upload body is sent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    #[serde(rename = "FileName")]
    pub name: String,
    #[serde(rename = "FileSize")]
    pub size: u64,
}

impl UploadRequest {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

pub fn to_payload<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub fn from_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(payload)?)
}

/// Human-readable size: bytes below 1 KiB, otherwise two decimals.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    let b = bytes as f64;
    if bytes < KB {
        format!("{bytes} B")
    } else if bytes < MB {
        format!("{:.2} KB", b / KB as f64)
    } else if bytes < GB {
        format!("{:.2} MB", b / MB as f64)
    } else {
        format!("{:.2} GB", b / GB as f64)
    }
}

// RFC3339 with offset on the way out. On the way in, also accept timestamps
// without an offset (interpreted as server-local time).
mod timestamp {
    use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &DateTime<Local>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, false))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Local>, D::Error> {
        let raw = String::deserialize(d)?;
        if let Ok(t) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(t.with_timezone(&Local));
        }
        let naive = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map_err(|e| de::Error::custom(format!("bad timestamp {raw:?}: {e}")))?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| de::Error::custom(format!("nonexistent local time {raw:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn file_list_uses_pascal_case_fields() {
        let entry = FileEntry {
            name: "a.txt".into(),
            size: 12,
            modified_at: Local::now(),
        };
        let json = String::from_utf8(to_payload(&vec![entry.clone()]).unwrap()).unwrap();
        assert!(json.starts_with('['));
        assert!(json.contains("\"FileName\":\"a.txt\""));
        assert!(json.contains("\"FileSize\":12"));
        assert!(json.contains("\"LastModified\":"));

        let back: Vec<FileEntry> = from_payload(json.as_bytes()).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].name, "a.txt");
        assert_eq!(back[0].size, 12);
        assert_eq!(back[0].modified_at.timestamp(), entry.modified_at.timestamp());
    }

    #[test]
    fn accepts_timestamps_without_offset() {
        let json = r#"[{"FileName":"x","FileSize":3,"LastModified":"2024-05-01T10:20:30.1234567"}]"#;
        let entries: Vec<FileEntry> = from_payload(json.as_bytes()).unwrap();
        let t = entries[0].modified_at;
        assert_eq!((t.year(), t.month(), t.day()), (2024, 5, 1));
        assert_eq!((t.hour(), t.minute(), t.second()), (10, 20, 30));
    }

    #[test]
    fn upload_request_shape() {
        let req = UploadRequest::new("a.txt", 12);
        let payload = to_payload(&req).unwrap();
        assert_eq!(payload, br#"{"FileName":"a.txt","FileSize":12}"#.to_vec());
        let back: UploadRequest = from_payload(&payload).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn negative_size_is_rejected() {
        let bad = br#"{"FileName":"a.txt","FileSize":-5}"#;
        assert!(from_payload::<UploadRequest>(bad).is_err());
    }

    #[test]
    fn sizes_format_like_a_file_manager() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(2 * 1024 * 1024), "2.00 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.00 GB");
    }
}
