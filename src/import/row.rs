//! Typed view of one row of the social-media CSV export.

use crate::dedup::row_fingerprint;
use crate::sink::{NormalizedRecord, RecordOrigin};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use csv::ByteRecord;
use std::fmt;

/// Column positions in the export.
pub mod columns {
    pub const STAMP: usize = 0;
    pub const CONTENT: usize = 1;
    pub const IMAGES: usize = 2;
    pub const CREATED_AT: usize = 6;
    pub const SOURCE_URL: usize = 11;
}

const LOCAL_TIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    /// At least one field was not valid UTF-8.
    Encoding,
    /// Neither content nor image URLs.
    Empty,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowError::Encoding => write!(f, "row is not valid UTF-8"),
            RowError::Empty => write!(f, "row has no content and no images"),
        }
    }
}

impl std::error::Error for RowError {}

/// Every field is optional; missing trailing columns read as empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    pub stamp: String,
    pub content: String,
    pub image_urls: Vec<String>,
    pub created_at: Option<String>,
    pub source_url: Option<String>,
    raw_fields: Vec<String>,
    utf8_ok: bool,
}

impl ExportRow {
    pub fn decode(record: &ByteRecord) -> Self {
        let mut utf8_ok = true;
        let raw_fields: Vec<String> = record
            .iter()
            .map(|field| match std::str::from_utf8(field) {
                Ok(s) => s.to_string(),
                Err(_) => {
                    utf8_ok = false;
                    String::from_utf8_lossy(field).into_owned()
                }
            })
            .collect();

        let field = |idx: usize| raw_fields.get(idx).map(|s| s.trim()).unwrap_or("");
        let non_empty = |idx: usize| Some(field(idx)).filter(|s| !s.is_empty()).map(str::to_string);

        ExportRow {
            stamp: field(columns::STAMP).to_string(),
            content: raw_fields
                .get(columns::CONTENT)
                .cloned()
                .unwrap_or_default(),
            image_urls: parse_image_list(field(columns::IMAGES)),
            created_at: non_empty(columns::CREATED_AT),
            source_url: non_empty(columns::SOURCE_URL),
            raw_fields: raw_fields.clone(),
            utf8_ok,
        }
    }

    pub fn fingerprint(&self) -> String {
        row_fingerprint(&self.stamp, &self.content)
    }

    pub fn raw_fields(&self) -> &[String] {
        &self.raw_fields
    }

    pub fn normalize(&self, source_offset: FixedOffset) -> Result<NormalizedRecord, RowError> {
        if !self.utf8_ok {
            return Err(RowError::Encoding);
        }
        if self.content.trim().is_empty() && self.image_urls.is_empty() {
            return Err(RowError::Empty);
        }
        let recorded_at = self.created_at.as_deref().and_then(|raw| {
            let parsed = parse_local_time(raw, source_offset);
            if parsed.is_none() {
                tracing::error!(created_time = raw, "Could not parse row timestamp");
            }
            parsed
        });

        Ok(NormalizedRecord {
            origin: RecordOrigin::CsvImport,
            fingerprint: self.fingerprint(),
            raw_fields: self.raw_fields.clone(),
            content: self.content.clone(),
            media_urls: self.image_urls.clone(),
            media: Vec::new(),
            recorded_at,
            source_ref: self.source_url.clone(),
        })
    }
}

/// `[url1, url2]` (brackets optional) into trimmed, non-empty URLs.
pub fn parse_image_list(raw: &str) -> Vec<String> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|s| s.trim().trim_matches(|c| c == '"' || c == '\''))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// RFC 3339 values keep their own offset; bare local times are read in
/// `source_offset`.
pub fn parse_local_time(raw: &str, source_offset: FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    LOCAL_TIME_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(raw, fmt)
            .ok()
            .and_then(|naive| source_offset.from_local_datetime(&naive).single())
            .map(|dt| dt.with_timezone(&Utc))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shanghai() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn export_record(fields: &[&str]) -> ByteRecord {
        ByteRecord::from(fields.to_vec())
    }

    #[test]
    fn test_decode_reads_known_columns() {
        let record = export_record(&[
            "1600000000",
            "hello world",
            "[https://a/1.jpg, https://a/2.png]",
            "",
            "",
            "",
            "2020-09-13 20:26:40",
            "",
            "",
            "",
            "",
            "https://example.com/post/1",
        ]);
        let row = ExportRow::decode(&record);
        assert_eq!(row.stamp, "1600000000");
        assert_eq!(row.content, "hello world");
        assert_eq!(row.image_urls, vec!["https://a/1.jpg", "https://a/2.png"]);
        assert_eq!(row.created_at.as_deref(), Some("2020-09-13 20:26:40"));
        assert_eq!(row.source_url.as_deref(), Some("https://example.com/post/1"));

        let record = row.normalize(shanghai()).unwrap();
        assert_eq!(
            record.recorded_at.unwrap().to_rfc3339(),
            "2020-09-13T12:26:40+00:00"
        );
        assert_eq!(record.raw_fields.len(), 12);
    }

    #[test]
    fn test_short_rows_have_empty_optional_fields() {
        let row = ExportRow::decode(&export_record(&["s", "only content"]));
        assert!(row.image_urls.is_empty());
        assert!(row.created_at.is_none());
        assert!(row.source_url.is_none());
        assert!(row.normalize(shanghai()).is_ok());
    }

    #[test]
    fn test_empty_row_fails_normalization() {
        let row = ExportRow::decode(&export_record(&["s", "  ", "[]"]));
        assert_eq!(row.normalize(shanghai()).unwrap_err(), RowError::Empty);
    }

    #[test]
    fn test_invalid_utf8_fails_normalization() {
        let mut record = ByteRecord::new();
        record.push_field(b"s");
        record.push_field(&[0xff, 0xfe]);
        let row = ExportRow::decode(&record);
        assert_eq!(row.normalize(shanghai()).unwrap_err(), RowError::Encoding);
        // still fingerprinted so the row can be ledgered
        assert_eq!(row.fingerprint().len(), 64);
    }

    #[test]
    fn test_unparseable_time_leaves_timestamp_unset() {
        let row = ExportRow::decode(&export_record(&[
            "s", "c", "", "", "", "", "yesterday-ish",
        ]));
        assert!(row.normalize(shanghai()).unwrap().recorded_at.is_none());
    }

    #[test]
    fn test_parse_local_time_keeps_explicit_offset() {
        let utc = parse_local_time("2021-03-01T10:00:00Z", shanghai()).unwrap();
        assert_eq!(utc.to_rfc3339(), "2021-03-01T10:00:00+00:00");
        let local = parse_local_time("2021/03/01 10:00", shanghai()).unwrap();
        assert_eq!(local.to_rfc3339(), "2021-03-01T02:00:00+00:00");
    }

    #[test]
    fn test_parse_image_list_variants() {
        assert!(parse_image_list("").is_empty());
        assert!(parse_image_list("[]").is_empty());
        assert_eq!(parse_image_list("https://a/1.jpg"), vec!["https://a/1.jpg"]);
        assert_eq!(
            parse_image_list("[\"https://a/1.jpg\", ,'https://a/2.jpg']"),
            vec!["https://a/1.jpg", "https://a/2.jpg"]
        );
    }
}
