// Supplemental store: hand-maintained corrections and display fields.
//
// Unlike the feeds, this file carries a header row and is comma-delimited.
// Rows are keyed by a contest canonical ID, a contest match key or a candidate
// canonical ID.

use csv::{ReaderBuilder, Trim, Writer};
use log::debug;
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::{SourceKind, SupplementSource};
use crate::errors::*;
use crate::fetch::{FetchRequest, RecordSource};
use crate::ids::parse_int;
use crate::io_common::{flag, ParsedBatch};

#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SupplementRecord {
    pub id: String,
    pub title: Option<String>,
    pub question_title: Option<String>,
    pub question_text: Option<String>,
    #[serde(deserialize_with = "lenient_count")]
    pub seats: Option<u32>,
    #[serde(deserialize_with = "lenient_flag")]
    pub called: Option<bool>,
    pub display_name: Option<String>,
    pub party: Option<String>,
    pub bio: Option<String>,
    pub url: Option<String>,
    #[serde(deserialize_with = "lenient_flag")]
    pub winner: Option<bool>,
    pub notes: Option<String>,
}

impl SupplementRecord {
    /// A row with only its key filled.
    pub fn blank(id: &str) -> SupplementRecord {
        SupplementRecord {
            id: id.to_string(),
            ..SupplementRecord::default()
        }
    }
}

fn non_empty<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let s: Option<String> = Option::deserialize(d)?;
    Ok(s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
}

fn lenient_flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    Ok(non_empty(d)?.and_then(|s| flag(&s)))
}

fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    Ok(non_empty(d)?
        .and_then(|s| parse_int(&s))
        .and_then(|n| u32::try_from(n).ok()))
}

pub fn read_supplement(payload: &str) -> ParsedBatch<SupplementRecord> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(payload.as_bytes());

    let mut res = ParsedBatch::empty();
    let headers = match rdr.headers() {
        Ok(h) => h.clone(),
        Err(e) => {
            let line = e.position().map(|p| p.line()).unwrap_or(1);
            res.dropped.push(RowError::Csv { line, source: e });
            return res;
        }
    };
    for row_r in rdr.records() {
        let row = match row_r {
            Ok(row) => row,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                res.dropped.push(RowError::Csv { line, source: e });
                continue;
            }
        };
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        match row.deserialize::<SupplementRecord>(Some(&headers)) {
            Ok(rec) if rec.id.trim().is_empty() => {
                debug!("read_supplement: row without id: {:?}", rec);
                res.dropped.push(RowError::MissingField { line, field: "id" });
            }
            Ok(rec) => res.records.push(SupplementRecord {
                id: rec.id.trim().to_string(),
                ..rec
            }),
            Err(e) => res.dropped.push(RowError::Csv { line, source: e }),
        }
    }
    res
}

/// Serializes rows in the store's own format, header included.
pub fn write_supplement<W: std::io::Write>(
    out: W,
    records: &[SupplementRecord],
) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(out);
    for r in records {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}

impl RecordSource for SupplementSource {
    type Record = SupplementRecord;

    fn request(&self) -> FetchRequest {
        FetchRequest {
            kind: SourceKind::Supplement,
            name: "supplement".to_string(),
            location: self.location.clone(),
        }
    }

    fn parse(&self, payload: &str) -> ParsedBatch<SupplementRecord> {
        read_supplement(payload)
    }
}
