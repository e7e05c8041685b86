// Independent counts used for verification.

use csv::StringRecord;

use crate::config::{CountSource, SourceKind};
use crate::errors::*;
use crate::fetch::{FetchRequest, RecordSource};
use crate::io_common::*;

/// Vote count of one candidate according to an independent tabulation.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct CountRecord {
    pub contest_id: String,
    pub candidate_id: String,
    pub votes: u64,
    /// Absent when the independent source does not call the contest.
    pub winner: Option<bool>,
}

fn parse_count(line: u64, row: &StringRecord) -> Result<CountRecord, RowError> {
    expect_len(line, row, 3)?;
    Ok(CountRecord {
        contest_id: required(line, row, 0, "contest_id")?,
        candidate_id: required(line, row, 1, "candidate_id")?,
        votes: required_count(line, row, 2, "votes")?,
        winner: opt(row, 3).and_then(|s| flag(&s)),
    })
}

pub fn read_counts(payload: &str) -> ParsedBatch<CountRecord> {
    read_rows(payload, parse_count)
}

impl RecordSource for CountSource {
    type Record = CountRecord;

    fn request(&self) -> FetchRequest {
        FetchRequest {
            kind: SourceKind::Counts,
            name: "counts".to_string(),
            location: self.location.clone(),
        }
    }

    fn parse(&self, payload: &str) -> ParsedBatch<CountRecord> {
        read_counts(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts() {
        let payload = "c1;c1-a;6000;1\nc1;c1-b;4000;0\nc2;c2-a;17\nc2;;3;\n";
        let batch = read_counts(payload);
        assert_eq!(batch.records.len(), 3);
        assert_eq!(batch.records[0].winner, Some(true));
        assert_eq!(batch.records[1].winner, Some(false));
        assert_eq!(
            batch.records[2],
            CountRecord {
                contest_id: "c2".to_string(),
                candidate_id: "c2-a".to_string(),
                votes: 17,
                winner: None,
            }
        );
        assert_eq!(batch.dropped.len(), 1);
        assert_eq!(batch.dropped[0].line(), 4);
    }
}
