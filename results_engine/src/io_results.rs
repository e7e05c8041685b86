// Raw results feed: one row per (contest, candidate).

use csv::StringRecord;

use crate::config::{DistrictKind, ResultSource, SourceKind};
use crate::errors::*;
use crate::fetch::{FetchRequest, RecordSource};
use crate::ids::parse_float;
use crate::io_common::*;

pub const RESULT_FIELDS: usize = 16;

#[derive(PartialEq, Debug, Clone)]
pub struct ResultRecord {
    /// Line of the row in its payload.
    pub line: u64,
    /// The district kind declared by the feed.
    pub scope: DistrictKind,
    pub state: Option<String>,
    pub county: Option<String>,
    pub precinct: Option<String>,
    pub office_id: String,
    pub office_name: String,
    /// Local or school district code, depending on the scope.
    pub district: Option<String>,
    pub candidate_code: String,
    pub candidate_name: String,
    pub suffix: Option<String>,
    pub incumbent: bool,
    pub party: Option<String>,
    pub precincts_reporting: Option<u64>,
    pub total_precincts: Option<u64>,
    pub votes: u64,
    /// Percentage as published by the feed. Only informative.
    pub percent: Option<f64>,
    pub total_votes: Option<u64>,
}

impl ResultRecord {
    /// The name as printed on the ballot, suffix included.
    pub fn full_name(&self) -> String {
        match &self.suffix {
            Some(suffix) => format!("{} {}", self.candidate_name, suffix),
            None => self.candidate_name.clone(),
        }
    }
}

// Feeds mark incumbents either with a flag or with the letter I.
fn is_incumbent(s: &str) -> bool {
    s.eq_ignore_ascii_case("i") || flag(s).unwrap_or(false)
}

fn parse_result(
    scope: DistrictKind,
    line: u64,
    row: &StringRecord,
) -> Result<ResultRecord, RowError> {
    expect_len(line, row, RESULT_FIELDS)?;
    Ok(ResultRecord {
        line,
        scope,
        state: opt(row, 0),
        county: opt(row, 1),
        precinct: opt(row, 2),
        office_id: required(line, row, 3, "office_id")?,
        office_name: required(line, row, 4, "office_name")?,
        district: opt(row, 5),
        candidate_code: required(line, row, 6, "candidate_code")?,
        candidate_name: required(line, row, 7, "candidate_name")?,
        suffix: opt(row, 8),
        incumbent: opt(row, 9).map(|s| is_incumbent(&s)).unwrap_or(false),
        party: opt(row, 10),
        precincts_reporting: count(line, row, 11, "precincts_reporting")?,
        total_precincts: count(line, row, 12, "total_precincts")?,
        votes: required_count(line, row, 13, "votes")?,
        percent: opt(row, 14).and_then(|s| parse_float(&s)),
        total_votes: count(line, row, 15, "total_votes")?,
    })
}

pub fn read_results(scope: DistrictKind, payload: &str) -> ParsedBatch<ResultRecord> {
    read_rows(payload, |line, row| parse_result(scope, line, row))
}

impl RecordSource for ResultSource {
    type Record = ResultRecord;

    fn request(&self) -> FetchRequest {
        FetchRequest {
            kind: SourceKind::Results,
            name: format!("results/{}", self.scope),
            location: self.location.clone(),
        }
    }

    fn parse(&self, payload: &str) -> ParsedBatch<ResultRecord> {
        read_results(self.scope, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn county_row() {
        let payload = "MN;27;;0404;County Commissioner District 4;;0401;JANE DOE;;I;NP;120;120;6000;60.00;10000";
        let batch = read_results(DistrictKind::County, payload);
        assert!(batch.dropped.is_empty());
        let r = &batch.records[0];
        assert_eq!(r.line, 1);
        assert_eq!(r.scope, DistrictKind::County);
        assert_eq!(r.state.as_deref(), Some("MN"));
        assert_eq!(r.county.as_deref(), Some("27"));
        assert_eq!(r.precinct, None);
        assert_eq!(r.office_id, "0404");
        assert_eq!(r.candidate_name, "JANE DOE");
        assert!(r.incumbent);
        assert_eq!(r.party.as_deref(), Some("NP"));
        assert_eq!(r.precincts_reporting, Some(120));
        assert_eq!(r.votes, 6000);
        assert_eq!(r.percent, Some(60.0));
        assert_eq!(r.total_votes, Some(10000));
    }

    #[test]
    fn suffix_is_part_of_the_full_name() {
        let payload = "MN;;;0102;U.S. Senator;;0201;JOHN SMITH;JR;;DFL;;;10;;";
        let batch = read_results(DistrictKind::State, payload);
        let r = &batch.records[0];
        assert_eq!(r.full_name(), "JOHN SMITH JR");
        assert!(!r.incumbent);
        assert_eq!(r.total_votes, None);
        assert_eq!(r.precincts_reporting, None);
    }

    #[test]
    fn rows_missing_votes_or_names_are_dropped() {
        let payload = "\
MN;27;;0404;Commissioner;;0401;JANE DOE;;;NP;1;1;;;
MN;27;;0404;Commissioner;;0402;;;;NP;1;1;5;;
MN;27;;0404;Commissioner;;0403;BOB;;;NP;1;1;x;;
MN;27;;0404;Commissioner
MN;27;;0404;Commissioner;;0404;AL;;;NP;1;1;7;;
";
        let batch = read_results(DistrictKind::County, payload);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].candidate_code, "0404");
        assert_eq!(batch.records[0].line, 5);
        let lines: Vec<u64> = batch.dropped.iter().map(|e| e.line()).collect();
        assert_eq!(lines, vec![1, 2, 3, 4]);
    }
}
