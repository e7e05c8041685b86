// Primitives for reading the semicolon-delimited feeds.

use csv::{ReaderBuilder, StringRecord, Trim};
use log::debug;
use snafu::prelude::*;

use crate::errors::*;
use crate::ids::parse_int;

/// Records parsed out of one payload, with the rows that had to be dropped.
#[derive(Debug)]
pub struct ParsedBatch<T> {
    pub records: Vec<T>,
    pub dropped: Vec<RowError>,
}

impl<T> ParsedBatch<T> {
    pub fn empty() -> ParsedBatch<T> {
        ParsedBatch {
            records: Vec::new(),
            dropped: Vec::new(),
        }
    }
}

/// Reads a headerless, semicolon-delimited payload and parses each non-empty
/// row. A row that fails is recorded and skipped.
pub fn read_rows<T, F>(payload: &str, parse_row: F) -> ParsedBatch<T>
where
    F: Fn(u64, &StringRecord) -> Result<T, RowError>,
{
    let rdr = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b';')
        .flexible(true)
        .quoting(false)
        .trim(Trim::All)
        .from_reader(payload.as_bytes());

    let mut res = ParsedBatch::empty();
    for (idx, row_r) in rdr.into_records().enumerate() {
        let fallback_line = idx as u64 + 1;
        let row = match row_r {
            Ok(row) => row,
            Err(e) => {
                let line = e
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(fallback_line);
                res.dropped.push(RowError::Csv { line, source: e });
                continue;
            }
        };
        let line = row.position().map(|p| p.line()).unwrap_or(fallback_line);
        if row.iter().all(|f| f.is_empty()) {
            continue;
        }
        match parse_row(line, &row) {
            Ok(r) => res.records.push(r),
            Err(e) => {
                debug!("read_rows: dropping {}", e);
                res.dropped.push(e);
            }
        }
    }
    res
}

pub fn expect_len(line: u64, row: &StringRecord, expected: usize) -> Result<(), RowError> {
    ensure!(
        row.len() >= expected,
        TooFewFieldsSnafu {
            line,
            expected,
            found: row.len()
        }
    );
    Ok(())
}

/// The field at `idx`, or None when it is empty.
pub fn opt(row: &StringRecord, idx: usize) -> Option<String> {
    row.get(idx)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

pub fn required(
    line: u64,
    row: &StringRecord,
    idx: usize,
    field: &'static str,
) -> Result<String, RowError> {
    opt(row, idx).context(MissingFieldSnafu { line, field })
}

/// A count that may be absent. Present but unparseable values are errors.
pub fn count(
    line: u64,
    row: &StringRecord,
    idx: usize,
    field: &'static str,
) -> Result<Option<u64>, RowError> {
    match opt(row, idx) {
        None => Ok(None),
        Some(s) => parse_int(&s)
            .map(Some)
            .context(BadNumberSnafu { line, field, value: s }),
    }
}

pub fn required_count(
    line: u64,
    row: &StringRecord,
    idx: usize,
    field: &'static str,
) -> Result<u64, RowError> {
    count(line, row, idx, field)?.context(MissingFieldSnafu { line, field })
}

/// Lenient yes/no parsing used by the flag columns of the feeds.
pub fn flag(s: &str) -> Option<bool> {
    match s.trim().to_uppercase().as_str() {
        "1" | "Y" | "YES" | "TRUE" | "T" | "X" => Some(true),
        "0" | "N" | "NO" | "FALSE" | "F" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_pair(line: u64, row: &StringRecord) -> Result<(String, u64), RowError> {
        expect_len(line, row, 2)?;
        Ok((
            required(line, row, 0, "name")?,
            required_count(line, row, 1, "votes")?,
        ))
    }

    #[test]
    fn rows_are_trimmed_and_empty_lines_skipped() {
        let payload = " a ; 1 \n\n;\nb;2\n";
        let batch = read_rows(payload, parse_pair);
        assert_eq!(
            batch.records,
            vec![("a".to_string(), 1), ("b".to_string(), 2)]
        );
        assert!(batch.dropped.is_empty());
    }

    #[test]
    fn malformed_rows_are_dropped_with_their_line() {
        let payload = "a;1\nb\nc;x\n;4\nd;5";
        let batch = read_rows(payload, parse_pair);
        assert_eq!(
            batch.records,
            vec![("a".to_string(), 1), ("d".to_string(), 5)]
        );
        let lines: Vec<u64> = batch.dropped.iter().map(|e| e.line()).collect();
        assert_eq!(lines, vec![2, 3, 4]);
        assert!(matches!(batch.dropped[0], RowError::TooFewFields { .. }));
        assert!(matches!(batch.dropped[1], RowError::BadNumber { .. }));
        assert!(matches!(
            batch.dropped[2],
            RowError::MissingField { field: "name", .. }
        ));
    }

    #[test]
    fn quotes_are_literal() {
        let batch = read_rows("\"Smith\";3", parse_pair);
        assert_eq!(batch.records, vec![("\"Smith\"".to_string(), 3)]);
    }

    #[test]
    fn flags() {
        assert_eq!(flag("y"), Some(true));
        assert_eq!(flag(" TRUE "), Some(true));
        assert_eq!(flag("0"), Some(false));
        assert_eq!(flag(""), None);
        assert_eq!(flag("maybe"), None);
    }
}
