// District metadata feeds. One layout per district kind.

use csv::StringRecord;

use crate::config::{DistrictKind, DistrictSource, SourceKind};
use crate::errors::*;
use crate::fetch::{FetchRequest, RecordSource};
use crate::io_common::*;

/// A row of a district metadata feed, with the natural keys it carries.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum DistrictRecord {
    State {
        code: String,
        name: String,
    },
    County {
        county: String,
        name: String,
        precincts: Option<u64>,
    },
    Local {
        county: String,
        local: String,
        name: String,
    },
    School {
        school: String,
        name: String,
        county: Option<String>,
    },
    Precinct {
        county: String,
        precinct: String,
        name: String,
        local: Option<String>,
        school: Option<String>,
    },
}

impl DistrictRecord {
    pub fn kind(&self) -> DistrictKind {
        match self {
            DistrictRecord::State { .. } => DistrictKind::State,
            DistrictRecord::County { .. } => DistrictKind::County,
            DistrictRecord::Local { .. } => DistrictKind::Local,
            DistrictRecord::School { .. } => DistrictKind::School,
            DistrictRecord::Precinct { .. } => DistrictKind::Precinct,
        }
    }

    /// The natural code of the district within its kind.
    pub fn code(&self) -> &str {
        match self {
            DistrictRecord::State { code, .. } => code,
            DistrictRecord::County { county, .. } => county,
            DistrictRecord::Local { local, .. } => local,
            DistrictRecord::School { school, .. } => school,
            DistrictRecord::Precinct { precinct, .. } => precinct,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DistrictRecord::State { name, .. }
            | DistrictRecord::County { name, .. }
            | DistrictRecord::Local { name, .. }
            | DistrictRecord::School { name, .. }
            | DistrictRecord::Precinct { name, .. } => name,
        }
    }
}

fn parse_state(line: u64, row: &StringRecord) -> Result<DistrictRecord, RowError> {
    expect_len(line, row, 2)?;
    Ok(DistrictRecord::State {
        code: required(line, row, 0, "state_code")?,
        name: required(line, row, 1, "name")?,
    })
}

fn parse_county(line: u64, row: &StringRecord) -> Result<DistrictRecord, RowError> {
    expect_len(line, row, 2)?;
    Ok(DistrictRecord::County {
        county: required(line, row, 0, "county_code")?,
        name: required(line, row, 1, "name")?,
        precincts: count(line, row, 2, "precincts")?,
    })
}

fn parse_local(line: u64, row: &StringRecord) -> Result<DistrictRecord, RowError> {
    expect_len(line, row, 4)?;
    Ok(DistrictRecord::Local {
        county: required(line, row, 0, "county_code")?,
        local: required(line, row, 2, "local_code")?,
        name: required(line, row, 3, "name")?,
    })
}

fn parse_school(line: u64, row: &StringRecord) -> Result<DistrictRecord, RowError> {
    expect_len(line, row, 2)?;
    Ok(DistrictRecord::School {
        school: required(line, row, 0, "school_code")?,
        name: required(line, row, 1, "name")?,
        county: opt(row, 2),
    })
}

fn parse_precinct(line: u64, row: &StringRecord) -> Result<DistrictRecord, RowError> {
    expect_len(line, row, 3)?;
    Ok(DistrictRecord::Precinct {
        county: required(line, row, 0, "county_code")?,
        precinct: required(line, row, 1, "precinct_code")?,
        name: required(line, row, 2, "name")?,
        local: opt(row, 8),
        school: opt(row, 9),
    })
}

pub fn read_districts(kind: DistrictKind, payload: &str) -> ParsedBatch<DistrictRecord> {
    match kind {
        DistrictKind::State => read_rows(payload, parse_state),
        DistrictKind::County => read_rows(payload, parse_county),
        DistrictKind::Local => read_rows(payload, parse_local),
        DistrictKind::School => read_rows(payload, parse_school),
        DistrictKind::Precinct => read_rows(payload, parse_precinct),
    }
}

impl RecordSource for DistrictSource {
    type Record = DistrictRecord;

    fn request(&self) -> FetchRequest {
        FetchRequest {
            kind: SourceKind::Districts,
            name: format!("districts/{}", self.kind),
            location: self.location.clone(),
        }
    }

    fn parse(&self, payload: &str) -> ParsedBatch<DistrictRecord> {
        read_districts(self.kind, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn county_rows() {
        let batch = read_districts(DistrictKind::County, "27;Hennepin;850\n62;Ramsey;\n");
        assert_eq!(
            batch.records,
            vec![
                DistrictRecord::County {
                    county: "27".to_string(),
                    name: "Hennepin".to_string(),
                    precincts: Some(850),
                },
                DistrictRecord::County {
                    county: "62".to_string(),
                    name: "Ramsey".to_string(),
                    precincts: None,
                },
            ]
        );
    }

    #[test]
    fn precinct_rows_keep_their_links() {
        let row = "27;0005;Minneapolis W-1 P-5;5;59B;4;4;;43000;0001";
        let batch = read_districts(DistrictKind::Precinct, row);
        assert_eq!(
            batch.records,
            vec![DistrictRecord::Precinct {
                county: "27".to_string(),
                precinct: "0005".to_string(),
                name: "Minneapolis W-1 P-5".to_string(),
                local: Some("43000".to_string()),
                school: Some("0001".to_string()),
            }]
        );
    }

    #[test]
    fn rows_without_required_fields_are_dropped() {
        let payload = "27;;43000;Minneapolis\n27;Hennepin;43000;Minneapolis\n27;Hennepin\n";
        let batch = read_districts(DistrictKind::Local, payload);
        // The missing county name is not required.
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0].kind(), DistrictKind::Local);
        assert_eq!(batch.records[0].name(), "Minneapolis");
        assert_eq!(batch.dropped.len(), 1);
        assert_eq!(batch.dropped[0].line(), 3);
    }

    #[test]
    fn school_rows() {
        let batch = read_districts(DistrictKind::School, "0281;Robbinsdale;27;Hennepin");
        assert_eq!(
            batch.records,
            vec![DistrictRecord::School {
                school: "0281".to_string(),
                name: "Robbinsdale".to_string(),
                county: Some("27".to_string()),
            }]
        );
    }
}
