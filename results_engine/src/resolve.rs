//! Reconciliation of the parsed feeds into one election graph.
//!
//! Districts are keyed twice. The canonical ID uses every natural key of the
//! kind, while the match key only keeps the part result rows reliably carry.
//! Contests inherit both keys from their district and add the office.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, info, warn};

use crate::config::*;
use crate::errors::Issue;
use crate::ids::{child_id, make_id, normalize_text, split_name, IdPart};
use crate::io_districts::DistrictRecord;
use crate::io_results::ResultRecord;
use crate::io_supplement::SupplementRecord;

/// Candidate code used by the feeds for write-in totals.
pub const WRITE_IN_CODE: &str = "9901";

const ORDINALS: [(&str, &str); 10] = [
    ("first", "1st"),
    ("second", "2nd"),
    ("third", "3rd"),
    ("fourth", "4th"),
    ("fifth", "5th"),
    ("sixth", "6th"),
    ("seventh", "7th"),
    ("eighth", "8th"),
    ("ninth", "9th"),
    ("tenth", "10th"),
];

/// The natural keys a record carries, whatever its kind.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub struct Geography<'a> {
    pub state: Option<&'a str>,
    pub county: Option<&'a str>,
    pub precinct: Option<&'a str>,
    /// Local or school district code.
    pub district: Option<&'a str>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct DistrictKey {
    pub id: String,
    pub match_key: String,
}

/// Computes the canonical ID and match key of a district of the given kind.
/// Fails with the name of the missing field when the geography lacks a key
/// the kind requires.
pub fn district_key(
    election_id: &str,
    kind: DistrictKind,
    geo: &Geography,
) -> Result<DistrictKey, &'static str> {
    let (id_parts, match_parts): (Vec<IdPart>, Vec<IdPart>) = match kind {
        DistrictKind::State => {
            let state = geo.state.ok_or("state_code")?;
            (vec![state.into()], vec![state.into()])
        }
        DistrictKind::County => {
            let county = geo.county.ok_or("county_code")?;
            (vec![county.into()], vec![county.into()])
        }
        DistrictKind::Local => {
            let local = geo.district.ok_or("local_code")?;
            (vec![geo.county.into(), local.into()], vec![local.into()])
        }
        DistrictKind::School => {
            let school = geo.district.ok_or("school_code")?;
            (vec![geo.county.into(), school.into()], vec![school.into()])
        }
        DistrictKind::Precinct => {
            let county = geo.county.ok_or("county_code")?;
            let precinct = geo.precinct.ok_or("precinct_code")?;
            (
                vec![county.into(), precinct.into()],
                vec![county.into(), precinct.into()],
            )
        }
    };
    let build = |parts: Vec<IdPart>| {
        let mut all: Vec<IdPart> = vec![election_id.into(), kind.as_str().into()];
        all.extend(parts);
        make_id(&all)
    };
    Ok(DistrictKey {
        id: build(id_parts),
        match_key: build(match_parts),
    })
}

/// What the office name of a result row says about its contest.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct TitleInfo {
    /// Normalized title, without any ranked-choice marker.
    pub base: String,
    pub seats: Option<u32>,
    /// Ranked-choice round, when the row is one.
    pub round: Option<u32>,
    pub question: bool,
    pub special: bool,
    pub primary: bool,
}

pub fn parse_title(raw: &str) -> TitleInfo {
    // ASCII lowering keeps byte offsets aligned with the raw title.
    let lower = raw.to_ascii_lowercase();

    let seats = lower.find("(elect ").and_then(|pos| {
        let digits: String = lower[pos + "(elect ".len()..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse::<u32>().ok()
    });

    let mut base = raw.to_string();
    let mut round = None;
    for (idx, (word, short)) in ORDINALS.iter().enumerate() {
        let found = [word, short].iter().find_map(|ordinal| {
            let marker = format!("{} choice", ordinal);
            lower.find(&marker).map(|p| (p, p + marker.len()))
        });
        if let Some((mut start, mut end)) = found {
            let before = lower[..start].trim_end();
            let after = lower[end..].trim_start();
            if before.ends_with('(') && after.starts_with(')') {
                start = before.len() - 1;
                end = lower.len() - after.len() + 1;
            }
            base = format!("{} {}", &raw[..start], &raw[end..]);
            round = Some(idx as u32 + 1);
            break;
        }
    }
    let base = normalize_text(base.trim_matches(|c: char| c.is_whitespace() || c == '-' || c == ','));

    TitleInfo {
        base,
        seats,
        round,
        question: ["question", "amendment", "referendum"]
            .iter()
            .any(|w| lower.contains(w)),
        special: lower.contains("special election"),
        primary: lower.contains("primary"),
    }
}

pub fn is_write_in(code: &str, name: &str) -> bool {
    let upper = name.trim().to_uppercase();
    code == WRITE_IN_CODE || upper.starts_with("WRITE-IN") || upper.starts_with("WRITE IN")
}

fn is_nonpartisan_party(party: &Option<String>) -> bool {
    match party.as_deref().map(|p| p.trim()) {
        None | Some("") => true,
        Some(p) => p.eq_ignore_ascii_case("NP"),
    }
}

/// Builds the election graph out of the parsed sources.
///
/// Rows that cannot be placed are not dropped silently: they end up as
/// issues on the returned election.
pub fn resolve(
    settings: &EngineSettings,
    districts: &[DistrictRecord],
    supplement: &[SupplementRecord],
    results: &[ResultRecord],
) -> Election {
    let mut election = Election::new(&settings.election, &settings.cache);
    build_districts(&mut election, districts, results);
    build_contests(&mut election, results);
    join_districts(&mut election);
    overlay_supplement(&mut election, supplement);
    info!(
        "resolve: {} districts, {} contests ({} unmatched), {} issues",
        election.districts.len(),
        election.contests.len(),
        election.unmatched_contests().count(),
        election.issues.len()
    );
    election
}

fn record_geography(rec: &DistrictRecord) -> Geography<'_> {
    match rec {
        DistrictRecord::State { code, .. } => Geography {
            state: Some(code.as_str()),
            ..Geography::default()
        },
        DistrictRecord::County { county, .. } => Geography {
            county: Some(county.as_str()),
            ..Geography::default()
        },
        DistrictRecord::Local { county, local, .. } => Geography {
            county: Some(county.as_str()),
            district: Some(local.as_str()),
            ..Geography::default()
        },
        DistrictRecord::School { school, county, .. } => Geography {
            county: county.as_deref(),
            district: Some(school.as_str()),
            ..Geography::default()
        },
        DistrictRecord::Precinct {
            county, precinct, ..
        } => Geography {
            county: Some(county.as_str()),
            precinct: Some(precinct.as_str()),
            ..Geography::default()
        },
    }
}

fn row_geography(r: &ResultRecord) -> Geography<'_> {
    Geography {
        state: r.state.as_deref(),
        county: r.county.as_deref(),
        precinct: r.precinct.as_deref(),
        district: r.district.as_deref(),
    }
}

/// Match key to canonical ID. The lowest canonical ID wins when several
/// districts share a match key.
fn match_index(districts: &BTreeMap<String, District>) -> BTreeMap<String, String> {
    let mut index: BTreeMap<String, String> = BTreeMap::new();
    for d in districts.values() {
        index
            .entry(d.match_key.clone())
            .or_insert_with(|| d.id.clone());
    }
    index
}

fn linked(
    index: &BTreeMap<String, String>,
    election_id: &str,
    kind: DistrictKind,
    geo: Geography,
) -> Option<String> {
    let key = district_key(election_id, kind, &geo).ok()?;
    index.get(&key.match_key).cloned()
}

fn build_districts(election: &mut Election, records: &[DistrictRecord], results: &[ResultRecord]) {
    let mut placed: Vec<(String, &DistrictRecord)> = Vec::new();
    for rec in records {
        let kind = rec.kind();
        let key = match district_key(&election.id, kind, &record_geography(rec)) {
            Ok(key) => key,
            Err(field) => {
                warn!("resolve: {} district {:?} lacks {}", kind, rec.name(), field);
                election.issues.push(Issue::UnresolvedEntity {
                    id: rec.name().to_string(),
                    reason: format!("{} district without {}", kind, field),
                });
                continue;
            }
        };
        let precincts = match rec {
            DistrictRecord::County { precincts, .. } => *precincts,
            _ => None,
        };
        debug!("resolve: district {} ({})", key.id, rec.name());
        placed.push((key.id.clone(), rec));
        election.districts.insert(
            key.id.clone(),
            District {
                id: key.id,
                kind,
                match_key: key.match_key,
                code: rec.code().to_string(),
                name: normalize_text(rec.name()),
                county: None,
                school: None,
                local: None,
                precincts,
            },
        );
    }

    // Statewide contests need a district even though no feed lists states.
    for r in results.iter().filter(|r| r.scope == DistrictKind::State) {
        let geo = row_geography(r);
        if let (Some(code), Ok(key)) = (r.state.as_ref(), district_key(&election.id, DistrictKind::State, &geo)) {
            election
                .districts
                .entry(key.id.clone())
                .or_insert_with(|| District {
                    id: key.id,
                    kind: DistrictKind::State,
                    match_key: key.match_key,
                    code: code.clone(),
                    name: code.to_uppercase(),
                    county: None,
                    school: None,
                    local: None,
                    precincts: None,
                });
        }
    }

    let index = match_index(&election.districts);
    for (id, rec) in placed {
        let (county, school, local) = match rec {
            DistrictRecord::State { .. } | DistrictRecord::County { .. } => (None, None, None),
            DistrictRecord::Local { county, .. } => (Some(county.as_str()), None, None),
            DistrictRecord::School { county, .. } => (county.as_deref(), None, None),
            DistrictRecord::Precinct {
                county,
                local,
                school,
                ..
            } => (Some(county.as_str()), school.as_deref(), local.as_deref()),
        };
        let county_id = county.and_then(|c| {
            let geo = Geography {
                county: Some(c),
                ..Geography::default()
            };
            linked(&index, &election.id, DistrictKind::County, geo)
        });
        let school_id = school.and_then(|s| {
            let geo = Geography {
                county,
                district: Some(s),
                ..Geography::default()
            };
            linked(&index, &election.id, DistrictKind::School, geo)
        });
        let local_id = local.and_then(|l| {
            let geo = Geography {
                county,
                district: Some(l),
                ..Geography::default()
            };
            linked(&index, &election.id, DistrictKind::Local, geo)
        });
        if let Some(d) = election.districts.get_mut(&id) {
            d.county = county_id;
            d.school = school_id;
            d.local = local_id;
        }
    }
}

fn new_contest(
    id: String,
    match_key: String,
    district: DistrictKey,
    r: &ResultRecord,
    title: &TitleInfo,
    primary: bool,
) -> Contest {
    Contest {
        id,
        match_key,
        scope: r.scope,
        office: r.office_id.clone(),
        district_ref: DistrictRef {
            id: district.id,
            match_key: district.match_key,
        },
        district: None,
        unmatched: false,
        title: title.base.clone(),
        question_title: None,
        question_text: None,
        seats: title.seats,
        primary,
        special: title.special,
        ranked: title.round.is_some(),
        nonpartisan: false,
        question: title.question,
        precincts_reporting: None,
        total_precincts: None,
        total_votes: None,
        state: ContestState::Pending,
        uncontested: false,
        close: false,
        called: false,
        notes: None,
        candidates: Vec::new(),
    }
}

fn new_candidate(id: String, r: &ResultRecord, full_name: String) -> Candidate {
    Candidate {
        id,
        code: r.candidate_code.clone(),
        name: split_name(&full_name),
        full_name,
        display_name: None,
        party: None,
        incumbent: false,
        write_in: is_write_in(&r.candidate_code, &r.candidate_name),
        votes: None,
        percent: Share::NoData,
        winner: false,
        ranks: Vec::new(),
        bio: None,
        url: None,
        supplement_winner: false,
    }
}

/// Folds one result row into its contest. The latest row wins for every
/// count it carries.
fn merge_row(contest: &mut Contest, r: &ResultRecord, title: &TitleInfo) {
    if r.precincts_reporting.is_some() {
        contest.precincts_reporting = r.precincts_reporting;
    }
    if r.total_precincts.is_some() {
        contest.total_precincts = r.total_precincts;
    }
    // Later rounds of a ranked contest carry per-round totals.
    if r.total_votes.is_some() && matches!(title.round, None | Some(1)) {
        contest.total_votes = r.total_votes;
    }
    if title.seats.is_some() {
        contest.seats = title.seats;
    }
    contest.question |= title.question;
    contest.special |= title.special;
    contest.primary |= title.primary;
    contest.ranked |= title.round.is_some();

    let full_name = normalize_text(&r.full_name());
    let candidate_id = child_id(&contest.id, r.candidate_code.as_str().into());
    // Ranked rounds may be filed under a different candidate code.
    let existing = contest
        .candidates
        .iter()
        .position(|c| c.id == candidate_id)
        .or_else(|| {
            if contest.ranked {
                contest
                    .candidates
                    .iter()
                    .position(|c| c.full_name == full_name)
            } else {
                None
            }
        });
    let idx = match existing {
        Some(idx) => idx,
        None => {
            contest
                .candidates
                .push(new_candidate(candidate_id, r, full_name));
            contest.candidates.len() - 1
        }
    };
    let candidate = &mut contest.candidates[idx];
    candidate.incumbent = r.incumbent;
    if r.party.is_some() {
        candidate.party = r.party.clone();
    }
    match title.round {
        Some(round) => {
            match candidate.ranks.iter_mut().find(|t| t.round == round) {
                Some(tally) => tally.votes = Some(r.votes),
                None => {
                    candidate.ranks.push(RoundTally {
                        round,
                        votes: Some(r.votes),
                        percent: Share::NoData,
                    });
                    candidate.ranks.sort_by_key(|t| t.round);
                }
            }
        }
        None => candidate.votes = Some(r.votes),
    }
}

fn build_contests(election: &mut Election, results: &[ResultRecord]) {
    for r in results {
        let district = match district_key(&election.id, r.scope, &row_geography(r)) {
            Ok(key) => key,
            Err(field) => {
                warn!(
                    "resolve: line {}: {}-scoped row without {}",
                    r.line, r.scope, field
                );
                election.issues.push(Issue::Configuration {
                    source: format!("results/{}", r.scope),
                    line: r.line,
                    reason: format!("{}-scoped row without {}", r.scope, field),
                });
                continue;
            }
        };
        let title = parse_title(&r.office_name);
        // All the rounds of a ranked contest share the base title.
        let office: IdPart = match title.round {
            Some(_) => title.base.as_str().into(),
            None => r.office_id.as_str().into(),
        };
        let id = child_id(&district.id, office.clone());
        let match_key = child_id(&district.match_key, office);
        let primary = election.primary || title.primary;
        let contest = election.contests.entry(id.clone()).or_insert_with(|| {
            debug!("resolve: contest {} ({})", id, title.base);
            new_contest(id.clone(), match_key, district, r, &title, primary)
        });
        merge_row(contest, r, &title);
    }

    for contest in election.contests.values_mut() {
        contest.nonpartisan = contest.question
            || contest
                .candidates
                .iter()
                .filter(|c| !c.write_in)
                .all(|c| is_nonpartisan_party(&c.party));
    }
}

fn join_districts(election: &mut Election) {
    let index = match_index(&election.districts);
    for contest in election.contests.values_mut() {
        if election.districts.contains_key(&contest.district_ref.id) {
            contest.district = Some(contest.district_ref.id.clone());
        } else if let Some(id) = index.get(&contest.district_ref.match_key) {
            debug!("resolve: contest {} joined {} by match key", contest.id, id);
            contest.district = Some(id.clone());
        } else {
            warn!("resolve: no district for contest {}", contest.id);
            contest.unmatched = true;
            election.issues.push(Issue::UnresolvedEntity {
                id: contest.id.clone(),
                reason: format!(
                    "no {} district matches {}",
                    contest.scope, contest.district_ref.match_key
                ),
            });
        }
    }
}

fn fill(slot: &mut Option<String>, value: &Option<String>) {
    if slot.is_none() {
        if let Some(v) = value {
            *slot = Some(v.clone());
        }
    }
}

fn overlay_contest(contest: &mut Contest, rec: &SupplementRecord) {
    if contest.title.trim().is_empty() {
        if let Some(title) = &rec.title {
            contest.title = title.clone();
        }
    }
    fill(&mut contest.question_title, &rec.question_title);
    fill(&mut contest.question_text, &rec.question_text);
    fill(&mut contest.notes, &rec.notes);
    if contest.seats.is_none() {
        contest.seats = rec.seats;
    }
    if let Some(called) = rec.called {
        contest.called = called;
    }
}

fn overlay_candidate(candidate: &mut Candidate, rec: &SupplementRecord) {
    fill(&mut candidate.display_name, &rec.display_name);
    fill(&mut candidate.party, &rec.party);
    fill(&mut candidate.bio, &rec.bio);
    fill(&mut candidate.url, &rec.url);
    if let Some(winner) = rec.winner {
        candidate.supplement_winner = winner;
    }
}

fn overlay_supplement(election: &mut Election, records: &[SupplementRecord]) {
    let mut by_match: HashMap<String, Vec<String>> = HashMap::new();
    let mut by_candidate: HashMap<String, String> = HashMap::new();
    for contest in election.contests.values() {
        by_match
            .entry(contest.match_key.clone())
            .or_default()
            .push(contest.id.clone());
        for c in contest.candidates.iter() {
            by_candidate.insert(c.id.clone(), contest.id.clone());
        }
    }

    for rec in records {
        let contest_ids: Vec<String> = if election.contests.contains_key(&rec.id) {
            vec![rec.id.clone()]
        } else {
            by_match.get(&rec.id).cloned().unwrap_or_default()
        };
        if !contest_ids.is_empty() {
            for id in contest_ids {
                if let Some(contest) = election.contests.get_mut(&id) {
                    overlay_contest(contest, rec);
                }
            }
            continue;
        }
        let candidate = match by_candidate.get(&rec.id) {
            Some(cid) => election
                .contests
                .get_mut(cid)
                .and_then(|contest| contest.candidates.iter_mut().find(|c| c.id == rec.id)),
            None => None,
        };
        match candidate {
            Some(candidate) => overlay_candidate(candidate, rec),
            None => {
                warn!("resolve: supplement row {} matches nothing", rec.id);
                election.issues.push(Issue::UnresolvedEntity {
                    id: rec.id.clone(),
                    reason: "supplement row matches no contest or candidate".to_string(),
                });
            }
        }
    }
}

/// Blank supplement rows for every contest and candidate the store does not
/// know about yet.
pub fn setup_records(election: &Election, existing: &[SupplementRecord]) -> Vec<SupplementRecord> {
    let known: BTreeSet<&str> = existing.iter().map(|r| r.id.as_str()).collect();
    let mut res = Vec::new();
    for contest in election.contests.values() {
        if !known.contains(contest.id.as_str()) && !known.contains(contest.match_key.as_str()) {
            res.push(SupplementRecord::blank(&contest.id));
        }
        for c in contest.candidates.iter() {
            if !known.contains(c.id.as_str()) {
                res.push(SupplementRecord::blank(&c.id));
            }
        }
    }
    debug!("setup_records: {} new rows", res.len());
    res
}
