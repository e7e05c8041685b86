// ********* Entities ***********

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::Issue;
use crate::ids::NameParts;

/// The kinds of geographic or administrative units results are reported for.
///
/// Two districts of different kinds may share a natural code (a school
/// district number can coincide with a county code), so the kind is always
/// part of a district identifier.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistrictKind {
    State,
    County,
    Local,
    School,
    Precinct,
}

impl DistrictKind {
    pub const ALL: [DistrictKind; 5] = [
        DistrictKind::State,
        DistrictKind::County,
        DistrictKind::Local,
        DistrictKind::School,
        DistrictKind::Precinct,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DistrictKind::State => "state",
            DistrictKind::County => "county",
            DistrictKind::Local => "local",
            DistrictKind::School => "school",
            DistrictKind::Precinct => "precinct",
        }
    }

    pub fn parse(s: &str) -> Option<DistrictKind> {
        let lowered = s.trim().to_lowercase();
        DistrictKind::ALL
            .iter()
            .find(|k| k.as_str() == lowered)
            .copied()
    }
}

impl Display for DistrictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct District {
    pub id: String,
    pub kind: DistrictKind,
    /// Looser key used when result rows only carry part of the geography.
    pub match_key: String,
    pub code: String,
    pub name: String,
    /// Canonical ID of the county this district belongs to, if any.
    pub county: Option<String>,
    /// Canonical ID of the school district a precinct votes in.
    pub school: Option<String>,
    /// Canonical ID of the municipality a precinct belongs to.
    pub local: Option<String>,
    pub precincts: Option<u64>,
}

/// A share of the vote.
///
/// `NoData` is used when nothing can be computed (no votes at all), and
/// `NotReporting` for a ranked-choice round in which no candidate has
/// received any vote yet.
#[derive(PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Share {
    NoData,
    NotReporting,
    Percent(f64),
}

impl Share {
    pub fn value(&self) -> Option<f64> {
        match self {
            Share::Percent(p) => Some(*p),
            _ => None,
        }
    }
}

impl Default for Share {
    fn default() -> Self {
        Share::NoData
    }
}

/// Tally of one candidate for one ranked-choice round.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RoundTally {
    pub round: u32,
    pub votes: Option<u64>,
    pub percent: Share,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub code: String,
    pub full_name: String,
    #[serde(flatten)]
    pub name: NameParts,
    pub display_name: Option<String>,
    pub party: Option<String>,
    pub incumbent: bool,
    pub write_in: bool,
    pub votes: Option<u64>,
    pub percent: Share,
    pub winner: bool,
    /// Per-round tallies, only filled for ranked-choice contests.
    pub ranks: Vec<RoundTally>,
    pub bio: Option<String>,
    pub url: Option<String>,
    /// Winner declared by hand in the supplemental store.
    pub supplement_winner: bool,
}

impl Candidate {
    pub fn rank(&self, round: u32) -> Option<&RoundTally> {
        self.ranks.iter().find(|r| r.round == round)
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContestState {
    Pending,
    Computed,
    Verified,
}

/// The district a contest claims to belong to, as read from a result row.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct DistrictRef {
    pub id: String,
    pub match_key: String,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Contest {
    pub id: String,
    pub match_key: String,
    pub scope: DistrictKind,
    pub office: String,
    pub district_ref: DistrictRef,
    /// Canonical ID of the resolved district.
    pub district: Option<String>,
    pub unmatched: bool,
    pub title: String,
    pub question_title: Option<String>,
    pub question_text: Option<String>,
    pub seats: Option<u32>,
    pub primary: bool,
    pub special: bool,
    pub ranked: bool,
    pub nonpartisan: bool,
    pub question: bool,
    pub precincts_reporting: Option<u64>,
    pub total_precincts: Option<u64>,
    pub total_votes: Option<u64>,
    pub state: ContestState,
    pub uncontested: bool,
    pub close: bool,
    pub called: bool,
    pub notes: Option<String>,
    pub candidates: Vec<Candidate>,
}

impl Contest {
    pub fn seat_count(&self) -> u32 {
        self.seats.filter(|s| *s > 0).unwrap_or(1)
    }

    pub fn candidate(&self, id: &str) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.id == id)
    }

    pub fn winners(&self) -> Vec<&Candidate> {
        self.candidates.iter().filter(|c| c.winner).collect()
    }

    /// The number of ranked-choice rounds present in the tallies.
    pub fn num_rounds(&self) -> u32 {
        self.candidates
            .iter()
            .flat_map(|c| c.ranks.iter().map(|r| r.round))
            .max()
            .unwrap_or(0)
    }

    pub fn fully_reported(&self) -> bool {
        matches!(
            (self.precincts_reporting, self.total_precincts),
            (Some(r), Some(t)) if t > 0 && r >= t
        )
    }
}

/// Where the payload of a source came from.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchOrigin {
    Live,
    Cache,
    /// Served from cache after the live retrieval failed.
    Degraded,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Districts,
    Supplement,
    Results,
    Counts,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Districts => "districts",
            SourceKind::Supplement => "supplement",
            SourceKind::Results => "results",
            SourceKind::Counts => "counts",
        }
    }
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How one source was obtained and how much of it could be read.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SourceReport {
    pub name: String,
    pub kind: SourceKind,
    pub location: String,
    pub origin: FetchOrigin,
    pub records: usize,
    pub dropped: usize,
    /// The change probe failed and a live retrieval was attempted instead.
    pub probe_failed: bool,
    /// Cache entries that could not be read or stored for this source.
    pub cache_errors: Vec<String>,
}

/// Root of the result graph. It owns every contest and district.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Election {
    pub id: String,
    pub title: String,
    pub date: Option<String>,
    pub test: bool,
    pub primary: bool,
    pub notes: Vec<String>,
    pub cache: CacheSettings,
    pub contests: BTreeMap<String, Contest>,
    pub districts: BTreeMap<String, District>,
    pub sources: Vec<SourceReport>,
    pub issues: Vec<Issue>,
}

impl Election {
    pub fn new(settings: &ElectionSettings, cache: &CacheSettings) -> Election {
        Election {
            id: settings.id.clone(),
            title: settings.title.clone(),
            date: settings.date.clone(),
            test: settings.test,
            primary: settings.primary,
            notes: settings.notes.clone(),
            cache: cache.clone(),
            contests: BTreeMap::new(),
            districts: BTreeMap::new(),
            sources: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn unmatched_contests(&self) -> impl Iterator<Item = &Contest> {
        self.contests.values().filter(|c| c.unmatched)
    }
}

// ********* Configuration **********

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSettings {
    pub id: String,
    pub title: String,
    pub date: Option<String>,
    pub test: bool,
    /// Every contest of the election is a primary.
    pub primary: bool,
    pub notes: Vec<String>,
}

/// Cache behaviour for a fetch.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FetchPolicy {
    /// Serve from cache when an entry exists.
    pub use_cache: bool,
    /// Only serve from cache if the remote fingerprint is unchanged.
    pub check_for_change: bool,
    /// Fall back to any cached entry when the live retrieval fails.
    pub use_cache_on_fail: bool,
}

impl FetchPolicy {
    pub const DEFAULT_POLICY: FetchPolicy = FetchPolicy {
        use_cache: true,
        check_for_change: true,
        use_cache_on_fail: true,
    };
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub directory: PathBuf,
    pub policy: FetchPolicy,
}

#[derive(PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ComputeRules {
    /// A contest is close when the margin between the last winning and the
    /// first losing position is below this many percentage points.
    pub close_margin: f64,
}

impl ComputeRules {
    pub const DEFAULT_RULES: ComputeRules = ComputeRules { close_margin: 0.5 };
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct DistrictSource {
    pub kind: DistrictKind,
    pub location: String,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ResultSource {
    /// The district kind every contest of this feed is scoped to.
    pub scope: DistrictKind,
    pub location: String,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SupplementSource {
    pub location: String,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct CountSource {
    pub location: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct Sources {
    pub districts: Vec<DistrictSource>,
    pub results: Vec<ResultSource>,
    pub supplement: Option<SupplementSource>,
    pub verification: Option<CountSource>,
}

#[derive(PartialEq, Debug, Clone)]
pub struct EngineSettings {
    pub election: ElectionSettings,
    pub cache: CacheSettings,
    pub rules: ComputeRules,
    pub sources: Sources,
}
