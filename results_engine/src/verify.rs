//! Comparison of the computed results with an independent count.
//!
//! Verification only reads the election. Marking contests as verified and
//! overwriting counts with the independent ones are separate, explicit steps.

use std::collections::BTreeMap;

use log::{info, warn};
use serde::Serialize;

use crate::compute::compute_contest;
use crate::config::*;
use crate::io_counts::CountRecord;

#[derive(PartialEq, Eq, Debug, Clone, Serialize)]
pub struct CandidateCheck {
    pub candidate_id: String,
    pub computed_votes: Option<u64>,
    pub independent_votes: Option<u64>,
    pub computed_winner: Option<bool>,
    pub independent_winner: Option<bool>,
    pub matches: bool,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize)]
pub struct ContestCheck {
    pub contest_id: String,
    /// False when the independent source names a contest the election lacks.
    pub found: bool,
    pub computed_total: Option<u64>,
    pub independent_total: u64,
    pub matches: bool,
    pub candidates: Vec<CandidateCheck>,
}

#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    pub contests: Vec<ContestCheck>,
}

impl VerificationReport {
    pub fn mismatches(&self) -> impl Iterator<Item = &ContestCheck> {
        self.contests.iter().filter(|c| !c.matches)
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "report", rename_all = "camelCase")]
pub enum Verification {
    Match(VerificationReport),
    Mismatch(VerificationReport),
    NoDataAvailable,
}

impl Verification {
    pub fn report(&self) -> Option<&VerificationReport> {
        match self {
            Verification::Match(r) | Verification::Mismatch(r) => Some(r),
            Verification::NoDataAvailable => None,
        }
    }

    /// Moves every contest that matched its independent count to `Verified`.
    /// Returns how many contests changed state.
    pub fn mark_verified(&self, election: &mut Election) -> usize {
        let mut marked = 0;
        for check in self.report().into_iter().flat_map(|r| r.contests.iter()) {
            if !check.matches {
                continue;
            }
            if let Some(contest) = election.contests.get_mut(&check.contest_id) {
                if contest.state != ContestState::Verified {
                    contest.state = ContestState::Verified;
                    marked += 1;
                }
            }
        }
        info!("verify: {} contests marked verified", marked);
        marked
    }
}

fn check_candidate(candidate: Option<&Candidate>, rec: &CountRecord) -> CandidateCheck {
    let computed_votes = candidate.and_then(|c| c.votes);
    let computed_winner = candidate.map(|c| c.winner);
    let votes_match = computed_votes == Some(rec.votes);
    // A source that does not call the contest agrees with any winner.
    let winner_match = match rec.winner {
        Some(w) => computed_winner == Some(w),
        None => candidate.is_some(),
    };
    CandidateCheck {
        candidate_id: rec.candidate_id.clone(),
        computed_votes,
        independent_votes: Some(rec.votes),
        computed_winner,
        independent_winner: rec.winner,
        matches: votes_match && winner_match,
    }
}

fn check_contest(id: &str, records: &[&CountRecord], election: &Election) -> ContestCheck {
    let independent_total: u64 = records.iter().map(|r| r.votes).sum();
    let contest = match election.contests.get(id) {
        Some(contest) => contest,
        None => {
            return ContestCheck {
                contest_id: id.to_string(),
                found: false,
                computed_total: None,
                independent_total,
                matches: false,
                candidates: records.iter().map(|r| check_candidate(None, r)).collect(),
            };
        }
    };

    let mut candidates: Vec<CandidateCheck> = records
        .iter()
        .map(|r| check_candidate(contest.candidate(&r.candidate_id), r))
        .collect();
    // Candidates the independent count does not list must have no votes.
    for c in contest.candidates.iter() {
        if records.iter().any(|r| r.candidate_id == c.id) {
            continue;
        }
        candidates.push(CandidateCheck {
            candidate_id: c.id.clone(),
            computed_votes: c.votes,
            independent_votes: None,
            computed_winner: Some(c.winner),
            independent_winner: None,
            matches: c.votes.unwrap_or(0) == 0 && !c.winner,
        });
    }
    let computed_total: Option<u64> = if contest.candidates.iter().any(|c| c.votes.is_some()) {
        Some(contest.candidates.iter().filter_map(|c| c.votes).sum())
    } else {
        None
    };
    ContestCheck {
        contest_id: id.to_string(),
        found: true,
        computed_total,
        independent_total,
        matches: candidates.iter().all(|c| c.matches),
        candidates,
    }
}

/// Compares every contest of the independent source with the election.
pub fn verify(independent: Option<&[CountRecord]>, election: &Election) -> Verification {
    let records = match independent {
        Some(records) if !records.is_empty() => records,
        _ => return Verification::NoDataAvailable,
    };
    let mut by_contest: BTreeMap<&str, Vec<&CountRecord>> = BTreeMap::new();
    for r in records {
        by_contest.entry(r.contest_id.as_str()).or_default().push(r);
    }
    let report = VerificationReport {
        contests: by_contest
            .iter()
            .map(|(id, recs)| check_contest(id, recs, election))
            .collect(),
    };
    let mismatched = report.mismatches().count();
    if mismatched == 0 {
        info!("verify: {} contests match", report.contests.len());
        Verification::Match(report)
    } else {
        for check in report.mismatches() {
            warn!("verify: mismatch on contest {}", check.contest_id);
        }
        Verification::Mismatch(report)
    }
}

/// Overwrites computed counts with the independent ones and recomputes the
/// affected contests. Returns how many candidate counts changed.
pub fn apply_corrections(
    election: &mut Election,
    report: &VerificationReport,
    rules: &ComputeRules,
) -> usize {
    let mut corrected = 0;
    for check in report.mismatches().filter(|c| c.found) {
        let contest = match election.contests.get_mut(&check.contest_id) {
            Some(contest) => contest,
            None => continue,
        };
        let mut changed = false;
        for row in check.candidates.iter() {
            let votes = match row.independent_votes {
                Some(v) if row.computed_votes != Some(v) => v,
                _ => continue,
            };
            let ranked = contest.ranked;
            if let Some(c) = contest
                .candidates
                .iter_mut()
                .find(|c| c.id == row.candidate_id)
            {
                if ranked {
                    match c.ranks.iter_mut().find(|t| t.round == 1) {
                        Some(tally) => tally.votes = Some(votes),
                        None => c.ranks.insert(
                            0,
                            RoundTally {
                                round: 1,
                                votes: Some(votes),
                                percent: Share::NoData,
                            },
                        ),
                    }
                } else {
                    c.votes = Some(votes);
                }
                corrected += 1;
                changed = true;
            }
        }
        if changed {
            contest.total_votes = None;
            compute_contest(contest, rules);
        }
    }
    info!("verify: {} counts corrected", corrected);
    corrected
}
