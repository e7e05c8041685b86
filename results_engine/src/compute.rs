//! Per-contest tabulation: vote shares, winners and outcome flags.

use std::collections::BTreeMap;

use log::{debug, info};

use crate::config::*;

fn share(votes: Option<u64>, total: u64) -> Share {
    match votes {
        Some(v) if total > 0 => Share::Percent(v as f64 / total as f64 * 100.0),
        _ => Share::NoData,
    }
}

fn counted_votes<'a, I: Iterator<Item = &'a Candidate>>(candidates: I) -> u64 {
    candidates
        .filter(|c| !c.write_in)
        .map(|c| c.votes.unwrap_or(0))
        .sum()
}

fn round_votes(c: &Candidate, round: u32) -> Option<u64> {
    c.rank(round).and_then(|t| t.votes)
}

/// A round is reporting once any candidate has a vote in it.
fn round_reporting(contest: &Contest, round: u32) -> bool {
    contest
        .candidates
        .iter()
        .any(|c| round_votes(c, round).unwrap_or(0) > 0)
}

fn compute_plurality_shares(contest: &mut Contest) {
    let total = counted_votes(contest.candidates.iter());
    for c in contest.candidates.iter_mut() {
        c.percent = share(c.votes, total);
    }
}

fn compute_ranked_shares(contest: &mut Contest) {
    let rounds = contest.num_rounds();
    for round in 1..=rounds {
        let reporting = round_reporting(contest, round);
        let total: u64 = contest
            .candidates
            .iter()
            .filter(|c| !c.write_in)
            .map(|c| round_votes(c, round).unwrap_or(0))
            .sum();
        for c in contest.candidates.iter_mut() {
            let votes = round_votes(c, round);
            let percent = if reporting {
                share(votes, total)
            } else {
                Share::NotReporting
            };
            match c.ranks.iter_mut().find(|t| t.round == round) {
                Some(tally) => tally.percent = percent,
                None => c.ranks.push(RoundTally {
                    round,
                    votes: None,
                    percent,
                }),
            }
            c.ranks.sort_by_key(|t| t.round);
        }
    }
    // The headline numbers are those of the first round.
    for c in contest.candidates.iter_mut() {
        let first = c.rank(1).cloned();
        c.votes = first.as_ref().and_then(|t| t.votes);
        c.percent = match first.map(|t| t.percent) {
            Some(Share::Percent(p)) => Share::Percent(p),
            _ => Share::NoData,
        };
    }
}

/// Indices of the top `n` entries. Entries tied with the first one left out
/// are not picked, and nothing is picked without votes.
fn pick_top(mut entries: Vec<(usize, u64)>, n: usize) -> Vec<usize> {
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    if n == 0 || entries.iter().all(|(_, v)| *v == 0) {
        return vec![];
    }
    if entries.len() <= n {
        return entries
            .into_iter()
            .filter(|(_, v)| *v > 0)
            .map(|(idx, _)| idx)
            .collect();
    }
    let cutoff = entries[n].1;
    entries[..n]
        .iter()
        .filter(|(_, v)| *v > cutoff)
        .map(|(idx, _)| *idx)
        .collect()
}

/// The number of candidates each group advances.
fn advancing(contest: &Contest) -> usize {
    let seats = contest.seat_count() as usize;
    if contest.primary && contest.nonpartisan && !contest.question {
        2 * seats
    } else {
        seats
    }
}

/// Candidates competing against each other, as indices. Partisan primaries
/// are one race per party. Write-ins never count.
fn groups(contest: &Contest) -> Vec<Vec<usize>> {
    let eligible = contest
        .candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.write_in);
    if contest.primary && !contest.nonpartisan && !contest.ranked {
        let mut by_party: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, c) in eligible {
            by_party
                .entry(c.party.clone().unwrap_or_default())
                .or_default()
                .push(idx);
        }
        by_party.into_values().collect()
    } else {
        vec![eligible.map(|(idx, _)| idx).collect()]
    }
}

/// The last round any candidate received votes in.
fn final_round(contest: &Contest) -> Option<u32> {
    (1..=contest.num_rounds())
        .rev()
        .find(|r| round_reporting(contest, *r))
}

fn ranked_winner(contest: &Contest) -> Option<usize> {
    let round = final_round(contest)?;
    let mut entries: Vec<(usize, f64)> = contest
        .candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.write_in)
        .filter_map(|(idx, c)| {
            c.rank(round)
                .and_then(|t| t.percent.value())
                .map(|p| (idx, p))
        })
        .collect();
    entries.sort_by(|a, b| b.1.total_cmp(&a.1));
    match entries.as_slice() {
        [] => None,
        [(idx, p), ..] if *p > 50.0 => Some(*idx),
        [(idx, p)] if *p > 0.0 => Some(*idx),
        [(idx, p), (_, second), ..] if *p > *second => Some(*idx),
        _ => None,
    }
}

fn pick_winners(contest: &Contest) -> Vec<usize> {
    if contest.called && contest.candidates.iter().any(|c| c.supplement_winner) {
        return contest
            .candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.supplement_winner)
            .map(|(idx, _)| idx)
            .collect();
    }
    if contest.ranked {
        return ranked_winner(contest).into_iter().collect();
    }
    let n = advancing(contest);
    groups(contest)
        .into_iter()
        .flat_map(|group| {
            let entries = group
                .into_iter()
                .map(|idx| (idx, contest.candidates[idx].votes.unwrap_or(0)))
                .collect();
            pick_top(entries, n)
        })
        .collect()
}

fn is_uncontested(contest: &Contest) -> bool {
    if contest.ranked || contest.question {
        return false;
    }
    let n = advancing(contest);
    let groups = groups(contest);
    groups.iter().any(|g| !g.is_empty()) && groups.iter().all(|g| g.len() <= n)
}

/// Whether the gap between the last winning and the first losing position is
/// under the margin, in any group.
fn is_close(contest: &Contest, rules: &ComputeRules) -> bool {
    let (groups, n, round) = if contest.ranked {
        match final_round(contest) {
            Some(round) => (groups(contest), 1, Some(round)),
            None => return false,
        }
    } else {
        (groups(contest), advancing(contest), None)
    };
    groups.iter().any(|group| {
        let mut percents: Vec<f64> = group
            .iter()
            .filter_map(|idx| {
                let c = &contest.candidates[*idx];
                match round {
                    Some(r) => c.rank(r).and_then(|t| t.percent.value()),
                    None => c.percent.value(),
                }
            })
            .collect();
        percents.sort_by(|a, b| b.total_cmp(a));
        percents.len() > n && percents[n - 1] - percents[n] < rules.close_margin
    })
}

/// Computes shares, winners and flags of one contest from its raw counts.
/// Running it twice gives the same contest.
pub fn compute_contest(contest: &mut Contest, rules: &ComputeRules) {
    if contest.ranked {
        compute_ranked_shares(contest);
    } else {
        compute_plurality_shares(contest);
    }
    if contest.total_votes.is_none() && contest.candidates.iter().any(|c| c.votes.is_some()) {
        contest.total_votes = Some(contest.candidates.iter().filter_map(|c| c.votes).sum());
    }

    let winners = pick_winners(contest);
    for (idx, c) in contest.candidates.iter_mut().enumerate() {
        c.winner = winners.contains(&idx);
    }
    contest.uncontested = is_uncontested(contest);
    contest.close = is_close(contest, rules);
    if contest.state == ContestState::Pending {
        contest.state = ContestState::Computed;
    }
    debug!(
        "compute: {}: {} winners, uncontested={} close={}",
        contest.id,
        winners.len(),
        contest.uncontested,
        contest.close
    );
}

pub fn compute(election: &mut Election, rules: &ComputeRules) {
    for contest in election.contests.values_mut() {
        compute_contest(contest, rules);
    }
    info!(
        "compute: {} contests, {} close, {} without a winner",
        election.contests.len(),
        election.contests.values().filter(|c| c.close).count(),
        election
            .contests
            .values()
            .filter(|c| c.winners().is_empty())
            .count()
    );
}
