//! One batch pass: fetch every source, resolve, compute and optionally verify.

use log::{debug, info, warn};
use rayon::prelude::*;
use snafu::prelude::*;

use crate::cache::CacheStore;
use crate::compute::compute;
use crate::config::*;
use crate::errors::*;
use crate::fetch::{FetchedBatch, RecordSource, Remote, SourceFetcher};
use crate::io_counts::CountRecord;
use crate::io_districts::DistrictRecord;
use crate::io_results::ResultRecord;
use crate::io_supplement::SupplementRecord;
use crate::resolve::resolve;
use crate::verify::{verify, Verification};

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug)]
pub struct PipelineOutput {
    pub election: Election,
    /// Present when verification was requested.
    pub verification: Option<Verification>,
    /// Rows of the supplemental store, as fetched.
    pub supplement: Vec<SupplementRecord>,
}

fn validate_settings(settings: &EngineSettings) -> EngineResult<()> {
    ensure!(
        !settings.election.id.trim().is_empty(),
        InvalidSettingsSnafu {
            reason: "the election has no id"
        }
    );
    ensure!(
        !settings.sources.results.is_empty(),
        InvalidSettingsSnafu {
            reason: "no result source is configured"
        }
    );
    ensure!(
        settings.rules.close_margin.is_finite() && settings.rules.close_margin >= 0.0,
        InvalidSettingsSnafu {
            reason: format!("invalid close margin {}", settings.rules.close_margin)
        }
    );
    Ok(())
}

fn fetch_one<S: RecordSource>(
    fetcher: &SourceFetcher,
    source: &S,
    policy: &FetchPolicy,
) -> EngineResult<FetchedBatch<S::Record>> {
    let name = source.request().name;
    fetcher
        .fetch_records(source, policy)
        .context(FetchSnafu { name })
}

fn fetch_all<S>(
    fetcher: &SourceFetcher,
    sources: &[S],
    policy: &FetchPolicy,
) -> EngineResult<Vec<FetchedBatch<S::Record>>>
where
    S: RecordSource + Sync,
    S::Record: Send,
{
    sources
        .par_iter()
        .map(|s| fetch_one(fetcher, s, policy))
        .collect()
}

fn fetch_optional<S>(
    fetcher: &SourceFetcher,
    source: Option<&S>,
    policy: &FetchPolicy,
) -> EngineResult<Option<FetchedBatch<S::Record>>>
where
    S: RecordSource,
{
    source.map(|s| fetch_one(fetcher, s, policy)).transpose()
}

/// Moves the records out of a batch, turning its dropped rows into issues.
fn absorb<T>(
    fetched: FetchedBatch<T>,
    reports: &mut Vec<SourceReport>,
    issues: &mut Vec<Issue>,
) -> Vec<T> {
    let FetchedBatch { batch, report } = fetched;
    for e in batch.dropped.iter() {
        issues.push(Issue::Parse {
            source: report.name.clone(),
            line: e.line(),
            reason: e.to_string(),
        });
    }
    debug!(
        "pipeline: {} gave {} records ({:?})",
        report.name,
        batch.records.len(),
        report.origin
    );
    reports.push(report);
    batch.records
}

/// Runs a full pass over the configured sources.
///
/// Sources are fetched concurrently, each in its own cache namespace. A
/// source that can be served neither live nor from the cache aborts the run.
pub fn run_pipeline(
    settings: &EngineSettings,
    remote: &dyn Remote,
    with_verification: bool,
) -> EngineResult<PipelineOutput> {
    validate_settings(settings)?;
    let cache = CacheStore::new(&settings.cache.directory).context(CacheSnafu)?;
    let fetcher = SourceFetcher::new(remote, &cache);
    let policy = settings.cache.policy;
    let sources = &settings.sources;
    let counts_source = if with_verification {
        sources.verification.as_ref()
    } else {
        None
    };

    let (districts, (results, (supplement, counts))) = rayon::join(
        || fetch_all(&fetcher, &sources.districts, &policy),
        || {
            rayon::join(
                || fetch_all(&fetcher, &sources.results, &policy),
                || {
                    rayon::join(
                        || fetch_optional(&fetcher, sources.supplement.as_ref(), &policy),
                        || fetch_optional(&fetcher, counts_source, &policy),
                    )
                },
            )
        },
    );

    let mut reports: Vec<SourceReport> = Vec::new();
    let mut issues: Vec<Issue> = Vec::new();
    let mut district_records: Vec<DistrictRecord> = Vec::new();
    for fetched in districts? {
        district_records.extend(absorb(fetched, &mut reports, &mut issues));
    }
    let mut result_records: Vec<ResultRecord> = Vec::new();
    for fetched in results? {
        result_records.extend(absorb(fetched, &mut reports, &mut issues));
    }
    let supplement_records: Vec<SupplementRecord> = supplement?
        .map(|f| absorb(f, &mut reports, &mut issues))
        .unwrap_or_default();
    // The independent count only feeds verification; losing it leaves the
    // computed results intact.
    let count_records: Option<Vec<CountRecord>> = match counts {
        Ok(fetched) => fetched.map(|f| absorb(f, &mut reports, &mut issues)),
        Err(EngineError::Fetch { name, source }) => {
            warn!("pipeline: {} unavailable, verification skipped: {}", name, source);
            issues.push(Issue::Unavailable {
                source: name,
                reason: source.to_string(),
            });
            None
        }
        Err(e) => return Err(e),
    };

    let mut election = resolve(
        settings,
        &district_records,
        &supplement_records,
        &result_records,
    );
    issues.append(&mut election.issues);
    election.issues = issues;
    election.sources = reports;
    compute(&mut election, &settings.rules);

    let verification = if with_verification {
        Some(verify(count_records.as_deref(), &election))
    } else {
        None
    };
    info!(
        "pipeline: {} contests ({} fully reported) from {} sources ({} degraded, {} with cache errors), {} issues",
        election.contests.len(),
        election
            .contests
            .values()
            .filter(|c| c.fully_reported())
            .count(),
        election.sources.len(),
        election
            .sources
            .iter()
            .filter(|s| s.origin == FetchOrigin::Degraded)
            .count(),
        election
            .sources
            .iter()
            .filter(|s| !s.cache_errors.is_empty())
            .count(),
        election.issues.len()
    );
    Ok(PipelineOutput {
        election,
        verification,
        supplement: supplement_records,
    })
}
