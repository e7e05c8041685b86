use log::{debug, info, warn};

use results_engine::fetch::{OfflineRemote, RemoteRouter};
use results_engine::io_supplement::{write_supplement, SupplementRecord};
use results_engine::*;
use snafu::prelude::*;

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde_json::json;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::app::config_reader::*;
use crate::args::Args;

pub mod config_reader;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Snafu)]
pub enum AppError {
    #[snafu(display("Error opening file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing JSON from {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error serializing the summary"))]
    SerializingJson { source: serde_json::Error },
    #[snafu(display("Error writing {path}"))]
    Writing {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error writing supplemental rows to {path}"))]
    WritingCsv { source: csv::Error, path: String },
    #[snafu(display("Could not set up the network client"))]
    Remote { source: FetchError },
    #[snafu(display("{source}"))]
    Engine { source: EngineError },
    #[snafu(display("The configuration file has no parent directory"))]
    MissingParentDir {},

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type AppResult<T> = Result<T, AppError>;

fn read_json(path: &str) -> AppResult<JSValue> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    serde_json::from_str(&contents).context(ParsingJsonSnafu { path })
}

fn read_config(path: &str) -> AppResult<EngineConfig> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    serde_json::from_str(&contents).context(ParsingJsonSnafu { path })
}

/// Command line flags take precedence over the cache section of the file.
fn override_policy(policy: FetchPolicy, args: &Args) -> FetchPolicy {
    if args.offline {
        FetchPolicy {
            use_cache: true,
            check_for_change: false,
            use_cache_on_fail: true,
        }
    } else if args.no_cache {
        FetchPolicy {
            use_cache: false,
            check_for_change: false,
            use_cache_on_fail: false,
        }
    } else {
        policy
    }
}

fn build_summary_js(
    election: &Election,
    verification: Option<&Verification>,
) -> AppResult<JSValue> {
    let unmatched: Vec<&str> = election
        .unmatched_contests()
        .map(|c| c.id.as_str())
        .collect();
    let election_js = serde_json::to_value(election).context(SerializingJsonSnafu)?;
    let verification_js = serde_json::to_value(verification).context(SerializingJsonSnafu)?;
    Ok(json!({
        "election": election_js,
        "unmatched": unmatched,
        "verification": verification_js,
    }))
}

fn write_summary(out: Option<&str>, pretty_js: &str) -> AppResult<()> {
    match out {
        None | Some("stdout") => {
            println!("{}", pretty_js);
            Ok(())
        }
        Some(path) => {
            info!("Writing summary to {}", path);
            fs::write(path, pretty_js).context(WritingSnafu { path })
        }
    }
}

fn write_setup(path: &str, election: &Election, existing: &[SupplementRecord]) -> AppResult<()> {
    let rows = setup_records(election, existing);
    info!("Writing {} new supplemental rows to {}", rows.len(), path);
    let file = fs::File::create(path).context(WritingSnafu { path })?;
    write_supplement(file, &rows).context(WritingCsvSnafu { path })
}

fn check_reference(reference_p: &str, pretty_js: &str) -> AppResult<()> {
    let reference = read_json(reference_p)?;
    let pretty_js_ref = serde_json::to_string_pretty(&reference).context(SerializingJsonSnafu)?;
    if pretty_js_ref != pretty_js {
        warn!("Found differences with the reference summary");
        print_diff(pretty_js_ref.as_str(), pretty_js, "\n");
        whatever!("Difference detected between the computed summary and the reference summary")
    }
    Ok(())
}

pub fn run_app(args: &Args) -> AppResult<()> {
    let config_p = Path::new(args.config.as_str());
    let config = read_config(&args.config)?;
    debug!("config: {:?}", config);
    let root_p = config_p.parent().context(MissingParentDirSnafu {})?;
    let mut settings = validate_config(&config, root_p)?;
    settings.cache.policy = override_policy(settings.cache.policy, args);
    info!(
        "Election {}: {} result sources, cache policy {:?}",
        settings.election.id,
        settings.sources.results.len(),
        settings.cache.policy
    );

    let with_verification = args.verify || args.apply_corrections;
    let output = if args.offline {
        run_pipeline(&settings, &OfflineRemote, with_verification)
    } else {
        let remote = RemoteRouter::new(FETCH_TIMEOUT).context(RemoteSnafu)?;
        run_pipeline(&settings, &remote, with_verification)
    }
    .context(EngineSnafu)?;
    let PipelineOutput {
        mut election,
        verification,
        supplement,
    } = output;

    if let Some(v) = &verification {
        v.mark_verified(&mut election);
        match v {
            Verification::Mismatch(report) if args.apply_corrections => {
                apply_corrections(&mut election, report, &settings.rules);
            }
            Verification::Mismatch(report) => {
                warn!(
                    "{} contests differ from the independent count",
                    report.mismatches().count()
                );
            }
            _ => {}
        }
    }
    for issue in election.issues.iter() {
        debug!("issue: {:?}", issue);
    }
    if !election.issues.is_empty() {
        warn!("{} issues recorded, see the summary", election.issues.len());
    }

    let summary_js = build_summary_js(&election, verification.as_ref())?;
    let pretty_js = serde_json::to_string_pretty(&summary_js).context(SerializingJsonSnafu)?;
    write_summary(args.out.as_deref(), &pretty_js)?;

    if let Some(setup_p) = &args.setup {
        write_setup(setup_p, &election, &supplement)?;
    }

    // The reference summary, if provided for comparison
    if let Some(reference_p) = &args.reference {
        check_reference(reference_p, &pretty_js)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const COUNTY: &str = "27;Hennepin;850\n";
    const RESULTS: &str = "\
MN;27;;0301;County Sheriff;;0101;SMITH;;;D;10;10;120;;200
MN;27;;0301;County Sheriff;;0102;JONES;;;R;10;10;80;;200
MN;27;;0302;County Attorney;;0201;LEE;;;D;10;10;90;;90
";
    const COUNTS: &str = "\
20241105-county-27-0301;20241105-county-27-0301-0101;120;1
20241105-county-27-0301;20241105-county-27-0301-0102;80;0
20241105-county-27-0302;20241105-county-27-0302-0201;95;1
";
    const CONFIG: &str = r#"{
        "election": {"id": "20241105", "title": "General Election"},
        "cache": {"directory": "cache"},
        "sources": {
            "districts": [{"kind": "county", "location": "county.txt"}],
            "results": [{"scope": "county", "location": "results.txt"}],
            "verification": {"location": "counts.txt"}
        }
    }"#;

    fn workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("county.txt"), COUNTY).unwrap();
        fs::write(dir.path().join("results.txt"), RESULTS).unwrap();
        fs::write(dir.path().join("counts.txt"), COUNTS).unwrap();
        fs::write(dir.path().join("config.json"), CONFIG).unwrap();
        dir
    }

    fn args(dir: &TempDir) -> Args {
        let path = |name: &str| dir.path().join(name).display().to_string();
        Args {
            config: path("config.json"),
            out: Some(path("out.json")),
            reference: None,
            verify: false,
            apply_corrections: false,
            setup: None,
            no_cache: false,
            offline: false,
            verbose: false,
        }
    }

    fn summary(dir: &TempDir) -> JSValue {
        read_json(&dir.path().join("out.json").display().to_string()).unwrap()
    }

    #[test]
    fn verify_marks_matching_contests() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = workspace();
        let mut a = args(&dir);
        a.verify = true;
        a.setup = Some(dir.path().join("setup.csv").display().to_string());
        run_app(&a).unwrap();

        let js = summary(&dir);
        let contests = &js["election"]["contests"];
        assert_eq!(contests["20241105-county-27-0301"]["state"], "verified");
        assert_eq!(contests["20241105-county-27-0302"]["state"], "computed");
        assert_eq!(js["verification"]["outcome"], "mismatch");

        let setup = fs::read_to_string(dir.path().join("setup.csv")).unwrap();
        assert!(setup.starts_with("id,"));
        assert!(setup.contains("20241105-county-27-0302-0201"));
    }

    #[test]
    fn corrections_replace_counts() {
        let dir = workspace();
        let mut a = args(&dir);
        a.apply_corrections = true;
        run_app(&a).unwrap();
        let js = summary(&dir);
        let attorney = &js["election"]["contests"]["20241105-county-27-0302"];
        assert_eq!(attorney["candidates"][0]["votes"], 95);
    }

    #[test]
    fn offline_runs_from_the_cache() {
        let dir = workspace();
        let mut a = args(&dir);
        a.offline = true;
        assert!(matches!(run_app(&a), Err(AppError::Engine { .. })));

        a.offline = false;
        run_app(&a).unwrap();
        fs::remove_file(dir.path().join("results.txt")).unwrap();
        a.offline = true;
        run_app(&a).unwrap();
        let js = summary(&dir);
        assert_eq!(js["election"]["sources"][1]["origin"], "cache");
    }

    #[test]
    fn reference_comparison() {
        let dir = workspace();
        let mut a = args(&dir);
        run_app(&a).unwrap();
        // Second pass is served from the cache, like the third.
        run_app(&a).unwrap();
        let reference = dir.path().join("reference.json");
        fs::copy(dir.path().join("out.json"), &reference).unwrap();
        a.reference = Some(reference.display().to_string());
        run_app(&a).unwrap();

        fs::write(&reference, r#"{"election": {}}"#).unwrap();
        assert!(matches!(run_app(&a), Err(AppError::Whatever { .. })));
    }

    #[test]
    fn missing_config() {
        let dir = TempDir::new().unwrap();
        let a = args(&dir);
        assert!(matches!(run_app(&a), Err(AppError::OpeningJson { .. })));
    }
}
