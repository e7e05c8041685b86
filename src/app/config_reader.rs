use std::path::Path;

use results_engine::*;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::app::AppResult;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    pub id: String,
    pub title: String,
    pub date: Option<String>,
    pub test: Option<bool>,
    pub primary: Option<bool>,
    pub notes: Option<Vec<String>>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub directory: Option<String>,
    #[serde(rename = "useCache")]
    pub use_cache: Option<bool>,
    #[serde(rename = "checkForChange")]
    pub check_for_change: Option<bool>,
    #[serde(rename = "useCacheOnFail")]
    pub use_cache_on_fail: Option<bool>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(rename = "closeMargin")]
    pub close_margin: Option<f64>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct DistrictSourceConfig {
    pub kind: String,
    pub location: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ResultSourceConfig {
    pub scope: String,
    pub location: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    pub location: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub districts: Option<Vec<DistrictSourceConfig>>,
    pub results: Vec<ResultSourceConfig>,
    pub supplement: Option<LocationConfig>,
    pub verification: Option<LocationConfig>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub election: ElectionConfig,
    pub cache: Option<CacheConfig>,
    pub rules: Option<RulesConfig>,
    pub sources: SourcesConfig,
}

const DEFAULT_CACHE_DIR: &str = ".cache";

fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Local paths are taken relative to the directory of the configuration.
fn resolve_location(root: &Path, location: &str) -> AppResult<String> {
    let location = location.trim();
    if location.is_empty() {
        whatever!("Empty source location in the configuration");
    }
    if is_url(location) {
        return Ok(location.to_string());
    }
    let local = location.strip_prefix("file://").unwrap_or(location);
    Ok(root.join(local).display().to_string())
}

fn parse_kind(field: &str, value: &str) -> AppResult<DistrictKind> {
    match DistrictKind::parse(value) {
        Some(k) => Ok(k),
        None => whatever!(
            "Cannot use {} {:?}: expected one of state, county, local, school, precinct",
            field,
            value
        ),
    }
}

fn validate_policy(cache: Option<&CacheConfig>) -> FetchPolicy {
    let d = FetchPolicy::DEFAULT_POLICY;
    match cache {
        None => d,
        Some(c) => FetchPolicy {
            use_cache: c.use_cache.unwrap_or(d.use_cache),
            check_for_change: c.check_for_change.unwrap_or(d.check_for_change),
            use_cache_on_fail: c.use_cache_on_fail.unwrap_or(d.use_cache_on_fail),
        },
    }
}

/// Turns the configuration file into engine settings. `root` is the directory
/// of the configuration file.
pub fn validate_config(config: &EngineConfig, root: &Path) -> AppResult<EngineSettings> {
    if config.sources.results.is_empty() {
        whatever!("No result source in the configuration");
    }

    let mut districts: Vec<DistrictSource> = Vec::new();
    for d in config.sources.districts.iter().flatten() {
        districts.push(DistrictSource {
            kind: parse_kind("district kind", &d.kind)?,
            location: resolve_location(root, &d.location)?,
        });
    }
    let mut results: Vec<ResultSource> = Vec::new();
    for r in config.sources.results.iter() {
        results.push(ResultSource {
            scope: parse_kind("result scope", &r.scope)?,
            location: resolve_location(root, &r.location)?,
        });
    }
    let supplement = match &config.sources.supplement {
        Some(s) => Some(SupplementSource {
            location: resolve_location(root, &s.location)?,
        }),
        None => None,
    };
    let verification = match &config.sources.verification {
        Some(s) => Some(CountSource {
            location: resolve_location(root, &s.location)?,
        }),
        None => None,
    };

    let close_margin = config
        .rules
        .as_ref()
        .and_then(|r| r.close_margin)
        .unwrap_or(ComputeRules::DEFAULT_RULES.close_margin);
    if !close_margin.is_finite() || close_margin < 0.0 {
        whatever!("Cannot use closeMargin {}: expected a non-negative number", close_margin);
    }

    let directory = config
        .cache
        .as_ref()
        .and_then(|c| c.directory.clone())
        .unwrap_or_else(|| DEFAULT_CACHE_DIR.to_string());

    let e = &config.election;
    Ok(EngineSettings {
        election: ElectionSettings {
            id: e.id.trim().to_string(),
            title: e.title.clone(),
            date: e.date.clone(),
            test: e.test.unwrap_or(false),
            primary: e.primary.unwrap_or(false),
            notes: e.notes.clone().unwrap_or_default(),
        },
        cache: CacheSettings {
            directory: root.join(directory),
            policy: validate_policy(config.cache.as_ref()),
        },
        rules: ComputeRules { close_margin },
        sources: Sources {
            districts,
            results,
            supplement,
            verification,
        },
    })
}
