//! Retrieval of raw source payloads with cache and change detection.

use std::fs;
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use log::{debug, info, warn};
use reqwest::header::{CONTENT_LENGTH, LAST_MODIFIED};
use snafu::prelude::*;

use crate::cache::{CacheEntry, CacheStore, Fingerprint};
use crate::config::{FetchOrigin, FetchPolicy, SourceKind, SourceReport};
use crate::errors::*;
use crate::ids::make_id;
use crate::io_common::ParsedBatch;

pub type FetchResult<T> = Result<T, FetchError>;

/// Raw bytes of a retrieval, with what the remote declared about them.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Download {
    pub body: Vec<u8>,
    pub declared_length: Option<u64>,
    pub fingerprint: Fingerprint,
}

/// Transport used by the fetchers.
pub trait Remote: Send + Sync {
    /// Size and modification time of the remote payload, without the payload.
    fn probe(&self, location: &str) -> FetchResult<Fingerprint>;

    fn retrieve(&self, location: &str) -> FetchResult<Download>;
}

pub struct HttpRemote {
    client: reqwest::blocking::Client,
}

impl HttpRemote {
    pub fn new(timeout: Duration) -> FetchResult<HttpRemote> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context(HttpSnafu { target: "client" })?;
        Ok(HttpRemote { client })
    }

    fn fingerprint(headers: &reqwest::header::HeaderMap) -> Fingerprint {
        Fingerprint {
            size: headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok()),
            modified: headers
                .get(LAST_MODIFIED)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string()),
        }
    }
}

impl Remote for HttpRemote {
    fn probe(&self, location: &str) -> FetchResult<Fingerprint> {
        let resp = self
            .client
            .head(location)
            .send()
            .context(HttpSnafu { target: location })?;
        ensure!(
            resp.status().is_success(),
            StatusSnafu {
                target: location,
                status: resp.status().as_u16()
            }
        );
        Ok(HttpRemote::fingerprint(resp.headers()))
    }

    fn retrieve(&self, location: &str) -> FetchResult<Download> {
        let resp = self
            .client
            .get(location)
            .send()
            .context(HttpSnafu { target: location })?;
        ensure!(
            resp.status().is_success(),
            StatusSnafu {
                target: location,
                status: resp.status().as_u16()
            }
        );
        let fingerprint = HttpRemote::fingerprint(resp.headers());
        let declared_length = resp.content_length();
        let body = resp.bytes().context(HttpSnafu { target: location })?;
        Ok(Download {
            body: body.to_vec(),
            declared_length,
            fingerprint,
        })
    }
}

/// Reads sources from the local filesystem.
pub struct FsRemote;

impl FsRemote {
    fn path(location: &str) -> &Path {
        Path::new(location.strip_prefix("file://").unwrap_or(location))
    }
}

impl Remote for FsRemote {
    fn probe(&self, location: &str) -> FetchResult<Fingerprint> {
        let meta = fs::metadata(FsRemote::path(location)).context(IoSnafu { target: location })?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis().to_string());
        Ok(Fingerprint {
            size: Some(meta.len()),
            modified,
        })
    }

    fn retrieve(&self, location: &str) -> FetchResult<Download> {
        let fingerprint = self.probe(location)?;
        let body = fs::read(FsRemote::path(location)).context(IoSnafu { target: location })?;
        Ok(Download {
            body,
            declared_length: fingerprint.size,
            fingerprint,
        })
    }
}

/// Dispatches on the location: URLs go over HTTP, anything else is a path.
pub struct RemoteRouter {
    http: HttpRemote,
    fs: FsRemote,
}

impl RemoteRouter {
    pub fn new(timeout: Duration) -> FetchResult<RemoteRouter> {
        Ok(RemoteRouter {
            http: HttpRemote::new(timeout)?,
            fs: FsRemote,
        })
    }

    fn pick(&self, location: &str) -> &dyn Remote {
        if location.starts_with("http://") || location.starts_with("https://") {
            &self.http
        } else {
            &self.fs
        }
    }
}

impl Remote for RemoteRouter {
    fn probe(&self, location: &str) -> FetchResult<Fingerprint> {
        self.pick(location).probe(location)
    }

    fn retrieve(&self, location: &str) -> FetchResult<Download> {
        self.pick(location).retrieve(location)
    }
}

/// Refuses every request. Paired with a caching policy, it serves cached
/// payloads only.
pub struct OfflineRemote;

impl OfflineRemote {
    fn refuse<T>(location: &str) -> FetchResult<T> {
        Err(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "offline mode",
        ))
        .context(IoSnafu { target: location })
    }
}

impl Remote for OfflineRemote {
    fn probe(&self, location: &str) -> FetchResult<Fingerprint> {
        OfflineRemote::refuse(location)
    }

    fn retrieve(&self, location: &str) -> FetchResult<Download> {
        OfflineRemote::refuse(location)
    }
}

/// Rejects partial or garbled downloads. These count as fetch failures.
pub fn validate_download(location: &str, download: Download) -> FetchResult<String> {
    let received = download.body.len() as u64;
    if let Some(expected) = download.declared_length {
        ensure!(
            expected == received,
            TruncatedSnafu {
                target: location,
                expected,
                received
            }
        );
    }
    String::from_utf8(download.body).context(EncodingSnafu { target: location })
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct FetchRequest {
    pub kind: SourceKind,
    pub name: String,
    pub location: String,
}

impl FetchRequest {
    pub fn cache_key(&self) -> String {
        format!(
            "{}:{}",
            make_id(&[self.kind.as_str().into(), self.name.as_str().into()]),
            self.location
        )
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Fetched {
    pub payload: String,
    pub origin: FetchOrigin,
    pub probe_failed: bool,
    /// Recoverable cache failures met along the way.
    pub cache_errors: Vec<String>,
}

impl Fetched {
    pub fn is_degraded(&self) -> bool {
        self.origin == FetchOrigin::Degraded
    }
}

/// A source whose payload parses into typed records.
pub trait RecordSource {
    type Record;

    fn request(&self) -> FetchRequest;

    fn parse(&self, payload: &str) -> ParsedBatch<Self::Record>;
}

/// Typed records of one source along with how they were obtained.
#[derive(Debug)]
pub struct FetchedBatch<T> {
    pub batch: ParsedBatch<T>,
    pub report: SourceReport,
}

pub struct SourceFetcher<'a> {
    remote: &'a dyn Remote,
    cache: &'a CacheStore,
}

impl<'a> SourceFetcher<'a> {
    pub fn new(remote: &'a dyn Remote, cache: &'a CacheStore) -> SourceFetcher<'a> {
        SourceFetcher { remote, cache }
    }

    // A cache entry that cannot be read is treated as missing.
    fn read_cache(
        &self,
        kind: SourceKind,
        key: &str,
        cache_errors: &mut Vec<String>,
    ) -> Option<CacheEntry> {
        match self.cache.get(kind, key) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("fetch: ignoring unreadable cache entry for {:?}: {}", key, e);
                cache_errors.push(e.to_string());
                None
            }
        }
    }

    fn retrieve_live(&self, request: &FetchRequest) -> FetchResult<(String, Fingerprint)> {
        let download = self.remote.retrieve(&request.location)?;
        let fingerprint = download.fingerprint.clone();
        let payload = validate_download(&request.location, download)?;
        Ok((payload, fingerprint))
    }

    /// Retrieves the payload of a request according to the policy.
    ///
    /// The live retrieval is attempted at most once. On failure, a cached
    /// entry is only served if the policy allows it, and it is then marked
    /// as degraded.
    pub fn fetch(&self, request: &FetchRequest, policy: &FetchPolicy) -> FetchResult<Fetched> {
        let key = request.cache_key();
        let mut cache_errors: Vec<String> = Vec::new();
        let cached = if policy.use_cache || policy.use_cache_on_fail {
            self.read_cache(request.kind, &key, &mut cache_errors)
        } else {
            None
        };

        let mut probed: Option<Fingerprint> = None;
        let mut probe_failed = false;
        if policy.use_cache {
            if let Some(entry) = &cached {
                if !policy.check_for_change {
                    debug!("fetch: {} served from cache", request.name);
                    return Ok(Fetched {
                        payload: entry.payload.clone(),
                        origin: FetchOrigin::Cache,
                        probe_failed,
                        cache_errors,
                    });
                }
                match self.remote.probe(&request.location) {
                    Ok(probe) if !entry.is_stale(&probe) => {
                        debug!("fetch: {} unchanged, served from cache", request.name);
                        return Ok(Fetched {
                            payload: entry.payload.clone(),
                            origin: FetchOrigin::Cache,
                            probe_failed,
                            cache_errors,
                        });
                    }
                    Ok(probe) => {
                        debug!("fetch: {} changed remotely: {:?}", request.name, probe);
                        probed = Some(probe);
                    }
                    Err(e) => {
                        warn!("fetch: change probe failed for {}: {}", request.name, e);
                        probe_failed = true;
                    }
                }
            }
        }

        match self.retrieve_live(request) {
            Ok((payload, fingerprint)) => {
                let fingerprint = if fingerprint.is_known() {
                    fingerprint
                } else {
                    probed.unwrap_or(fingerprint)
                };
                if let Err(e) = self
                    .cache
                    .put(request.kind, &key, &payload, Some(fingerprint))
                {
                    warn!("fetch: could not cache {}: {}", request.name, e);
                    cache_errors.push(e.to_string());
                }
                info!(
                    "fetch: {} retrieved live ({} bytes)",
                    request.name,
                    payload.len()
                );
                Ok(Fetched {
                    payload,
                    origin: FetchOrigin::Live,
                    probe_failed,
                    cache_errors,
                })
            }
            Err(e) => match cached {
                Some(entry) if policy.use_cache_on_fail => {
                    warn!(
                        "fetch: {} failed ({}), falling back to cache stored at {}",
                        request.name, e, entry.stored_at
                    );
                    Ok(Fetched {
                        payload: entry.payload,
                        origin: FetchOrigin::Degraded,
                        probe_failed,
                        cache_errors,
                    })
                }
                _ => Err(e),
            },
        }
    }

    /// Fetches a source and parses its payload. Dropped rows are counted on
    /// the report.
    pub fn fetch_records<S: RecordSource>(
        &self,
        source: &S,
        policy: &FetchPolicy,
    ) -> FetchResult<FetchedBatch<S::Record>> {
        let request = source.request();
        let fetched = self.fetch(&request, policy)?;
        let batch = source.parse(&fetched.payload);
        if !batch.dropped.is_empty() {
            warn!(
                "fetch: {}: dropped {} malformed rows",
                request.name,
                batch.dropped.len()
            );
        }
        let report = SourceReport {
            name: request.name.clone(),
            kind: request.kind,
            location: request.location.clone(),
            origin: fetched.origin,
            records: batch.records.len(),
            dropped: batch.dropped.len(),
            probe_failed: fetched.probe_failed,
            cache_errors: fetched.cache_errors,
        };
        Ok(FetchedBatch { batch, report })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory remote. Locations missing from the map fail.
    #[derive(Default)]
    pub(crate) struct MemoryRemote {
        pub files: Mutex<HashMap<String, (String, Fingerprint)>>,
        pub retrievals: Mutex<usize>,
        pub probes: Mutex<usize>,
        /// When set, every probe fails while retrievals keep working.
        pub failing_probes: Mutex<bool>,
    }

    impl MemoryRemote {
        pub fn set(&self, location: &str, body: &str, modified: &str) {
            let fp = Fingerprint {
                size: Some(body.len() as u64),
                modified: Some(modified.to_string()),
            };
            self.files
                .lock()
                .unwrap()
                .insert(location.to_string(), (body.to_string(), fp));
        }

        pub fn remove(&self, location: &str) {
            self.files.lock().unwrap().remove(location);
        }

        fn lookup(&self, location: &str) -> FetchResult<(String, Fingerprint)> {
            self.files
                .lock()
                .unwrap()
                .get(location)
                .cloned()
                .context(StatusSnafu {
                    target: location,
                    status: 503u16,
                })
        }
    }

    impl Remote for MemoryRemote {
        fn probe(&self, location: &str) -> FetchResult<Fingerprint> {
            *self.probes.lock().unwrap() += 1;
            ensure!(
                !*self.failing_probes.lock().unwrap(),
                StatusSnafu {
                    target: location,
                    status: 500u16,
                }
            );
            self.lookup(location).map(|(_, fp)| fp)
        }

        fn retrieve(&self, location: &str) -> FetchResult<Download> {
            *self.retrievals.lock().unwrap() += 1;
            let (body, fingerprint) = self.lookup(location)?;
            Ok(Download {
                declared_length: fingerprint.size,
                body: body.into_bytes(),
                fingerprint,
            })
        }
    }

    fn request() -> FetchRequest {
        FetchRequest {
            kind: SourceKind::Results,
            name: "results/county".to_string(),
            location: "mem://county.txt".to_string(),
        }
    }

    const ALWAYS_LIVE: FetchPolicy = FetchPolicy {
        use_cache: false,
        check_for_change: false,
        use_cache_on_fail: false,
    };

    #[test]
    fn live_fetch_fills_cache() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path()).unwrap();
        let remote = MemoryRemote::default();
        remote.set("mem://county.txt", "v1", "t1");
        let fetcher = SourceFetcher::new(&remote, &cache);

        let f = fetcher.fetch(&request(), &ALWAYS_LIVE).unwrap();
        assert_eq!(f.origin, FetchOrigin::Live);
        assert_eq!(f.payload, "v1");
        let entry = cache
            .get(SourceKind::Results, &request().cache_key())
            .unwrap()
            .unwrap();
        assert_eq!(entry.payload, "v1");
    }

    #[test]
    fn unchanged_probe_serves_cache_without_download() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path()).unwrap();
        let remote = MemoryRemote::default();
        remote.set("mem://county.txt", "v1", "t1");
        let fetcher = SourceFetcher::new(&remote, &cache);
        fetcher.fetch(&request(), &ALWAYS_LIVE).unwrap();
        assert_eq!(*remote.retrievals.lock().unwrap(), 1);

        let f = fetcher
            .fetch(&request(), &FetchPolicy::DEFAULT_POLICY)
            .unwrap();
        assert_eq!(f.origin, FetchOrigin::Cache);
        assert_eq!(*remote.retrievals.lock().unwrap(), 1);
        assert_eq!(*remote.probes.lock().unwrap(), 1);

        // A change on the remote triggers a new download.
        remote.set("mem://county.txt", "v2-longer", "t2");
        let f = fetcher
            .fetch(&request(), &FetchPolicy::DEFAULT_POLICY)
            .unwrap();
        assert_eq!(f.origin, FetchOrigin::Live);
        assert_eq!(f.payload, "v2-longer");
        assert_eq!(*remote.retrievals.lock().unwrap(), 2);
    }

    #[test]
    fn cache_without_change_check_skips_remote() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path()).unwrap();
        let remote = MemoryRemote::default();
        cache
            .put(SourceKind::Results, &request().cache_key(), "cached", None)
            .unwrap();
        let fetcher = SourceFetcher::new(&remote, &cache);
        let policy = FetchPolicy {
            use_cache: true,
            check_for_change: false,
            use_cache_on_fail: false,
        };
        let f = fetcher.fetch(&request(), &policy).unwrap();
        assert_eq!(f.origin, FetchOrigin::Cache);
        assert_eq!(f.payload, "cached");
        assert_eq!(*remote.probes.lock().unwrap(), 0);
        assert_eq!(*remote.retrievals.lock().unwrap(), 0);
    }

    #[test]
    fn failed_fetch_falls_back_to_cache_when_allowed() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path()).unwrap();
        let remote = MemoryRemote::default();
        remote.set("mem://county.txt", "v1", "t1");
        let fetcher = SourceFetcher::new(&remote, &cache);
        fetcher.fetch(&request(), &ALWAYS_LIVE).unwrap();
        remote.remove("mem://county.txt");

        let fallback = FetchPolicy {
            use_cache: false,
            check_for_change: false,
            use_cache_on_fail: true,
        };
        let f = fetcher.fetch(&request(), &fallback).unwrap();
        assert!(f.is_degraded());
        assert_eq!(f.payload, "v1");

        let res = fetcher.fetch(&request(), &ALWAYS_LIVE);
        assert!(matches!(res, Err(FetchError::Status { status: 503, .. })));
    }

    #[test]
    fn failed_fetch_without_cache_propagates() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path()).unwrap();
        let remote = MemoryRemote::default();
        let fetcher = SourceFetcher::new(&remote, &cache);
        let res = fetcher.fetch(&request(), &FetchPolicy::DEFAULT_POLICY);
        assert!(res.is_err());
    }

    #[test]
    fn truncated_and_garbled_downloads_are_fetch_failures() {
        let short = Download {
            body: b"abc".to_vec(),
            declared_length: Some(10),
            fingerprint: Fingerprint::default(),
        };
        assert!(matches!(
            validate_download("x", short),
            Err(FetchError::Truncated {
                expected: 10,
                received: 3,
                ..
            })
        ));
        let garbled = Download {
            body: vec![0xff, 0xfe, 0x41],
            declared_length: Some(3),
            fingerprint: Fingerprint::default(),
        };
        assert!(matches!(
            validate_download("x", garbled),
            Err(FetchError::Encoding { .. })
        ));
        let fine = Download {
            body: b"27;Hennepin;850".to_vec(),
            declared_length: None,
            fingerprint: Fingerprint::default(),
        };
        assert_eq!(validate_download("x", fine).unwrap(), "27;Hennepin;850");
    }

    #[test]
    fn fs_remote_reads_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("county.txt");
        fs::write(&path, "27;Hennepin;850\n").unwrap();
        let location = path.display().to_string();
        let remote = FsRemote;
        let probe = remote.probe(&location).unwrap();
        assert_eq!(probe.size, Some(16));
        let d = remote.retrieve(&location).unwrap();
        assert_eq!(validate_download(&location, d).unwrap(), "27;Hennepin;850\n");
        assert!(remote.retrieve("/does/not/exist").is_err());
    }

    #[test]
    fn offline_serves_the_cache_only() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path()).unwrap();
        let fetcher = SourceFetcher::new(&OfflineRemote, &cache);
        let offline = FetchPolicy {
            use_cache: true,
            check_for_change: false,
            use_cache_on_fail: true,
        };
        assert!(matches!(
            fetcher.fetch(&request(), &offline),
            Err(FetchError::Io { .. })
        ));
        cache
            .put(SourceKind::Results, &request().cache_key(), "cached", None)
            .unwrap();
        let f = fetcher.fetch(&request(), &offline).unwrap();
        assert_eq!(f.origin, FetchOrigin::Cache);
        assert_eq!(f.payload, "cached");
    }

    #[test]
    fn failed_probe_falls_through_to_live() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path()).unwrap();
        let remote = MemoryRemote::default();
        remote.set("mem://county.txt", "v1", "t1");
        let fetcher = SourceFetcher::new(&remote, &cache);
        fetcher.fetch(&request(), &ALWAYS_LIVE).unwrap();

        remote.set("mem://county.txt", "v2", "t2");
        *remote.failing_probes.lock().unwrap() = true;
        let f = fetcher
            .fetch(&request(), &FetchPolicy::DEFAULT_POLICY)
            .unwrap();
        assert_eq!(f.origin, FetchOrigin::Live);
        assert_eq!(f.payload, "v2");
        assert!(f.probe_failed);
        assert!(f.cache_errors.is_empty());
    }

    #[test]
    fn corrupt_cache_entry_is_treated_as_missing() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path()).unwrap();
        let remote = MemoryRemote::default();
        remote.set("mem://county.txt", "v1", "t1");
        let fetcher = SourceFetcher::new(&remote, &cache);
        fetcher.fetch(&request(), &ALWAYS_LIVE).unwrap();
        fs::write(
            cache.entry_path(SourceKind::Results, &request().cache_key()),
            "{not json",
        )
        .unwrap();

        let f = fetcher
            .fetch(&request(), &FetchPolicy::DEFAULT_POLICY)
            .unwrap();
        assert_eq!(f.origin, FetchOrigin::Live);
        assert_eq!(f.payload, "v1");
        assert_eq!(f.cache_errors.len(), 1);
        // The live retrieval rewrote the entry.
        let entry = cache
            .get(SourceKind::Results, &request().cache_key())
            .unwrap()
            .unwrap();
        assert_eq!(entry.payload, "v1");

        // Nothing to fall back to when the entry is unreadable.
        fs::write(
            cache.entry_path(SourceKind::Results, &request().cache_key()),
            "{not json",
        )
        .unwrap();
        remote.remove("mem://county.txt");
        assert!(fetcher
            .fetch(&request(), &FetchPolicy::DEFAULT_POLICY)
            .is_err());
    }

    #[test]
    fn failed_cache_write_is_reported() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path()).unwrap();
        // A file where the namespace directory should be.
        fs::write(dir.path().join(SourceKind::Results.as_str()), "").unwrap();
        let remote = MemoryRemote::default();
        remote.set("mem://county.txt", "v1", "t1");
        let fetcher = SourceFetcher::new(&remote, &cache);

        let f = fetcher
            .fetch(&request(), &FetchPolicy::DEFAULT_POLICY)
            .unwrap();
        assert_eq!(f.origin, FetchOrigin::Live);
        assert_eq!(f.payload, "v1");
        assert_eq!(f.cache_errors.len(), 1);
        assert!(!f.probe_failed);
    }
}
