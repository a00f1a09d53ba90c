//! Package-name → version cache.
//!
//! Querying the platform's package-info service is expensive, and the
//! compilation orchestrator needs a version for every package it touches.
//! [`PackageVersionCache`] bulk-fetches the whole version map once at
//! construction and fills individual misses lazily.
//!
//! A concurrent [`update`](PackageVersionCache::update) can race a
//! [`get_or_query`](PackageVersionCache::get_or_query) miss-then-fill;
//! each call is individually serialized and the last write wins. Versions
//! are monotonic identifiers, not correctness-critical counters, so the
//! relaxed semantics are acceptable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, error, warn};

/// Mapping package name → version code.
pub type VersionMap = HashMap<String, i64>;

/// Sentinel returned when a package's version cannot be determined.
/// Callers must treat it as an absence, never as a real version.
pub const UNKNOWN_VERSION: i64 = -1;

/// Errors from the package-info provider.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PackageError {
    /// The package-info service could not be reached.
    #[error("package-info provider unavailable: {0}")]
    ProviderUnavailable(String),
}

/// Capability over the platform's package-info service.
pub trait PackageInfoProvider: Send + Sync {
    /// Fetches the version of every installed package.
    fn version_map(&self) -> Result<VersionMap, PackageError>;

    /// Fetches the version of a single package, `None` if unknown.
    fn package_version(&self, name: &str) -> Option<i64>;
}

/// Guarded package → version map over a [`PackageInfoProvider`].
pub struct PackageVersionCache {
    provider: Arc<dyn PackageInfoProvider>,
    map: Mutex<VersionMap>,
}

impl PackageVersionCache {
    /// Builds the cache by bulk-fetching the whole version map.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unavailable; there is no
    /// usable cache without an initial map.
    pub fn new(provider: Arc<dyn PackageInfoProvider>) -> Result<Self, PackageError> {
        let map = provider.version_map()?;
        debug!(packages = map.len(), "package version cache filled");
        Ok(Self {
            provider,
            map: Mutex::new(map),
        })
    }

    /// Wholesale refresh: replaces the entire map from the provider.
    pub fn update(&self) -> Result<(), PackageError> {
        let fresh = self.provider.version_map()?;
        let mut map = self.map.lock().unwrap();
        debug!(
            old_size = map.len(),
            new_size = fresh.len(),
            "package version cache updated"
        );
        *map = fresh;
        Ok(())
    }

    /// Returns the cached version for `name`, querying the provider on a
    /// miss. An unresolvable package yields [`UNKNOWN_VERSION`].
    pub fn get_or_query(&self, name: &str) -> i64 {
        let mut map = self.map.lock().unwrap();
        if let Some(&version) = map.get(name) {
            return version;
        }

        warn!(package = name, "version not cached, querying provider");
        match self.provider.package_version(name) {
            Some(version) => {
                map.insert(name.to_string(), version);
                version
            }
            None => {
                error!(package = name, "package version unknown");
                UNKNOWN_VERSION
            }
        }
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PackageVersionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageVersionCache")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FakeProvider {
        bulk: VersionMap,
        singles: VersionMap,
        single_calls: AtomicUsize,
        available: bool,
    }

    impl FakeProvider {
        fn new(bulk: &[(&str, i64)], singles: &[(&str, i64)]) -> Self {
            Self {
                bulk: bulk.iter().map(|(n, v)| ((*n).to_string(), *v)).collect(),
                singles: singles.iter().map(|(n, v)| ((*n).to_string(), *v)).collect(),
                single_calls: AtomicUsize::new(0),
                available: true,
            }
        }

        fn unavailable() -> Self {
            Self {
                bulk: VersionMap::new(),
                singles: VersionMap::new(),
                single_calls: AtomicUsize::new(0),
                available: false,
            }
        }
    }

    impl PackageInfoProvider for FakeProvider {
        fn version_map(&self) -> Result<VersionMap, PackageError> {
            if self.available {
                Ok(self.bulk.clone())
            } else {
                Err(PackageError::ProviderUnavailable("no service".to_string()))
            }
        }

        fn package_version(&self, name: &str) -> Option<i64> {
            self.single_calls.fetch_add(1, Ordering::Relaxed);
            self.singles.get(name).copied()
        }
    }

    #[test]
    fn test_new_bulk_fills() {
        let provider = Arc::new(FakeProvider::new(&[("a", 1), ("b", 2)], &[]));
        let cache = PackageVersionCache::new(provider).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_or_query("a"), 1);
        assert_eq!(cache.get_or_query("b"), 2);
    }

    #[test]
    fn test_new_fails_when_provider_unavailable() {
        let provider = Arc::new(FakeProvider::unavailable());
        assert!(PackageVersionCache::new(provider).is_err());
    }

    #[test]
    fn test_miss_fills_from_single_query_once() {
        let provider = Arc::new(FakeProvider::new(&[("a", 1)], &[("late", 9)]));
        let cache = PackageVersionCache::new(provider.clone()).unwrap();

        assert_eq!(cache.get_or_query("late"), 9);
        assert_eq!(provider.single_calls.load(Ordering::Relaxed), 1);

        // Second lookup is served from cache, no extra provider call.
        assert_eq!(cache.get_or_query("late"), 9);
        assert_eq!(provider.single_calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unresolvable_package_yields_sentinel() {
        let provider = Arc::new(FakeProvider::new(&[], &[]));
        let cache = PackageVersionCache::new(provider).unwrap();
        assert_eq!(cache.get_or_query("ghost"), UNKNOWN_VERSION);
        // The sentinel is not cached; absence stays queryable.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_update_replaces_map_wholesale() {
        let provider = Arc::new(FakeProvider::new(&[("a", 1)], &[]));
        let cache = PackageVersionCache::new(provider.clone()).unwrap();
        assert_eq!(cache.get_or_query("a"), 1);

        cache.update().unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_or_query("a"), 1);
    }
}
