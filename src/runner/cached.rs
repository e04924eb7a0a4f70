//! Caching decorator over the [`Runner`] capability set.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::cache::{op, CacheConfig, CacheKey, CacheStats, CacheValue, ContextCache};
use crate::error::Result;
use crate::facts::Facts;

use super::{CommandOutput, Runner, Target};

/// Identity used when neither facts nor the identity probe can name the
/// target. Entries under the sentinel still cache correctly; they are merely
/// lumped into one scope for per-identity invalidation.
pub const FALLBACK_IDENTITY: &str = "unknown-host";

/// A [`Runner`] that transparently caches the idempotent probe subset.
///
/// Each decorated call resolves an identity for the target, builds a
/// [`CacheKey`] from the operation and its semantically relevant arguments,
/// and consults the cache. On a miss the wrapped runner is invoked outside
/// any cache lock; only successful results are stored, so a failing probe
/// behaves exactly as it would undecorated and is retried on the next call.
///
/// Concurrent misses for the same key each invoke the wrapped probe; this is
/// a cache, not a single-flight barrier, and the last write wins.
#[derive(Clone)]
pub struct CachedRunner {
    inner: Arc<dyn Runner>,
    cache: Arc<ContextCache>,
}

impl fmt::Debug for CachedRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedRunner")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl CachedRunner {
    /// Decorate `inner` with a fresh cache built from `config`.
    pub fn new(inner: Arc<dyn Runner>, config: CacheConfig) -> Self {
        Self::with_cache(inner, Arc::new(ContextCache::new(config)))
    }

    /// Decorate `inner` with an existing (possibly shared) cache.
    pub fn with_cache(inner: Arc<dyn Runner>, cache: Arc<ContextCache>) -> Self {
        Self { inner, cache }
    }

    /// The cache behind this decorator.
    pub fn cache(&self) -> &Arc<ContextCache> {
        &self.cache
    }

    /// Drop every cached result scoped to `identity` (e.g. after a task
    /// changed state on that host). Returns the number of entries removed.
    pub fn invalidate_for_identity(&self, identity: &str) -> usize {
        self.cache.invalidate_identity(identity)
    }

    /// Snapshot of cache occupancy.
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Stop the cache's background sweeper. Idempotent; decorated calls stay
    /// valid afterwards.
    pub fn close(&self) {
        self.cache.close();
    }

    /// Resolve the identity a cached result should be scoped to: a name
    /// carried by supplied facts, else the cheap identity probe, else the
    /// fixed sentinel.
    async fn resolve_identity(&self, target: &Target, facts: Option<&Facts>) -> String {
        if let Some(name) = facts.and_then(Facts::name) {
            return name.to_string();
        }
        match self.inner.identity(target).await {
            Ok(name) if !name.is_empty() => name,
            Ok(_) | Err(_) => {
                trace!(target = %target, "identity probe failed, using sentinel identity");
                FALLBACK_IDENTITY.to_string()
            }
        }
    }

    /// Shared miss path for the boolean probes: consult the cache, otherwise
    /// run `probe` and store its result on success.
    async fn cached_flag<F, Fut>(&self, key: CacheKey, probe: F) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<bool>>,
    {
        if let Some(value) = self.cache.get(&key) {
            // A non-flag payload under this key is stale or incompatible;
            // fall through and recompute.
            if let Some(flag) = value.as_flag() {
                return Ok(flag);
            }
            trace!(key = %key, "cached payload has unexpected type, recomputing");
        }
        let flag = probe().await?;
        self.cache.set(&key, CacheValue::Flag(flag));
        Ok(flag)
    }
}

#[async_trait]
impl Runner for CachedRunner {
    /// Pass-through; the identity probe is the cheap primitive the cache
    /// keys on, caching it would be circular.
    async fn identity(&self, target: &Target) -> Result<String> {
        self.inner.identity(target).await
    }

    async fn gather_facts(&self, target: &Target) -> Result<Facts> {
        let identity = self.resolve_identity(target, None).await;
        let key = CacheKey::without_args(identity, op::GATHER_FACTS);

        if let Some(value) = self.cache.get(&key) {
            if let Some(facts) = value.as_facts() {
                return Ok(facts.clone());
            }
            trace!(key = %key, "cached payload has unexpected type, recomputing");
        }
        let facts = self.inner.gather_facts(target).await?;
        self.cache.set(&key, CacheValue::Facts(facts.clone()));
        Ok(facts)
    }

    async fn check_command(&self, target: &Target, command: &str, sudo: bool) -> Result<bool> {
        let identity = self.resolve_identity(target, None).await;
        let key = CacheKey::new(
            identity,
            op::CHECK_COMMAND,
            vec![command.to_string(), sudo.to_string()],
        );
        self.cached_flag(key, || self.inner.check_command(target, command, sudo))
            .await
    }

    async fn path_exists(&self, target: &Target, path: &str) -> Result<bool> {
        let identity = self.resolve_identity(target, None).await;
        let key = CacheKey::new(identity, op::PATH_EXISTS, vec![path.to_string()]);
        self.cached_flag(key, || self.inner.path_exists(target, path))
            .await
    }

    async fn package_installed(
        &self,
        target: &Target,
        facts: &Facts,
        package: &str,
    ) -> Result<bool> {
        let identity = self.resolve_identity(target, Some(facts)).await;
        let key = CacheKey::new(identity, op::PACKAGE_INSTALLED, vec![package.to_string()]);
        self.cached_flag(key, || self.inner.package_installed(target, facts, package))
            .await
    }

    async fn service_active(&self, target: &Target, facts: &Facts, service: &str) -> Result<bool> {
        let identity = self.resolve_identity(target, Some(facts)).await;
        let key = CacheKey::new(identity, op::SERVICE_ACTIVE, vec![service.to_string()]);
        self.cached_flag(key, || self.inner.service_active(target, facts, service))
            .await
    }

    /// Pass-through; raw execution is not idempotent and never cached.
    async fn execute(&self, target: &Target, command: &str, sudo: bool) -> Result<CommandOutput> {
        self.inner.execute(target, command, sudo).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::runner::MockRunner;
    use std::sync::atomic::Ordering;

    fn decorate(mock: MockRunner) -> CachedRunner {
        CachedRunner::new(Arc::new(mock), CacheConfig::default())
    }

    #[tokio::test]
    async fn test_service_active_hit_within_ttl() {
        let mut mock = MockRunner::new();
        mock.expect_service_active()
            .times(1)
            .returning(|_, _, _| Ok(true));

        let runner = decorate(mock);
        let target = Target::new("10.0.0.4");
        let facts = Facts::with_name("h1");

        assert!(runner.service_active(&target, &facts, "nginx").await.unwrap());
        assert!(runner.service_active(&target, &facts, "nginx").await.unwrap());

        let metrics = runner.cache().metrics();
        assert_eq!(metrics.hits.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.misses.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_gather_facts_scoped_by_identity_probe() {
        let mut mock = MockRunner::new();
        mock.expect_identity()
            .times(2)
            .returning(|_| Ok("web01".to_string()));
        mock.expect_gather_facts()
            .times(1)
            .returning(|_| Ok(Facts::with_name("web01")));

        let runner = decorate(mock);
        let target = Target::new("10.0.0.4");

        let first = runner.gather_facts(&target).await.unwrap();
        let second = runner.gather_facts(&target).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(runner.invalidate_for_identity("web01"), 1);
    }

    #[tokio::test]
    async fn test_probe_failure_is_not_cached() {
        let mut mock = MockRunner::new();
        mock.expect_identity()
            .times(3)
            .returning(|_| Ok("web01".to_string()));
        mock.expect_path_exists()
            .times(1)
            .returning(|_, _| Err(Error::probe("web01", "path_exists", "connection reset")));
        mock.expect_path_exists()
            .times(1)
            .returning(|_, _| Ok(true));

        let runner = decorate(mock);
        let target = Target::new("10.0.0.4");

        assert!(runner.path_exists(&target, "/etc/nginx").await.is_err());
        // The failure was not cached; this call reaches the wrapped probe.
        assert!(runner.path_exists(&target, "/etc/nginx").await.unwrap());
        // The success was cached; this one does not.
        assert!(runner.path_exists(&target, "/etc/nginx").await.unwrap());
    }

    #[tokio::test]
    async fn test_type_mismatch_is_treated_as_miss() {
        let mut mock = MockRunner::new();
        mock.expect_service_active()
            .times(1)
            .returning(|_, _, _| Ok(true));

        let cache = Arc::new(ContextCache::new(CacheConfig::default()));
        // Seed the exact key the decorator will build, but with the wrong
        // payload type.
        let key = CacheKey::new("h1", op::SERVICE_ACTIVE, vec!["nginx".to_string()]);
        cache.set(&key, CacheValue::Facts(Facts::with_name("h1")));

        let runner = CachedRunner::with_cache(Arc::new(mock), Arc::clone(&cache));
        let target = Target::new("10.0.0.4");
        let facts = Facts::with_name("h1");

        assert!(runner.service_active(&target, &facts, "nginx").await.unwrap());
        // The recomputed result replaced the mismatched payload.
        assert_eq!(cache.get(&key), Some(CacheValue::Flag(true)));
    }

    #[tokio::test]
    async fn test_identity_probe_failure_falls_back_to_sentinel() {
        let mut mock = MockRunner::new();
        mock.expect_identity()
            .times(2)
            .returning(|_| Err(Error::probe("10.0.0.4", "identity", "timed out")));
        mock.expect_check_command()
            .times(1)
            .returning(|_, _, _| Ok(false));

        let runner = decorate(mock);
        let target = Target::new("10.0.0.4");

        assert!(!runner.check_command(&target, "docker", false).await.unwrap());
        assert!(!runner.check_command(&target, "docker", false).await.unwrap());
        assert_eq!(runner.invalidate_for_identity(FALLBACK_IDENTITY), 1);
    }

    #[tokio::test]
    async fn test_facts_without_name_fall_back_to_probe() {
        let mut mock = MockRunner::new();
        mock.expect_identity()
            .times(1)
            .returning(|_| Ok("db01".to_string()));
        mock.expect_package_installed()
            .times(1)
            .returning(|_, _, _| Ok(true));

        let runner = decorate(mock);
        let target = Target::new("10.0.0.5");
        let nameless = Facts::new();

        assert!(runner.package_installed(&target, &nameless, "postgresql").await.unwrap());
        assert_eq!(runner.invalidate_for_identity("db01"), 1);
    }

    #[tokio::test]
    async fn test_execute_passes_through_uncached() {
        let mut mock = MockRunner::new();
        mock.expect_execute().times(2).returning(|_, _, _| {
            Ok(CommandOutput {
                stdout: "ok\n".to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            })
        });

        let runner = decorate(mock);
        let target = Target::new("10.0.0.4");

        assert!(runner.execute(&target, "systemctl restart nginx", true).await.unwrap().success());
        assert!(runner.execute(&target, "systemctl restart nginx", true).await.unwrap().success());
        assert_eq!(runner.stats().total, 0);
    }

    #[tokio::test]
    async fn test_sudo_flag_is_part_of_the_key() {
        let mut mock = MockRunner::new();
        mock.expect_identity()
            .times(2)
            .returning(|_| Ok("web01".to_string()));
        mock.expect_check_command()
            .times(1)
            .returning(|_, _, sudo| Ok(sudo));
        mock.expect_check_command()
            .times(1)
            .returning(|_, _, sudo| Ok(sudo));

        let runner = decorate(mock);
        let target = Target::new("10.0.0.4");

        assert!(!runner.check_command(&target, "zfs", false).await.unwrap());
        assert!(runner.check_command(&target, "zfs", true).await.unwrap());
        assert_eq!(runner.stats().total, 2);
    }
}
