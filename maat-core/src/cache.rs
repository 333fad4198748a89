//! Self-refreshing cached values
//!
//! A `RefreshingCache` holds the last good value produced by an async update
//! closure and decides when to call it again:
//! - lazily on read once the refresh interval has elapsed
//! - eagerly through `force_refresh`
//! - never twice at the same time (a concurrent refresh returns the current value)
//!
//! A failed refresh never propagates: the error is logged and the value is
//! either kept or reset to the default depending on the `FailurePolicy`.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use tracing::{debug, error, info_span, trace, Span};

/// Async update closure. Receives a clone of the current value when the cache
/// was built with `pass_previous(true)`, `None` otherwise.
pub type UpdateFn<V> = Arc<dyn Fn(Option<V>) -> BoxFuture<'static, anyhow::Result<V>> + Send + Sync>;

/// What happens to the cached value when a refresh fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Keep serving the last successful value
    KeepPrevious,
    /// Revert to the default value given at construction
    ResetToDefault,
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    refreshed_at: Option<Instant>,
    updated_at: Option<DateTime<Utc>>,
    failed: bool,
}

pub struct RefreshingCache<V> {
    name: String,
    interval: Duration,
    policy: FailurePolicy,
    refresh_on_read: bool,
    pass_previous: bool,
    default: V,
    update: UpdateFn<V>,
    entry: RwLock<Entry<V>>,
    refreshing: tokio::sync::Mutex<()>,
    span: Span,
}

/// Builder returned by [`RefreshingCache::builder`]
pub struct CacheBuilder<V> {
    name: String,
    default: V,
    update: UpdateFn<V>,
    interval: Duration,
    policy: FailurePolicy,
    refresh_on_read: bool,
    pass_previous: bool,
}

impl<V> CacheBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Refresh stale values inside `get()`. When disabled, only
    /// `force_refresh()` updates the value.
    pub fn refresh_on_read(mut self, enabled: bool) -> Self {
        self.refresh_on_read = enabled;
        self
    }

    pub fn pass_previous(mut self, enabled: bool) -> Self {
        self.pass_previous = enabled;
        self
    }

    pub fn build(self) -> RefreshingCache<V> {
        let span = info_span!("cache", name = %self.name);
        RefreshingCache {
            entry: RwLock::new(Entry {
                value: self.default.clone(),
                refreshed_at: None,
                updated_at: None,
                failed: false,
            }),
            name: self.name,
            interval: self.interval,
            policy: self.policy,
            refresh_on_read: self.refresh_on_read,
            pass_previous: self.pass_previous,
            default: self.default,
            update: self.update,
            refreshing: tokio::sync::Mutex::new(()),
            span,
        }
    }
}

impl<V> RefreshingCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Start building a cache around `update`.
    ///
    /// Defaults: one second interval, `KeepPrevious`, refresh on read, previous
    /// value passed to the closure.
    pub fn builder<F, Fut>(name: impl Into<String>, default: V, update: F) -> CacheBuilder<V>
    where
        F: Fn(Option<V>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let update: UpdateFn<V> = Arc::new(move |previous| update(previous).boxed());
        CacheBuilder {
            name: name.into(),
            default,
            update,
            interval: Duration::from_secs(1),
            policy: FailurePolicy::KeepPrevious,
            refresh_on_read: true,
            pass_previous: true,
        }
    }

    /// Current value, refreshed first when stale and `refresh_on_read` is set
    pub async fn get(&self) -> V {
        if self.refresh_on_read && self.is_stale() {
            self.refresh().await;
        }
        self.peek()
    }

    /// Refresh regardless of the interval, then return the value
    pub async fn force_refresh(&self) -> V {
        self.refresh().await;
        self.peek()
    }

    /// Current value without any refresh
    pub fn peek(&self) -> V {
        self.entry.read().value.clone()
    }

    /// True when the value was never refreshed successfully or is older than the interval
    pub fn is_stale(&self) -> bool {
        match self.entry.read().refreshed_at {
            Some(at) => at.elapsed() >= self.interval,
            None => true,
        }
    }

    /// Wall-clock time of the last successful refresh
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.entry.read().updated_at
    }

    /// Elapsed time since the last successful refresh
    pub fn age(&self) -> Option<Duration> {
        self.entry.read().refreshed_at.map(|at| at.elapsed())
    }

    pub fn failed(&self) -> bool {
        self.entry.read().failed
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn refresh(&self) {
        let Ok(_guard) = self.refreshing.try_lock() else {
            debug!(parent: &self.span, "refresh already running, serving current value");
            return;
        };

        let previous = self.pass_previous.then(|| self.peek());
        match (self.update)(previous).await {
            Ok(value) => {
                let mut entry = self.entry.write();
                entry.value = value;
                entry.refreshed_at = Some(Instant::now());
                entry.updated_at = Some(Utc::now());
                entry.failed = false;
                trace!(parent: &self.span, "refreshed");
            }
            Err(e) => {
                let mut entry = self.entry.write();
                entry.failed = true;
                if self.policy == FailurePolicy::ResetToDefault {
                    entry.value = self.default.clone();
                }
                error!(parent: &self.span, error = %e, policy = ?self.policy, "refresh failed");
            }
        }
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for RefreshingCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshingCache")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("policy", &self.policy)
            .field("entry", &*self.entry.read())
            .finish()
    }
}
