//! Per-execution options.

use std::time::Duration;

/// What to do with server-reported errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Any error fails the execution and discards the data.
    #[default]
    None,
    /// Errors are dropped and whatever data came back is returned.
    Ignore,
    /// Data and errors are both returned.
    All,
}

/// Where query data is read from and whether results are cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Serve from the cache when every field is present, else fetch.
    #[default]
    CacheFirst,
    /// Always fetch; write the result to the cache.
    NetworkOnly,
    /// Never fetch; a cache miss is an error.
    CacheOnly,
    /// Always fetch; leave the cache untouched.
    NoCache,
}

impl FetchPolicy {
    pub(crate) fn reads_cache(self) -> bool {
        matches!(self, Self::CacheFirst | Self::CacheOnly)
    }

    pub(crate) fn writes_cache(self) -> bool {
        !matches!(self, Self::NoCache)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Do not execute at all; the result has no data.
    pub skip: bool,
    /// Refetch on this interval while a query handle is alive.
    pub poll_interval: Option<Duration>,
    pub error_policy: ErrorPolicy,
    pub fetch_policy: FetchPolicy,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }
}
