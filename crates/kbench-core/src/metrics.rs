//! Process-global evaluation counters.
//!
//! Counters are bumped at the call site; [`Metrics::flush`] emits all of
//! them as one `info!` event, typically at the end of a CLI command.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    evaluations: AtomicU64,
    builds_invoked: AtomicU64,
    cache_hits: AtomicU64,
    compile_failures: AtomicU64,
    timeouts: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            evaluations: AtomicU64::new(0),
            builds_invoked: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            compile_failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    pub fn inc_evaluations(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluations", "counter incremented");
    }

    /// Count one toolchain invocation.
    pub fn inc_builds(&self) {
        self.builds_invoked.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "builds_invoked", "counter incremented");
    }

    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cache_hits", "counter incremented");
    }

    pub fn inc_compile_failures(&self) {
        self.compile_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "compile_failures", "counter incremented");
    }

    pub fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "timeouts", "counter incremented");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            evaluations = self.evaluations(),
            builds_invoked = self.builds_invoked(),
            cache_hits = self.cache_hits(),
            compile_failures = self.compile_failures(),
            timeouts = self.timeouts(),
        );
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn builds_invoked(&self) -> u64 {
        self.builds_invoked.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn compile_failures(&self) -> u64 {
        self.compile_failures.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.evaluations.store(0, Ordering::Relaxed);
        self.builds_invoked.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.compile_failures.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_builds();
        m.inc_builds();
        m.inc_cache_hits();
        m.inc_timeouts();
        assert_eq!(m.builds_invoked(), 2);
        assert_eq!(m.cache_hits(), 1);
        assert_eq!(m.timeouts(), 1);
        assert_eq!(m.evaluations(), 0);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_evaluations();
        m.inc_compile_failures();
        m.reset();
        assert_eq!(m.evaluations(), 0);
        assert_eq!(m.compile_failures(), 0);
    }
}
