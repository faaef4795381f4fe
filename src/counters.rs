//! Performance counters: how many times we do various important operations.
//!
//! `backpak::counters` keeps one global `EnumMap<Op, AtomicUsize>` behind
//! `lazy_static`. Neither crate is in this crate's dependency stack, so the
//! counters here are plain fields on a `LazyLock`-initialized struct instead
//! - same global-atomics idea, narrowed to the cache and tree operations this
//! VFS actually performs.

use std::sync::LazyLock;
use std::sync::atomic::{AtomicUsize, Ordering, fence};

#[derive(Default)]
pub struct Counters {
    pub cache_hit: AtomicUsize,
    pub cache_miss: AtomicUsize,
    pub cache_insert: AtomicUsize,
    pub cache_eviction: AtomicUsize,
    pub tree_materialize_hit: AtomicUsize,
    pub tree_materialize_miss: AtomicUsize,
    pub blob_save: AtomicUsize,
    pub blob_save_dedup: AtomicUsize,
}

static COUNTERS: LazyLock<Counters> = LazyLock::new(Counters::default);

pub fn counters() -> &'static Counters {
    &COUNTERS
}

#[inline]
pub fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Logs every non-zero counter at `debug` level. Meant to be called once,
/// near process exit, by whatever binds this crate to a `Repository`.
pub fn log_counts() {
    fence(Ordering::SeqCst);
    let c = counters();

    let counts = [
        ("cache hits", &c.cache_hit),
        ("cache misses", &c.cache_miss),
        ("cache insertions", &c.cache_insert),
        ("cache evictions", &c.cache_eviction),
        ("tree materializations (cached)", &c.tree_materialize_hit),
        ("tree materializations (rebuilt)", &c.tree_materialize_miss),
        ("blobs saved", &c.blob_save),
        ("blobs saved but already present", &c.blob_save_dedup),
    ];

    let nonzero: Vec<_> = counts
        .iter()
        .map(|(name, v)| (*name, v.load(Ordering::Relaxed)))
        .filter(|(_, v)| *v > 0)
        .collect();

    if nonzero.is_empty() {
        return;
    }

    tracing::debug!("Counters:");
    for (name, count) in nonzero {
        tracing::debug!("{count:6} {name}");
    }
}
