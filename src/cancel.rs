//! A cooperative cancellation flag (spec §5: "a context-like cancellation
//! token is propagated into all Repository calls; on cancellation, the
//! current operation fails with `CANCELLED`").
//!
//! `backpak` has no equivalent - its CLI runs each command to completion or
//! not at all - so this is new. Grounded in the same plain
//! `Arc<AtomicBool>`-flag idiom this crate already uses for
//! [`crate::node::Node`]'s `open_writers`/`open_handles`/advisory-lock
//! state, rather than pulling in a dedicated cancellation-token crate the
//! teacher's stack doesn't already carry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, VfsError};

/// Shared by cloning: every clone observes the same cancellation.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Requests cancellation of every operation sharing this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails `CANCELLED` if cancellation has been requested. Called at the
    /// top of every [`crate::fs::Filesystem`] operation and between
    /// Repository-touching steps of long-running ones (commit, chunking).
    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(VfsError::Cancelled)
        } else {
            Ok(())
        }
    }
}
