//! RAII guard for execution locks.
//!
//! The lock is released when the guard goes out of scope, whether the action
//! finished, failed, or the run was cancelled while it was in flight.

use tracing::debug;

type Release = Box<dyn FnOnce() + Send + Sync>;

/// Held execution lock.
///
/// # Example
///
/// ```ignore
/// if let Some(guard) = locks.try_acquire("orders-db-cutover").await? {
///     // ... run the action ...
/// } // lock released here
/// ```
pub struct LockGuard {
    key: String,
    release: Option<Release>,
}

impl LockGuard {
    /// Create a guard that runs `release` exactly once, on drop or on
    /// [`LockGuard::release`].
    pub fn new(key: impl Into<String>, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        let key = key.into();
        debug!(lock = %key, "Lock acquired");
        Self {
            key,
            release: Some(Box::new(release)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release now instead of at end of scope.
    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            debug!(lock = %self.key, "Lock released");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("held", &self.release.is_some())
            .finish()
    }
}
