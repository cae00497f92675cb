//! RAII resource guards for automatic cleanup.
//!
//! - [`LockGuard`] - Releases a per-(node, action) execution lock on drop

mod lock_guard;

pub use lock_guard::LockGuard;
