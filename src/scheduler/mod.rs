//! Periodic cleanup of expired support bundles.

mod engine;

pub use self::engine::run_cleanup_loop;
