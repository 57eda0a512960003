//! HTTP request handlers.

mod internal;

pub use internal::{health_check, prepare_rotation, storage_cleanup, trigger_sync};
