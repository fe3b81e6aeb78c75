use thiserror::Error;

/// Failures surfaced by a repository backend.
///
/// The core never sees SQL; whatever the backend hits is folded into a
/// message here and propagated.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend: {0}")]
    Backend(String),
}
