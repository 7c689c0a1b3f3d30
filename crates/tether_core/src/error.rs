use crate::handle::HandleId;
use thiserror::Error;

/// Failures when resolving a handle to its native object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("handle {0} refers to storage whose owner is gone")]
    Expired(HandleId),

    #[error("handle {0} has already been released")]
    Stale(HandleId),
}
