use thiserror::Error;

use crate::activity::RelationError;
use crate::remote::RemoteError;

/// Errors surfaced by cache reads, mutations and syncs.
#[derive(Debug, Error)]
pub enum SyncError {
  /// The remote store call failed. The local cache has already been rolled
  /// back or marked stale when this is returned.
  #[error("{operation} failed: {source}")]
  Remote {
    operation: &'static str,
    #[source]
    source: RemoteError,
  },
  /// The relation fields were refused before anything was written.
  #[error("invalid activity relations: {0}")]
  InvalidRelations(#[from] RelationError),
}

impl SyncError {
  pub fn remote(operation: &'static str, source: RemoteError) -> Self {
    Self::Remote { operation, source }
  }
}

pub type SyncResult<T> = Result<T, SyncError>;
