//! The remote activity store, seen only through its request/response API.

mod client;
#[cfg(test)]
pub(crate) mod memory;

use std::future::Future;
use thiserror::Error;

use crate::activity::{Activity, ActivityMetrics, ActivityPatch, NewActivity};

pub use client::HttpActivityStore;

/// Failure talking to the remote store.
#[derive(Debug, Error)]
pub enum RemoteError {
  #[error("request failed: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("store returned {status}: {body}")]
  Status { status: u16, body: String },
  #[error("failed to decode store response: {0}")]
  Decode(#[from] serde_json::Error),
  #[error("invalid store url: {0}")]
  Url(#[from] url::ParseError),
  #[error("store unavailable: {0}")]
  Unavailable(String),
}

/// Request/response operations of the remote store.
///
/// Payloads and responses follow the Activity wire shape.
pub trait ActivityStore: Send + Sync + 'static {
  /// `POST /activities`
  fn create(
    &self,
    activity: &NewActivity,
  ) -> impl Future<Output = Result<Activity, RemoteError>> + Send;

  /// `PATCH /activities/:id`
  fn update(
    &self,
    id: &str,
    patch: &ActivityPatch,
  ) -> impl Future<Output = Result<Activity, RemoteError>> + Send;

  /// `POST /activities/:id/complete`
  fn complete(&self, id: &str) -> impl Future<Output = Result<Activity, RemoteError>> + Send;

  /// `DELETE /activities/:id`
  fn delete(&self, id: &str) -> impl Future<Output = Result<(), RemoteError>> + Send;

  /// `GET /activities`
  fn list(&self) -> impl Future<Output = Result<Vec<Activity>, RemoteError>> + Send;

  /// `GET /activities/metrics`
  fn metrics(&self) -> impl Future<Output = Result<ActivityMetrics, RemoteError>> + Send;
}
