use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ActivityStore, RemoteError};
use crate::activity::{Activity, ActivityMetrics, ActivityPatch, NewActivity};
use crate::config::Config;

/// HTTP client for the activity endpoints.
#[derive(Clone)]
pub struct HttpActivityStore {
  http: reqwest::Client,
  base: Url,
  token: String,
}

impl HttpActivityStore {
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_api_token()?;

    let mut base = Url::parse(&config.remote.url)
      .map_err(|e| eyre!("Invalid remote url {}: {}", config.remote.url, e))?;
    // Url::join replaces the last segment unless the path ends in a slash
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.remote.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base, token })
  }

  fn collection_url(&self) -> Result<Url, RemoteError> {
    Ok(self.base.join("activities")?)
  }

  /// `activities/<id>[/<action>]`, with the id percent-encoded as one segment.
  fn activity_url(&self, id: &str, action: Option<&str>) -> Result<Url, RemoteError> {
    let mut url = self.collection_url()?;
    if let Ok(mut segments) = url.path_segments_mut() {
      segments.push(id);
      segments.extend(action);
    }
    Ok(url)
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    debug!(%method, %url, "activity store request");
    self.http.request(method, url).bearer_auth(&self.token)
  }

  async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
    let bytes = Self::checked(request).await?.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
  }

  async fn checked(request: RequestBuilder) -> Result<reqwest::Response, RemoteError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Status {
      status: status.as_u16(),
      body,
    })
  }
}

impl ActivityStore for HttpActivityStore {
  async fn create(&self, activity: &NewActivity) -> Result<Activity, RemoteError> {
    let request = self
      .request(Method::POST, self.collection_url()?)
      .json(activity);
    self.send(request).await
  }

  async fn update(&self, id: &str, patch: &ActivityPatch) -> Result<Activity, RemoteError> {
    let request = self
      .request(Method::PATCH, self.activity_url(id, None)?)
      .json(patch);
    self.send(request).await
  }

  async fn complete(&self, id: &str) -> Result<Activity, RemoteError> {
    let request = self.request(Method::POST, self.activity_url(id, Some("complete"))?);
    self.send(request).await
  }

  async fn delete(&self, id: &str) -> Result<(), RemoteError> {
    let request = self.request(Method::DELETE, self.activity_url(id, None)?);
    Self::checked(request).await?;
    Ok(())
  }

  async fn list(&self) -> Result<Vec<Activity>, RemoteError> {
    let request = self.request(Method::GET, self.collection_url()?);
    self.send(request).await
  }

  async fn metrics(&self) -> Result<ActivityMetrics, RemoteError> {
    let request = self.request(Method::GET, self.activity_url("metrics", None)?);
    self.send(request).await
  }
}
