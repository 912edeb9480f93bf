use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::cache::{ResourceKey, Transport};
use crate::config::Config;
use crate::error::{ResourceError, ResourceResult};

/// Error bodies longer than this are truncated in messages
const MAX_ERROR_BODY_LEN: usize = 500;

/// HTTP transport for the authoring API.
///
/// Resource keys are paths appended to the base URL: collections are read
/// with `GET {base}{key}` and created with `POST {base}{key}`, members are
/// written with `PUT`/`DELETE {base}{key}/{id}`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
  client: Client,
  base_url: String,
}

impl HttpTransport {
  pub fn new(config: &Config) -> Result<Self> {
    Self::with_timeout(&config.api.url, config.timeout())
  }

  pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
    Url::parse(base_url).map_err(|e| eyre!("Invalid API url {}: {}", base_url, e))?;

    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url: base_url.trim_end_matches('/').to_string(),
    })
  }

  fn url(&self, key: &ResourceKey) -> ResourceResult<Url> {
    let raw = format!("{}{}", self.base_url, key);
    Url::parse(&raw).map_err(|e| ResourceError::invalid(format!("invalid resource url {}: {}", raw, e)))
  }

  fn member_url(&self, key: &ResourceKey, id: &str) -> ResourceResult<Url> {
    let mut url = self.url(key)?;
    url
      .path_segments_mut()
      .map_err(|_| ResourceError::invalid(format!("{} cannot have members", key)))?
      .pop_if_empty()
      .push(id);
    Ok(url)
  }

  /// Send a request and fail on any non-success status.
  async fn send(&self, request: RequestBuilder) -> ResourceResult<Response> {
    let response = request
      .send()
      .await
      .map_err(|e| ResourceError::Network(e.to_string()))?;

    let status = response.status();
    debug!(url = %response.url(), %status, "api response");
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ResourceError::from_status(status.as_u16(), error_message(status, &body)))
  }

  async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ResourceResult<T> {
    let response = self.send(request).await?;
    let url = response.url().clone();
    response.json::<T>().await.map_err(|e| ResourceError::Server {
      status: StatusCode::BAD_GATEWAY.as_u16(),
      message: format!("Failed to parse response from {}: {}", url, e),
    })
  }
}

impl Transport for HttpTransport {
  async fn fetch_resource<T>(&self, key: &ResourceKey) -> ResourceResult<T>
  where
    T: DeserializeOwned + Send,
  {
    let url = self.url(key)?;
    self.send_json(self.client.get(url)).await
  }

  async fn create_resource<P, T>(&self, key: &ResourceKey, payload: &P) -> ResourceResult<T>
  where
    P: Serialize + Sync,
    T: DeserializeOwned + Send,
  {
    let url = self.url(key)?;
    self.send_json(self.client.post(url).json(payload)).await
  }

  async fn update_resource<P, T>(&self, key: &ResourceKey, id: &str, payload: &P) -> ResourceResult<T>
  where
    P: Serialize + Sync,
    T: DeserializeOwned + Send,
  {
    let url = self.member_url(key, id)?;
    self.send_json(self.client.put(url).json(payload)).await
  }

  async fn delete_resource(&self, key: &ResourceKey, id: &str) -> ResourceResult<()> {
    let url = self.member_url(key, id)?;
    self.send(self.client.delete(url)).await?;
    Ok(())
  }

  async fn put_resource<P, T>(&self, key: &ResourceKey, payload: &P) -> ResourceResult<T>
  where
    P: Serialize + Sync,
    T: DeserializeOwned + Send,
  {
    let url = self.url(key)?;
    self.send_json(self.client.put(url).json(payload)).await
  }

  async fn post_resource<P, T>(&self, key: &ResourceKey, payload: &P) -> ResourceResult<Option<T>>
  where
    P: Serialize + Sync,
    T: DeserializeOwned + Send,
  {
    let url = self.url(key)?;
    let response = self.send(self.client.post(url.clone()).json(payload)).await?;
    let body = response
      .text()
      .await
      .map_err(|e| ResourceError::Network(e.to_string()))?;
    if body.trim().is_empty() {
      return Ok(None);
    }
    serde_json::from_str(&body).map(Some).map_err(|e| ResourceError::Server {
      status: StatusCode::BAD_GATEWAY.as_u16(),
      message: format!("Failed to parse response from {}: {}", url, e),
    })
  }
}

/// Pull a readable message out of an error body.
///
/// Understands `{"detail": "..."}`, `{"detail": [{"msg": "..."}]}` and
/// `{"message": "..."}`; otherwise uses the raw body or the status reason.
fn error_message(status: StatusCode, body: &str) -> String {
  let parsed = serde_json::from_str::<Value>(body).ok();
  if let Some(message) = parsed.as_ref().and_then(message_from_json) {
    return message;
  }

  let body = body.trim();
  if body.is_empty() {
    return status.canonical_reason().unwrap_or("request failed").to_string();
  }
  if body.len() > MAX_ERROR_BODY_LEN {
    let cut = (0..=MAX_ERROR_BODY_LEN)
      .rev()
      .find(|&i| body.is_char_boundary(i))
      .unwrap_or(0);
    return format!("{}... (truncated)", &body[..cut]);
  }
  body.to_string()
}

fn message_from_json(value: &Value) -> Option<String> {
  match value.get("detail") {
    Some(Value::String(s)) => return Some(s.clone()),
    Some(Value::Array(items)) => {
      let messages: Vec<&str> = items
        .iter()
        .filter_map(|item| item.get("msg").and_then(Value::as_str))
        .collect();
      if !messages.is_empty() {
        return Some(messages.join("; "));
      }
    }
    _ => {}
  }
  value.get("message").and_then(Value::as_str).map(str::to_string)
}
