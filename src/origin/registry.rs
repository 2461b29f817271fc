use super::{MANIFEST_ACCEPT_TYPES, OriginClient, OriginManifest};
use crate::config::OriginConfig;
use crate::error::{StationError, StationResult};
use crate::peer::protocol::HEADER_CONTENT_DIGEST;
use crate::storage::compute_digest;
use crate::storage::types::{ByteStream, DEFAULT_MANIFEST_CONTENT_TYPE};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use reqwest::{StatusCode, header};
use serde::Deserialize;
use std::future::Future;
use std::time::{Duration, Instant};

const TOKEN_TIMEOUT: Duration = Duration::from_secs(10);
/// Lifetime assumed when the auth service omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(60);
/// Tokens are dropped this long before they actually expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Body of the registry token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    /// Registries fill one of `token` / `access_token`, sometimes both.
    pub fn effective_token(&self) -> Option<&str> {
        self.token
            .as_deref()
            .or(self.access_token.as_deref())
            .filter(|t| !t.is_empty())
    }

    pub fn lifetime(&self) -> Duration {
        self.expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME)
    }
}

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub value: String,
    pub expires_at: Instant,
}

impl CachedToken {
    pub fn new(value: String, lifetime: Duration, now: Instant) -> Self {
        Self {
            value,
            expires_at: now + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
        }
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

pub fn pull_scope(repository: &str) -> String {
    format!("repository:{}:pull", repository)
}

/// Registry v2 client with anonymous pull tokens cached per repository.
pub struct RegistryOriginClient {
    http: reqwest::Client,
    registry_url: String,
    /// Empty disables token auth (plain local registries).
    auth_url: String,
    auth_service: String,
    request_timeout: Duration,
    max_attempts: u32,
    initial_backoff: Duration,
    tokens: DashMap<String, CachedToken>,
}

impl RegistryOriginClient {
    pub fn new(config: &OriginConfig) -> StationResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| StationError::Config(format!("origin HTTP client: {}", e)))?;

        Ok(Self {
            http,
            registry_url: config.registry_url.trim_end_matches('/').to_string(),
            auth_url: config.auth_url.trim_end_matches('/').to_string(),
            auth_service: config.auth_service.clone(),
            request_timeout: Duration::from_secs(config.timeout_secs),
            max_attempts: config.retry_max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.retry_backoff_ms),
            tokens: DashMap::new(),
        })
    }

    pub fn manifest_url(&self, repository: &str, reference: &str) -> String {
        format!("{}/v2/{}/manifests/{}", self.registry_url, repository, reference)
    }

    pub fn blob_url(&self, repository: &str, digest: &str) -> String {
        format!("{}/v2/{}/blobs/{}", self.registry_url, repository, digest)
    }

    pub fn cached_token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn clear_tokens(&self) {
        self.tokens.clear();
        tracing::info!("Cleared origin token cache");
    }

    async fn token(&self, repository: &str) -> StationResult<Option<String>> {
        if self.auth_url.is_empty() {
            return Ok(None);
        }

        if let Some(cached) = self.tokens.get(repository) {
            if cached.is_fresh(Instant::now()) {
                tracing::debug!("Using cached origin token for {}", repository);
                return Ok(Some(cached.value.clone()));
            }
        }

        let response = self
            .http
            .get(format!("{}/token", self.auth_url))
            .query(&[
                ("service", self.auth_service.as_str()),
                ("scope", pull_scope(repository).as_str()),
            ])
            .timeout(TOKEN_TIMEOUT)
            .send()
            .await
            .map_err(|e| StationError::OriginFailure(format!("token request: {}", e)))?;

        if !response.status().is_success() {
            return Err(StationError::OriginFailure(format!(
                "token request for {}: HTTP {}",
                repository,
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| StationError::OriginFailure(format!("token response: {}", e)))?;
        let value = body
            .effective_token()
            .ok_or_else(|| StationError::OriginFailure("token response without token".into()))?
            .to_string();

        self.tokens.insert(
            repository.to_string(),
            CachedToken::new(value.clone(), body.lifetime(), Instant::now()),
        );
        tracing::info!("Fetched new origin token for {}", repository);
        Ok(Some(value))
    }

    async fn authorized(
        &self,
        request: reqwest::RequestBuilder,
        repository: &str,
    ) -> StationResult<reqwest::RequestBuilder> {
        Ok(match self.token(repository).await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    /// Sends the request and maps the status. 401 drops the cached token so
    /// the next attempt re-authenticates.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        repository: &str,
        what: &str,
    ) -> StationResult<reqwest::Response> {
        let response = self
            .authorized(request, repository)
            .await?
            .send()
            .await
            .map_err(|e| StationError::OriginFailure(format!("{}: {}", what, e)))?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(StationError::NotFound(what.to_string())),
            StatusCode::UNAUTHORIZED => {
                self.tokens.remove(repository);
                Err(StationError::OriginFailure(format!("{}: unauthorized", what)))
            }
            status => Err(StationError::OriginFailure(format!(
                "{}: HTTP {}",
                what, status
            ))),
        }
    }

    /// Runs `op` until it succeeds, fails with `NotFound`, or attempts run out.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> StationResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StationResult<T>>,
    {
        let mut delay = self.initial_backoff;

        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_not_found() => return Err(e),
                Err(e) if attempt == self.max_attempts => {
                    tracing::error!("{} failed after {} attempts: {}", what, attempt, e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("{} failed (attempt {}): {}", what, attempt, e);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_BACKOFF);
                }
            }
        }

        Err(StationError::OriginFailure(format!("{}: no attempts made", what)))
    }

    async fn head_exists(&self, url: String, repository: &str, what: &str) -> StationResult<bool> {
        let request = self.http.head(url).timeout(self.request_timeout);
        match self.send(request, repository, what).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl OriginClient for RegistryOriginClient {
    async fn fetch_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> StationResult<OriginManifest> {
        let what = format!("manifest {}:{}", repository, reference);
        let url = self.manifest_url(repository, reference);

        self.with_retry(&what, || async {
            let request = self
                .http
                .get(&url)
                .header(header::ACCEPT, MANIFEST_ACCEPT_TYPES.join(", "))
                .timeout(self.request_timeout);
            let response = self.send(request, repository, &what).await?;

            let header_value = |name: &str| {
                response
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            let digest = header_value(HEADER_CONTENT_DIGEST);
            let content_type = header_value("content-type")
                .unwrap_or_else(|| DEFAULT_MANIFEST_CONTENT_TYPE.to_string());

            let content = response
                .bytes()
                .await
                .map_err(|e| StationError::OriginFailure(format!("{}: {}", what, e)))?;
            let digest = digest.unwrap_or_else(|| compute_digest(&content));

            tracing::debug!(
                "Fetched {} from origin: digest={}, size={}",
                what,
                digest,
                content.len()
            );
            Ok(OriginManifest {
                digest,
                content_type,
                content,
            })
        })
        .await
    }

    async fn manifest_exists(&self, repository: &str, reference: &str) -> StationResult<bool> {
        let what = format!("manifest {}:{}", repository, reference);
        self.head_exists(self.manifest_url(repository, reference), repository, &what)
            .await
    }

    async fn stream_blob(&self, repository: &str, digest: &str) -> StationResult<ByteStream> {
        let what = format!("blob {}", digest);
        let url = self.blob_url(repository, digest);

        // Only connection setup is retried; a body that breaks mid-stream
        // surfaces as a stream error and fails the digest check downstream.
        let response = self
            .with_retry(&what, || async {
                self.send(self.http.get(&url), repository, &what).await
            })
            .await?;

        tracing::debug!("Streaming {} from {}", what, response.url());
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed())
    }

    async fn blob_exists(&self, repository: &str, digest: &str) -> StationResult<bool> {
        let what = format!("blob {}", digest);
        self.head_exists(self.blob_url(repository, digest), repository, &what)
            .await
    }
}
