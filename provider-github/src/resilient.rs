//! Retry-with-backoff and URL fallback layer for the GitHub API.
//!
//! Every remote call made by the connector flows through [`ResilientFetch`].
//! Classification:
//!
//! | Outcome                      | Handling                                   |
//! |------------------------------|--------------------------------------------|
//! | 2xx                          | returned                                   |
//! | 404                          | retried while inside the staleness window  |
//! | 408, 429, 5xx, network error | retried with backoff                       |
//! | any other 4xx                | returned immediately                       |
//!
//! Backoff starts at the policy's base delay and doubles, capped at its max
//! delay. When attempts run out the last error is returned.

use bridge_traits::error::BridgeError;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use core_runtime::config::RemoteRepoConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::error::{is_transient_status, GitHubError, Result};
use crate::types::ContentEntry;

const RAW_CONTENT_HOST: &str = "https://raw.githubusercontent.com";
const ALT_RAW_HOST: &str = "https://github.com";
const CDN_MIRROR_HOST: &str = "https://cdn.jsdelivr.net/gh";

/// API requests carry this timeout unless the caller sets one
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How a 404 response is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundMode {
    /// Retry within the staleness window (the resource may just have been written)
    RetryWhileStale,
    /// Treat as final immediately (existence checks)
    Final,
}

/// Retry and URL substitution on top of a single-attempt [`HttpClient`].
#[derive(Clone)]
pub struct ResilientFetch {
    http_client: Arc<dyn HttpClient>,
    repo: RemoteRepoConfig,
    policy: RetryPolicy,
}

impl ResilientFetch {
    pub fn new(http_client: Arc<dyn HttpClient>, repo: RemoteRepoConfig, policy: RetryPolicy) -> Self {
        Self {
            http_client,
            repo,
            policy,
        }
    }

    pub fn repo(&self) -> &RemoteRepoConfig {
        &self.repo
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// `{api}/repos/{owner}/{repo}` followed by `tail`
    pub(crate) fn repo_api_url(&self, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.repo.api_base_url.trim_end_matches('/'),
            self.repo.owner,
            self.repo.repo,
            tail
        )
    }

    /// Contents endpoint for a repository path
    pub(crate) fn contents_url(&self, path: &str) -> String {
        self.repo_api_url(&format!("/contents/{}", encode_path(path)))
    }

    /// Authenticated API request with the GitHub media type headers
    pub(crate) fn api_request(&self, method: HttpMethod, url: impl Into<String>) -> HttpRequest {
        HttpRequest::new(method, url)
            .bearer_token(&self.repo.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .timeout(REQUEST_TIMEOUT)
    }

    /// Execute with the policy's attempt budget.
    pub async fn fetch_with_retry(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.fetch(request, self.policy.max_attempts, NotFoundMode::RetryWhileStale)
            .await
    }

    /// Execute with an explicit attempt budget and 404 handling.
    #[instrument(skip(self, request), fields(method = ?request.method, url = %redact_query(&request.url)))]
    pub async fn fetch(
        &self,
        request: HttpRequest,
        max_attempts: u32,
        not_found: NotFoundMode,
    ) -> Result<HttpResponse> {
        let max_attempts = max_attempts.max(1);
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match self.http_client.execute(request.clone()).await {
                Ok(response) if response.is_success() => {
                    debug!(attempt, status = response.status, "Request succeeded");
                    return Ok(response);
                }
                Ok(response) => {
                    let error =
                        GitHubError::from_status(response.status, &request.url, &response.body);

                    if !is_transient_status(response.status) {
                        warn!(status = response.status, "Permanent failure, not retrying");
                        return Err(error);
                    }

                    if response.status == 404 {
                        let next_start = started.elapsed() + self.policy.delay_for(attempt);
                        if not_found == NotFoundMode::Final || next_start > self.policy.max_staleness {
                            return Err(error);
                        }
                    }

                    error
                }
                Err(BridgeError::Network(message)) => GitHubError::NetworkError(message),
                Err(other) => return Err(other.into()),
            };

            if attempt >= max_attempts {
                warn!(attempt, error = %error, "Retries exhausted");
                return Err(error);
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Returns the first candidate URL that responds successfully, or `url`
    /// itself when every candidate fails.
    ///
    /// Candidates, in order: `url`, `url` without its query string, the raw
    /// content URL, the alternate raw host, and the CDN mirror.
    #[instrument(skip(self, url), fields(path = %file_path))]
    pub async fn validate_url_with_fallbacks(
        &self,
        url: &str,
        file_path: &str,
        max_retries_per_url: u32,
    ) -> String {
        for candidate in self.fallback_candidates(url, file_path) {
            let mut request = HttpRequest::new(HttpMethod::Head, candidate.as_str())
                .timeout(REQUEST_TIMEOUT);
            if is_github_host(&candidate) {
                request = request.bearer_token(&self.repo.token);
            }

            match self
                .fetch(request, max_retries_per_url, NotFoundMode::RetryWhileStale)
                .await
            {
                Ok(_) => {
                    debug!(url = %redact_query(&candidate), "Validated download URL");
                    return candidate;
                }
                Err(e) => {
                    debug!(url = %redact_query(&candidate), error = %e, "Candidate URL failed");
                }
            }
        }

        warn!("No candidate URL responded, keeping the original");
        url.to_string()
    }

    /// Re-resolves a file's current download URL through the metadata
    /// endpoint, falling back to the unsigned raw content URL.
    #[instrument(skip(self))]
    pub async fn generate_fresh_download_url(&self, path: &str) -> String {
        let url = format!(
            "{}?ref={}",
            self.contents_url(path),
            urlencoding::encode(&self.repo.branch)
        );
        let request = self.api_request(HttpMethod::Get, url);

        let resolved = match self.fetch_with_retry(request).await {
            Ok(response) => response
                .json::<ContentEntry>()
                .map_err(GitHubError::from)
                .map(|entry| entry.download_url),
            Err(e) => Err(e),
        };

        match resolved {
            Ok(Some(download_url)) => download_url,
            Ok(None) => {
                debug!("Metadata carried no download URL, using raw URL");
                self.raw_url(path)
            }
            Err(e) => {
                warn!(error = %e, "Failed to resolve fresh download URL, using raw URL");
                self.raw_url(path)
            }
        }
    }

    /// Unsigned raw content URL for a repository path
    pub fn raw_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            RAW_CONTENT_HOST,
            self.repo.owner,
            self.repo.repo,
            self.repo.branch,
            encode_path(path)
        )
    }

    fn fallback_candidates(&self, url: &str, file_path: &str) -> Vec<String> {
        let path = encode_path(file_path);
        let candidates = [
            Some(url.to_string()),
            strip_query(url),
            Some(self.raw_url(file_path)),
            Some(format!(
                "{}/{}/{}/raw/{}/{}",
                ALT_RAW_HOST, self.repo.owner, self.repo.repo, self.repo.branch, path
            )),
            Some(format!(
                "{}/{}/{}@{}/{}",
                CDN_MIRROR_HOST, self.repo.owner, self.repo.repo, self.repo.branch, path
            )),
        ];

        let mut unique: Vec<String> = Vec::with_capacity(candidates.len());
        for candidate in candidates.into_iter().flatten() {
            if !unique.contains(&candidate) {
                unique.push(candidate);
            }
        }
        unique
    }
}

/// Percent-encodes each segment of a repository path, keeping the separators.
pub fn encode_path(path: &str) -> String {
    path.trim_matches('/')
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn strip_query(url: &str) -> Option<String> {
    let mut parsed = url::Url::parse(url).ok()?;
    parsed.query()?;
    parsed.set_query(None);
    parsed.set_fragment(None);
    Some(parsed.into())
}

/// Signed download URLs carry tokens in the query string
fn redact_query(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{}?[REDACTED]", base),
        None => url.to_string(),
    }
}

fn is_github_host(url: &str) -> bool {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .is_some_and(|host| host == "github.com" || host.ends_with(".github.com") || host.ends_with("githubusercontent.com"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use mockall::mock;
    use std::sync::Mutex;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    fn repo() -> RemoteRepoConfig {
        RemoteRepoConfig::new("jane", "captures", "ghp_test")
    }

    fn fetcher(mock: MockHttpClient) -> ResilientFetch {
        ResilientFetch::new(Arc::new(mock), repo(), RetryPolicy::default())
    }

    fn recording_mock(
        status: u16,
        times: usize,
    ) -> (MockHttpClient, Arc<Mutex<Vec<Instant>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);
        let mut mock = MockHttpClient::new();
        mock.expect_execute().times(times).returning(move |_| {
            recorded.lock().unwrap().push(Instant::now());
            Ok(HttpResponse::new(status, r#"{"message":"nope"}"#))
        });
        (mock, calls)
    }

    fn gaps(calls: &[Instant]) -> Vec<Duration> {
        calls.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_404_uses_every_attempt_with_backoff() {
        let (mock, calls) = recording_mock(404, 4);
        let fetch = fetcher(mock);

        let result = fetch
            .fetch(
                HttpRequest::get("https://api.github.com/x"),
                4,
                NotFoundMode::RetryWhileStale,
            )
            .await;

        assert!(matches!(result, Err(GitHubError::NotFound { .. })));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        assert_eq!(
            gaps(&calls),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_policy_makes_three_attempts() {
        let (mock, calls) = recording_mock(503, 3);
        let fetch = fetcher(mock);

        let result = fetch
            .fetch_with_retry(HttpRequest::get("https://api.github.com/x"))
            .await;

        match result {
            Err(GitHubError::ApiError { status_code, .. }) => assert_eq!(status_code, 503),
            other => panic!("unexpected result: {:?}", other.map(|r| r.status)),
        }
        assert_eq!(calls.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped() {
        let (mock, calls) = recording_mock(500, 5);
        let fetch = fetcher(mock);

        let _ = fetch
            .fetch(
                HttpRequest::get("https://api.github.com/x"),
                5,
                NotFoundMode::RetryWhileStale,
            )
            .await;

        let calls = calls.lock().unwrap();
        assert_eq!(gaps(&calls).last(), Some(&Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_401_fails_immediately() {
        let (mock, calls) = recording_mock(401, 1);
        let fetch = fetcher(mock);

        let result = fetch
            .fetch_with_retry(HttpRequest::get("https://api.github.com/x"))
            .await;

        assert!(matches!(
            result,
            Err(GitHubError::AuthenticationFailed { status_code: 401, .. })
        ));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_404_stops_after_staleness_window() {
        let (mock, calls) = recording_mock(404, 4);
        let policy = RetryPolicy {
            max_staleness: Duration::from_secs(8),
            ..RetryPolicy::default()
        };
        let fetch = ResilientFetch::new(Arc::new(mock), repo(), policy);

        // Attempts at 0s, 1s, 3s, 7s; the next would start at 12s
        let result = fetch
            .fetch(
                HttpRequest::get("https://api.github.com/x"),
                10,
                NotFoundMode::RetryWhileStale,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_404_final_mode_does_not_retry() {
        let (mock, calls) = recording_mock(404, 1);
        let fetch = fetcher(mock);

        let result = fetch
            .fetch(HttpRequest::get("https://api.github.com/x"), 3, NotFoundMode::Final)
            .await;

        assert!(matches!(result, Err(GitHubError::NotFound { .. })));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_then_success() {
        let mut mock = MockHttpClient::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(BridgeError::Network("connection reset".to_string())));
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(HttpResponse::new(200, "ok")));

        let response = fetcher(mock)
            .fetch_with_retry(HttpRequest::get("https://api.github.com/x"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_network_bridge_error_is_permanent() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Err(BridgeError::OperationFailed("bad request".to_string())));

        let result = fetcher(mock)
            .fetch_with_retry(HttpRequest::get("https://api.github.com/x"))
            .await;

        assert!(matches!(result, Err(GitHubError::BridgeError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallbacks_return_first_working_candidate() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute().returning(|request| {
            if request.url.starts_with("https://github.com/jane/captures/raw/") {
                Ok(HttpResponse::new(200, ""))
            } else {
                Ok(HttpResponse::new(403, ""))
            }
        });

        let url = fetcher(mock)
            .validate_url_with_fallbacks(
                "https://raw.githubusercontent.com/jane/captures/main/media/a.mp3?token=abc",
                "media/a.mp3",
                1,
            )
            .await;

        assert_eq!(url, "https://github.com/jane/captures/raw/main/media/a.mp3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallbacks_return_original_when_all_fail() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(5)
            .returning(|_| Ok(HttpResponse::new(403, "")));

        let original = "https://example.com/signed/a.mp3?sig=1";
        let url = fetcher(mock)
            .validate_url_with_fallbacks(original, "media/a.mp3", 1)
            .await;

        assert_eq!(url, original);
    }

    #[test]
    fn test_fallback_candidates_order_and_dedup() {
        let fetch = fetcher(MockHttpClient::new());
        let candidates = fetch.fallback_candidates(
            "https://raw.githubusercontent.com/jane/captures/main/media/a%20b.mp3",
            "media/a b.mp3",
        );

        // No query string, and the given URL equals the raw URL
        assert_eq!(
            candidates,
            vec![
                "https://raw.githubusercontent.com/jane/captures/main/media/a%20b.mp3".to_string(),
                "https://github.com/jane/captures/raw/main/media/a%20b.mp3".to_string(),
                "https://cdn.jsdelivr.net/gh/jane/captures@main/media/a%20b.mp3".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_download_url_from_metadata() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute().times(1).returning(|request| {
            assert!(request.url.ends_with("/repos/jane/captures/contents/media/a.mp3?ref=main"));
            assert_eq!(
                request.headers.get("Authorization"),
                Some(&"Bearer ghp_test".to_string())
            );
            Ok(HttpResponse::new(
                200,
                r#"{"name":"a.mp3","path":"media/a.mp3","sha":"s1","size":3,"type":"file",
                    "download_url":"https://raw.githubusercontent.com/jane/captures/main/media/a.mp3?token=fresh"}"#,
            ))
        });

        let url = fetcher(mock).generate_fresh_download_url("media/a.mp3").await;
        assert!(url.ends_with("?token=fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_download_url_falls_back_to_raw() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(401, "")));

        let url = fetcher(mock).generate_fresh_download_url("media/a.mp3").await;
        assert_eq!(
            url,
            "https://raw.githubusercontent.com/jane/captures/main/media/a.mp3"
        );
    }

    #[test]
    fn test_encode_path_keeps_separators() {
        assert_eq!(encode_path("/media/a b#c.mp3"), "media/a%20b%23c.mp3");
    }
}
