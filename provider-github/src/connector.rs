//! GitHub contents API connector
//!
//! Implements the `RemoteStore` trait over a GitHub repository. Every request
//! goes through [`ResilientFetch`].

use async_trait::async_trait;
use base64::Engine as _;
use bridge_traits::error::Result;
use bridge_traits::http::{HttpClient, HttpMethod, RetryPolicy};
use bridge_traits::storage::{RemoteEntry, RemoteStore};
use bytes::Bytes;
use core_runtime::config::RemoteRepoConfig;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::GitHubError;
use crate::resilient::{encode_path, NotFoundMode, ResilientFetch};
use crate::types::{
    ContentEntry, DeleteContentRequest, PutContentRequest, PutContentResponse, RepositoryInfo,
};

/// GitHub repository connector
///
/// # Example
///
/// ```ignore
/// use provider_github::GitHubConnector;
/// use bridge_traits::storage::RemoteStore;
///
/// let connector = GitHubConnector::new(http_client, repo_config, RetryPolicy::default());
/// let files = connector.list_directory("media").await?;
/// ```
#[derive(Clone)]
pub struct GitHubConnector {
    fetch: ResilientFetch,
}

impl GitHubConnector {
    pub fn new(http_client: Arc<dyn HttpClient>, repo: RemoteRepoConfig, policy: RetryPolicy) -> Self {
        Self {
            fetch: ResilientFetch::new(http_client, repo, policy),
        }
    }

    /// The retry/fallback layer used by this connector
    pub fn resilient(&self) -> &ResilientFetch {
        &self.fetch
    }

    pub fn repo(&self) -> &RemoteRepoConfig {
        self.fetch.repo()
    }

    /// Browser URL for a repository path
    pub fn preview_url(&self, path: &str) -> String {
        let repo = self.fetch.repo();
        format!(
            "https://github.com/{}/{}/blob/{}/{}",
            repo.owner,
            repo.repo,
            repo.branch,
            encode_path(path)
        )
    }

    fn contents_ref_url(&self, path: &str) -> String {
        format!(
            "{}?ref={}",
            self.fetch.contents_url(path),
            urlencoding::encode(&self.fetch.repo().branch)
        )
    }

    async fn lookup(&self, path: &str, not_found: NotFoundMode) -> Result<Option<ContentEntry>> {
        let request = self
            .fetch
            .api_request(HttpMethod::Get, self.contents_ref_url(path));

        match self
            .fetch
            .fetch(request, self.fetch.policy().max_attempts, not_found)
            .await
        {
            Ok(response) => {
                let entry: ContentEntry = serde_json::from_slice(&response.body).map_err(|e| {
                    GitHubError::ParseError(format!("Failed to parse content metadata: {}", e))
                })?;
                Ok(Some(entry))
            }
            Err(GitHubError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RemoteStore for GitHubConnector {
    #[instrument(skip(self))]
    async fn check_access(&self) -> Result<()> {
        let request = self
            .fetch
            .api_request(HttpMethod::Get, self.fetch.repo_api_url(""));
        let response = self
            .fetch
            .fetch(request, self.fetch.policy().max_attempts, NotFoundMode::Final)
            .await?;

        let info: RepositoryInfo = serde_json::from_slice(&response.body).map_err(|e| {
            GitHubError::ParseError(format!("Failed to parse repository info: {}", e))
        })?;

        if let Some(permissions) = &info.permissions {
            if !permissions.push {
                return Err(GitHubError::AuthenticationFailed {
                    status_code: 403,
                    message: format!("Token cannot push to {}", info.full_name),
                }
                .into());
            }
        }

        info!(repo = %info.full_name, private = info.private, "Repository access verified");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let request = self
            .fetch
            .api_request(HttpMethod::Get, self.contents_ref_url(path));

        let response = match self.fetch.fetch_with_retry(request).await {
            Ok(response) => response,
            Err(GitHubError::NotFound { .. }) => {
                debug!("Directory does not exist yet, listing as empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let entries: Vec<ContentEntry> = serde_json::from_slice(&response.body).map_err(|e| {
            GitHubError::ParseError(format!("Failed to parse directory listing: {}", e))
        })?;

        let entries: Vec<RemoteEntry> = entries.into_iter().map(RemoteEntry::from).collect();
        info!(count = entries.len(), "Listed remote directory");
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn get_metadata(&self, path: &str) -> Result<Option<RemoteEntry>> {
        Ok(self
            .lookup(path, NotFoundMode::Final)
            .await?
            .map(RemoteEntry::from))
    }

    #[instrument(skip(self, data, progress), fields(size = data.len()))]
    async fn put_content(
        &self,
        path: &str,
        data: Bytes,
        message: &str,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<RemoteEntry> {
        progress(0.0);

        // Replacing a file requires its current sha
        let existing = self.lookup(path, NotFoundMode::Final).await?;
        let sha = existing.as_ref().map(|entry| entry.sha.as_str());
        if sha.is_some() {
            debug!("Replacing existing remote file");
        }

        let body = PutContentRequest {
            message,
            content: base64::engine::general_purpose::STANDARD.encode(&data),
            branch: &self.fetch.repo().branch,
            sha,
        };
        progress(0.1);

        let request = self
            .fetch
            .api_request(HttpMethod::Put, self.fetch.contents_url(path))
            .json(&body)?;
        let response = self.fetch.fetch_with_retry(request).await?;

        let put: PutContentResponse = serde_json::from_slice(&response.body).map_err(|e| {
            GitHubError::ParseError(format!("Failed to parse upload response: {}", e))
        })?;

        progress(1.0);
        info!(sha = %put.content.sha, "Uploaded remote file");
        Ok(put.content.into())
    }

    #[instrument(skip(self))]
    async fn delete_content(&self, path: &str, message: &str) -> Result<()> {
        let Some(existing) = self.lookup(path, NotFoundMode::Final).await? else {
            debug!("Remote file already absent");
            return Ok(());
        };

        let body = DeleteContentRequest {
            message,
            sha: &existing.sha,
            branch: &self.fetch.repo().branch,
        };
        let request = self
            .fetch
            .api_request(HttpMethod::Delete, self.fetch.contents_url(path))
            .json(&body)?;

        match self
            .fetch
            .fetch(request, self.fetch.policy().max_attempts, NotFoundMode::Final)
            .await
        {
            Ok(_) | Err(GitHubError::NotFound { .. }) => {
                info!("Deleted remote file");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to delete remote file");
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self))]
    async fn resolve_download_url(&self, path: &str) -> Result<String> {
        let fresh = self.fetch.generate_fresh_download_url(path).await;
        Ok(self
            .fetch
            .validate_url_with_fallbacks(&fresh, path, 1)
            .await)
    }
}
