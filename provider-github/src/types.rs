//! GitHub REST API request/response types
//!
//! Data structures for the repository contents API.

use bridge_traits::storage::RemoteEntry;
use serde::{Deserialize, Serialize};

/// Contents API item (file or directory)
///
/// See: https://docs.github.com/en/rest/repos/contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentEntry {
    pub name: String,
    pub path: String,
    pub sha: String,
    #[serde(default)]
    pub size: u64,

    /// "file", "dir", "symlink" or "submodule"
    #[serde(rename = "type")]
    pub kind: String,

    /// Raw download URL; may carry a short-lived token for private repos
    #[serde(default)]
    pub download_url: Option<String>,

    #[serde(default)]
    pub html_url: Option<String>,
}

impl ContentEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == "dir"
    }
}

impl From<ContentEntry> for RemoteEntry {
    fn from(entry: ContentEntry) -> Self {
        let is_dir = entry.is_dir();
        RemoteEntry {
            name: entry.name,
            path: entry.path,
            sha: entry.sha,
            size: entry.size,
            download_url: entry.download_url,
            is_dir,
        }
    }
}

/// Body of `PUT /repos/{owner}/{repo}/contents/{path}`
#[derive(Debug, Serialize)]
pub struct PutContentRequest<'a> {
    pub message: &'a str,
    /// Base64-encoded file content
    pub content: String,
    pub branch: &'a str,
    /// Required when replacing an existing file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<&'a str>,
}

/// Response of a contents PUT
#[derive(Debug, Deserialize)]
pub struct PutContentResponse {
    pub content: ContentEntry,
}

/// Body of `DELETE /repos/{owner}/{repo}/contents/{path}`
#[derive(Debug, Serialize)]
pub struct DeleteContentRequest<'a> {
    pub message: &'a str,
    pub sha: &'a str,
    pub branch: &'a str,
}

/// Subset of `GET /repos/{owner}/{repo}`
#[derive(Debug, Deserialize)]
pub struct RepositoryInfo {
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub permissions: Option<RepositoryPermissions>,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryPermissions {
    #[serde(default)]
    pub pull: bool,
    #[serde(default)]
    pub push: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_entry_deserialization() {
        let json = r#"{
            "name": "music_MySong_Jane_2024-01-10.mp3",
            "path": "media/music_MySong_Jane_2024-01-10.mp3",
            "sha": "3d21ec53a331a6f037a91c368710b99387d012c1",
            "size": 5362,
            "type": "file",
            "download_url": "https://raw.githubusercontent.com/jane/captures/main/media/music_MySong_Jane_2024-01-10.mp3",
            "html_url": "https://github.com/jane/captures/blob/main/media/music_MySong_Jane_2024-01-10.mp3"
        }"#;

        let entry: ContentEntry = serde_json::from_str(json).unwrap();
        assert!(!entry.is_dir());

        let remote: RemoteEntry = entry.into();
        assert_eq!(remote.size, 5362);
        assert!(remote.download_url.is_some());
        assert!(!remote.is_dir);
    }

    #[test]
    fn test_put_request_omits_missing_sha() {
        let request = PutContentRequest {
            message: "Upload x",
            content: "YWJj".to_string(),
            branch: "main",
            sha: None,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("sha"));
        assert!(json.contains("\"content\":\"YWJj\""));
    }
}
