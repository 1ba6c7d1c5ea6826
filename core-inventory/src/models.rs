//! Inventory domain models

use std::collections::HashMap;
use std::mem;

use bridge_traits::storage::{LocalEntry, RemoteEntry};
use chrono::{DateTime, NaiveDate, Utc};
use core_runtime::config::RemoteRepoConfig;
use serde::{Deserialize, Serialize};

use crate::naming::{basename, extract_date, kind_for_mime, mime_type_for};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    Thumbnail,
}

/// Where a file lives.
///
/// A local file carries the handle of its cached payload; a remote file carries
/// the content hash and path assigned by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "lowercase")]
pub enum Origin {
    Local {
        /// Local inventory id of the payload
        payload: String,
    },
    Remote {
        sha: String,
        path: String,
        download_url: Option<String>,
    },
}

impl Origin {
    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local { .. })
    }

    /// Same variant, regardless of contents
    pub fn matches(&self, other: &Origin) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }
}

/// One file in the combined listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    pub id: String,
    pub name: String,
    pub kind: MediaKind,
    pub mime_type: String,
    pub size: u64,
    pub duration_secs: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub origin: Origin,
}

impl MediaFile {
    pub fn from_local(entry: LocalEntry) -> Self {
        let kind = kind_for_mime(&entry.mime_type);
        Self {
            id: entry.id.clone(),
            name: entry.name,
            kind,
            mime_type: entry.mime_type,
            size: entry.size,
            duration_secs: entry.duration_secs,
            created_at: entry.created_at,
            origin: Origin::Local { payload: entry.id },
        }
    }

    /// Remote entries carry no timestamp; the embedded date stands in for it.
    pub fn from_remote(entry: RemoteEntry, kind: MediaKind) -> Self {
        let created_at = extract_date(&entry.name)
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or_default();
        Self {
            id: entry.path.clone(),
            mime_type: mime_type_for(&entry.name).to_string(),
            name: entry.name,
            kind,
            size: entry.size,
            duration_secs: None,
            created_at,
            origin: Origin::Remote {
                sha: entry.sha,
                path: entry.path,
                download_url: entry.download_url,
            },
        }
    }

    /// Derived from the origin: remote files are the uploaded ones.
    pub fn uploaded(&self) -> bool {
        !self.origin.is_local()
    }

    pub fn basename(&self) -> &str {
        basename(&self.name)
    }

    pub fn date(&self) -> NaiveDate {
        extract_date(&self.name)
    }

    pub fn is_thumbnail(&self) -> bool {
        self.kind == MediaKind::Thumbnail
    }

    /// Local inventory id, for local files
    pub fn payload_handle(&self) -> Option<&str> {
        match &self.origin {
            Origin::Local { payload } => Some(payload),
            Origin::Remote { .. } => None,
        }
    }

    /// Remote repository path, for remote files
    pub fn remote_path(&self) -> Option<&str> {
        match &self.origin {
            Origin::Remote { path, .. } => Some(path),
            Origin::Local { .. } => None,
        }
    }
}

/// Repository directories for media and thumbnails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    pub media_dir: String,
    pub thumbnail_dir: String,
}

impl RemoteLayout {
    pub fn new(media_dir: impl Into<String>, thumbnail_dir: impl Into<String>) -> Self {
        Self {
            media_dir: trim_slashes(media_dir.into()),
            thumbnail_dir: trim_slashes(thumbnail_dir.into()),
        }
    }

    /// `{media_dir}/{name}`
    pub fn media_path(&self, name: &str) -> String {
        join(&self.media_dir, name)
    }

    /// `{thumbnail_dir}/{basename}.jpg`
    pub fn thumbnail_path(&self, media_name: &str) -> String {
        join(&self.thumbnail_dir, &format!("{}.jpg", basename(media_name)))
    }
}

impl From<&RemoteRepoConfig> for RemoteLayout {
    fn from(config: &RemoteRepoConfig) -> Self {
        Self::new(config.media_dir.clone(), config.thumbnail_dir.clone())
    }
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self::new("media", "thumbnails")
    }
}

fn trim_slashes(value: String) -> String {
    value.trim_matches('/').to_string()
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Thumbnail candidates for one basename, at most one per origin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThumbnailPair {
    pub local: Option<MediaFile>,
    pub remote: Option<MediaFile>,
}

/// Merged, sorted listing with its thumbnail lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InventoryView {
    pub files: Vec<MediaFile>,
    pub thumbnails: HashMap<String, ThumbnailPair>,
}

impl InventoryView {
    /// Thumbnail with the same basename and the same origin as `file`.
    pub fn thumbnail_for(&self, file: &MediaFile) -> Option<&MediaFile> {
        let pair = self.thumbnails.get(file.basename())?;
        match file.origin {
            Origin::Local { .. } => pair.local.as_ref(),
            Origin::Remote { .. } => pair.remote.as_ref(),
        }
    }

    pub fn find(&self, name: &str) -> Option<&MediaFile> {
        self.files.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn local_count(&self) -> usize {
        self.files.iter().filter(|f| f.origin.is_local()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(name: &str, mime: &str) -> MediaFile {
        MediaFile::from_local(LocalEntry {
            id: name.to_string(),
            name: name.to_string(),
            mime_type: mime.to_string(),
            size: 3,
            duration_secs: None,
            created_at: Utc::now(),
        })
    }

    fn remote(name: &str, kind: MediaKind) -> MediaFile {
        MediaFile::from_remote(
            RemoteEntry {
                name: name.to_string(),
                path: format!("media/{}", name),
                sha: "abc".to_string(),
                size: 3,
                download_url: None,
                is_dir: false,
            },
            kind,
        )
    }

    #[test]
    fn test_uploaded_follows_origin() {
        let file = local("a_b_c_2024-01-01.mp3", "audio/mpeg");
        assert!(!file.uploaded());
        assert_eq!(file.payload_handle(), Some("a_b_c_2024-01-01.mp3"));
        assert_eq!(file.remote_path(), None);

        let file = remote("a_b_c_2024-01-01.mp3", MediaKind::Audio);
        assert!(file.uploaded());
        assert_eq!(file.payload_handle(), None);
        assert_eq!(file.remote_path(), Some("media/a_b_c_2024-01-01.mp3"));
        assert_eq!(file.created_at.date_naive(), file.date());
        assert_eq!(file.mime_type, "audio/mpeg");
    }

    #[test]
    fn test_thumbnail_requires_matching_origin() {
        let media = local("a_b_c_2024-01-01.mp3", "audio/mpeg");
        let mut view = InventoryView::default();
        view.thumbnails.insert(
            "a_b_c_2024-01-01".to_string(),
            ThumbnailPair {
                local: None,
                remote: Some(remote("a_b_c_2024-01-01.jpg", MediaKind::Thumbnail)),
            },
        );

        assert!(view.thumbnail_for(&media).is_none());

        let uploaded = remote("a_b_c_2024-01-01.mp3", MediaKind::Audio);
        assert!(view.thumbnail_for(&uploaded).is_some());
    }

    #[test]
    fn test_remote_layout_paths() {
        let layout = RemoteLayout::new("/media/", "thumbs");
        assert_eq!(
            layout.media_path("music_MySong_Jane_2024-01-10.mp3"),
            "media/music_MySong_Jane_2024-01-10.mp3"
        );
        assert_eq!(
            layout.thumbnail_path("music_MySong_Jane_2024-01-10.mp3"),
            "thumbs/music_MySong_Jane_2024-01-10.jpg"
        );
        assert_eq!(RemoteLayout::new("", "").media_path("x.mp3"), "x.mp3");
    }

    #[test]
    fn test_origin_serialization_is_tagged() {
        let origin = Origin::Local {
            payload: "id-1".to_string(),
        };
        let json = serde_json::to_value(&origin).unwrap();
        assert_eq!(json["origin"], "local");
        assert_eq!(json["payload"], "id-1");
    }
}
