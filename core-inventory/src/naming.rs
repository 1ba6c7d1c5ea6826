//! Media file naming convention.
//!
//! Captured files are named `{category}_{title}_{author}_{date}.{extension}`
//! where `date` is `YYYY-MM-DD`. The embedded date is the primary sort key of
//! the combined listing.

use std::fmt;

use chrono::NaiveDate;

use crate::error::{InventoryError, Result};
use crate::models::MediaKind;

pub const SEPARATOR: char = '_';
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parsed media file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaName {
    pub category: String,
    pub title: String,
    pub author: String,
    pub date: NaiveDate,
    pub extension: String,
}

impl MediaName {
    /// Builds a name, rejecting components that would break parsing.
    pub fn new(
        category: impl Into<String>,
        title: impl Into<String>,
        author: impl Into<String>,
        date: NaiveDate,
        extension: impl Into<String>,
    ) -> Result<Self> {
        let name = Self {
            category: category.into(),
            title: title.into(),
            author: author.into(),
            date,
            extension: extension.into(),
        };

        for (label, value) in [
            ("category", &name.category),
            ("title", &name.title),
            ("author", &name.author),
        ] {
            validate_component(label, value)?;
        }
        if name.extension.is_empty()
            || !name.extension.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(InventoryError::InvalidName(format!(
                "invalid extension '{}'",
                name.extension
            )));
        }

        Ok(name)
    }

    /// Parses `{category}_{title}_{author}_{date}.{extension}`.
    pub fn parse(file_name: &str) -> Result<Self> {
        let invalid = || InventoryError::InvalidName(file_name.to_string());

        let (stem, extension) = file_name.rsplit_once('.').ok_or_else(invalid)?;
        let parts: Vec<&str> = stem.split(SEPARATOR).collect();
        let [category, title, author, date] = parts.as_slice() else {
            return Err(invalid());
        };
        let date = NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|_| invalid())?;

        Self::new(*category, *title, *author, date, extension)
    }

    pub fn file_name(&self) -> String {
        self.to_string()
    }

    /// File name without the extension
    pub fn basename(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}",
            self.category,
            self.title,
            self.author,
            self.date.format(DATE_FORMAT),
            sep = SEPARATOR
        )
    }
}

impl fmt::Display for MediaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.basename(), self.extension)
    }
}

fn validate_component(label: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(InventoryError::InvalidName(format!("{} must not be empty", label)));
    }
    if value.contains(SEPARATOR) || value.contains('/') || value.contains('\\') {
        return Err(InventoryError::InvalidName(format!(
            "{} must not contain '{}' or path separators",
            label, SEPARATOR
        )));
    }
    Ok(())
}

/// Date embedded in a file name, or the Unix epoch when the name does not
/// follow the naming convention.
pub fn extract_date(file_name: &str) -> NaiveDate {
    MediaName::parse(file_name)
        .map(|name| name.date)
        .unwrap_or_default()
}

/// File name without its last extension.
pub fn basename(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    }
}

/// Lowercased extension, if any
pub fn extension(file_name: &str) -> Option<String> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// MIME type inferred from the extension.
pub fn mime_type_for(file_name: &str) -> &'static str {
    match extension(file_name).as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg" | "oga") => "audio/ogg",
        Some("m4a") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("flac") => "audio/flac",
        Some("weba") => "audio/webm",
        Some("webm") => "video/webm",
        Some("mp4" | "m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Media kind for a MIME type; anything that is neither video nor image is
/// treated as audio.
pub fn kind_for_mime(mime_type: &str) -> MediaKind {
    if mime_type.starts_with("image/") {
        MediaKind::Thumbnail
    } else if mime_type.starts_with("video/") {
        MediaKind::Video
    } else {
        MediaKind::Audio
    }
}
