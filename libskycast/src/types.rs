//! Core types for Skycast

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Default `strftime` format used for feed timestamps (RFC 2822)
pub const DEFAULT_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Parse a feed timestamp with the configured format
///
/// Formats without a UTC offset are read as UTC. Values that do not match
/// the format are tried as RFC 2822 and then RFC 3339, the two shapes feeds
/// write their dates in.
pub fn parse_timestamp(value: &str, format: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_str(value, format) {
        return Some(parsed);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
        return Some(naive.and_utc().fixed_offset());
    }
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
}

/// Render a timestamp with the configured format
pub fn format_timestamp(value: &DateTime<Utc>, format: &str) -> String {
    value.format(format).to_string()
}

/// A media reference attached to a feed entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub mime_type: Option<String>,
}

impl MediaRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: None,
        }
    }
}

/// One item of the source feed
///
/// `enclosures` and `media_content` are the two places a feed can carry
/// media candidates. `Some(vec![])` means the key exists but is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub title: String,
    pub link: String,
    pub published: String,
    pub description: String,
    pub tags: Vec<String>,
    pub enclosures: Option<Vec<MediaRef>>,
    pub media_content: Option<Vec<MediaRef>>,
}

impl Entry {
    /// Parse `published` with the configured date format
    pub fn published_at(&self, format: &str) -> Option<DateTime<FixedOffset>> {
        parse_timestamp(&self.published, format)
    }
}

/// The persisted position of the last successfully posted entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// Literal `published` string as it appeared in the feed
    pub published: String,
    pub at: DateTime<FixedOffset>,
}

/// Supported image MIME types for the lead image
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageMimeType {
    Jpeg,
    Png,
    Gif,
}

impl ImageMimeType {
    /// Detect MIME type from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    /// Detect MIME type from the extension of a URL path
    ///
    /// Query strings and fragments are ignored.
    pub fn from_url(url: &str) -> Option<Self> {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let (_, ext) = file_name.rsplit_once('.')?;
        Self::from_extension(ext)
    }

    /// Get the MIME type string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
        }
    }
}

impl std::fmt::Display for ImageMimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A labelled link rendered at the end of a post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkAnnotation {
    pub label: String,
    pub uri: String,
}

/// Downloaded lead image ready for upload
#[derive(Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub bytes: Vec<u8>,
    pub mime: ImageMimeType,
    pub alt_text: String,
}

impl std::fmt::Debug for ImageAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageAttachment")
            .field("bytes", &self.bytes.len())
            .field("mime", &self.mime)
            .field("alt_text", &self.alt_text)
            .finish()
    }
}

/// A postable message derived from one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Text preceding the link label, including its trailing separator
    pub text: String,
    pub link: LinkAnnotation,
    pub image: Option<ImageAttachment>,
}

impl Message {
    /// The visible post text
    pub fn render(&self) -> String {
        format!("{}{}", self.text, self.link.label)
    }

    /// UTF-8 byte range of the link label inside `render()`
    pub fn link_byte_range(&self) -> (usize, usize) {
        let start = self.text.len();
        (start, start + self.link.label.len())
    }
}

/// An authenticated handle to the posting target, valid for one run
#[derive(Clone)]
pub struct Session {
    pub did: String,
    pub handle: String,
    pub access_jwt: SecretString,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("did", &self.did)
            .field("handle", &self.handle)
            .field("access_jwt", &"[REDACTED]")
            .finish()
    }
}

/// Ordered record of observable side effects (posts, cursor saves)
///
/// Shared between collaborators so callers can check how their effects
/// interleave.
pub type EventLog = Arc<Mutex<Vec<String>>>;
