//! Feed retrieval and normalization

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{FeedError, PlatformError, Result};
use crate::types::{format_timestamp, Entry, MediaRef};

/// Yields the entries of a feed, in the feed's own order
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<Entry>>;
}

/// Feed source for `http(s)://` URLs, `file://` URLs and local paths
pub struct HttpFeedSource {
    client: reqwest::Client,
    date_format: String,
}

impl HttpFeedSource {
    pub fn new(timeout: Duration, date_format: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("skycast/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            date_format: date_format.into(),
        })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        if url.starts_with("http://") || url.starts_with("https://") {
            let response = self.client.get(url).send().await.map_err(|e| FeedError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(FeedError::Fetch {
                    url: url.to_string(),
                    reason: format!("HTTP {}", status),
                }
                .into());
            }

            let bytes = response.bytes().await.map_err(|e| FeedError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            return Ok(bytes.to_vec());
        }

        let path = local_path(url);
        tokio::fs::read(&path).await.map_err(|e| {
            FeedError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<Vec<Entry>> {
        tracing::info!("Fetching {}", url);
        let bytes = self.fetch_bytes(url).await?;
        let entries = parse_feed(url, &bytes, &self.date_format)?;
        tracing::info!("Fetched {} entries from {}", entries.len(), url);
        Ok(entries)
    }
}

fn local_path(url: &str) -> PathBuf {
    match url::Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "file" => parsed
            .to_file_path()
            .unwrap_or_else(|_| PathBuf::from(parsed.path())),
        _ => PathBuf::from(shellexpand::tilde(url).to_string()),
    }
}

/// Parse RSS or Atom content into entries
///
/// `published` holds the entry's date text exactly as the feed wrote it
/// (`pubDate`, `published` or `dc:date`, falling back to `updated`). Only
/// when that text cannot be located is the date parsed by feed-rs rendered
/// with `date_format` instead. RSS enclosures and `media:content` become
/// `media_content`; Atom links with `rel="enclosure"` become `enclosures`.
pub fn parse_feed(url: &str, content: &[u8], date_format: &str) -> Result<Vec<Entry>> {
    let feed = feed_rs::parser::parse(content).map_err(|e| FeedError::Parse {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    let mut raw_dates = raw_entry_dates(content);
    if raw_dates.len() != feed.entries.len() {
        tracing::debug!(
            "Found {} raw dates for {} entries in {}, using parsed dates",
            raw_dates.len(),
            feed.entries.len(),
            url
        );
        raw_dates = vec![None; feed.entries.len()];
    }

    Ok(feed
        .entries
        .into_iter()
        .zip(raw_dates)
        .map(|(entry, raw_date)| normalize_entry(entry, raw_date, date_format))
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateField {
    Published,
    Updated,
}

fn date_field(local_name: &[u8]) -> Option<DateField> {
    match local_name {
        b"pubDate" | b"published" | b"issued" | b"date" => Some(DateField::Published),
        b"updated" | b"modified" => Some(DateField::Updated),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct RawDates {
    published: Option<String>,
    updated: Option<String>,
}

impl RawDates {
    fn push(&mut self, field: DateField, text: &[u8]) {
        let slot = match field {
            DateField::Published => &mut self.published,
            DateField::Updated => &mut self.updated,
        };
        slot.get_or_insert_with(String::new)
            .push_str(&String::from_utf8_lossy(text));
    }

    fn best(self) -> Option<String> {
        self.published
            .or(self.updated)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
    }
}

/// Date text of every `<item>`/`<entry>`, in document order
///
/// Only direct children of the item are considered, so an Atom
/// `<source><updated>` does not shadow the entry's own date.
fn raw_entry_dates(content: &[u8]) -> Vec<Option<String>> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(content);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut dates = Vec::new();
    let mut depth = 0usize;
    let mut entry_depth: Option<usize> = None;
    let mut capturing: Option<DateField> = None;
    let mut current = RawDates::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(start)) => {
                depth += 1;
                let name = start.local_name();
                match entry_depth {
                    None if matches!(name.as_ref(), b"item" | b"entry") => {
                        entry_depth = Some(depth);
                        current = RawDates::default();
                    }
                    Some(parent) if depth == parent + 1 => capturing = date_field(name.as_ref()),
                    _ => {}
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(field) = capturing {
                    current.push(field, &text);
                }
            }
            Ok(Event::CData(text)) => {
                if let Some(field) = capturing {
                    current.push(field, &text);
                }
            }
            Ok(Event::End(_)) => {
                capturing = None;
                if entry_depth == Some(depth) {
                    dates.push(std::mem::take(&mut current).best());
                    entry_depth = None;
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Stopped scanning raw dates: {}", e);
                break;
            }
        }
        buf.clear();
    }

    dates
}

fn normalize_entry(
    entry: feed_rs::model::Entry,
    raw_date: Option<String>,
    date_format: &str,
) -> Entry {
    let published = raw_date
        .or_else(|| {
            entry
                .published
                .or(entry.updated)
                .map(|at| format_timestamp(&at, date_format))
        })
        .unwrap_or_default();

    let link = entry
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| entry.links.first())
        .map(|l| l.href.clone())
        .unwrap_or_default();

    let enclosures: Vec<MediaRef> = entry
        .links
        .iter()
        .filter(|l| l.rel.as_deref() == Some("enclosure"))
        .map(|l| MediaRef {
            url: l.href.clone(),
            mime_type: l.media_type.clone(),
        })
        .collect();

    let media_content: Vec<MediaRef> = entry
        .media
        .iter()
        .flat_map(|object| object.content.iter())
        .filter_map(|content| {
            content.url.as_ref().map(|url| MediaRef {
                url: url.to_string(),
                mime_type: content.content_type.as_ref().map(|m| m.to_string()),
            })
        })
        .collect();

    let description = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .unwrap_or_default();

    if published.is_empty() {
        tracing::debug!("Entry {} has no date", link);
    }

    Entry {
        title: entry.title.map(|t| t.content).unwrap_or_default(),
        link,
        published,
        description,
        tags: entry.categories.into_iter().map(|c| c.term).collect(),
        enclosures: (!enclosures.is_empty()).then_some(enclosures),
        media_content: (!media_content.is_empty()).then_some(media_content),
    }
}
