//! Turn feed entries into postable messages

use crate::media::MediaFetcher;
use crate::types::{Entry, ImageAttachment, ImageMimeType, LinkAnnotation, Message};

/// Label of the trailing link on every post
pub const LINK_LABEL: &str = "Read post";

/// Builds messages from entries
#[derive(Debug, Clone)]
pub struct Transformer {
    splitter: Option<String>,
    link_label: String,
}

impl Transformer {
    pub fn new(splitter: Option<String>) -> Self {
        Self {
            splitter,
            link_label: LINK_LABEL.to_string(),
        }
    }

    /// Build the text part of a message
    ///
    /// The body is the entry's title. The rendered text, body plus a space
    /// plus the link label, never exceeds `limit` characters as long as
    /// `limit` can hold the label itself.
    pub fn transform(&self, entry: &Entry, limit: usize) -> Message {
        let body = self.strip_boilerplate(&entry.title);

        let label_len = self.link_label.chars().count();
        let budget = limit.saturating_sub(label_len + 1);
        let body = truncate_chars(body, budget);

        let text = if body.is_empty() {
            String::new()
        } else {
            format!("{} ", body)
        };

        Message {
            text,
            link: LinkAnnotation {
                label: self.link_label.clone(),
                uri: entry.link.clone(),
            },
            image: None,
        }
    }

    /// Build a message and attach the lead image when there is a usable one
    pub async fn build_message(
        &self,
        entry: &Entry,
        limit: usize,
        fetcher: &dyn MediaFetcher,
        alt_text: &str,
    ) -> Message {
        let mut message = self.transform(entry, limit);

        if let Some(url) = select_image_url(entry) {
            tracing::info!("Downloading image: {}", url);
            let mime = ImageMimeType::from_url(url);
            match (fetcher.fetch(url).await, mime) {
                (Some(bytes), Some(mime)) => {
                    message.image = Some(ImageAttachment {
                        bytes,
                        mime,
                        alt_text: alt_text.to_string(),
                    });
                }
                _ => tracing::warn!("No image for {}, posting text only", entry.link),
            }
        }

        message
    }

    fn strip_boilerplate<'a>(&self, text: &'a str) -> &'a str {
        match self.splitter.as_deref() {
            Some(splitter) if !splitter.is_empty() => match text.split_once(splitter) {
                Some((_, rest)) => rest.trim(),
                None => text,
            },
            _ => text,
        }
    }
}

/// Cut `text` to at most `max_chars` characters
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Whether a URL points at a supported raster image
pub fn is_image(url: &str) -> bool {
    ImageMimeType::from_url(url).is_some()
}

/// Pick the lead image candidate of an entry
///
/// `enclosures` wins over `media_content` whenever it is present, even if
/// empty. Only the first candidate is considered.
pub fn select_image_url(entry: &Entry) -> Option<&str> {
    let candidates = match &entry.enclosures {
        Some(enclosures) => enclosures,
        None => entry.media_content.as_ref()?,
    };
    let first = candidates.first()?;
    is_image(&first.url).then_some(first.url.as_str())
}
