//! Synchronization loop
//!
//! One run fetches the feed, orders the entries oldest first and walks them
//! one at a time: filter, transform, publish, save the cursor. The cursor is
//! only written after the publish succeeded, and the next entry is not
//! touched before the save returned.

use std::sync::Arc;

use crate::config::Config;
use crate::cursor::CursorStore;
use crate::error::{ConfigError, Result};
use crate::feed::FeedSource;
use crate::filter::{order_entries, Decision, EntryFilter, OrderStrategy, Ordered};
use crate::gate::PostingGate;
use crate::media::MediaFetcher;
use crate::shutdown::Shutdown;
use crate::transform::Transformer;
use crate::types::{parse_timestamp, Session, DEFAULT_DATE_FORMAT};

/// Per-run settings, taken from the validated configuration
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub feed_url: String,
    pub date_format: String,
    pub start_post_date: Option<String>,
    pub skip_tag: Option<String>,
    pub splitter: Option<String>,
    pub order: OrderStrategy,
    pub image_alt_text: String,
    /// Transform and log, but never log in, post or save
    pub dry_run: bool,
}

impl SyncSettings {
    pub fn new(feed_url: impl Into<String>) -> Self {
        Self {
            feed_url: feed_url.into(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            start_post_date: None,
            skip_tag: None,
            splitter: None,
            order: OrderStrategy::default(),
            image_alt_text: crate::config::DEFAULT_IMAGE_ALT_TEXT.to_string(),
            dry_run: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            feed_url: config.feed_url.clone(),
            date_format: config.date_format.clone(),
            start_post_date: config.start_post_date.clone(),
            skip_tag: config.skip_tag.clone(),
            splitter: config.splitter.clone(),
            order: config.order,
            image_alt_text: config.image_alt_text.clone(),
            dry_run: false,
        }
    }
}

/// What one run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub fetched: usize,
    pub posted: usize,
    pub with_image: usize,
    pub previewed: usize,
    pub skipped_tagged: usize,
    pub skipped_posted: usize,
    pub skipped_before_start: usize,
    pub skipped_unparsable: usize,
    /// Entries newer than the starting cursor that were passed over because
    /// a later entry went out first (counted in `skipped_posted` too)
    pub skipped_out_of_order: usize,
    /// The run stopped early on a shutdown request
    pub cancelled: bool,
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "fetched {}, posted {} ({} with image), skipped {} tagged / {} already posted / {} before start / {} undated",
            self.fetched,
            self.posted,
            self.with_image,
            self.skipped_tagged,
            self.skipped_posted,
            self.skipped_before_start,
            self.skipped_unparsable
        )?;
        if self.skipped_out_of_order > 0 {
            write!(f, ", {} out of order", self.skipped_out_of_order)?;
        }
        if self.previewed > 0 {
            write!(f, ", previewed {}", self.previewed)?;
        }
        if self.cancelled {
            write!(f, ", cancelled")?;
        }
        Ok(())
    }
}

pub struct Synchronizer {
    settings: SyncSettings,
    feed: Arc<dyn FeedSource>,
    media: Arc<dyn MediaFetcher>,
    gate: PostingGate,
    store: Arc<dyn CursorStore>,
    shutdown: Shutdown,
}

impl Synchronizer {
    pub fn new(
        settings: SyncSettings,
        feed: Arc<dyn FeedSource>,
        media: Arc<dyn MediaFetcher>,
        gate: PostingGate,
        store: Arc<dyn CursorStore>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            settings,
            feed,
            media,
            gate,
            store,
            shutdown,
        }
    }

    fn start_boundary(&self) -> Result<Option<chrono::DateTime<chrono::FixedOffset>>> {
        match self.settings.start_post_date.as_deref() {
            None => Ok(None),
            Some(raw) => parse_timestamp(raw, &self.settings.date_format)
                .map(Some)
                .ok_or_else(|| {
                    ConfigError::InvalidValue {
                        field: "start_post_date".to_string(),
                        reason: format!(
                            "{:?} does not match date format {:?}",
                            raw, self.settings.date_format
                        ),
                    }
                    .into()
                }),
        }
    }

    /// Run one synchronization pass
    pub async fn run_once(&self) -> Result<RunReport> {
        let start_boundary = self.start_boundary()?;
        let entries = self.feed.fetch(&self.settings.feed_url).await?;
        let cursor = self.store.load()?;

        match &cursor {
            Some(cursor) => tracing::info!("Resuming after {}", cursor.published),
            None => tracing::info!("No previous post recorded"),
        }

        let mut report = RunReport {
            fetched: entries.len(),
            ..Default::default()
        };

        let Ordered {
            candidates,
            unparsable,
        } = order_entries(entries, self.settings.order, &self.settings.date_format);
        report.skipped_unparsable = unparsable.len();

        let mut filter = EntryFilter::new(
            self.settings.skip_tag.clone(),
            start_boundary,
            cursor.map(|c| c.at),
        );
        let transformer = Transformer::new(self.settings.splitter.clone());
        let limit = self.gate.platform().character_limit();
        let mut session: Option<Session> = None;

        for candidate in candidates {
            let entry = &candidate.entry;

            if self.shutdown.is_triggered() {
                tracing::info!("Shutdown requested, stopping before {}", entry.link);
                report.cancelled = true;
                break;
            }

            match filter.decide(entry, candidate.published_at) {
                Decision::Post => {}
                Decision::SkipTagged => {
                    tracing::debug!("Skipping {}: carries the skip tag", entry.link);
                    report.skipped_tagged += 1;
                    continue;
                }
                Decision::AlreadyPosted => {
                    if filter.overtaken(candidate.published_at) {
                        tracing::warn!(
                            "Skipping {} ({}): a later entry was already posted this run; \
                             the feed is out of order and this entry will not be posted",
                            entry.link,
                            entry.published
                        );
                        report.skipped_out_of_order += 1;
                    }
                    report.skipped_posted += 1;
                    continue;
                }
                Decision::BeforeStart => {
                    tracing::debug!("Skipping {}: before the start date", entry.link);
                    report.skipped_before_start += 1;
                    continue;
                }
            }

            tracing::info!("Preparing {} {}", entry.link, entry.published);
            let message = transformer
                .build_message(
                    entry,
                    limit,
                    self.media.as_ref(),
                    &self.settings.image_alt_text,
                )
                .await;

            if self.settings.dry_run {
                tracing::info!(
                    "[dry run] would post {:?} -> {}{}",
                    message.render(),
                    message.link.uri,
                    if message.image.is_some() { " with image" } else { "" }
                );
                report.previewed += 1;
                continue;
            }

            let active = self.gate.ensure_session(&mut session).await?;
            let uri = self.gate.publish(active, &message).await?;
            tracing::info!("Posted {} as {}", entry.link, uri);

            self.store.save(&entry.published)?;
            tracing::info!("Saved last posted date {}", entry.published);

            filter.advance(candidate.published_at);
            report.posted += 1;
            if message.image.is_some() {
                report.with_image += 1;
            }
        }

        tracing::info!("Run finished: {}", report);
        Ok(report)
    }
}
