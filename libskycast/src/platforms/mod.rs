//! Posting target abstraction and implementations
//!
//! A platform knows how to open a [`Session`] and how to publish a
//! [`Message`] with it. The session is returned to the caller rather than
//! kept inside the platform, so whoever drives a run decides how long it
//! lives.
//!
//! # Examples
//!
//! ```no_run
//! use libskycast::platforms::{bluesky::BlueskyClient, Platform};
//! use libskycast::transform::Transformer;
//! use libskycast::types::Entry;
//! use secrecy::SecretString;
//!
//! # async fn example() -> libskycast::error::Result<()> {
//! let client = BlueskyClient::new("https://bsky.social", std::time::Duration::from_secs(30)).await?;
//! let password = SecretString::from("app-password".to_string());
//! let session = client.login("me.bsky.social", &password).await?;
//!
//! let entry = Entry {
//!     title: "Hello from my blog".to_string(),
//!     link: "https://blog.example/hello".to_string(),
//!     ..Default::default()
//! };
//! let message = Transformer::new(None).transform(&entry, client.character_limit());
//! let uri = client.publish(&session, &message).await?;
//! println!("Posted: {}", uri);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::{PlatformError, Result};
use crate::types::{Message, Session};

pub mod bluesky;

// Mock platform is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Platform trait for the posting target
#[async_trait]
pub trait Platform: Send + Sync {
    /// Authenticate and open a session
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::RateLimit` when the target throttles logins,
    /// `PlatformError::Authentication` for rejected credentials, and
    /// `PlatformError::Network` when the service cannot be reached.
    async fn login(&self, handle: &str, password: &SecretString) -> Result<Session>;

    /// Publish a message, returning the platform's identifier for the post
    ///
    /// Messages carrying an image are published as image posts.
    async fn publish(&self, session: &Session, message: &Message) -> Result<String>;

    /// Lowercase platform identifier
    fn name(&self) -> &str;

    /// Maximum visible length of a post, in characters
    fn character_limit(&self) -> usize;

    /// Check a message against the platform's limits before publishing
    fn validate_message(&self, message: &Message) -> Result<()> {
        let length = message.render().chars().count();
        if length > self.character_limit() {
            return Err(PlatformError::Validation(format!(
                "Post exceeds {}'s {} character limit (current: {} characters)",
                self.name(),
                self.character_limit(),
                length
            ))
            .into());
        }
        Ok(())
    }
}
