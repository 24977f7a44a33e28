//! Mock platform implementation for testing
//!
//! Scripted logins and publishes, call counters, and an optional event log
//! shared with other test doubles so tests can assert on the interleaving of
//! posts and cursor saves.

use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{PlatformError, Result};
use crate::platforms::Platform;
use crate::types::{EventLog, Message, Session};

const MOCK_DID: &str = "did:plc:mock";

/// Mock platform for testing
pub struct MockPlatform {
    name: String,
    character_limit: usize,
    login_failures: Mutex<VecDeque<PlatformError>>,
    login_always_fails: Option<PlatformError>,
    publish_failures: Mutex<VecDeque<PlatformError>>,
    login_calls: AtomicUsize,
    publish_calls: AtomicUsize,
    published: Mutex<Vec<Message>>,
    events: EventLog,
}

impl MockPlatform {
    /// Create a mock platform that always succeeds
    pub fn success(name: &str) -> Self {
        Self {
            name: name.to_string(),
            character_limit: 300,
            login_failures: Mutex::new(VecDeque::new()),
            login_always_fails: None,
            publish_failures: Mutex::new(VecDeque::new()),
            login_calls: AtomicUsize::new(0),
            publish_calls: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail the next logins with these errors, in order, then succeed
    pub fn fail_logins(self, errors: Vec<PlatformError>) -> Self {
        *self.login_failures.lock().unwrap() = errors.into();
        self
    }

    /// Fail every login with the given error
    pub fn login_always_fails(mut self, error: PlatformError) -> Self {
        self.login_always_fails = Some(error);
        self
    }

    /// Fail the next publishes with these errors, in order, then succeed
    pub fn fail_publishes(self, errors: Vec<PlatformError>) -> Self {
        *self.publish_failures.lock().unwrap() = errors.into();
        self
    }

    /// Record `login` and `publish:<link>` into a shared event log
    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.character_limit = limit;
        self
    }

    /// Get the number of times login was called
    pub fn login_call_count(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    /// Get the number of times publish was called
    pub fn publish_call_count(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    /// Get all messages that were published successfully
    pub fn published(&self) -> Vec<Message> {
        self.published.lock().unwrap().clone()
    }

    /// Links of the published messages, in publish order
    pub fn published_links(&self) -> Vec<String> {
        self.published()
            .into_iter()
            .map(|m| m.link.uri)
            .collect()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn login(&self, handle: &str, _password: &SecretString) -> Result<Session> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.record("login".to_string());

        if let Some(error) = &self.login_always_fails {
            return Err(error.clone().into());
        }
        if let Some(error) = self.login_failures.lock().unwrap().pop_front() {
            return Err(error.into());
        }

        Ok(Session {
            did: MOCK_DID.to_string(),
            handle: handle.to_string(),
            access_jwt: SecretString::from("mock-token".to_string()),
        })
    }

    async fn publish(&self, session: &Session, message: &Message) -> Result<String> {
        let call = self.publish_calls.fetch_add(1, Ordering::SeqCst) + 1;

        if session.did != MOCK_DID {
            return Err(PlatformError::Authentication("Unknown session".to_string()).into());
        }

        self.validate_message(message)?;

        if let Some(error) = self.publish_failures.lock().unwrap().pop_front() {
            self.record(format!("publish-failed:{}", message.link.uri));
            return Err(error.into());
        }

        self.record(format!("publish:{}", message.link.uri));
        self.published.lock().unwrap().push(message.clone());

        Ok(format!("at://{}/app.bsky.feed.post/mock-{}", MOCK_DID, call))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn character_limit(&self) -> usize {
        self.character_limit
    }
}
