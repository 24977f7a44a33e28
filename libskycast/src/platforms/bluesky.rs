//! Bluesky platform implementation
//!
//! Built on `bsky_sdk::BskyAgent`. The agent keeps the AT Protocol session
//! after `login`; the returned [`Session`] mirrors it for the posting gate.

use async_trait::async_trait;
use bsky_sdk::agent::config::Config as AgentConfig;
use bsky_sdk::BskyAgent;
use secrecy::{ExposeSecret, SecretString};
use std::future::Future;
use std::time::Duration;

use crate::error::{PlatformError, Result};
use crate::platforms::Platform;
use crate::types::{ImageAttachment, Message, Session};

/// Bluesky's post length limit (graphemes, counted here as characters)
pub const CHARACTER_LIMIT: usize = 300;

/// Map Bluesky/AT Protocol errors to PlatformError
///
/// bsky-sdk errors carry the XRPC status and the AT Protocol error code in
/// their display and debug output, so both are searched.
///
/// # Arguments
///
/// * `error` - The error from bsky-sdk (generic over error types)
/// * `context` - The operation context (e.g., "authentication", "posting")
fn map_bluesky_error<E: std::fmt::Display + std::fmt::Debug>(
    error: E,
    context: &str,
) -> PlatformError {
    let error_msg = format!("{}", error);
    let debug_msg = format!("{:?}", error);
    let mentions = |needle: &str| error_msg.contains(needle) || debug_msg.contains(needle);

    // Rate limiting (429 status). Checked first: the gate backs off on it.
    if mentions("429")
        || mentions("RateLimitExceeded")
        || mentions("TooManyRequests")
        || mentions("Too Many Requests")
    {
        return PlatformError::RateLimit(format!(
            "Bluesky rate limit exceeded during {}: {}. Please wait before trying again.",
            context, error_msg
        ));
    }

    // Authentication errors (401, 403, or authentication-related error codes)
    if mentions("401")
        || mentions("403")
        || mentions("AuthenticationRequired")
        || mentions("InvalidToken")
        || mentions("ExpiredToken")
        || mentions("NotLoggedIn")
        || debug_msg.contains("Unauthorized")
        || debug_msg.contains("Forbidden")
    {
        return PlatformError::Authentication(format!(
            "Bluesky authentication failed during {}: {}. Please check your credentials and re-authenticate.",
            context, error_msg
        ));
    }

    // Invalid credentials during login
    if mentions("InvalidCredentials")
        || mentions("AccountNotFound")
        || (context == "authentication" && (mentions("400") || error_msg.contains("invalid")))
    {
        return PlatformError::Authentication(format!(
            "Invalid Bluesky credentials: {}. Please check your handle and app password.",
            error_msg
        ));
    }

    // Validation errors (400/413 status or validation-related error codes)
    if mentions("400")
        || mentions("413")
        || mentions("InvalidRequest")
        || mentions("InvalidRecord")
        || mentions("BlobTooLarge")
        || debug_msg.contains("BadRequest")
    {
        return PlatformError::Validation(format!(
            "Bluesky rejected the request during {}: {}. Check content format and length.",
            context, error_msg
        ));
    }

    // Network/connection errors and gateway outages
    if error_msg.contains("connection")
        || error_msg.contains("network")
        || error_msg.contains("timeout")
        || error_msg.contains("unreachable")
        || error_msg.contains("dns")
        || error_msg.contains("error sending request")
        || mentions("502")
        || mentions("503")
        || mentions("504")
        || debug_msg.contains("Connect")
        || debug_msg.contains("Timeout")
        || debug_msg.contains("Network")
    {
        return PlatformError::Network(format!(
            "Network error while connecting to Bluesky PDS during {}: {}. Check your internet connection and PDS availability.",
            context, error_msg
        ));
    }

    // Default to Posting error, keeping the AT Protocol error code in the message
    PlatformError::Posting(format!(
        "Bluesky operation failed during {}: {}",
        context, error_msg
    ))
}

/// Post record for a message: rendered text, link facet and optional images embed
fn build_record(
    message: &Message,
    image: Option<(bsky_sdk::api::types::BlobRef, &ImageAttachment)>,
) -> bsky_sdk::api::app::bsky::feed::post::RecordData {
    use bsky_sdk::api::app::bsky::embed::images;
    use bsky_sdk::api::app::bsky::feed::post::{RecordData, RecordEmbedRefs};
    use bsky_sdk::api::app::bsky::richtext::facet;
    use bsky_sdk::api::types::string::Datetime;
    use bsky_sdk::api::types::Union;

    let (byte_start, byte_end) = message.link_byte_range();
    let link = facet::MainData {
        index: facet::ByteSliceData {
            byte_start,
            byte_end,
        }
        .into(),
        features: vec![Union::Refs(facet::MainFeaturesItem::Link(Box::new(
            facet::LinkData {
                uri: message.link.uri.clone(),
            }
            .into(),
        )))],
    };

    let embed = image.map(|(blob, attachment)| {
        Union::Refs(RecordEmbedRefs::AppBskyEmbedImagesMain(Box::new(
            images::MainData {
                images: vec![images::ImageData {
                    alt: attachment.alt_text.clone(),
                    aspect_ratio: None,
                    image: blob,
                }
                .into()],
            }
            .into(),
        )))
    });

    RecordData {
        created_at: Datetime::now(),
        embed,
        entities: None,
        facets: Some(vec![link.into()]),
        labels: None,
        langs: None,
        reply: None,
        tags: None,
        text: message.render(),
    }
}

pub struct BlueskyClient {
    agent: BskyAgent,
    timeout: Duration,
}

impl BlueskyClient {
    /// Create a new Bluesky client
    ///
    /// # Arguments
    ///
    /// * `service` - Base URL of the PDS (e.g., "https://bsky.social")
    /// * `timeout` - Upper bound for each call to the PDS
    pub async fn new(service: &str, timeout: Duration) -> Result<Self> {
        let agent = BskyAgent::builder()
            .config(AgentConfig {
                endpoint: service.trim_end_matches('/').to_string(),
                ..Default::default()
            })
            .build()
            .await
            .map_err(|e| PlatformError::Network(format!("Failed to create agent: {}", e)))?;

        Ok(Self { agent, timeout })
    }

    /// Run one PDS call under the request timeout
    async fn bounded<T, E, F>(&self, call: F, context: &str) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display + std::fmt::Debug,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(|e| map_bluesky_error(e, context).into()),
            Err(_) => Err(PlatformError::Network(format!(
                "Bluesky PDS did not answer within {} during {}",
                humantime::format_duration(self.timeout),
                context
            ))
            .into()),
        }
    }

    async fn upload_image(&self, image: &ImageAttachment) -> Result<bsky_sdk::api::types::BlobRef> {
        tracing::debug!("Uploading {} byte {} blob", image.bytes.len(), image.mime);

        let output = self
            .bounded(
                self.agent.api.com.atproto.repo.upload_blob(image.bytes.clone()),
                "image upload",
            )
            .await?;
        Ok(output.data.blob)
    }
}

#[async_trait]
impl Platform for BlueskyClient {
    async fn login(&self, handle: &str, password: &SecretString) -> Result<Session> {
        tracing::debug!("Creating Bluesky session for handle: {}", handle);

        let session = self
            .bounded(
                self.agent.login(handle, password.expose_secret()),
                "authentication",
            )
            .await?;
        tracing::debug!("Bluesky session created for {}", session.did.as_str());

        Ok(Session {
            did: session.did.as_str().to_string(),
            handle: session.handle.as_str().to_string(),
            access_jwt: SecretString::from(session.access_jwt.clone()),
        })
    }

    async fn publish(&self, session: &Session, message: &Message) -> Result<String> {
        self.validate_message(message)?;

        let blob = match &message.image {
            Some(image) => Some((self.upload_image(image).await?, image)),
            None => None,
        };

        let record = build_record(message, blob);
        tracing::debug!(
            "Posting to Bluesky as {}: {} characters",
            session.did,
            record.text.chars().count()
        );

        let response = self
            .bounded(self.agent.create_record(record), "posting")
            .await?;

        let at_uri = response.uri.to_string();
        tracing::debug!("Posted to Bluesky: {}", at_uri);

        Ok(at_uri)
    }

    fn name(&self) -> &str {
        "bluesky"
    }

    fn character_limit(&self) -> usize {
        CHARACTER_LIMIT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageMimeType, LinkAnnotation};
    use crate::SkycastError;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RECORD_CID: &str = "bafyreidfayvfuwqa7qlnopdjiqrxzs6blmoeu4rujcjtnci5beludirz2a";
    const BLOB_CID: &str = "bafkreibme22gw2h7y2h7tg2fhqotaqjucnbc24deqo72b6mkl2egezxhvy";

    async fn client(server: &MockServer) -> BlueskyClient {
        BlueskyClient::new(&server.uri(), Duration::from_secs(5))
            .await
            .unwrap()
    }

    async fn mount_session(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.server.createSession"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessJwt": "access-token",
                "refreshJwt": "refresh-token",
                "handle": "me.bsky.social",
                "did": "did:plc:abc123"
            })))
            .mount(server)
            .await;
    }

    /// A client that already holds a session on `server`
    async fn logged_in(server: &MockServer) -> (BlueskyClient, Session) {
        mount_session(server).await;
        let client = client(server).await;
        let session = client
            .login("me.bsky.social", &SecretString::from("app-password".to_string()))
            .await
            .unwrap();
        (client, session)
    }

    fn message(text: &str) -> Message {
        Message {
            text: text.to_string(),
            link: LinkAnnotation {
                label: "Read post".to_string(),
                uri: "http://x/a".to_string(),
            },
            image: None,
        }
    }

    #[tokio::test]
    async fn test_login_creates_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.server.createSession"))
            .and(body_partial_json(json!({
                "identifier": "me.bsky.social",
                "password": "app-password"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessJwt": "access-token",
                "refreshJwt": "refresh-token",
                "handle": "me.bsky.social",
                "did": "did:plc:abc123"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = client(&server)
            .await
            .login("me.bsky.social", &SecretString::from("app-password".to_string()))
            .await
            .unwrap();

        assert_eq!(session.did, "did:plc:abc123");
        assert_eq!(session.handle, "me.bsky.social");
        assert_eq!(session.access_jwt.expose_secret(), "access-token");
    }

    #[tokio::test]
    async fn test_login_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.server.createSession"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": "RateLimitExceeded",
                "message": "Rate Limit Exceeded"
            })))
            .mount(&server)
            .await;

        let result = client(&server)
            .await
            .login("me.bsky.social", &SecretString::from("pw".to_string()))
            .await;

        assert!(matches!(
            result,
            Err(SkycastError::Platform(PlatformError::RateLimit(_)))
        ));
    }

    #[tokio::test]
    async fn test_login_bad_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.server.createSession"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "AuthenticationRequired",
                "message": "Invalid identifier or password"
            })))
            .mount(&server)
            .await;

        let result = client(&server)
            .await
            .login("me.bsky.social", &SecretString::from("wrong".to_string()))
            .await;

        assert!(matches!(
            result,
            Err(SkycastError::Platform(PlatformError::Authentication(_)))
        ));
    }

    #[tokio::test]
    async fn test_publish_text_post_with_link_facet() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.repo.createRecord"))
            .and(header("authorization", "Bearer access-token"))
            .and(body_partial_json(json!({
                "repo": "did:plc:abc123",
                "collection": "app.bsky.feed.post",
                "record": {
                    "$type": "app.bsky.feed.post",
                    "text": "A Read post",
                    "facets": [{
                        "index": { "byteStart": 2, "byteEnd": 11 },
                        "features": [{
                            "$type": "app.bsky.richtext.facet#link",
                            "uri": "http://x/a"
                        }]
                    }]
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "uri": "at://did:plc:abc123/app.bsky.feed.post/3k",
                "cid": RECORD_CID
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, session) = logged_in(&server).await;
        let uri = client.publish(&session, &message("A ")).await.unwrap();
        assert_eq!(uri, "at://did:plc:abc123/app.bsky.feed.post/3k");
    }

    #[tokio::test]
    async fn test_publish_image_post_uploads_blob_first() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.repo.uploadBlob"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "blob": {
                    "$type": "blob",
                    "ref": { "$link": BLOB_CID },
                    "mimeType": "image/png",
                    "size": 3
                }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.repo.createRecord"))
            .and(body_partial_json(json!({
                "record": {
                    "embed": {
                        "$type": "app.bsky.embed.images",
                        "images": [{
                            "alt": "Image coming from the Fediverse",
                            "image": { "ref": { "$link": BLOB_CID } }
                        }]
                    }
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "uri": "at://did:plc:abc123/app.bsky.feed.post/img",
                "cid": RECORD_CID
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut with_image = message("A ");
        with_image.image = Some(ImageAttachment {
            bytes: vec![1, 2, 3],
            mime: ImageMimeType::Png,
            alt_text: "Image coming from the Fediverse".to_string(),
        });

        let (client, session) = logged_in(&server).await;
        let uri = client.publish(&session, &with_image).await.unwrap();
        assert_eq!(uri, "at://did:plc:abc123/app.bsky.feed.post/img");
    }

    #[tokio::test]
    async fn test_publish_rejects_overlong_message() {
        let server = MockServer::start().await;
        let (client, session) = logged_in(&server).await;
        let result = client.publish(&session, &message(&"a".repeat(300))).await;

        assert!(matches!(
            result,
            Err(SkycastError::Platform(PlatformError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn test_publish_server_error_is_posting_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.repo.createRecord"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": "InternalServerError",
                "message": "oops"
            })))
            .mount(&server)
            .await;

        let (client, session) = logged_in(&server).await;
        let result = client.publish(&session, &message("A ")).await;
        match result {
            Err(SkycastError::Platform(PlatformError::Posting(msg))) => {
                assert!(msg.contains("posting"));
            }
            other => panic!("Expected Posting error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_pds_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.server.createSession"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = BlueskyClient::new(&server.uri(), Duration::from_millis(100))
            .await
            .unwrap();
        let result = client
            .login("me.bsky.social", &SecretString::from("pw".to_string()))
            .await;

        assert!(matches!(
            result,
            Err(SkycastError::Platform(PlatformError::Network(_)))
        ));
    }

    #[test]
    fn test_record_facet_uses_utf8_byte_offsets() {
        use bsky_sdk::api::types::Union;
        use bsky_sdk::api::app::bsky::richtext::facet::MainFeaturesItem;

        let record = build_record(&message("Café ☕ "), None);
        assert_eq!(record.text, "Café ☕ Read post");

        let facets = record.facets.as_ref().unwrap();
        let facet = &facets[0];
        assert_eq!(
            &record.text[facet.index.byte_start..facet.index.byte_end],
            "Read post"
        );
        match &facet.features[0] {
            Union::Refs(MainFeaturesItem::Link(link)) => assert_eq!(link.uri, "http://x/a"),
            other => panic!("Expected link feature, got {:?}", other),
        }
        assert!(record.embed.is_none());
    }

    #[tokio::test]
    async fn test_name_and_character_limit() {
        let client = BlueskyClient::new("https://bsky.social/", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(client.name(), "bluesky");
        assert_eq!(client.character_limit(), 300);
    }

    // Error mapping tests

    #[test]
    fn test_error_mapping_rate_limit_429() {
        match map_bluesky_error(
            "XrpcResponse(XrpcError { status: 429, error: Some(\"RateLimitExceeded\") })",
            "authentication",
        ) {
            PlatformError::RateLimit(msg) => {
                assert!(msg.contains("rate limit exceeded"));
                assert!(msg.contains("wait before trying again"));
            }
            other => panic!("Expected RateLimit error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_mapping_rate_limit_code_wins_over_400() {
        assert!(matches!(
            map_bluesky_error("status: 400, error: RateLimitExceeded", "posting"),
            PlatformError::RateLimit(_)
        ));
    }

    #[test]
    fn test_error_mapping_authentication_401() {
        match map_bluesky_error("status: 401 Unauthorized", "posting") {
            PlatformError::Authentication(msg) => {
                assert!(msg.contains("authentication failed"));
                assert!(msg.contains("posting"));
            }
            other => panic!("Expected Authentication error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_mapping_expired_token() {
        assert!(matches!(
            map_bluesky_error("ExpiredToken: Token has expired", "posting"),
            PlatformError::Authentication(_)
        ));
    }

    #[test]
    fn test_error_mapping_invalid_credentials() {
        match map_bluesky_error("InvalidCredentials", "authentication") {
            PlatformError::Authentication(msg) => {
                assert!(msg.contains("Invalid Bluesky credentials"));
                assert!(msg.contains("handle and app password"));
            }
            other => panic!("Expected Authentication error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_mapping_validation_400() {
        match map_bluesky_error("status: 400, error: InvalidRequest", "posting") {
            PlatformError::Validation(msg) => {
                assert!(msg.contains("rejected the request"));
                assert!(msg.contains("InvalidRequest"));
            }
            other => panic!("Expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_mapping_transport_failure() {
        match map_bluesky_error(
            "error sending request for url (http://127.0.0.1:9/xrpc/com.atproto.server.createSession)",
            "authentication",
        ) {
            PlatformError::Network(msg) => {
                assert!(msg.contains("Bluesky PDS"));
                assert!(msg.contains("authentication"));
            }
            other => panic!("Expected Network error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_mapping_gateway_outage() {
        assert!(matches!(
            map_bluesky_error("status: 503 Service Unavailable", "posting"),
            PlatformError::Network(_)
        ));
    }

    #[test]
    fn test_error_mapping_context_included() {
        match map_bluesky_error("Some error", "custom_operation") {
            PlatformError::Posting(msg) => assert!(msg.contains("custom_operation")),
            other => panic!("Expected Posting error, got {:?}", other),
        }
    }
}
