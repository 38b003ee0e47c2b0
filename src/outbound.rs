//! Outbound dispatcher: turns user intent into channel emissions.
//!
//! Sends are fire-and-forget. The rendered copy of a sent message is the
//! server's echo, merged like any other inbound message; until it arrives the
//! send is tracked as a [`PendingMessage`] in the surface's [`PendingOutbox`].

use crate::api::{ChatApiDyn, ImageUpload};
use crate::channel::{ChannelManager, OutgoingMessage};
use crate::conversation::ConversationKey;
use crate::error::{ChatError, Error, Result};
use crate::{DocumentId, Message, MessageBody, UserId};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// The text input of a surface.
#[derive(Debug, Clone, Default)]
pub struct Composer {
    input: String,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, input: impl Into<String>) {
        self.input = input.into();
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn clear(&mut self) {
        self.input.clear();
    }

    pub fn is_blank(&self) -> bool {
        self.input.trim().is_empty()
    }
}

/// A send that has not been echoed back yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub correlation_id: Uuid,
    pub body: MessageBody,
    pub sent_at: Instant,
}

impl PendingMessage {
    /// Short description for inline errors.
    pub fn preview(&self) -> String {
        match &self.body {
            MessageBody::Text { content } if content.chars().count() > 40 => {
                let short: String = content.chars().take(40).collect();
                format!("{short}...")
            }
            MessageBody::Text { content } => content.clone(),
            MessageBody::Image { .. } => "image".into(),
        }
    }
}

/// Unconfirmed sends of one surface, oldest first.
#[derive(Debug, Clone)]
pub struct PendingOutbox {
    entries: Vec<PendingMessage>,
    timeout: Duration,
}

impl PendingOutbox {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Vec::new(),
            timeout,
        }
    }

    /// Track a dispatched body. Returns its correlation id.
    pub fn push(&mut self, body: MessageBody) -> Uuid {
        let correlation_id = Uuid::new_v4();
        self.entries.push(PendingMessage {
            correlation_id,
            body,
            sent_at: Instant::now(),
        });
        correlation_id
    }

    /// Remove the oldest entry that `message` confirms: sent by `me`, same body,
    /// and still within the timeout.
    pub fn reconcile(&mut self, message: &Message, me: Option<&str>) -> Option<PendingMessage> {
        let me = me?;
        if !message.is_from(me) {
            return None;
        }
        let now = Instant::now();
        let index = self.entries.iter().position(|entry| {
            entry.body == message.body && now.duration_since(entry.sent_at) < self.timeout
        })?;
        let entry = self.entries.remove(index);
        tracing::trace!(
            correlation_id = %entry.correlation_id,
            message_id = %message.id,
            "pending message confirmed"
        );
        Some(entry)
    }

    /// Drop and return every entry whose deadline has passed at `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<PendingMessage> {
        let timeout = self.timeout;
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|entry| now.duration_since(entry.sent_at) >= timeout);
        self.entries = kept;
        expired
    }

    /// When the oldest entry expires.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .iter()
            .map(|entry| entry.sent_at + self.timeout)
            .min()
    }

    pub fn entries(&self) -> &[PendingMessage] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Where a send goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTarget {
    pub document_id: DocumentId,
    pub partner_id: Option<UserId>,
    /// Current key, when one is resolved. The first message of a conversation may go without.
    pub conversation_key: Option<ConversationKey>,
}

/// Result of a send request that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Nothing to send; input left untouched.
    Skipped,
    /// Emitted on the channel.
    Dispatched {
        body: MessageBody,
        /// Key returned by the upload endpoint, if any.
        key_hint: Option<ConversationKey>,
    },
}

/// Sends text directly over the channel and images via upload then channel.
#[derive(Clone)]
pub struct OutboundDispatcher {
    channel: Arc<ChannelManager>,
    api: Arc<dyn ChatApiDyn>,
}

impl OutboundDispatcher {
    pub fn new(channel: Arc<ChannelManager>, api: Arc<dyn ChatApiDyn>) -> Self {
        Self { channel, api }
    }

    /// Send the composer's trimmed text.
    ///
    /// Blank input is a no-op that leaves the composer as is. Otherwise the
    /// composer is cleared before emission, whatever the delivery outcome.
    pub async fn send_text(
        &self,
        target: &SendTarget,
        composer: &mut Composer,
    ) -> Result<SendOutcome> {
        let content = composer.input().trim();
        if content.is_empty() {
            return Ok(SendOutcome::Skipped);
        }
        let partner_id = target.partner_id.clone().ok_or(ChatError::MissingPartner)?;
        let body = MessageBody::text(content);
        composer.clear();

        self.emit(target, partner_id, body.clone(), target.conversation_key.clone())
            .await?;
        Ok(SendOutcome::Dispatched {
            body,
            key_hint: None,
        })
    }

    /// Upload an image, then emit it. A failed upload never reaches the channel.
    pub async fn send_image(&self, target: &SendTarget, upload: ImageUpload) -> Result<SendOutcome> {
        let partner_id = target.partner_id.clone().ok_or(ChatError::MissingPartner)?;
        upload.validate()?;

        let response = match self
            .api
            .upload_image(&target.document_id, &partner_id, upload)
            .await
        {
            Ok(response) => response,
            Err(Error::NotAuthenticated) => return Err(Error::NotAuthenticated),
            Err(error) => {
                tracing::warn!(document_id = %target.document_id, %error, "image upload failed");
                return Err(ChatError::Upload(error.user_message()).into());
            }
        };

        let key = target
            .conversation_key
            .clone()
            .or_else(|| response.conversation_key.clone());
        let body = MessageBody::image(response.image_url);
        self.emit(target, partner_id, body.clone(), key).await?;
        Ok(SendOutcome::Dispatched {
            body,
            key_hint: response.conversation_key,
        })
    }

    async fn emit(
        &self,
        target: &SendTarget,
        partner_id: UserId,
        body: MessageBody,
        conversation_key: Option<ConversationKey>,
    ) -> Result<()> {
        let kind = body.kind();
        self.channel
            .send(OutgoingMessage {
                conversation_key,
                document_id: target.document_id.clone(),
                target_user_id: partner_id,
                body,
            })
            .await?;
        tracing::debug!(document_id = %target.document_id, %kind, "message dispatched");
        Ok(())
    }
}

impl std::fmt::Debug for OutboundDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundDispatcher")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::UploadResponse;
    use crate::channel::ClientEvent;
    use crate::error::ApiError;
    use crate::session::SessionStore;
    use crate::testing::{FakeApi, MemoryConnector, text_message};

    struct Harness {
        connector: Arc<MemoryConnector>,
        api: Arc<FakeApi>,
        dispatcher: OutboundDispatcher,
    }

    fn harness() -> Harness {
        let connector = Arc::new(MemoryConnector::new());
        let api = Arc::new(FakeApi::new());
        let session = Arc::new(SessionStore::with_token("t"));
        let channel = Arc::new(ChannelManager::new(connector.clone(), session, 16));
        let dispatcher = OutboundDispatcher::new(channel, api.clone());
        Harness {
            connector,
            api,
            dispatcher,
        }
    }

    fn target(partner: Option<&str>) -> SendTarget {
        SendTarget {
            document_id: "d1".into(),
            partner_id: partner.map(Into::into),
            conversation_key: Some("k1".into()),
        }
    }

    fn sent_messages(connector: &MemoryConnector) -> Vec<OutgoingMessage> {
        connector
            .sent()
            .into_iter()
            .filter_map(|event| match event {
                ClientEvent::Message(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn blank_text_is_a_no_op() {
        let harness = harness();
        let mut composer = Composer::new();
        composer.set("   \n\t");

        let outcome = harness
            .dispatcher
            .send_text(&target(Some("b")), &mut composer)
            .await
            .expect("no-op");
        assert_eq!(outcome, SendOutcome::Skipped);
        assert_eq!(composer.input(), "   \n\t");
        assert!(harness.connector.sent().is_empty());
    }

    #[tokio::test]
    async fn text_is_trimmed_emitted_and_input_cleared() {
        let harness = harness();
        let mut composer = Composer::new();
        composer.set("  Hello  ");

        tokio_test::assert_ok!(
            harness
                .dispatcher
                .send_text(&target(Some("b")), &mut composer)
                .await
        );
        assert_eq!(composer.input(), "");

        let sent = sent_messages(&harness.connector);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, MessageBody::text("Hello"));
        assert_eq!(&*sent[0].target_user_id, "b");
        assert_eq!(sent[0].conversation_key.as_ref().map(|k| k.as_str()), Some("k1"));
    }

    #[tokio::test]
    async fn text_without_partner_is_refused() {
        let harness = harness();
        let mut composer = Composer::new();
        composer.set("Hello");

        let error = harness
            .dispatcher
            .send_text(&target(None), &mut composer)
            .await
            .expect_err("no partner");
        assert!(matches!(error, Error::Chat(ChatError::MissingPartner)));
        assert_eq!(composer.input(), "Hello");
    }

    #[tokio::test]
    async fn rapid_sends_are_dispatched_independently() {
        let harness = harness();
        let mut composer = Composer::new();
        for text in ["one", "two", "three"] {
            composer.set(text);
            tokio_test::assert_ok!(
                harness
                    .dispatcher
                    .send_text(&target(Some("b")), &mut composer)
                    .await
            );
        }
        assert_eq!(sent_messages(&harness.connector).len(), 3);
    }

    #[tokio::test]
    async fn failed_upload_never_reaches_the_channel() {
        let harness = harness();
        harness.api.queue_upload(Err(ApiError::Status {
            status: 500,
            message: "Upload failed".into(),
        }
        .into()));

        let error = harness
            .dispatcher
            .send_image(&target(Some("b")), ImageUpload::new("cat.png", vec![1, 2]))
            .await
            .expect_err("upload fails");
        assert_eq!(error.user_message(), "Upload failed");
        assert!(matches!(error, Error::Chat(ChatError::Upload(_))));
        assert!(sent_messages(&harness.connector).is_empty());
    }

    #[tokio::test]
    async fn image_uses_upload_key_when_none_is_known() {
        let harness = harness();
        harness.api.queue_upload(Ok(UploadResponse {
            image_url: "https://cdn/cat.png".into(),
            conversation_key: Some("server-key".into()),
        }));
        let mut first_message = target(Some("b"));
        first_message.conversation_key = None;

        let outcome = harness
            .dispatcher
            .send_image(&first_message, ImageUpload::new("cat.png", vec![1]))
            .await
            .expect("sent");
        assert_eq!(
            outcome,
            SendOutcome::Dispatched {
                body: MessageBody::image("https://cdn/cat.png"),
                key_hint: Some("server-key".into()),
            }
        );
        let sent = sent_messages(&harness.connector);
        assert_eq!(sent[0].conversation_key.as_ref().map(|k| k.as_str()), Some("server-key"));
        assert_eq!(harness.api.upload_calls(), vec![("d1".to_string(), "b".to_string())]);
    }

    #[tokio::test]
    async fn invalid_image_is_rejected_before_upload() {
        let harness = harness();
        let error = harness
            .dispatcher
            .send_image(&target(Some("b")), ImageUpload::new("notes.pdf", vec![1]))
            .await
            .expect_err("invalid");
        assert!(matches!(error, Error::Chat(ChatError::InvalidImage(_))));
        assert!(harness.api.upload_calls().is_empty());
    }

    #[tokio::test]
    async fn echo_from_me_reconciles_the_oldest_pending_entry() {
        let mut outbox = PendingOutbox::new(Duration::from_secs(30));
        let first = outbox.push(MessageBody::text("ok"));
        let second = outbox.push(MessageBody::text("ok"));

        let echo = text_message("m1", "k1", "a", "ok");
        assert!(outbox.reconcile(&echo, Some("b")).is_none());
        assert_eq!(
            outbox.reconcile(&echo, Some("a")).map(|entry| entry.correlation_id),
            Some(first)
        );
        assert_eq!(outbox.entries()[0].correlation_id, second);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entries_expire() {
        let mut outbox = PendingOutbox::new(Duration::from_secs(5));
        outbox.push(MessageBody::text("lost"));
        assert_eq!(
            outbox.next_deadline(),
            Some(Instant::now() + Duration::from_secs(5))
        );

        tokio::time::advance(Duration::from_secs(6)).await;
        let echo = text_message("m1", "k1", "a", "lost");
        assert!(outbox.reconcile(&echo, Some("a")).is_none());

        let expired = outbox.expire(Instant::now());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].preview(), "lost");
        assert!(outbox.is_empty());
    }
}
