//! Chat widgets hosted by the document viewer and the document detail page.

use crate::api::ImageUpload;
use crate::error::{Error, Result};
use crate::outbound::SendOutcome;
use crate::surface::session::{ChatTarget, ConversationSession, OpenOutcome, SessionUpdate};
use crate::surface::{SurfaceDeps, SurfaceKind};
use crate::{DocumentId, Identity, UserId};

/// What the hosting page already knows about the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub title: Option<String>,
    /// The uploader is the chat partner. Absent for anonymous or system uploads.
    pub uploader_id: Option<UserId>,
    pub uploader_name: Option<String>,
}

impl DocumentInfo {
    pub fn new(id: impl Into<DocumentId>, uploader_id: Option<UserId>) -> Self {
        Self {
            id: id.into(),
            title: None,
            uploader_id,
            uploader_name: None,
        }
    }

    fn uploader(&self) -> Option<Identity> {
        let id = self.uploader_id.clone().filter(|id| !id.is_empty())?;
        Some(Identity {
            full_name: self.uploader_name.clone(),
            ..Identity::new(id)
        })
    }
}

/// A document-scoped chat panel. The partner is always the document's uploader.
#[derive(Debug)]
pub struct DocumentChat {
    document: DocumentInfo,
    session: ConversationSession,
}

impl DocumentChat {
    /// `kind` is either [`SurfaceKind::DocumentViewer`] or [`SurfaceKind::DocumentDetail`].
    pub fn new(kind: SurfaceKind, deps: SurfaceDeps, document: DocumentInfo) -> Self {
        debug_assert!(kind != SurfaceKind::Inbox, "inbox has its own surface");
        Self {
            document,
            session: ConversationSession::new(kind, deps),
        }
    }

    /// Open the panel on user intent.
    ///
    /// Checks the session token first. A document without an uploader cannot be
    /// chatted about and yields `OpenOutcome::Unavailable` without any network work.
    pub async fn open_chat(&mut self) -> Result<OpenOutcome> {
        if !self.session.deps().session.is_authenticated() {
            return Err(Error::NotAuthenticated);
        }
        let Some(uploader) = self.document.uploader() else {
            tracing::debug!(document_id = %self.document.id, "document has no uploader to chat with");
            return Ok(OpenOutcome::Unavailable);
        };

        let target = ChatTarget {
            partner: Some(uploader.clone()),
            ..ChatTarget::new(self.document.id.clone(), uploader.id)
        };
        self.session.open(target).await
    }

    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        self.session.next_update().await
    }

    pub async fn send_text(&mut self, text: &str) -> Result<SendOutcome> {
        self.session.composer_mut().set(text);
        self.session.send_text().await
    }

    pub async fn send_image(&mut self, upload: ImageUpload) -> Result<SendOutcome> {
        self.session.send_image(upload).await
    }

    /// The user closed the panel.
    pub async fn close_chat(&mut self) {
        self.session.close().await;
    }

    /// The hosting page is going away.
    pub async fn unmount(self) {
        self.session.unmount().await;
    }

    pub fn document(&self) -> &DocumentInfo {
        &self.document
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ConversationSession {
        &mut self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::HistoryResponse;
    use crate::channel::{ClientEvent, ServerEvent};
    use crate::error::ChatError;
    use crate::testing::{FakeApi, MemoryConnector, deps, identity, text_message};
    use std::sync::Arc;
    use std::time::Duration;

    fn chat(
        kind: SurfaceKind,
        uploader: Option<&str>,
        token: Option<&str>,
    ) -> (DocumentChat, Arc<MemoryConnector>, Arc<FakeApi>) {
        let connector = Arc::new(MemoryConnector::new());
        let api = Arc::new(FakeApi::new());
        let document = DocumentInfo {
            title: Some("Linear algebra".into()),
            uploader_name: Some("Bob".into()),
            ..DocumentInfo::new("d1", uploader.map(Into::into))
        };
        let chat = DocumentChat::new(kind, deps(&connector, &api, token), document);
        (chat, connector, api)
    }

    #[tokio::test]
    async fn viewer_chat_joins_the_uploader() {
        let (mut chat, connector, api) = chat(SurfaceKind::DocumentViewer, Some("B"), Some("t"));
        api.queue_history(Ok(HistoryResponse {
            conversation_key: Some("k1".into()),
            messages: Vec::new(),
            me: Some(identity("A", "Alice")),
            partner: None,
        }));

        assert_eq!(chat.open_chat().await.expect("open"), OpenOutcome::Opened);
        assert_eq!(api.history_calls(), vec![("d1".to_string(), "B".to_string(), 100)]);
        assert!(matches!(
            connector.sent().first(),
            Some(ClientEvent::Join(join)) if &*join.target_user_id == "B"
        ));
        assert_eq!(
            chat.session().partner().map(Identity::display_name),
            Some("Bob")
        );

        chat.send_text("Hello").await.expect("send");
        connector.push(ServerEvent::Message(text_message("m1", "k1", "A", "Hello")));
        let update = tokio::time::timeout(Duration::from_secs(2), chat.next_update())
            .await
            .expect("in time");
        assert!(matches!(update, Some(SessionUpdate::Appended { index: 0, .. })));
        assert_eq!(chat.session().messages().len(), 1);
    }

    #[tokio::test]
    async fn detail_chat_without_token_prompts_sign_in() {
        let (mut chat, connector, api) = chat(SurfaceKind::DocumentDetail, Some("B"), None);
        let error = chat.open_chat().await.expect_err("sign-in required");
        assert!(error.is_not_authenticated());
        assert!(api.history_calls().is_empty());
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn document_without_uploader_is_unavailable() {
        let (mut chat, _, api) = chat(SurfaceKind::DocumentViewer, None, Some("t"));
        assert_eq!(chat.open_chat().await.expect("ok"), OpenOutcome::Unavailable);
        assert!(api.history_calls().is_empty());
    }

    #[tokio::test]
    async fn failed_image_upload_shows_an_inline_error() {
        let (mut chat, connector, api) = chat(SurfaceKind::DocumentDetail, Some("B"), Some("t"));
        chat.open_chat().await.expect("open");
        api.queue_upload(Err(crate::error::ApiError::Decode("connection reset".into()).into()));

        chat.send_image(ImageUpload::new("scan.jpg", vec![1, 2, 3]))
            .await
            .expect_err("upload fails");
        assert!(matches!(chat.session().error(), Some(ChatError::Upload(_))));
        assert!(
            !connector
                .sent()
                .iter()
                .any(|event| matches!(event, ClientEvent::Message(_)))
        );
    }

    #[tokio::test]
    async fn unmount_leaves_and_disposes_the_channel() {
        let (mut chat, connector, api) = chat(SurfaceKind::DocumentViewer, Some("B"), Some("t"));
        api.queue_history(Ok(HistoryResponse {
            conversation_key: Some("k1".into()),
            messages: Vec::new(),
            me: None,
            partner: None,
        }));
        chat.open_chat().await.expect("open");
        let channel = chat.session().deps().channel.clone();

        chat.unmount().await;
        assert!(matches!(connector.sent().last(), Some(ClientEvent::Leave(_))));
        assert!(!channel.is_connected().await);
    }
}
