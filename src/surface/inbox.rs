//! The inbox page: every conversation of the current user plus one open thread.

use crate::api::ImageUpload;
use crate::conversation::{ConversationKey, ConversationList, ConversationSummary};
use crate::error::{ChatError, Error, Result};
use crate::outbound::SendOutcome;
use crate::surface::session::{ChatTarget, ConversationSession, OpenOutcome, SessionUpdate};
use crate::surface::{SurfaceDeps, SurfaceKind};
use crate::Identity;

/// Conversation list with an active thread.
///
/// Any inbound message, for any conversation, refreshes the summaries so
/// previews stay current while another thread is open. The refresh runs at the
/// start of the following [`next_update`](Self::next_update) call, after the
/// message has been handed to the host.
#[derive(Debug)]
pub struct InboxSurface {
    session: ConversationSession,
    summaries: Vec<ConversationSummary>,
    me: Option<Identity>,
    active: Option<ConversationKey>,
    initial_chosen: bool,
    refresh_pending: bool,
}

impl InboxSurface {
    pub fn new(deps: SurfaceDeps) -> Self {
        Self {
            session: ConversationSession::new(SurfaceKind::Inbox, deps),
            summaries: Vec::new(),
            me: None,
            active: None,
            initial_chosen: false,
            refresh_pending: false,
        }
    }

    /// First load. Opens the first conversation, once per surface.
    pub async fn load(&mut self) -> Result<()> {
        self.refresh(self.initial_chosen).await?;
        if self.initial_chosen {
            return Ok(());
        }
        self.initial_chosen = true;

        if let Some(first) = self.summaries.first().cloned() {
            match self.select(&first).await {
                Ok(_) => {}
                Err(Error::NotAuthenticated) => return Err(Error::NotAuthenticated),
                Err(error) => {
                    tracing::warn!(conversation_key = %first.conversation_key, %error, "could not open first conversation");
                }
            }
        }
        Ok(())
    }

    /// Reload the summaries.
    ///
    /// The active conversation is re-bound by key. When it is missing from the new
    /// list it stays selected only with `keep_active`.
    pub async fn refresh(&mut self, keep_active: bool) -> Result<()> {
        if !self.session.deps().session.is_authenticated() {
            return Err(Error::NotAuthenticated);
        }
        let ConversationList { conversations, me } = self.session.deps().api.conversations().await?;
        tracing::debug!(count = conversations.len(), "conversation summaries loaded");

        self.summaries = conversations;
        if me.is_some() {
            self.me = me;
        }
        if self.active.is_some() && self.active_summary().is_none() {
            if keep_active {
                tracing::debug!(conversation_key = ?self.active, "active conversation missing from refreshed list");
            } else {
                self.active = None;
            }
        }
        Ok(())
    }

    /// Open the conversation behind `summary`.
    pub async fn select(&mut self, summary: &ConversationSummary) -> Result<OpenOutcome> {
        let Some(partner_id) = summary.partner_user_id().cloned() else {
            return Err(ChatError::MissingPartner.into());
        };
        let Some(document_id) = summary
            .document_id
            .clone()
            .or_else(|| summary.document.as_ref().map(|document| document.id.clone()))
        else {
            return Err(ChatError::Unavailable("conversation has no document".into()).into());
        };

        let target = ChatTarget {
            partner: summary.partner.clone(),
            fallback_key: Some(summary.conversation_key.clone()),
            ..ChatTarget::new(document_id, partner_id)
        };
        let outcome = self.session.open(target).await?;
        if outcome != OpenOutcome::Abandoned {
            self.active = Some(
                self.session
                    .conversation_key()
                    .cloned()
                    .unwrap_or_else(|| summary.conversation_key.clone()),
            );
        }
        Ok(outcome)
    }

    /// Open the conversation with the given key from the current list.
    pub async fn select_key(&mut self, key: &ConversationKey) -> Result<OpenOutcome> {
        let summary = self
            .summaries
            .iter()
            .find(|summary| &summary.conversation_key == key)
            .cloned()
            .ok_or_else(|| ChatError::Unavailable(format!("unknown conversation {key}")))?;
        self.select(&summary).await
    }

    /// Next update of the active thread. Inbound messages also refresh the list.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        if let Err(error) = self.flush_refresh().await {
            tracing::warn!(%error, "failed to refresh conversation summaries");
        }

        let update = self.session.next_update().await?;
        match &update {
            SessionUpdate::Appended { .. } | SessionUpdate::ForeignMessage { .. } => {
                self.refresh_pending = true;
            }
            SessionUpdate::Joined { key } if self.active.is_some() => {
                self.active = Some(key.clone());
            }
            _ => {}
        }
        Some(update)
    }

    /// Run the summary refresh owed to earlier inbound messages, if any.
    ///
    /// The flag is cleared only once the refresh has completed, so a refresh
    /// cut short by a dropped future runs again on the next call.
    pub async fn flush_refresh(&mut self) -> Result<()> {
        if !self.refresh_pending {
            return Ok(());
        }
        let result = self.refresh(true).await;
        self.refresh_pending = false;
        result
    }

    pub fn refresh_pending(&self) -> bool {
        self.refresh_pending
    }

    pub async fn send_text(&mut self, text: &str) -> Result<SendOutcome> {
        self.session.composer_mut().set(text);
        self.session.send_text().await
    }

    pub async fn send_image(&mut self, upload: ImageUpload) -> Result<SendOutcome> {
        self.session.send_image(upload).await
    }

    pub async fn close_chat(&mut self) {
        self.session.close().await;
        self.active = None;
    }

    pub async fn unmount(self) {
        self.session.unmount().await;
    }

    pub fn summaries(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    /// Summary of the active conversation in the latest list.
    pub fn active_summary(&self) -> Option<&ConversationSummary> {
        let active = self.active.as_ref()?;
        self.summaries
            .iter()
            .find(|summary| &summary.conversation_key == active)
    }

    pub fn active(&self) -> Option<&ConversationKey> {
        self.active.as_ref()
    }

    pub fn me(&self) -> Option<&Identity> {
        self.me.as_ref()
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ConversationSession {
        &mut self.session
    }
}
