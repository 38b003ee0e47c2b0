//! Chat surfaces: the UI contexts that host a conversation view.
//!
//! All of them share one [`ConversationSession`]; the wrappers only decide how
//! the partner and document are resolved.

pub mod document;
pub mod inbox;
pub mod session;

pub use document::{DocumentChat, DocumentInfo};
pub use inbox::InboxSurface;
pub use session::{ChatStatus, ChatTarget, ConversationSession, JoinState, OpenOutcome, SessionUpdate};

use crate::api::{ChatApiDyn, HttpChatApi};
use crate::channel::{ChannelManager, WebSocketConnector};
use crate::config::{ChatConfig, Config};
use crate::error::Result;
use crate::session::SessionStore;

use std::sync::Arc;

/// Which UI context hosts a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    /// Inline widget next to a document preview.
    DocumentViewer,
    /// Widget on the document detail page.
    DocumentDetail,
    /// The inbox page listing every conversation.
    Inbox,
}

impl std::fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceKind::DocumentViewer => write!(f, "document_viewer"),
            SurfaceKind::DocumentDetail => write!(f, "document_detail"),
            SurfaceKind::Inbox => write!(f, "inbox"),
        }
    }
}

/// Everything a surface needs, injected by the host.
#[derive(Clone)]
pub struct SurfaceDeps {
    pub channel: Arc<ChannelManager>,
    pub api: Arc<dyn ChatApiDyn>,
    pub session: Arc<SessionStore>,
    pub chat: ChatConfig,
}

impl SurfaceDeps {
    /// Wire the HTTP client and the WebSocket channel from configuration.
    pub fn from_config(config: &Config, session: Arc<SessionStore>) -> Result<Self> {
        let api = HttpChatApi::new(
            config.api_base_url.clone(),
            config.request_timeout,
            session.clone(),
        )?;
        let connector = WebSocketConnector::new(config.channel_url.clone());
        let channel = Arc::new(ChannelManager::new(
            Arc::new(connector),
            session.clone(),
            config.chat.event_buffer,
        ));
        Ok(Self {
            channel,
            api: Arc::new(api),
            session,
            chat: config.chat,
        })
    }
}

impl std::fmt::Debug for SurfaceDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceDeps")
            .field("channel", &self.channel)
            .field("chat", &self.chat)
            .finish_non_exhaustive()
    }
}
