//! ChannelManager: owns the single live connection and fans inbound events out.

use crate::channel::protocol::{
    ChannelEvent, ClientEvent, JoinRequest, LeaveRequest, OutgoingMessage, ServerEvent,
};
use crate::channel::traits::{ConnectorDyn, InboundStream};
use crate::conversation::ConversationKey;
use crate::error::{ChannelError, Error, Result};
use crate::session::SessionStore;
use crate::UserId;

use arc_swap::ArcSwapOption;
use futures::StreamExt as _;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;

struct LiveConnection {
    outbound: mpsc::UnboundedSender<ClientEvent>,
    pump: JoinHandle<()>,
}

impl LiveConnection {
    fn is_alive(&self) -> bool {
        !self.outbound.is_closed() && !self.pump.is_finished()
    }
}

/// Lazily connects, reconnects after a drop, and broadcasts every inbound event.
///
/// Surfaces hold an `Arc<ChannelManager>` and call [`subscribe`](Self::subscribe)
/// before [`ensure`](Self::ensure) so no event is missed.
pub struct ChannelManager {
    connector: Arc<dyn ConnectorDyn>,
    session: Arc<SessionStore>,
    events: broadcast::Sender<ChannelEvent>,
    connection: Mutex<Option<LiveConnection>>,
    connected_user: Arc<ArcSwapOption<String>>,
}

impl ChannelManager {
    pub fn new(connector: Arc<dyn ConnectorDyn>, session: Arc<SessionStore>, buffer: usize) -> Self {
        let (events, _) = broadcast::channel(buffer.max(1));
        Self {
            connector,
            session,
            events,
            connection: Mutex::new(None),
            connected_user: Arc::new(ArcSwapOption::empty()),
        }
    }

    /// Receive every inbound event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Connect if there is no live connection. Fails fast without a token.
    pub async fn ensure(&self) -> Result<()> {
        let token = self.session.require_token()?;
        let mut connection = self.connection.lock().await;

        if connection.as_ref().is_some_and(LiveConnection::is_alive) {
            return Ok(());
        }
        if let Some(stale) = connection.take() {
            tracing::debug!("replacing dead channel connection");
            stale.pump.abort();
        }

        let link = match self.connector.connect(&token).await {
            Ok(link) => link,
            Err(Error::NotAuthenticated) => {
                self.session.clear();
                return Err(Error::NotAuthenticated);
            }
            Err(error) => {
                tracing::warn!(connector = self.connector.name(), %error, "channel connect failed");
                return Err(error);
            }
        };

        let pump = tokio::spawn(pump_events(
            link.inbound,
            self.events.clone(),
            self.connected_user.clone(),
        ));
        *connection = Some(LiveConnection {
            outbound: link.outbound,
            pump,
        });
        tracing::debug!(connector = self.connector.name(), "channel ready");
        Ok(())
    }

    /// Ask to join the conversation with `target_user_id` about a document.
    pub async fn join(&self, document_id: &str, target_user_id: &str) -> Result<()> {
        self.ensure().await?;
        self.emit(ClientEvent::Join(JoinRequest {
            document_id: document_id.into(),
            target_user_id: target_user_id.into(),
        }))
        .await
    }

    /// Leave a conversation. Does nothing when there is no live connection.
    pub async fn leave(&self, conversation_key: &ConversationKey) -> Result<()> {
        if !self.is_connected().await {
            return Ok(());
        }
        self.emit(ClientEvent::Leave(LeaveRequest {
            conversation_key: conversation_key.clone(),
        }))
        .await
    }

    pub async fn send(&self, message: OutgoingMessage) -> Result<()> {
        self.ensure().await?;
        self.emit(ClientEvent::Message(message)).await
    }

    async fn emit(&self, event: ClientEvent) -> Result<()> {
        let connection = self.connection.lock().await;
        let live = connection.as_ref().ok_or(ChannelError::Closed)?;
        live.outbound
            .send(event)
            .map_err(|_| Error::from(ChannelError::Closed))
    }

    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(LiveConnection::is_alive)
    }

    /// The user id announced by `chat:connected` on the current connection.
    pub fn connected_user(&self) -> Option<UserId> {
        self.connected_user
            .load_full()
            .map(|user_id| UserId::from(user_id.as_str()))
    }

    /// Close the connection. A later `ensure()` builds a fresh one.
    pub async fn dispose(&self) {
        if let Some(live) = self.connection.lock().await.take() {
            live.pump.abort();
            self.connected_user.store(None);
            tracing::info!("channel disposed");
        }
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        if let Some(live) = self.connection.get_mut().take() {
            live.pump.abort();
        }
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("connector", &self.connector.name())
            .field("subscribers", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}

async fn pump_events(
    mut inbound: InboundStream,
    events: broadcast::Sender<ChannelEvent>,
    connected_user: Arc<ArcSwapOption<String>>,
) {
    while let Some(event) = inbound.next().await {
        if let ServerEvent::Connected { user_id } = &event {
            tracing::debug!(%user_id, "channel acknowledged connection");
            connected_user.store(Some(Arc::new(user_id.to_string())));
        }
        // No subscribers is fine.
        let _ = events.send(ChannelEvent::Server(event));
    }
    connected_user.store(None);
    tracing::info!("channel disconnected");
    let _ = events.send(ChannelEvent::Disconnected);
}
