//! One conversation as seen from one surface.
//!
//! Opening loads history, seeds the dedup set, resolves the key, and joins the
//! room. Inbound channel events then flow through [`ConversationSession::next_update`],
//! which merges messages for the current key exactly once and drives the join
//! and pending-send timers.

use crate::api::ImageUpload;
use crate::channel::{ChannelEvent, ServerEvent};
use crate::conversation::{ConversationKey, HistoryFetcher, KeyResolver, KeySource, MergeOutcome, MessageLog};
use crate::error::{ChatError, Error, Result};
use crate::outbound::{
    Composer, OutboundDispatcher, PendingMessage, PendingOutbox, SendOutcome, SendTarget,
};
use crate::surface::{SurfaceDeps, SurfaceKind};
use crate::{DocumentId, Identity, Message, UserId};

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Who the conversation is with, about which document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTarget {
    pub document_id: DocumentId,
    pub partner_id: UserId,
    /// Partner snapshot already known to the surface, if any.
    pub partner: Option<Identity>,
    /// Key known before history loads (a summary's key, for instance).
    pub fallback_key: Option<ConversationKey>,
}

impl ChatTarget {
    pub fn new(document_id: impl Into<DocumentId>, partner_id: impl Into<UserId>) -> Self {
        Self {
            document_id: document_id.into(),
            partner_id: partner_id.into(),
            partner: None,
            fallback_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStatus {
    Closed,
    Loading,
    Open,
}

/// Progress of the room join for the current conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Idle,
    /// `attempt` counts re-emissions so far.
    Pending { attempt: u32, deadline: Instant },
    Joined,
    /// No acknowledgment after every retry. The surface stays usable.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// History rendered and join emitted.
    Opened,
    /// History could not be loaded; the panel is open and empty with an inline error.
    HistoryFailed,
    /// Closed before history arrived. Nothing was rendered or joined.
    Abandoned,
    /// The surface has nobody to chat with.
    Unavailable,
}

/// Something the host should render.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Appended {
        message: Message,
        index: usize,
        /// Pending send this message confirmed.
        reconciled: Option<Uuid>,
    },
    Joined {
        key: ConversationKey,
    },
    Left,
    /// Server-pushed error, shown inline.
    Error(String),
    Undelivered(Vec<PendingMessage>),
    JoinRetried {
        attempt: u32,
    },
    JoinFailed,
    Disconnected,
    /// A message for a conversation other than the open one.
    ForeignMessage {
        key: ConversationKey,
    },
}

enum Wake {
    Event(std::result::Result<ChannelEvent, RecvError>),
    Timer,
}

/// Shared open/join/merge/send/close logic behind every surface.
pub struct ConversationSession {
    kind: SurfaceKind,
    deps: SurfaceDeps,
    history: HistoryFetcher,
    dispatcher: OutboundDispatcher,
    events: broadcast::Receiver<ChannelEvent>,
    target: Option<ChatTarget>,
    keys: KeyResolver,
    log: MessageLog,
    me: Option<Identity>,
    partner: Option<Identity>,
    error: Option<ChatError>,
    status: ChatStatus,
    join: JoinState,
    outbox: PendingOutbox,
    composer: Composer,
    alive: CancellationToken,
    /// Join emissions for the open conversation still awaiting `chat:joined`.
    unacked_joins: u32,
    /// Acknowledgments still owed for conversations this session already left.
    /// The server answers in emission order, so these arrive first.
    stale_joins: u32,
}

impl ConversationSession {
    /// Subscribes to the channel immediately so nothing is missed once joined.
    pub fn new(kind: SurfaceKind, deps: SurfaceDeps) -> Self {
        let history = HistoryFetcher::new(
            deps.api.clone(),
            deps.session.clone(),
            deps.chat.history_limit,
        );
        let dispatcher = OutboundDispatcher::new(deps.channel.clone(), deps.api.clone());
        let events = deps.channel.subscribe();
        let log = MessageLog::new(deps.chat.merge_order);
        let outbox = PendingOutbox::new(deps.chat.pending_timeout);

        Self {
            kind,
            deps,
            history,
            dispatcher,
            events,
            target: None,
            keys: KeyResolver::new(),
            log,
            me: None,
            partner: None,
            error: None,
            status: ChatStatus::Closed,
            join: JoinState::Idle,
            outbox,
            composer: Composer::new(),
            alive: CancellationToken::new(),
            unacked_joins: 0,
            stale_joins: 0,
        }
    }

    /// Open a conversation, closing the current one first.
    ///
    /// Without a session token this fails with `Error::NotAuthenticated` before
    /// any history fetch or channel connection.
    pub async fn open(&mut self, target: ChatTarget) -> Result<OpenOutcome> {
        if !self.deps.session.is_authenticated() {
            tracing::info!(surface = %self.kind, "chat requires sign-in");
            return Err(Error::NotAuthenticated);
        }
        if self.status != ChatStatus::Closed {
            self.close().await;
        }
        if self.alive.is_cancelled() {
            self.alive = CancellationToken::new();
        }

        self.retire_joins();
        self.drain_events();
        self.log.reset();
        self.keys.reset();
        self.outbox.clear();
        self.error = None;
        self.join = JoinState::Idle;
        self.status = ChatStatus::Loading;
        self.partner = target.partner.clone();

        let provisional = target.fallback_key.clone().or_else(|| {
            self.deps.channel.connected_user().map(|me| {
                ConversationKey::derive(&target.document_id, &me, &target.partner_id)
            })
        });
        if let Some(key) = provisional {
            self.keys.offer(key, KeySource::Guessed);
        }
        self.target = Some(target.clone());

        let alive = self.alive.clone();
        let fetched = tokio::select! {
            _ = alive.cancelled() => None,
            result = self.history.fetch(&target.document_id, &target.partner_id) => Some(result),
        };
        let fetched = match fetched {
            Some(fetched) if !alive.is_cancelled() => fetched,
            _ => {
                tracing::debug!(surface = %self.kind, "chat closed while history was loading");
                self.status = ChatStatus::Closed;
                self.target = None;
                return Ok(OpenOutcome::Abandoned);
            }
        };

        let history = match fetched {
            Ok(history) => history,
            Err(Error::NotAuthenticated) => {
                self.status = ChatStatus::Closed;
                self.target = None;
                return Err(Error::NotAuthenticated);
            }
            Err(error) => {
                self.error = Some(match error {
                    Error::Chat(error) => error,
                    other => ChatError::HistoryLoad(other.user_message()),
                });
                self.status = ChatStatus::Open;
                return Ok(OpenOutcome::HistoryFailed);
            }
        };

        if history.me.is_some() {
            self.me = history.me;
        }
        if history.partner.is_some() {
            self.partner = history.partner;
        }
        let count = self.log.seed(history.messages);
        if let Some(key) = history.key {
            self.keys.offer(key, KeySource::History);
        }
        self.status = ChatStatus::Open;
        tracing::info!(
            surface = %self.kind,
            document_id = %target.document_id,
            partner_id = %target.partner_id,
            conversation_key = ?self.keys.current().map(ConversationKey::as_str),
            count,
            "chat opened"
        );

        self.send_join(0).await?;
        Ok(OpenOutcome::Opened)
    }

    async fn send_join(&mut self, attempt: u32) -> Result<()> {
        let Some(target) = self.target.as_ref() else {
            return Ok(());
        };
        match self
            .deps
            .channel
            .join(&target.document_id, &target.partner_id)
            .await
        {
            Ok(()) => {
                self.unacked_joins += 1;
                self.join = JoinState::Pending {
                    attempt,
                    deadline: Instant::now() + self.deps.chat.join_timeout,
                };
                Ok(())
            }
            Err(Error::NotAuthenticated) => {
                self.join = JoinState::Failed;
                Err(Error::NotAuthenticated)
            }
            Err(error) => {
                tracing::warn!(surface = %self.kind, %error, "failed to join conversation");
                self.join = JoinState::Failed;
                self.error = Some(ChatError::JoinFailed);
                Ok(())
            }
        }
    }

    /// Wait for the next thing worth rendering.
    ///
    /// Returns `None` only when the channel manager is gone.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            let deadline = self.next_deadline();
            let sleep_until = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            let wake = tokio::select! {
                received = self.events.recv() => Wake::Event(received),
                _ = tokio::time::sleep_until(sleep_until), if deadline.is_some() => Wake::Timer,
            };

            let update = match wake {
                Wake::Event(Ok(event)) => self.apply(event),
                Wake::Event(Err(RecvError::Lagged(skipped))) => {
                    tracing::warn!(surface = %self.kind, skipped, "surface fell behind the channel");
                    None
                }
                Wake::Event(Err(RecvError::Closed)) => return None,
                Wake::Timer => self.on_timer(Instant::now()).await,
            };
            if update.is_some() {
                return update;
            }
        }
    }

    /// Fold one channel event into the session.
    pub fn apply(&mut self, event: ChannelEvent) -> Option<SessionUpdate> {
        match event {
            ChannelEvent::Server(ServerEvent::Message(message)) => {
                return self.merge_inbound(message);
            }
            ChannelEvent::Server(ServerEvent::Joined {
                ref conversation_key,
            }) => {
                if self.stale_joins > 0 {
                    self.stale_joins -= 1;
                    tracing::debug!(%conversation_key, "discarding acknowledgment of an earlier join");
                    return None;
                }
                self.unacked_joins = self.unacked_joins.saturating_sub(1);
            }
            ChannelEvent::Disconnected => {
                // Frames owed by the old connection never arrive.
                self.unacked_joins = 0;
                self.stale_joins = 0;
            }
            _ => {}
        }
        if self.status == ChatStatus::Closed {
            return None;
        }

        match event {
            ChannelEvent::Server(ServerEvent::Connected { user_id }) => {
                if self.me.is_none() {
                    self.me = Some(Identity::new(user_id));
                }
                None
            }
            ChannelEvent::Server(ServerEvent::Joined { conversation_key }) => {
                if !matches!(self.join, JoinState::Pending { .. } | JoinState::Failed) {
                    tracing::debug!(%conversation_key, "ignoring unexpected join acknowledgment");
                    return None;
                }
                self.keys.offer(conversation_key.clone(), KeySource::Joined);
                self.join = JoinState::Joined;
                if self.error == Some(ChatError::JoinFailed) {
                    self.error = None;
                }
                tracing::debug!(surface = %self.kind, %conversation_key, "joined conversation");
                Some(SessionUpdate::Joined {
                    key: conversation_key,
                })
            }
            ChannelEvent::Server(ServerEvent::Left { conversation_key }) => {
                let ours = conversation_key
                    .as_ref()
                    .is_none_or(|key| self.keys.matches(key));
                if !ours || self.join != JoinState::Joined {
                    return None;
                }
                self.join = JoinState::Idle;
                Some(SessionUpdate::Left)
            }
            ChannelEvent::Server(ServerEvent::Error { message }) => {
                let message = message
                    .filter(|message| !message.trim().is_empty())
                    .unwrap_or_else(|| "Chat error".into());
                tracing::warn!(surface = %self.kind, %message, "server reported a chat error");
                self.error = Some(ChatError::Remote(message.clone()));
                Some(SessionUpdate::Error(message))
            }
            ChannelEvent::Server(ServerEvent::Message(_)) => None,
            ChannelEvent::Disconnected => {
                self.join = JoinState::Idle;
                self.error = Some(ChatError::Disconnected);
                Some(SessionUpdate::Disconnected)
            }
        }
    }

    fn merge_inbound(&mut self, message: Message) -> Option<SessionUpdate> {
        if self.status == ChatStatus::Closed {
            return Some(SessionUpdate::ForeignMessage {
                key: message.conversation_key,
            });
        }

        if !self.keys.matches(&message.conversation_key) {
            let provisional = matches!(self.keys.source(), None | Some(KeySource::Guessed));
            if !(provisional && self.addresses_target(&message)) {
                tracing::trace!(
                    conversation_key = %message.conversation_key,
                    "message for another conversation"
                );
                return Some(SessionUpdate::ForeignMessage {
                    key: message.conversation_key,
                });
            }
            self.keys
                .offer(message.conversation_key.clone(), KeySource::Guessed);
        }

        match self.log.merge(message.clone()) {
            MergeOutcome::Appended { index } => {
                let me = self.me_id();
                let reconciled = self
                    .outbox
                    .reconcile(&message, me.as_deref())
                    .map(|entry| entry.correlation_id);
                Some(SessionUpdate::Appended {
                    message,
                    index,
                    reconciled,
                })
            }
            MergeOutcome::Duplicate => None,
        }
    }

    /// Whether a message with an unconfirmed key plainly belongs to the open conversation.
    fn addresses_target(&self, message: &Message) -> bool {
        let Some(target) = self.target.as_ref() else {
            return false;
        };
        let same_document = message
            .document_id
            .as_deref()
            .is_none_or(|document_id| document_id == &*target.document_id);
        let me = self.me_id();
        same_document
            && (message.is_from(&target.partner_id)
                || me.is_some_and(|me| message.is_from(&me)))
    }

    async fn on_timer(&mut self, now: Instant) -> Option<SessionUpdate> {
        if let JoinState::Pending { attempt, deadline } = self.join {
            if now < deadline {
                return self.expire_pending(now);
            }
            if attempt < self.deps.chat.join_retries {
                let attempt = attempt + 1;
                tracing::warn!(surface = %self.kind, attempt, "join not acknowledged, retrying");
                if let Err(error) = self.send_join(attempt).await {
                    let message = error.user_message();
                    self.error = Some(ChatError::Unavailable(message.clone()));
                    return Some(SessionUpdate::Error(message));
                }
                return Some(SessionUpdate::JoinRetried { attempt });
            }
            tracing::warn!(surface = %self.kind, "join never acknowledged");
            self.join = JoinState::Failed;
            self.error = Some(ChatError::JoinFailed);
            return Some(SessionUpdate::JoinFailed);
        }
        self.expire_pending(now)
    }

    fn expire_pending(&mut self, now: Instant) -> Option<SessionUpdate> {
        let expired = self.outbox.expire(now);
        let first = expired.first()?;
        tracing::warn!(
            surface = %self.kind,
            count = expired.len(),
            correlation_id = %first.correlation_id,
            "message was not delivered"
        );
        self.error = Some(ChatError::Undelivered {
            preview: first.preview(),
        });
        Some(SessionUpdate::Undelivered(expired))
    }

    fn next_deadline(&self) -> Option<Instant> {
        let join = match self.join {
            JoinState::Pending { deadline, .. } => Some(deadline),
            _ => None,
        };
        [join, self.outbox.next_deadline()].into_iter().flatten().min()
    }

    fn send_target(&self) -> Result<SendTarget> {
        let target = self
            .target
            .as_ref()
            .filter(|_| self.status == ChatStatus::Open)
            .ok_or_else(|| ChatError::Unavailable("no conversation is open".into()))?;
        Ok(SendTarget {
            document_id: target.document_id.clone(),
            partner_id: Some(target.partner_id.clone()).filter(|id| !id.is_empty()),
            conversation_key: self.keys.current().cloned(),
        })
    }

    /// Send the composer's text.
    pub async fn send_text(&mut self) -> Result<SendOutcome> {
        let result = match self.send_target() {
            Ok(target) => self.dispatcher.send_text(&target, &mut self.composer).await,
            Err(error) => Err(error),
        };
        self.record_send(result)
    }

    pub async fn send_image(&mut self, upload: ImageUpload) -> Result<SendOutcome> {
        let result = match self.send_target() {
            Ok(target) => self.dispatcher.send_image(&target, upload).await,
            Err(error) => Err(error),
        };
        self.record_send(result)
    }

    fn record_send(&mut self, result: Result<SendOutcome>) -> Result<SendOutcome> {
        match &result {
            Ok(SendOutcome::Dispatched { body, key_hint }) => {
                let correlation_id = self.outbox.push(body.clone());
                tracing::trace!(%correlation_id, kind = %body.kind(), "message pending");
                if let Some(key) = key_hint {
                    self.keys.offer(key.clone(), KeySource::Upload);
                }
            }
            Ok(SendOutcome::Skipped) | Err(Error::NotAuthenticated) => {}
            Err(Error::Chat(error)) => self.error = Some(error.clone()),
            Err(error) => self.error = Some(ChatError::Send(error.user_message())),
        }
        result
    }

    /// Close the panel: leave the room and stop applying updates.
    pub async fn close(&mut self) {
        if self.status == ChatStatus::Closed {
            return;
        }
        self.alive.cancel();
        if let Some(key) = self.keys.current().cloned() {
            if let Err(error) = self.deps.channel.leave(&key).await {
                tracing::warn!(surface = %self.kind, %error, "failed to leave conversation");
            }
        }
        tracing::info!(surface = %self.kind, "chat closed");
        self.retire_joins();
        self.status = ChatStatus::Closed;
        self.target = None;
        self.join = JoinState::Idle;
        self.outbox.clear();
    }

    /// Fold whatever the previous conversation left buffered while closed, so
    /// join bookkeeping sees every acknowledgment.
    fn drain_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.apply(event);
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(surface = %self.kind, skipped, "surface fell behind the channel");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    /// Acknowledgments still owed to the current conversation become stale.
    fn retire_joins(&mut self) {
        self.stale_joins += std::mem::take(&mut self.unacked_joins);
    }

    /// The page hosting this session is going away: close and drop the channel.
    pub async fn unmount(mut self) {
        self.close().await;
        self.deps.channel.dispose().await;
    }

    /// Cancelling this token abandons the open in progress.
    pub fn teardown_token(&self) -> CancellationToken {
        self.alive.clone()
    }

    fn me_id(&self) -> Option<UserId> {
        self.me
            .as_ref()
            .map(|me| me.id.clone())
            .or_else(|| self.deps.channel.connected_user())
    }

    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }

    pub fn status(&self) -> ChatStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == ChatStatus::Open
    }

    pub fn join_state(&self) -> JoinState {
        self.join
    }

    pub fn messages(&self) -> &[Message] {
        self.log.messages()
    }

    pub fn pending(&self) -> &[PendingMessage] {
        self.outbox.entries()
    }

    pub fn error(&self) -> Option<&ChatError> {
        self.error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn me(&self) -> Option<&Identity> {
        self.me.as_ref()
    }

    pub fn partner(&self) -> Option<&Identity> {
        self.partner.as_ref()
    }

    pub fn conversation_key(&self) -> Option<&ConversationKey> {
        self.keys.current()
    }

    pub fn target(&self) -> Option<&ChatTarget> {
        self.target.as_ref()
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn composer_mut(&mut self) -> &mut Composer {
        &mut self.composer
    }

    pub fn deps(&self) -> &SurfaceDeps {
        &self.deps
    }
}

impl std::fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSession")
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("join", &self.join)
            .field("conversation_key", &self.keys.current())
            .field("messages", &self.log.len())
            .finish_non_exhaustive()
    }
}
