//! In-memory fakes and fixtures shared by unit tests.

use crate::api::{ChatApi, HistoryResponse, ImageUpload, UploadResponse};
use crate::channel::{ChannelEvent, ChannelLink, ChannelManager, ClientEvent, Connector, ServerEvent};
use crate::config::ChatConfig;
use crate::conversation::{ConversationKey, ConversationList};
use crate::error::{ChannelError, Error, Result};
use crate::session::SessionStore;
use crate::surface::SurfaceDeps;
use crate::{Identity, Message, MessageBody};

use chrono::{DateTime, TimeZone as _, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub fn text_message(id: &str, key: &str, sender: &str, text: &str) -> Message {
    text_message_at(id, key, sender, text, 0)
}

pub fn text_message_at(id: &str, key: &str, sender: &str, text: &str, offset_secs: i64) -> Message {
    Message {
        id: id.into(),
        conversation_key: ConversationKey::new(key),
        document_id: None,
        sender_id: sender.into(),
        sender: None,
        body: MessageBody::text(text),
        created_at: base_time() + chrono::Duration::seconds(offset_secs),
    }
}

pub fn image_message(id: &str, key: &str, sender: &str, url: &str) -> Message {
    Message {
        body: MessageBody::image(url),
        ..text_message(id, key, sender, "")
    }
}

pub fn identity(id: &str, full_name: &str) -> Identity {
    Identity {
        full_name: Some(full_name.into()),
        ..Identity::new(id)
    }
}

/// Next fan-out event, failing the test if nothing arrives within two seconds.
pub async fn next_event(receiver: &mut broadcast::Receiver<ChannelEvent>) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(2), receiver.recv())
        .await
        .expect("event should arrive in time")
        .expect("event channel should be open")
}

/// Surface dependencies wired to in-memory fakes.
pub fn deps(connector: &Arc<MemoryConnector>, api: &Arc<FakeApi>, token: Option<&str>) -> SurfaceDeps {
    deps_with(connector, api, token, ChatConfig::default())
}

pub fn deps_with(
    connector: &Arc<MemoryConnector>,
    api: &Arc<FakeApi>,
    token: Option<&str>,
    chat: ChatConfig,
) -> SurfaceDeps {
    let session = Arc::new(match token {
        Some(token) => SessionStore::with_token(token),
        None => SessionStore::new(),
    });
    let channel = Arc::new(ChannelManager::new(
        connector.clone(),
        session.clone(),
        chat.event_buffer,
    ));
    SurfaceDeps {
        channel,
        api: api.clone(),
        session,
        chat,
    }
}

#[derive(Default)]
struct ConnectorState {
    tokens: Vec<String>,
    sent: Vec<ClientEvent>,
    outbound_rx: Option<mpsc::UnboundedReceiver<ClientEvent>>,
    inbound_tx: Option<mpsc::UnboundedSender<ServerEvent>>,
    reject_token: bool,
    refuse: bool,
}

impl ConnectorState {
    fn drain_outbound(&mut self) {
        if let Some(outbound_rx) = self.outbound_rx.as_mut() {
            while let Ok(event) = outbound_rx.try_recv() {
                self.sent.push(event);
            }
        }
    }
}

/// Channel transport that records emitted frames and lets tests push server events.
#[derive(Default)]
pub struct MemoryConnector {
    state: Mutex<ConnectorState>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next connects fail as if the server rejected the token.
    pub fn reject_token(&self) {
        self.state.lock().reject_token = true;
    }

    /// Make the next connects fail as if nothing listened.
    pub fn refuse_connections(&self) {
        self.state.lock().refuse = true;
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().tokens.len()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.state.lock().tokens.clone()
    }

    /// Every frame emitted so far, across connections.
    pub fn sent(&self) -> Vec<ClientEvent> {
        let mut state = self.state.lock();
        state.drain_outbound();
        state.sent.clone()
    }

    pub fn sent_joins(&self) -> usize {
        self.sent()
            .iter()
            .filter(|event| matches!(event, ClientEvent::Join(_)))
            .count()
    }

    /// Deliver a server event on the live connection.
    pub fn push(&self, event: ServerEvent) {
        self.state
            .lock()
            .inbound_tx
            .as_ref()
            .expect("connector should be connected")
            .send(event)
            .expect("inbound stream should be open");
    }

    /// Simulate the server closing the connection.
    pub fn drop_connection(&self) {
        let mut state = self.state.lock();
        state.drain_outbound();
        state.outbound_rx = None;
        state.inbound_tx = None;
    }
}

impl Connector for MemoryConnector {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self, token: &str) -> Result<ChannelLink> {
        let mut state = self.state.lock();
        if state.reject_token {
            return Err(Error::NotAuthenticated);
        }
        if state.refuse {
            return Err(ChannelError::Connect("connection refused".into()).into());
        }
        state.tokens.push(token.to_string());
        state.drain_outbound();

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        state.outbound_rx = Some(outbound_rx);
        state.inbound_tx = Some(inbound_tx);

        let inbound = futures::stream::unfold(inbound_rx, |mut receiver| async move {
            receiver.recv().await.map(|event| (event, receiver))
        });
        Ok(ChannelLink {
            outbound,
            inbound: Box::pin(inbound),
        })
    }
}

#[derive(Default)]
struct FakeApiState {
    history: VecDeque<Result<HistoryResponse>>,
    uploads: VecDeque<Result<UploadResponse>>,
    conversations: VecDeque<Result<ConversationList>>,
    history_calls: Vec<(String, String, u32)>,
    upload_calls: Vec<(String, String)>,
    conversation_calls: usize,
    history_delay: Option<Duration>,
}

/// Chat API with scripted responses. Unscripted calls succeed with empty data.
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeApiState>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_history(&self, response: Result<HistoryResponse>) {
        self.state.lock().history.push_back(response);
    }

    pub fn queue_upload(&self, response: Result<UploadResponse>) {
        self.state.lock().uploads.push_back(response);
    }

    pub fn queue_conversations(&self, response: Result<ConversationList>) {
        self.state.lock().conversations.push_back(response);
    }

    /// Hold every history response back for `delay`.
    pub fn delay_history(&self, delay: Duration) {
        self.state.lock().history_delay = Some(delay);
    }

    pub fn history_calls(&self) -> Vec<(String, String, u32)> {
        self.state.lock().history_calls.clone()
    }

    pub fn upload_calls(&self) -> Vec<(String, String)> {
        self.state.lock().upload_calls.clone()
    }

    pub fn conversation_calls(&self) -> usize {
        self.state.lock().conversation_calls
    }
}

impl ChatApi for FakeApi {
    async fn history(
        &self,
        document_id: &str,
        target_user_id: &str,
        limit: u32,
    ) -> Result<HistoryResponse> {
        let (delay, response) = {
            let mut state = self.state.lock();
            state
                .history_calls
                .push((document_id.to_string(), target_user_id.to_string(), limit));
            (state.history_delay, state.history.pop_front())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        response.unwrap_or_else(|| {
            Ok(HistoryResponse {
                conversation_key: None,
                messages: Vec::new(),
                me: None,
                partner: None,
            })
        })
    }

    async fn upload_image(
        &self,
        document_id: &str,
        target_user_id: &str,
        upload: ImageUpload,
    ) -> Result<UploadResponse> {
        let response = {
            let mut state = self.state.lock();
            state
                .upload_calls
                .push((document_id.to_string(), target_user_id.to_string()));
            state.uploads.pop_front()
        };
        response.unwrap_or_else(|| {
            Ok(UploadResponse {
                image_url: format!("https://cdn.test/{}", upload.file_name),
                conversation_key: None,
            })
        })
    }

    async fn conversations(&self) -> Result<ConversationList> {
        let response = {
            let mut state = self.state.lock();
            state.conversation_calls += 1;
            state.conversations.pop_front()
        };
        response.unwrap_or_else(|| Ok(ConversationList::default()))
    }
}
