//! WebSocket transport for the live channel.

use crate::channel::protocol::{ClientEvent, decode_frame, encode_frame};
use crate::channel::traits::{ChannelLink, Connector};
use crate::error::{ChannelError, Error, Result};

use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Connects to the channel endpoint, passing the session token as the `token` query parameter.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    fn authenticated_url(&self, token: &str) -> Result<String> {
        let mut url = reqwest::Url::parse(&self.url)
            .map_err(|error| ChannelError::Connect(format!("invalid channel url: {error}")))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url.into())
    }
}

impl Connector for WebSocketConnector {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn connect(&self, token: &str) -> Result<ChannelLink> {
        let url = self.authenticated_url(token)?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|error| match error {
                tokio_tungstenite::tungstenite::Error::Http(response)
                    if response.status().as_u16() == 401 =>
                {
                    Error::NotAuthenticated
                }
                other => ChannelError::Connect(other.to_string()).into(),
            })?;
        tracing::info!(url = %self.url, "channel connected");

        let (mut write, read) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientEvent>();

        tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                let frame = match encode_frame(&event) {
                    Ok(frame) => frame,
                    Err(error) => {
                        tracing::error!(%error, "failed to encode channel frame");
                        continue;
                    }
                };
                if let Err(error) = write.send(WsMessage::text(frame)).await {
                    tracing::warn!(%error, "channel write failed");
                    break;
                }
            }
            // Every sender is gone.
            let _ = write.send(WsMessage::Close(None)).await;
            tracing::debug!("channel writer stopped");
        });

        let inbound = futures::stream::unfold(read, |mut read| async move {
            loop {
                match read.next().await? {
                    Ok(WsMessage::Text(text)) => match decode_frame(text.as_str()) {
                        Ok(Some(event)) => return Some((event, read)),
                        Ok(None) => continue,
                        Err(error) => {
                            tracing::warn!(%error, "dropping malformed channel frame");
                        }
                    },
                    Ok(WsMessage::Close(frame)) => {
                        tracing::info!(?frame, "channel closed by server");
                        return None;
                    }
                    Ok(_) => continue,
                    Err(error) => {
                        tracing::warn!(%error, "channel read failed");
                        return None;
                    }
                }
            }
        });

        Ok(ChannelLink {
            outbound,
            inbound: Box::pin(inbound),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::protocol::{JoinRequest, ServerEvent};

    use futures::{SinkExt as _, StreamExt as _};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio_tungstenite::tungstenite::http::StatusCode;

    /// Accept one client, announce it, send frames it must skip, and answer its
    /// first frame with `chat:joined`.
    async fn spawn_server(seen_uri: Arc<Mutex<Option<String>>>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let address = listener.local_addr().expect("address");

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let callback = move |request: &Request,
                                 response: Response|
                  -> std::result::Result<Response, ErrorResponse> {
                *seen_uri.lock() = Some(request.uri().to_string());
                Ok(response)
            };
            let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .expect("handshake");
            let (mut write, mut read) = ws.split();

            write
                .send(WsMessage::text(
                    r#"{"event":"chat:connected","data":{"userId":"a"}}"#,
                ))
                .await
                .expect("send connected");
            for frame in [
                r#"{"event":"typing","data":{}}"#,
                "not json",
                r#"{"event":"chat:message","data":{"conversationKey":"a::b::d1","senderId":"b","type":"text","content":"hi","createdAt":"2025-03-01T10:00:00Z"}}"#,
            ] {
                write
                    .send(WsMessage::text(frame))
                    .await
                    .expect("send noise");
            }

            while let Some(Ok(message)) = read.next().await {
                if let WsMessage::Text(text) = message {
                    let frame: serde_json::Value =
                        serde_json::from_str(text.as_str()).expect("client json");
                    assert_eq!(frame["event"], "chat:join");
                    write
                        .send(WsMessage::text(
                            r#"{"event":"chat:joined","data":{"conversationKey":"a::b::d1"}}"#,
                        ))
                        .await
                        .expect("send joined");
                    write.send(WsMessage::Close(None)).await.ok();
                    break;
                }
            }
        });

        format!("ws://{address}/ws")
    }

    #[tokio::test]
    async fn exchanges_frames_and_skips_bad_ones() {
        let seen_uri = Arc::new(Mutex::new(None));
        let url = spawn_server(seen_uri.clone()).await;

        let link = WebSocketConnector::new(url)
            .connect("tok en")
            .await
            .expect("should connect");
        let mut inbound = link.inbound;

        assert_eq!(
            inbound.next().await,
            Some(ServerEvent::Connected { user_id: "a".into() })
        );

        link.outbound
            .send(ClientEvent::Join(JoinRequest {
                document_id: "d1".into(),
                target_user_id: "b".into(),
            }))
            .expect("queue join");

        assert_eq!(
            inbound.next().await,
            Some(ServerEvent::Joined {
                conversation_key: "a::b::d1".into()
            })
        );
        assert_eq!(inbound.next().await, None);
        assert_eq!(seen_uri.lock().as_deref(), Some("/ws?token=tok+en"));
    }

    #[tokio::test]
    async fn rejected_handshake_is_not_authenticated() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let address = listener.local_addr().expect("address");

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let callback = |_: &Request,
                            _: Response|
             -> std::result::Result<Response, ErrorResponse> {
                let mut rejection = ErrorResponse::new(Some("invalid token".into()));
                *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                Err(rejection)
            };
            let _ = tokio_tungstenite::accept_hdr_async(stream, callback).await;
        });

        let error = WebSocketConnector::new(format!("ws://{address}/ws"))
            .connect("expired")
            .await
            .expect_err("handshake is refused");
        assert!(error.is_not_authenticated());
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let address = listener.local_addr().expect("address");
        drop(listener);

        let error = WebSocketConnector::new(format!("ws://{address}/ws"))
            .connect("t")
            .await
            .expect_err("nothing is listening");
        assert!(matches!(error, Error::Channel(ChannelError::Connect(_))));
    }

    #[test]
    fn rejects_an_invalid_url() {
        let connector = WebSocketConnector::new("not a url");
        assert!(connector.authenticated_url("t").is_err());
    }
}
