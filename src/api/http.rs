//! reqwest-backed implementation of the chat REST endpoints.

use crate::api::traits::ChatApi;
use crate::api::types::{HistoryResponse, ImageUpload, UploadResponse};
use crate::conversation::ConversationList;
use crate::error::{ApiError, Error, Result};
use crate::session::SessionStore;

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Chat API client over HTTP with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
    session: Arc<SessionStore>,
}

impl HttpChatApi {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        session: Arc<SessionStore>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::from)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/chat/{path}", self.base_url)
    }

    /// Send a prepared request and decode a JSON body.
    ///
    /// A 401 clears the stored token. Other failures carry the server's
    /// `error` (or `message`) field when the body has one.
    async fn execute<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request.send().await.map_err(ApiError::from)?;
        let status = response.status();
        let response_text = response.text().await.map_err(ApiError::from)?;

        if status == reqwest::StatusCode::UNAUTHORIZED {
            tracing::warn!(body = %truncate_body(&response_text), "session rejected by server");
            self.session.clear();
            return Err(Error::NotAuthenticated);
        }

        if !status.is_success() {
            let message = serde_json::from_str::<serde_json::Value>(&response_text)
                .ok()
                .and_then(|body| {
                    body["error"]
                        .as_str()
                        .or_else(|| body["message"].as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            tracing::debug!(status = status.as_u16(), %message, "chat api request failed");
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        serde_json::from_str(&response_text).map_err(|error| {
            ApiError::Decode(format!("{error}; body: {}", truncate_body(&response_text))).into()
        })
    }
}

impl ChatApi for HttpChatApi {
    async fn history(
        &self,
        document_id: &str,
        target_user_id: &str,
        limit: u32,
    ) -> Result<HistoryResponse> {
        let token = self.session.require_token()?;
        let limit = limit.to_string();
        let request = self
            .client
            .get(self.endpoint("history"))
            .bearer_auth(token.as_str())
            .query(&[
                ("documentId", document_id),
                ("targetUserId", target_user_id),
                ("limit", limit.as_str()),
            ]);

        let response: HistoryResponse = self.execute(request).await?;
        tracing::debug!(
            document_id,
            target_user_id,
            count = response.messages.len(),
            "history loaded"
        );
        Ok(response)
    }

    async fn upload_image(
        &self,
        document_id: &str,
        target_user_id: &str,
        upload: ImageUpload,
    ) -> Result<UploadResponse> {
        let token = self.session.require_token()?;
        let size = upload.bytes.len();
        let file = Part::bytes(upload.bytes)
            .file_name(upload.file_name.clone())
            .mime_str(&upload.mime_type)
            .map_err(ApiError::from)?;
        let form = Form::new()
            .text("documentId", document_id.to_string())
            .text("targetUserId", target_user_id.to_string())
            .part("file", file);

        let request = self
            .client
            .post(self.endpoint("upload"))
            .bearer_auth(token.as_str())
            .multipart(form);

        let response: UploadResponse = self.execute(request).await?;
        tracing::info!(document_id, file_name = %upload.file_name, size, "image uploaded");
        Ok(response)
    }

    async fn conversations(&self) -> Result<ConversationList> {
        let token = self.session.require_token()?;
        let request = self
            .client
            .get(self.endpoint("conversations"))
            .bearer_auth(token.as_str());
        self.execute(request).await
    }
}

fn truncate_body(body: &str) -> &str {
    const LIMIT: usize = 512;
    if body.len() <= LIMIT {
        return body;
    }
    let mut end = LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
