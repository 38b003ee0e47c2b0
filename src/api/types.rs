//! Request and response payloads of the chat REST endpoints.

use crate::conversation::ConversationKey;
use crate::error::{ChatError, Error, Result};
use crate::{Identity, Message};

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Image extensions the upload endpoint accepts.
pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];

/// Response of `GET /api/chat/history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    #[serde(default)]
    pub conversation_key: Option<ConversationKey>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub me: Option<Identity>,
    #[serde(default)]
    pub partner: Option<Identity>,
}

/// Response of `POST /api/chat/upload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub image_url: String,
    #[serde(default)]
    pub conversation_key: Option<ConversationKey>,
}

/// An image file about to be uploaded.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let mime_type = mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .to_string();
        Self {
            file_name,
            mime_type,
            bytes,
        }
    }

    /// Read an image from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ChatError::InvalidImage(format!("{} has no file name", path.display())))?
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::new(file_name, bytes))
    }

    /// Lower-cased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
    }

    /// Reject files the upload endpoint would refuse, before any network work.
    pub fn validate(&self) -> Result<()> {
        if self.bytes.is_empty() {
            return Err(invalid(format!("{} is empty", self.file_name)));
        }
        match self.extension() {
            Some(ext) if ALLOWED_IMAGE_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
            Some(ext) => Err(invalid(format!("unsupported image format .{ext}"))),
            None => Err(invalid(format!("{} has no file extension", self.file_name))),
        }
    }
}

fn invalid(reason: String) -> Error {
    ChatError::InvalidImage(reason).into()
}
