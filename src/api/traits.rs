//! Chat API trait and dynamic dispatch companion.

use crate::api::types::{HistoryResponse, ImageUpload, UploadResponse};
use crate::conversation::ConversationList;
use crate::error::Result;

use std::future::Future;
use std::pin::Pin;

/// Static trait for the chat REST endpoints.
/// Use this for type-safe implementations.
pub trait ChatApi: Send + Sync + 'static {
    /// Past messages (oldest first) plus canonical key and identities.
    fn history(
        &self,
        document_id: &str,
        target_user_id: &str,
        limit: u32,
    ) -> impl Future<Output = Result<HistoryResponse>> + Send;

    /// Upload an image for a conversation and return its hosted URL.
    fn upload_image(
        &self,
        document_id: &str,
        target_user_id: &str,
        upload: ImageUpload,
    ) -> impl Future<Output = Result<UploadResponse>> + Send;

    /// Summaries of every conversation the current user takes part in.
    fn conversations(&self) -> impl Future<Output = Result<ConversationList>> + Send;
}

/// Dynamic trait for runtime polymorphism.
/// Use this when you need `Arc<dyn ChatApiDyn>` so tests can substitute a fake.
pub trait ChatApiDyn: Send + Sync + 'static {
    fn history<'a>(
        &'a self,
        document_id: &'a str,
        target_user_id: &'a str,
        limit: u32,
    ) -> Pin<Box<dyn Future<Output = Result<HistoryResponse>> + Send + 'a>>;

    fn upload_image<'a>(
        &'a self,
        document_id: &'a str,
        target_user_id: &'a str,
        upload: ImageUpload,
    ) -> Pin<Box<dyn Future<Output = Result<UploadResponse>> + Send + 'a>>;

    fn conversations<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<ConversationList>> + Send + 'a>>;
}

/// Blanket implementation: any type implementing ChatApi automatically implements ChatApiDyn.
impl<T: ChatApi> ChatApiDyn for T {
    fn history<'a>(
        &'a self,
        document_id: &'a str,
        target_user_id: &'a str,
        limit: u32,
    ) -> Pin<Box<dyn Future<Output = Result<HistoryResponse>> + Send + 'a>> {
        Box::pin(ChatApi::history(self, document_id, target_user_id, limit))
    }

    fn upload_image<'a>(
        &'a self,
        document_id: &'a str,
        target_user_id: &'a str,
        upload: ImageUpload,
    ) -> Pin<Box<dyn Future<Output = Result<UploadResponse>> + Send + 'a>> {
        Box::pin(ChatApi::upload_image(self, document_id, target_user_id, upload))
    }

    fn conversations<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<ConversationList>> + Send + 'a>> {
        Box::pin(ChatApi::conversations(self))
    }
}
