//! REST endpoints consumed by the conversation engine.
//!
//! History fetch, image upload, and conversation summaries. Every call carries
//! the session token as a bearer credential and short-circuits with
//! `Error::NotAuthenticated` when there is none.

pub mod http;
pub mod traits;
pub mod types;

pub use http::HttpChatApi;
pub use traits::{ChatApi, ChatApiDyn};
pub use types::{HistoryResponse, ImageUpload, UploadResponse};
