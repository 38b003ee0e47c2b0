//! The authenticated live channel shared by every chat surface.
//!
//! One connection per session, owned by a [`ChannelManager`] that surfaces
//! receive explicitly. Inbound events fan out to every subscriber.

pub mod manager;
pub mod protocol;
pub mod traits;
pub mod websocket;

pub use manager::ChannelManager;
pub use protocol::{ChannelEvent, ClientEvent, JoinRequest, LeaveRequest, OutgoingMessage, ServerEvent};
pub use traits::{ChannelLink, Connector, ConnectorDyn, InboundStream};
pub use websocket::WebSocketConnector;
