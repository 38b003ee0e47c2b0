//! Channel connector trait and dynamic dispatch companion.

use crate::channel::protocol::{ClientEvent, ServerEvent};
use crate::error::Result;

use futures::Stream;
use std::pin::Pin;
use tokio::sync::mpsc;

/// Inbound event stream type. Ends when the connection closes.
pub type InboundStream = Pin<Box<dyn Stream<Item = ServerEvent> + Send>>;

/// One established connection: a sender for outbound frames and the inbound stream.
pub struct ChannelLink {
    pub outbound: mpsc::UnboundedSender<ClientEvent>,
    pub inbound: InboundStream,
}

impl std::fmt::Debug for ChannelLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLink")
            .field("outbound_closed", &self.outbound.is_closed())
            .finish_non_exhaustive()
    }
}

/// Static trait for channel transports.
/// Use this for type-safe implementations.
pub trait Connector: Send + Sync + 'static {
    /// Transport name, for logs.
    fn name(&self) -> &str;

    /// Open an authenticated connection.
    fn connect(&self, token: &str) -> impl std::future::Future<Output = Result<ChannelLink>> + Send;
}

/// Dynamic trait for runtime polymorphism.
/// Use this when you need `Arc<dyn ConnectorDyn>` to swap transports.
pub trait ConnectorDyn: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn connect<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ChannelLink>> + Send + 'a>>;
}

/// Blanket implementation: any type implementing Connector automatically implements ConnectorDyn.
impl<T: Connector> ConnectorDyn for T {
    fn name(&self) -> &str {
        Connector::name(self)
    }

    fn connect<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ChannelLink>> + Send + 'a>> {
        Box::pin(Connector::connect(self, token))
    }
}
