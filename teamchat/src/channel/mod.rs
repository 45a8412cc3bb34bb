//! Realtime channel to the agent backend.
//!
//! Speaks socket.io over a websocket, normalizes every inbound payload and
//! fans it out to registered handlers.

mod backoff;
mod connection;
mod events;
mod frame;
mod handlers;

pub use backoff::ReconnectPolicy;
pub use connection::{
    ChannelConfig, ConnectionState, RealtimeChannel, AGENT_RESPONSE_EVENT, CLIENT_READY_EVENT,
};
pub use events::{parse_timestamp, ChannelError, InboundMessage, FALLBACK_AGENT, INVALID_MESSAGE};
pub use frame::{FrameError, OpenInfo, Packet};
pub use handlers::{HandlerRegistry, Subscription};
