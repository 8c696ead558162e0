// Streaming module - per-session progress events fanned out to subscribers

pub mod broadcaster;
pub mod events;
pub mod transport;

pub use broadcaster::SessionStreamBroadcaster;
pub use events::{
    to_sse_frame, SocketEnvelope, StreamEvent, StreamEventKind, StreamingContext, ALL_AGENTS,
};
pub use transport::{ChannelTransport, StreamTransport};
