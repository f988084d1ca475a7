//! mc-session
//!
//! Client-side play session for the Minecraft Java protocol: connection
//! lifecycle, packet-driven entity tracking, listener fan-out and a 50 ms
//! tick loop.  The wire codec and the authentication flow live outside this
//! crate and plug in through [`transport`].
//!
//! ## Architecture
//!
//! ```text
//! Session  (session.rs)               ← lifecycle state machine, public API
//!   ├── World  (world.rs)             ← entity registry + self-player
//!   │     ▲ mutated by dispatch()  (dispatch.rs)
//!   ├── ListenerSet  (listener.rs)    ← ordered, copy-on-write fan-out
//!   │     └── ChannelListener  (events.rs)  ← bounded event channel
//!   ├── TickLoop  (tick.rs)           ← one thread per connection
//!   ├── LogBuffer  (log_buffer.rs)    ← last N diagnostic entries
//!   └── dyn Transport  (transport.rs) ← opened by a Connector per connect
//! ```
//!
//! Inbound events arrive on the transport's delivery thread, ticks on the
//! tick thread; the public API is callable from any thread.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod identity;
pub mod listener;
pub mod log_buffer;
pub mod protocol;
pub mod session;
pub mod tick;
pub mod transport;
pub mod types;
pub mod world;

// Convenience re-exports
pub use config::SessionConfig;
pub use error::SessionError;
pub use events::{SessionEvent, Subscription};
pub use identity::ClientToken;
pub use listener::{ListenerId, SessionListener};
pub use log_buffer::LogBuffer;
pub use protocol::{ChatMessage, ClientPacket, MessageType, MetadataEntry, MetadataValue, ServerPacket};
pub use session::Session;
pub use transport::{
    ChannelConnector, ChannelTransport, Connector, Credentials, RemoteEnd, Transport,
    TransportEvent, TransportSink,
};
pub use types::{
    Account, ConnectionState, GameProfile, LogEntry, LogLevel, Rotation, ServerEndpoint,
    SessionInfo, Vec3,
};
pub use world::{Entity, EntityKind, SelfPlayer, World};
