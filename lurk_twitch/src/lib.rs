//! Reading Twitch chat over as many websocket connections as it takes.
pub mod config;

mod connection;
mod message;
mod parser;
mod pool;
mod roster;
mod tags;
mod transport;
mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use connection::{Connection, State, Subscriber};
pub use message::{
    EndOfMotd, Membership, Message, Notice, Ping, Pong, Privmsg, Raw, Reconnect,
};
pub use parser::parse_line;
pub use pool::{Manager, Messages};
pub use roster::{ChannelRecord, MemoryRoster, Roster};
pub use tags::Tags;
pub use transport::{Dialer, Frame, FrameSink, FrameStream, Transport, WebSocket};
pub use types::{normalize_channel, ChatEvent};
