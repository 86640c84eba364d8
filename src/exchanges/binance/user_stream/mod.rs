//! User data stream session and socket multiplexer
//!
//! - `SessionKeyManager` owns the listen key and its keep-alive/rotation timers
//! - `ConnectionRegistry` is the single record of which sockets are open
//! - `SocketSupervisor` runs one socket from handshake to teardown
//! - `BinanceStreams` is the public surface over all three
pub mod events;
pub mod facade;
pub mod identity;
pub mod registry;
pub mod session;
pub mod supervisor;
mod timer;

pub use events::{EventBus, StreamUpdate, UpdateCategory};
pub use facade::BinanceStreams;
pub use identity::{endpoint_url, StreamIdentity};
pub use registry::{ConnectionEntry, ConnectionHandle, ConnectionRegistry};
pub use session::{ListenKeyApi, SessionKeyManager, SessionToken, UserDataRelay};
pub use supervisor::SocketSupervisor;
