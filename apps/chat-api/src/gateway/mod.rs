//! Real-time comment gateway: wire format, sessions, the connection
//! registry, the broadcast hub and the WebSocket endpoint.

pub mod events;
pub mod fanout;
pub mod handler;
pub mod presence;
pub mod registry;
pub mod resume;
pub mod server;
pub mod session;
