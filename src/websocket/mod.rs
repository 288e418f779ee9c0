// WebSocket module - Pusher Channels transport
pub mod connection;
pub mod factory;
pub mod protocol;
pub mod provider;

pub use connection::SocketConnection;
pub use factory::WebSocketFactory;
pub use protocol::PusherFrame;
pub use provider::WebSocketProvider;
