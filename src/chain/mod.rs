pub mod connection;
pub mod error;
pub mod state;

pub use connection::{ChainConnection, ConnectionEvent, WsProvider};
pub use error::ChainError;
pub use state::{ConnectionStatus, ReconnectPolicy};
