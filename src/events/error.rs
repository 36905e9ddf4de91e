use thiserror::Error;

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("Invalid event signature '{signature}': {reason}")]
    InvalidSignature { signature: String, reason: String },

    #[error("No active node connection")]
    NotConnected,

    #[error("Subscription failed for {contract} / {signature}: {reason}")]
    SubscribeFailed {
        contract: String,
        signature: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ListenerError>;
