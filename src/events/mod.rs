pub mod error;
pub mod listener;
pub mod normalizer;

pub use error::ListenerError;
pub use listener::{EventListener, ListenerSignal};
pub use normalizer::EventSignature;
