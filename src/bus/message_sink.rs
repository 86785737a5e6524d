use super::bus_message::Envelope;
use thiserror::Error;

/// Failure reported by a sink for one delivery attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The receiver refused the message; retrying cannot help.
    #[error("rejected by receiver: {0}")]
    Rejected(String),
    /// The receiver could not take the message right now.
    #[error("receiver unavailable: {0}")]
    Unavailable(String),
}

/// Receiving end of one bus route.
///
/// `deliver` runs on the dispatching thread (the caller for Critical messages, the
/// dispatch loop otherwise) and must not block or send on the bus itself. An `Ok`
/// return is the delivery acknowledgement.
pub trait MessageSink: Send + Sync {
    fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError>;
}
