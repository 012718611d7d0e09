use std::fmt;

use sip_core::MessageError;
use smol_str::SmolStr;

/// Errors surfaced by the forking layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForkError {
    /// Max-Forwards reached zero; the branch must not be sent.
    TooManyHops,
    /// A message could not be built.
    Message(MessageError),
    /// The transaction layer refused to start a client transaction.
    Transaction(SmolStr),
    /// Unknown fork behavior name in configuration.
    UnknownBehavior(SmolStr),
    /// The fork driver task is gone.
    DriverStopped,
}

impl fmt::Display for ForkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyHops => write!(f, "Max-Forwards exhausted"),
            Self::Message(err) => write!(f, "cannot build message: {}", err),
            Self::Transaction(reason) => write!(f, "client transaction failed: {}", reason),
            Self::UnknownBehavior(name) => write!(f, "unknown fork behavior {:?}", name),
            Self::DriverStopped => write!(f, "fork driver stopped"),
        }
    }
}

impl std::error::Error for ForkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Message(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MessageError> for ForkError {
    fn from(err: MessageError) -> Self {
        Self::Message(err)
    }
}
