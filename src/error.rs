//! Error types shared by the session driver and the bridge.

use std::time::Duration;

use thiserror::Error;

use crate::core::transport::TransportError;

/// Failure of a translation backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("translation backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("`{command}` timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("Translation failed: {0}")]
    Translation(#[from] TranslateError),

    #[error("Malformed command: {0}")]
    Malformed(String),

    #[error("Busy: another command is in flight")]
    Busy,

    #[error("Queue full ({0} commands waiting)")]
    QueueFull(usize),

    #[error("Disconnected")]
    Disconnected,

    #[error("Invalid prompt pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl BridgeError {
    /// The request failed but the session is still usable
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, BridgeError::Transport(_) | BridgeError::Disconnected)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(BridgeError::Busy.is_recoverable());
        assert!(BridgeError::Malformed("empty".into()).is_recoverable());
        assert!(BridgeError::Translation(TranslateError::Unavailable("down".into())).is_recoverable());
        assert!(!BridgeError::Disconnected.is_recoverable());
        assert!(!BridgeError::Transport(TransportError::Closed).is_recoverable());
    }
}
