// src/core/errors.rs

//! Defines the primary error type for the entire application.

use thiserror::Error;

/// The main error enum, representing all possible failures within the TSI.
///
/// Using `thiserror` allows for clean error definitions and automatic `From`
/// trait implementations, mirroring the error taxonomy of the design:
/// `ConfigError`, `IdentityError`, `RestoreError`, `ProtocolError`, `IOError`,
/// `HandlerError`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TsiError {
    /// Fatal at startup: a config value violates its constraints, or the
    /// startup invariants are impossible (e.g. root with `switch_uid=false`).
    #[error("configuration error: {0}")]
    Config(String),

    /// Fatal to the current request only: unknown user, attempted root
    /// impersonation, invalid group with enforcement on, kernel refusal.
    #[error("identity error: {0}")]
    Identity(String),

    /// Fatal to the whole worker process: the post-restore verification
    /// gate failed. The process must not serve further requests.
    #[error("restore error: {0}")]
    Restore(String),

    /// Reported as a request failure, loop continues: unknown command tag,
    /// missing `#TSI_IDENTITY` line, malformed message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Connector read/write failure. Ends the worker cleanly.
    #[error("io error: {0}")]
    Io(String),

    /// Any failure surfaced by an external command handler.
    #[error("handler error: {0}")]
    Handler(String),
}

impl TsiError {
    /// True for the two error categories that must not be swallowed: a
    /// `RestoreError` means the process can no longer be trusted to hold
    /// the right identity, and an `Io` error means the peer is gone.
    pub fn is_fatal_to_worker(&self) -> bool {
        matches!(self, TsiError::Restore(_) | TsiError::Io(_))
    }
}

impl From<std::io::Error> for TsiError {
    fn from(e: std::io::Error) -> Self {
        TsiError::Io(e.to_string())
    }
}

impl From<nix::Error> for TsiError {
    fn from(e: nix::Error) -> Self {
        TsiError::Identity(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_and_io_are_fatal() {
        assert!(TsiError::Restore("x".into()).is_fatal_to_worker());
        assert!(TsiError::Io("x".into()).is_fatal_to_worker());
    }

    #[test]
    fn other_variants_are_not_fatal() {
        assert!(!TsiError::Config("x".into()).is_fatal_to_worker());
        assert!(!TsiError::Identity("x".into()).is_fatal_to_worker());
        assert!(!TsiError::Protocol("x".into()).is_fatal_to_worker());
        assert!(!TsiError::Handler("x".into()).is_fatal_to_worker());
    }
}
