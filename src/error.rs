//! # Error Taxonomy
//!
//! ## Purpose
//! A single typed error enum shared by every game subsystem. The variant decides
//! the propagation policy:
//! - `Validation` / `State`: surfaced to the originating client as an `error`
//!   frame; the connection stays open and no state changes.
//! - `TransientIo`: absorbed by the caller (logged, backed off, retried); never
//!   causes a room transition.
//! - `Funds`: a terminally rejected payout or refund; surfaced through room
//!   state broadcasts, operator intervention expected.
//! - `Invariant`: a programming error. Logged with full context, the offending
//!   transition is refused, the process keeps running.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GameError {
    /// Client supplied a malformed or unauthorized request.
    #[error("validation error: {0}")]
    Validation(String),

    /// Request is well-formed but not applicable to the current state.
    #[error("state error: {0}")]
    State(String),

    /// Chain RPC or socket failure; retryable.
    #[error("transient i/o error: {0}")]
    TransientIo(String),

    /// A payout or refund was rejected terminally.
    #[error("funds error: {0}")]
    Funds(String),

    /// Internal invariant violated; the transition that observed it is refused.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl GameError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientIo(msg.into())
    }

    pub fn funds(msg: impl Into<String>) -> Self {
        Self::Funds(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Short machine-readable code carried in `error` frames.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::State(_) => "state",
            Self::TransientIo(_) => "transient",
            Self::Funds(_) => "funds",
            Self::Invariant(_) => "invariant",
        }
    }

    /// Whether the error should be reported back to the client that caused it.
    pub fn is_client_fault(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::State(_))
    }

    /// Whether a caller performing I/O should retry after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }
}

pub type GameResult<T> = Result<T, GameError>;
