//! Error taxonomy shared by every layer of the agent.
//!
//! Workflows never let these escape: they are folded into an
//! [`Outcome`](crate::workflow::Outcome) at the workflow boundary. The
//! variants still matter there because the scheduler reacts differently to a
//! policy denial, a rejected credential and a flaky network.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Local policy forbids talking to the configured backend.
    #[error("blocked by local policy: {0}")]
    PolicyDenied(String),

    /// Backend answered 401.
    #[error("401 Unauthorized: {0}")]
    Unauthorized(String),

    /// Connection, DNS, TLS or timeout failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend answered with a non-success status other than 401.
    #[error("backend returned HTTP {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("enrollment did not succeed within {0:?}")]
    PreflightTimeout(Duration),

    #[error("another agent instance holds {0}")]
    AlreadyRunning(PathBuf),
}

pub type Result<T> = std::result::Result<T, AgentError>;

/// Coarse classification used by the scheduler when deciding what to do
/// after a failed workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    PolicyDenied,
    Unauthorized,
    Transport,
    Backend,
    /// Anything local: I/O, serialization, configuration, missing token.
    Local,
}

impl AgentError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::PolicyDenied(_) => FailureKind::PolicyDenied,
            Self::Unauthorized(_) => FailureKind::Unauthorized,
            Self::Transport(_) => FailureKind::Transport,
            Self::Backend { .. } => FailureKind::Backend,
            Self::Io(_)
            | Self::Serialization(_)
            | Self::InvalidConfig(_)
            | Self::PreflightTimeout(_)
            | Self::AlreadyRunning(_) => FailureKind::Local,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(
            AgentError::PolicyDenied("x".into()).kind(),
            FailureKind::PolicyDenied
        );
        assert_eq!(
            AgentError::Unauthorized("x".into()).kind(),
            FailureKind::Unauthorized
        );
        assert_eq!(
            AgentError::Backend {
                status: 500,
                body: String::new()
            }
            .kind(),
            FailureKind::Backend
        );
        assert_eq!(
            AgentError::Io(std::io::Error::other("disk")).kind(),
            FailureKind::Local
        );
    }

    #[test]
    fn unauthorized_message_keeps_body() {
        let e = AgentError::Unauthorized("token revoked".into());
        assert_eq!(e.to_string(), "401 Unauthorized: token revoked");
    }
}
