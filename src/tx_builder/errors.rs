//! Error types for the workflow sequencer
//!
//! Every action entry point fails with one of five kinds:
//! - Local failures (`NotConnected`, `PreconditionMissing`, `Encoding`) are
//!   detected before any network call is attempted
//! - Remote failures (`SubmissionRejected`, `TransportFailure`) carry the
//!   transaction signature when one is known
//!
//! Nothing is retried automatically; `is_retryable` only advises the caller.

use serde::{Deserialize, Serialize};
use solana_sdk::signature::Signature;
use thiserror::Error;

use crate::rpc_manager::TransportError;
use crate::wallet::AgentError;

/// Comprehensive error type for all workflow actions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// No signing agent is connected
    #[error("No signing agent connected")]
    NotConnected,

    /// A required mint or account is not known to the client
    #[error("Precondition missing: {0}")]
    PreconditionMissing(String),

    /// A value cannot be represented in the instruction layout
    /// (amount over 64 bits, unparsable address, out-of-range rate)
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The remote program or the network rejected the transaction
    ///
    /// This includes program-enforced failures such as a transfer on a
    /// non-transferable mint, a fee mismatch or a wrong withdraw authority.
    #[error("Submission rejected: {message}")]
    SubmissionRejected {
        signature: Option<Signature>,
        message: String,
    },

    /// Network or connectivity failure
    #[error("Transport failure: {message}")]
    TransportFailure {
        signature: Option<Signature>,
        message: String,
    },
}

/// Serializable error kind for result objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotConnected,
    PreconditionMissing,
    EncodingError,
    SubmissionRejected,
    TransportFailure,
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConnected => ErrorKind::NotConnected,
            Self::PreconditionMissing(_) => ErrorKind::PreconditionMissing,
            Self::Encoding(_) => ErrorKind::EncodingError,
            Self::SubmissionRejected { .. } => ErrorKind::SubmissionRejected,
            Self::TransportFailure { .. } => ErrorKind::TransportFailure,
        }
    }

    /// Signature of the submitted transaction, when one was produced
    pub fn signature(&self) -> Option<Signature> {
        match self {
            Self::SubmissionRejected { signature, .. } | Self::TransportFailure { signature, .. } => {
                *signature
            }
            _ => None,
        }
    }

    /// Whether the failure was detected locally, before any network call
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::PreconditionMissing(_) | Self::Encoding(_)
        )
    }

    /// Check if retrying the same action might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportFailure { .. })
    }

    /// Get the error category for logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotConnected => "wallet",
            Self::PreconditionMissing(_) => "precondition",
            Self::Encoding(_) => "encoding",
            Self::SubmissionRejected { .. } => "program",
            Self::TransportFailure { .. } => "transport",
        }
    }
}

// Convenience constructors for common error scenarios
impl WorkflowError {
    pub fn no_active_mint() -> Self {
        Self::PreconditionMissing("no active mint selected".to_string())
    }

    pub fn missing_account(owner: impl std::fmt::Display) -> Self {
        Self::PreconditionMissing(format!("no associated account for owner {}", owner))
    }

    pub fn rejected(signature: Option<Signature>, message: impl Into<String>) -> Self {
        Self::SubmissionRejected {
            signature,
            message: message.into(),
        }
    }
}

impl From<TransportError> for WorkflowError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Rejected { signature, message } => {
                Self::SubmissionRejected { signature, message }
            }
            TransportError::Timeout { signature, waited_ms } => Self::TransportFailure {
                signature: Some(signature),
                message: format!("confirmation not observed after {}ms", waited_ms),
            },
            TransportError::Network(message) => Self::TransportFailure {
                signature: None,
                message,
            },
            TransportError::AccountNotFound { address } => {
                Self::PreconditionMissing(format!("account {} does not exist", address))
            }
            TransportError::Decode(message) => Self::Encoding(message),
        }
    }
}

impl From<AgentError> for WorkflowError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Signing(message) => Self::SubmissionRejected {
                signature: None,
                message: format!("signing agent refused: {}", message),
            },
            AgentError::Transport(inner) => inner.into(),
        }
    }
}
