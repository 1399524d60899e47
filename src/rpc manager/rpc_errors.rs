use solana_client::client_error::ClientError;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use thiserror::Error;

/// Ledger transport error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The ledger or the invoked program refused the transaction
    #[error("Transaction rejected: {message}")]
    Rejected {
        signature: Option<Signature>,
        message: String,
    },

    /// Confirmation was not observed in time
    #[error("Confirmation timed out after {waited_ms}ms (signature: {signature})")]
    Timeout {
        signature: Signature,
        waited_ms: u64,
    },

    /// Transport-level errors (network, connection, server)
    #[error("Network error: {0}")]
    Network(String),

    #[error("Account not found: {address}")]
    AccountNotFound { address: Pubkey },

    /// Account data could not be decoded as the expected token state
    #[error("Decode error: {0}")]
    Decode(String),
}

impl TransportError {
    /// Classify an RPC client error raised while sending `signature`
    ///
    /// Errors carrying a transaction error (preflight failures included) are
    /// program rejections; everything else is a transport failure.
    pub fn from_send_error(err: &ClientError, signature: Option<Signature>) -> Self {
        match err.get_transaction_error() {
            Some(tx_err) => TransportError::Rejected {
                signature,
                message: tx_err.to_string(),
            },
            None => TransportError::Network(err.to_string()),
        }
    }
}

impl From<ClientError> for TransportError {
    fn from(err: ClientError) -> Self {
        TransportError::Network(err.to_string())
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;
    use solana_client::client_error::ClientErrorKind;
    use solana_client::rpc_request::{RpcError, RpcResponseErrorData};
    use solana_sdk::transaction::TransactionError;

    #[test]
    fn test_send_error_with_transaction_error_is_rejection() {
        let err = ClientError::from(ClientErrorKind::TransactionError(
            TransactionError::AccountNotFound,
        ));
        let sig = Signature::from([3u8; 64]);
        match TransportError::from_send_error(&err, Some(sig)) {
            TransportError::Rejected { signature, .. } => assert_eq!(signature, Some(sig)),
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn test_send_error_without_transaction_error_is_network() {
        let rpc_err = RpcError::RpcResponseError {
            code: 500,
            message: "Internal server error".to_string(),
            data: RpcResponseErrorData::Empty,
        };
        let err = ClientError::from(ClientErrorKind::RpcError(rpc_err));
        assert!(matches!(
            TransportError::from_send_error(&err, None),
            TransportError::Network(_)
        ));
    }
}
