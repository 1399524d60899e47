//! Wallet management and the signing agent abstraction

use anyhow::{Context, Result};
use async_trait::async_trait;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::rpc_manager::{LedgerTransport, TransportError};

/// Signing agent failures
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// The agent declined or was unable to sign
    #[error("Signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A connected wallet: exposes its public key and signs-and-sends
/// transactions on the caller's behalf
#[async_trait]
pub trait SigningAgent: Send + Sync {
    fn pubkey(&self) -> Pubkey;

    /// Add the agent's signature and hand the transaction to the ledger
    async fn sign_and_send_transaction(
        &self,
        transaction: Transaction,
    ) -> Result<Signature, AgentError>;
}

/// Wallet manager holding a local keypair
pub struct WalletManager {
    keypair: Arc<Keypair>,
}

impl WalletManager {
    /// Create a new wallet manager from a keypair file
    pub fn from_file(path: &str) -> Result<Self> {
        let keypair_bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read keypair file: {}", path))?;

        let keypair = if keypair_bytes.len() == 64 {
            // Raw bytes format - validate before conversion
            if keypair_bytes.iter().all(|&b| b == 0) {
                anyhow::bail!("Invalid keypair: all-zero key rejected");
            }
            Keypair::try_from(keypair_bytes.as_slice()).context("Invalid keypair bytes")?
        } else {
            // JSON format
            let json: Vec<u8> = serde_json::from_slice(&keypair_bytes)
                .context("Failed to parse keypair JSON")?;
            if json.len() != 64 {
                anyhow::bail!("Invalid keypair length: expected 64 bytes, got {}", json.len());
            }
            if json.iter().all(|&b| b == 0) {
                anyhow::bail!("Invalid keypair: all-zero key rejected");
            }
            Keypair::try_from(json.as_slice()).context("Invalid keypair from JSON")?
        };

        Ok(Self {
            keypair: Arc::new(keypair),
        })
    }

    /// Create a new wallet manager from a keypair
    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

impl Clone for WalletManager {
    fn clone(&self) -> Self {
        Self {
            keypair: Arc::clone(&self.keypair),
        }
    }
}

/// Signing agent backed by a local keypair, sending through a ledger transport
pub struct KeypairAgent {
    wallet: WalletManager,
    transport: Arc<dyn LedgerTransport>,
}

impl KeypairAgent {
    pub fn new(wallet: WalletManager, transport: Arc<dyn LedgerTransport>) -> Self {
        Self { wallet, transport }
    }
}

#[async_trait]
impl SigningAgent for KeypairAgent {
    fn pubkey(&self) -> Pubkey {
        self.wallet.pubkey()
    }

    async fn sign_and_send_transaction(
        &self,
        mut transaction: Transaction,
    ) -> Result<Signature, AgentError> {
        let blockhash = transaction.message.recent_blockhash;
        transaction
            .try_partial_sign(&[self.wallet.keypair()], blockhash)
            .map_err(|e| AgentError::Signing(e.to_string()))?;

        if !transaction.is_signed() {
            return Err(AgentError::Signing(
                "transaction still requires signatures the agent does not hold".to_string(),
            ));
        }

        debug!(payer = %self.wallet.pubkey(), "Agent signed transaction");
        Ok(self.transport.submit(&transaction).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::LedgerSimulator;
    use crate::types::ProgramIds;
    use solana_sdk::{hash::Hash, instruction::Instruction};
    use std::io::Write;

    #[test]
    fn test_from_file_json() {
        let keypair = Keypair::new();
        let bytes = keypair.to_bytes().to_vec();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&bytes).unwrap().as_bytes())
            .unwrap();

        let wallet = WalletManager::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(wallet.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_from_file_raw_bytes() {
        let keypair = Keypair::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&keypair.to_bytes()).unwrap();

        let wallet = WalletManager::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(wallet.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_from_file_rejects_zero_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 64]).unwrap();
        let err = WalletManager::from_file(file.path().to_str().unwrap())
            .err()
            .unwrap();
        assert!(err.to_string().contains("all-zero"));
    }

    #[test]
    fn test_from_file_missing() {
        assert!(WalletManager::from_file("/nonexistent/id.json").is_err());
    }

    #[tokio::test]
    async fn test_agent_refuses_foreign_signature_requirement() {
        let transport = Arc::new(LedgerSimulator::new(ProgramIds::default()));
        let agent = KeypairAgent::new(WalletManager::from_keypair(Keypair::new()), transport);

        // Fee payer is someone else: the agent cannot complete the signatures
        let stranger = Pubkey::new_unique();
        let ix = Instruction::new_with_bytes(Pubkey::new_unique(), &[1], vec![]);
        let mut tx = Transaction::new_with_payer(&[ix], Some(&stranger));
        tx.message.recent_blockhash = Hash::new_unique();

        let result = agent.sign_and_send_transaction(tx).await;
        assert!(matches!(result, Err(AgentError::Signing(_))));
    }
}
