//! Associated account address derivation and existence checks

use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address_with_program_id;
use std::sync::Arc;
use tracing::debug;

use crate::rpc_manager::{LedgerTransport, TransportError};
use crate::tx_builder::errors::WorkflowError;

/// Derive the associated account of `owner` for `mint` under `token_program`
///
/// Pure: identical inputs always give the identical address.
pub fn derive_associated_address(mint: &Pubkey, owner: &Pubkey, token_program: &Pubkey) -> Pubkey {
    get_associated_token_address_with_program_id(owner, mint, token_program)
}

/// Resolves associated account addresses and asks the ledger whether they exist
#[derive(Clone)]
pub struct AccountResolver {
    transport: Arc<dyn LedgerTransport>,
    token_program: Pubkey,
}

impl AccountResolver {
    pub fn new(transport: Arc<dyn LedgerTransport>, token_program: Pubkey) -> Self {
        Self {
            transport,
            token_program,
        }
    }

    pub fn derive(&self, mint: &Pubkey, owner: &Pubkey) -> Pubkey {
        derive_associated_address(mint, owner, &self.token_program)
    }

    /// "No account found" is `false`; any other transport failure propagates
    pub async fn exists(&self, address: &Pubkey) -> Result<bool, WorkflowError> {
        match self.transport.get_account_info(address).await {
            Ok(account) => {
                debug!(address = %address, exists = account.is_some(), "Account lookup");
                Ok(account.is_some())
            }
            Err(TransportError::AccountNotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::LedgerSimulator;
    use crate::tx_builder::errors::ErrorKind;
    use crate::types::ProgramIds;

    #[test]
    fn test_derivation_is_deterministic() {
        let mint = Pubkey::new_unique();
        let owner = Pubkey::new_unique();
        let program = spl_token_2022::id();

        let first = derive_associated_address(&mint, &owner, &program);
        let second = derive_associated_address(&mint, &owner, &program);
        assert_eq!(first, second);
        assert_ne!(first, derive_associated_address(&owner, &mint, &program));
    }

    #[test]
    fn test_derivation_depends_on_token_program() {
        let mint = Pubkey::new_unique();
        let owner = Pubkey::new_unique();
        assert_ne!(
            derive_associated_address(&mint, &owner, &spl_token_2022::id()),
            derive_associated_address(&mint, &owner, &Pubkey::new_unique())
        );
    }

    #[tokio::test]
    async fn test_exists_false_when_absent() {
        let simulator = Arc::new(LedgerSimulator::new(ProgramIds::default()));
        let resolver = AccountResolver::new(simulator, spl_token_2022::id());
        assert!(!resolver.exists(&Pubkey::new_unique()).await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_propagates_transport_failure() {
        let simulator = Arc::new(LedgerSimulator::new(ProgramIds::default()));
        simulator.fail_next_calls(1);
        let resolver = AccountResolver::new(simulator, spl_token_2022::id());

        let err = resolver.exists(&Pubkey::new_unique()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
    }
}
