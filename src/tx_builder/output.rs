//! Transaction assembly
//!
//! Turns a [`PendingOperation`] into a legacy transaction paid by the
//! connected agent. Extra signers sign here; the fee payer signature is
//! left for the signing agent.

use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Keypair, transaction::Transaction};
use uuid::Uuid;

use crate::tx_builder::errors::WorkflowError;
use crate::tx_builder::instructions::PendingOperation;
use crate::types::ActionKind;

/// Transaction ready for the signing agent
pub struct TxBuildOutput {
    pub operation_id: Uuid,
    pub action: ActionKind,
    /// Partially signed transaction (extra signers only)
    pub tx: Transaction,
    /// Every key the message requires a signature from, payer first
    pub required_signers: Vec<Pubkey>,
    pub creates_accounts: Vec<(Pubkey, Pubkey)>,
}

impl TxBuildOutput {
    /// Assemble `op` with `payer` as fee payer
    pub fn assemble(
        op: PendingOperation,
        payer: &Pubkey,
        blockhash: Hash,
    ) -> Result<Self, WorkflowError> {
        if op.is_empty() {
            return Err(WorkflowError::PreconditionMissing(format!(
                "{} has no instructions to submit",
                op.action
            )));
        }

        let mut tx = Transaction::new_with_payer(&op.instructions, Some(payer));
        tx.message.recent_blockhash = blockhash;

        if !op.extra_signers.is_empty() {
            let signers: Vec<&Keypair> = op.extra_signers.iter().collect();
            tx.try_partial_sign(&signers[..], blockhash).map_err(|e| {
                WorkflowError::Encoding(format!("transaction could not be signed: {}", e))
            })?;
        }

        let num_signers = tx.message.header.num_required_signatures as usize;
        let required_signers = tx.message.account_keys[..num_signers].to_vec();

        Ok(Self {
            operation_id: op.id,
            action: op.action,
            tx,
            required_signers,
            creates_accounts: op.creates_accounts,
        })
    }
}

impl std::fmt::Debug for TxBuildOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxBuildOutput")
            .field("operation_id", &self.operation_id)
            .field("action", &self.action)
            .field("instructions", &self.tx.message.instructions.len())
            .field("required_signers", &self.required_signers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{
        instruction::{AccountMeta, Instruction},
        signature::{Signature, Signer},
    };

    #[test]
    fn test_assemble_signs_extra_signers_only() {
        let payer = Pubkey::new_unique();
        let mint = Keypair::new();
        let mut op = PendingOperation::new(ActionKind::CreateMint);
        op.instructions.push(Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[1, 2, 3],
            vec![
                AccountMeta::new(payer, true),
                AccountMeta::new(mint.pubkey(), true),
            ],
        ));
        op.extra_signers.push(mint.insecure_clone());

        let output = TxBuildOutput::assemble(op, &payer, Hash::new_unique()).unwrap();
        assert_eq!(output.required_signers, vec![payer, mint.pubkey()]);
        assert_eq!(output.tx.signatures[0], Signature::default());
        assert_ne!(output.tx.signatures[1], Signature::default());
        assert!(!output.tx.is_signed());
    }

    #[test]
    fn test_assemble_rejects_empty_operation() {
        let op = PendingOperation::new(ActionKind::CreateAccount);
        let result = TxBuildOutput::assemble(op, &Pubkey::new_unique(), Hash::new_unique());
        assert!(matches!(result, Err(WorkflowError::PreconditionMissing(_))));
    }
}
